use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::token::Token;

/// Storage abstraction for cached tokens.
///
/// Entries are keyed by authority (one per tenant) and account, which for
/// this tool is the client id the token was issued to.
pub trait TokenStore: Send + Sync {
    fn load(&self, authority: &str, account: &str) -> Result<Option<Token>, AuthError>;
    fn save(&self, authority: &str, account: &str, token: &Token) -> Result<(), AuthError>;
}

/// Configuration for file-backed token storage.
#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub base_dir: PathBuf,
}

impl TokenStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_cache_dir()
    }
}

/// File-backed token cache, one TOML file per authority/account pair.
///
/// # Example
/// ```no_run
/// use oauthcli::auth::{FileTokenStore, Token, TokenStore, TokenStoreConfig};
///
/// let store = FileTokenStore::new(TokenStoreConfig::new(TokenStoreConfig::default_dir()));
/// let token = Token {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     id_token: None,
///     expires_at: None,
///     last_refresh: None,
///     scopes: None,
///     account_id: None,
/// };
/// store.save("microsoft-common", "client-id", &token)?;
/// # Ok::<(), oauthcli::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(config: TokenStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    fn token_path(&self, authority: &str, account: &str) -> PathBuf {
        let authority = normalize_label(authority);
        let account = normalize_label(account);
        self.base_dir.join(format!("{authority}.{account}.toml"))
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, authority: &str, account: &str) -> Result<Option<Token>, AuthError> {
        let path = self.token_path(authority, account);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: CacheFile = toml::from_str(&raw)?;
        Ok(Some(file.token))
    }

    fn save(&self, authority: &str, account: &str, token: &Token) -> Result<(), AuthError> {
        let path = self.token_path(authority, account);
        Self::ensure_parent(&path)?;
        let file = CacheFile {
            version: 1,
            authority: authority.to_string(),
            account: account.to_string(),
            token: token.clone(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        tracing::debug!(path = %path.display(), "token cached");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    authority: String,
    account: String,
    token: Token,
    saved_at: DateTime<Utc>,
}

fn default_cache_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".oauthcli").join("cache"))
        .unwrap_or_else(|| PathBuf::from(".oauthcli").join("cache"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}
