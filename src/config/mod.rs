//! Configuration (layered: env > config file > defaults).
//!
//! Built once in `main` and passed by reference; nothing reads it globally.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::auth::{
    FileTokenStore, IdentityClient, TokenStoreConfig, DEFAULT_AUTHORITY_HOST,
};
use crate::error::{CliError, Result};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";
pub const CONFIG_FILE_NAME: &str = "oauthcli.toml";

/// Redirect path served by the callback server for the code flow.
pub const AUTHORIZE_PATH: &str = "/authorize";
/// Redirect path used by the interactive flow and the raw token route.
pub const TOKEN_PATH: &str = "/token";

const ENV_MAPPINGS: [(&str, Field); 6] = [
    ("OAUTHCLI_CLIENT_ID", Field::ClientId),
    ("OAUTHCLI_TENANT_ID", Field::TenantId),
    ("OAUTHCLI_PORT", Field::Port),
    ("OAUTHCLI_SECRET", Field::Secret),
    ("OAUTHCLI_AUTHORITY_HOST", Field::AuthorityHost),
    ("OAUTHCLI_GRAPH_URL", Field::GraphUrl),
];

#[derive(Clone, Copy)]
enum Field {
    ClientId,
    TenantId,
    Port,
    Secret,
    AuthorityHost,
    GraphUrl,
}

/// Application registration and endpoint settings.
#[derive(Clone)]
pub struct AppConfig {
    pub client_id: String,
    pub tenant_id: String,
    pub port: u16,
    pub secret: String,
    pub authority_host: String,
    pub graph_url: String,
    pub cache_dir: PathBuf,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("port", &self.port)
            .field("secret", &if self.secret.is_empty() { "" } else { ".." })
            .field("authority_host", &self.authority_host)
            .field("graph_url", &self.graph_url)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    client_id: Option<String>,
    tenant_id: Option<String>,
    port: Option<u16>,
    secret: Option<String>,
    authority_host: Option<String>,
    graph_url: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl ConfigFile {
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, field) in ENV_MAPPINGS {
            let Some(value) = lookup(var) else {
                continue;
            };
            match field {
                Field::ClientId => self.client_id = Some(value),
                Field::TenantId => self.tenant_id = Some(value),
                Field::Secret => self.secret = Some(value),
                Field::AuthorityHost => self.authority_host = Some(value),
                Field::GraphUrl => self.graph_url = Some(value),
                Field::Port => {
                    let port = value.trim().parse().map_err(|_| {
                        CliError::Configuration(format!("{var} is not a valid port: {value}"))
                    })?;
                    self.port = Some(port);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<AppConfig> {
        let client_id = required(self.client_id, "client_id")?;
        let tenant_id = required(self.tenant_id, "tenant_id")?;
        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(CliError::Configuration("port must be non-zero".to_string()));
        }
        Ok(AppConfig {
            client_id,
            tenant_id,
            port,
            secret: self.secret.unwrap_or_default(),
            authority_host: self
                .authority_host
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            graph_url: self
                .graph_url
                .unwrap_or_else(|| DEFAULT_GRAPH_URL.to_string()),
            cache_dir: self.cache_dir.unwrap_or_else(TokenStoreConfig::default_dir),
        })
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(CliError::Configuration(format!(
            "missing {key}; set it in {CONFIG_FILE_NAME} or the environment"
        ))),
    }
}

impl AppConfig {
    /// Load from `path`, or the first config file found, then apply
    /// `OAUTHCLI_*` environment overrides (`.env` included).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::load_with_env(path, |var| std::env::var(var).ok())
    }

    /// Like [`load`](Self::load) with overrides taken from `lookup`; `.env`
    /// is not read.
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_locations().into_iter().find(|p| p.is_file()),
        };
        let mut raw = match &file {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                let text = std::fs::read_to_string(path).map_err(|err| {
                    CliError::Configuration(format!("reading {}: {err}", path.display()))
                })?;
                toml::from_str::<ConfigFile>(&text)?
            }
            None => ConfigFile::default(),
        };
        raw.apply_env(lookup)?;
        raw.finish()
    }

    /// Parse a config file body without consulting the environment.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str::<ConfigFile>(text)?.finish()
    }

    /// Like [`from_toml_str`](Self::from_toml_str) with overrides taken from
    /// `lookup` instead of the process environment.
    pub fn from_toml_str_with_env<F>(text: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw = toml::from_str::<ConfigFile>(text)?;
        raw.apply_env(lookup)?;
        raw.finish()
    }

    pub fn redirect_uri(&self, path: &str) -> String {
        format!("http://localhost:{}{}", self.port, path)
    }

    pub fn token_store(&self) -> FileTokenStore {
        FileTokenStore::new(TokenStoreConfig::new(self.cache_dir.clone()))
    }

    /// Identity client wired to this tenant, secret, and token cache.
    pub fn identity_client(&self) -> Result<IdentityClient> {
        Ok(
            IdentityClient::new(&self.authority_host, &self.tenant_id, &self.client_id)?
                .with_client_secret(&self.secret)
                .with_token_store(Arc::new(self.token_store())),
        )
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = directories::UserDirs::new() {
        paths.push(dirs.home_dir().join(".oauthcli").join("config.toml"));
    }
    paths
}
