#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use oauthcli::auth::{AuthError, DeviceCodeChallenge, PollProgress, Token, TokenStore};
use oauthcli::render::OutputSink;

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<(String, String), Token>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, authority: &str, account: &str, token: Token) {
        self.tokens
            .lock()
            .expect("store lock poisoned")
            .insert((authority.to_string(), account.to_string()), token);
    }

    pub fn get(&self, authority: &str, account: &str) -> Option<Token> {
        self.tokens
            .lock()
            .expect("store lock poisoned")
            .get(&(authority.to_string(), account.to_string()))
            .cloned()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self, authority: &str, account: &str) -> Result<Option<Token>, AuthError> {
        Ok(self.get(authority, account))
    }

    fn save(&self, authority: &str, account: &str, token: &Token) -> Result<(), AuthError> {
        self.seed(authority, account, token.clone());
        Ok(())
    }
}

pub fn token(access_token: &str, expires_at: Option<DateTime<Utc>>) -> Token {
    Token {
        access_token: access_token.to_string(),
        refresh_token: None,
        id_token: None,
        expires_at,
        last_refresh: Some(Utc::now()),
        scopes: None,
        account_id: None,
    }
}

/// Keeps every emitted payload for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().expect("sink lock poisoned").clone()
    }

    pub fn json(&self, index: usize) -> serde_json::Value {
        serde_json::from_slice(&self.payloads()[index]).expect("payload is JSON")
    }
}

impl OutputSink for RecordingSink {
    fn emit(&self, payload: &[u8]) {
        self.payloads
            .lock()
            .expect("sink lock poisoned")
            .push(payload.to_vec());
    }
}

/// Counts pending callbacks and ticks.
#[derive(Default)]
pub struct CountingProgress {
    pub pending: AtomicU32,
    pub ticks: AtomicU64,
}

impl CountingProgress {
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl PollProgress for CountingProgress {
    fn on_pending(&self, _attempt: u32) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn on_tick(&self, _index: u64) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn challenge(interval_secs: u64) -> DeviceCodeChallenge {
    DeviceCodeChallenge {
        device_code: "device-code-1".to_string(),
        user_code: "ABCD-EFGH".to_string(),
        verification_url: "https://microsoft.com/devicelogin".to_string(),
        interval_secs,
        expires_at: Utc::now() + Duration::minutes(15),
        message: None,
    }
}

pub fn expired_challenge(interval_secs: u64) -> DeviceCodeChallenge {
    DeviceCodeChallenge {
        expires_at: Utc::now() - Duration::minutes(1),
        ..challenge(interval_secs)
    }
}
