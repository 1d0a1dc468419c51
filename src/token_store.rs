//! Persisted access/refresh credential pair.

use std::sync::{Arc, Mutex};

use chathub_shared::TokenPair;

use crate::storage::Storage;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Single writer for the credential pair. Login, refresh and logout all go
/// through [`set`](Self::set) and [`clear`](Self::clear); nothing else touches
/// the two storage keys.
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.storage.load_raw(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.storage.load_raw(REFRESH_TOKEN_KEY)
    }

    /// Both halves, or `None` if either is missing.
    pub fn pair(&self) -> Option<TokenPair> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        Some(TokenPair {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
        })
    }

    pub fn set(&self, access_token: &str, refresh_token: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let stored = self.storage.save_raw(REFRESH_TOKEN_KEY, refresh_token)
            && self.storage.save_raw(ACCESS_TOKEN_KEY, access_token);
        if !stored {
            // Never leave one half of a rotated pair behind
            self.storage.remove_raw(ACCESS_TOKEN_KEY);
            self.storage.remove_raw(REFRESH_TOKEN_KEY);
            tracing::error!("failed to persist credential pair; stored tokens cleared");
        }
    }

    pub fn set_pair(&self, pair: &TokenPair) {
        self.set(&pair.access_token, &pair.refresh_token);
    }

    /// Idempotent.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.storage.remove_raw(ACCESS_TOKEN_KEY);
        self.storage.remove_raw(REFRESH_TOKEN_KEY);
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
