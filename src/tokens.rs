use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::clients::TokenEndpoint;
use crate::db::Vault;
use crate::error::{AppError, Result};
use crate::models::Token;

/// One async mutex per key, created on demand
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // drop entries nobody holds or waits on
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Keys that currently have a holder or waiter
    pub fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Expiry detection, code exchange and refresh of chat-platform tokens.
///
/// Tokens are persisted through the vault only after the remote call succeeded,
/// and every mutation for one user runs under that user's lock.
pub struct TokenLifecycle {
    endpoint: Arc<dyn TokenEndpoint>,
    vault: Arc<Vault<Token>>,
    locks: KeyedLocks<i64>,
}

impl TokenLifecycle {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, vault: Arc<Vault<Token>>) -> Self {
        Self {
            endpoint,
            vault,
            locks: KeyedLocks::new(),
        }
    }

    /// Table the tokens live in
    pub fn table(&self) -> &str {
        self.vault.table()
    }

    pub fn is_expired(token: &Token, now: DateTime<Utc>) -> bool {
        token.is_expired(now)
    }

    /// Stored token for `user_id`, if any
    pub async fn current(&self, user_id: i64) -> Result<Option<Token>> {
        self.vault.get(&user_id).await
    }

    /// Trade an authorization code for a token and store it
    pub async fn exchange_code(&self, user_id: i64, code: &str) -> Result<Token> {
        let _guard = self.locks.lock(&user_id).await;

        let grant = self.endpoint.exchange_code(code).await?;
        let token = Token::from_grant(grant, Utc::now());
        self.vault.save(&user_id, &token).await?;

        tracing::info!("Stored new token for user {}", user_id);

        Ok(token)
    }

    /// Refresh `stale` and persist the result.
    ///
    /// If another caller already replaced `stale` in storage, the stored token is
    /// returned and no remote call is made.
    pub async fn refresh(&self, user_id: i64, stale: &Token) -> Result<Token> {
        let _guard = self.locks.lock(&user_id).await;

        let stored = self.vault.get(&user_id).await?.ok_or_else(|| AppError::NotFound {
            table: self.vault.table().to_string(),
            key: user_id.to_string(),
        })?;

        if stored.access_token != stale.access_token {
            tracing::debug!("Token for user {} was refreshed concurrently", user_id);
            return Ok(stored);
        }

        let grant = match self.endpoint.refresh(&stale.refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!("Token refresh for user {} failed: {}", user_id, e);
                return Err(e);
            }
        };

        let token = Token::from_grant(grant, Utc::now());
        self.vault.save(&user_id, &token).await?;

        tracing::info!(
            "Refreshed token for user {}, expires at {}",
            user_id,
            token.expires_at
        );

        Ok(token)
    }
}
