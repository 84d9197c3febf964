//! Cached bearer credentials for gateways that issue short-lived tokens.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use checkout_types::ProviderError;
use tokio::sync::RwLock;
use tracing::debug;

/// A bearer token with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token issued now.
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
            expires_at,
        }
    }

    /// Token valid for `seconds` from now.
    pub fn expiring_in(value: impl Into<String>, seconds: i64) -> Self {
        Self::new(value, Utc::now() + Duration::seconds(seconds))
    }

    /// Stale `skew` before expiry, capped at half the lifetime so short-lived
    /// tokens are still reused.
    fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let skew = skew.min((self.expires_at - self.issued_at) / 2);
        now + skew < self.expires_at
    }
}

/// Holds the most recent token for one adapter instance.
///
/// Readers share the lock while the token is fresh. A refresh takes the
/// write lock, checks again, and holds the lock across the authentication
/// call so a burst of callers triggers one login.
#[derive(Debug)]
pub struct TokenCache {
    slot: RwLock<Option<AccessToken>>,
    skew: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            skew: Duration::seconds(30),
        }
    }

    /// How long before the reported expiry a token is treated as stale.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// Returns a fresh token, calling `refresh` only if none is cached.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, ProviderError>>,
    {
        {
            let guard = self.slot.read().await;
            if let Some(token) = guard.as_ref().filter(|t| t.is_fresh(Utc::now(), self.skew)) {
                return Ok(token.value.clone());
            }
        }

        let mut guard = self.slot.write().await;
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh(Utc::now(), self.skew)) {
            return Ok(token.value.clone());
        }

        let token = refresh().await?;
        debug!(expires_at = %token.expires_at, "Refreshed access token");
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    /// Seeds the cache, e.g. with a token obtained out of band.
    pub async fn store(&self, token: AccessToken) {
        *self.slot.write().await = Some(token);
    }

    /// Drops the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}
