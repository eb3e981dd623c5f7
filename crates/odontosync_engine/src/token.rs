//! Chained token cache.
//!
//! The insurer's API wants two credentials: a primary gateway token, and a
//! secondary domain token obtained by exchanging a valid primary. Each is
//! cached in its own slot with its own validity window:
//!
//! ```text
//! valid  ⇔  now < issued_at + ttl − safety_margin
//! ```
//!
//! Each slot's check-and-refresh runs under that slot's mutex, so at most one
//! refresh per slot is in flight and every waiter sees its result. Lock order
//! is always secondary → primary.

use crate::clock::{to_delta, Clock, SystemClock};
use crate::config::TokenConfig;
use crate::error::SyncResult;
use crate::instrument::with_logging;
use crate::ports::{AuthPort, IssuedToken};
use chrono::{DateTime, Utc};
use odontosync_protocol::Credentials;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One cached chain link.
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    issued_at: DateTime<Utc>,
    ttl: Duration,
}

impl CachedToken {
    fn from_issued(token: IssuedToken, issued_at: DateTime<Utc>) -> Self {
        Self {
            value: token.value,
            issued_at,
            ttl: token.ttl,
        }
    }

    fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        // A margin at least as long as the TTL makes the token unusable
        let Some(usable) = self.ttl.checked_sub(margin) else {
            return false;
        };
        now < self.issued_at + to_delta(usable)
    }
}

/// Counters describing cache behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStats {
    /// Network calls made for primary tokens.
    pub primary_refreshes: u64,
    /// Network calls made for secondary exchanges.
    pub secondary_refreshes: u64,
}

/// Process-wide cache of the primary and secondary tokens.
pub struct TokenCache<A: AuthPort> {
    auth: A,
    clock: Arc<dyn Clock>,
    margin: Duration,
    primary: Mutex<Option<CachedToken>>,
    secondary: Mutex<Option<CachedToken>>,
    primary_refreshes: AtomicU64,
    secondary_refreshes: AtomicU64,
}

impl<A: AuthPort> TokenCache<A> {
    /// Creates a cache over the system clock.
    pub fn new(auth: A, config: TokenConfig) -> Self {
        Self::with_clock(auth, config, Arc::new(SystemClock))
    }

    /// Creates a cache over a custom clock.
    pub fn with_clock(auth: A, config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            auth,
            clock,
            margin: config.safety_margin,
            primary: Mutex::new(None),
            secondary: Mutex::new(None),
            primary_refreshes: AtomicU64::new(0),
            secondary_refreshes: AtomicU64::new(0),
        }
    }

    /// Returns the auth port.
    pub fn auth(&self) -> &A {
        &self.auth
    }

    /// Returns a valid primary token, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if the refresh fails. The stale token
    /// stays evicted so the next caller retries.
    pub fn obtain_primary(&self) -> SyncResult<String> {
        let mut slot = self.primary.lock();
        let now = self.clock.now();
        if let Some(token) = slot.as_ref().filter(|t| t.is_valid_at(now, self.margin)) {
            return Ok(token.value.clone());
        }

        *slot = None;
        let issued = with_logging("fetch_primary_token", || self.auth.fetch_primary_token())?;
        self.primary_refreshes.fetch_add(1, Ordering::SeqCst);
        debug!(ttl_secs = issued.ttl.as_secs(), "primary token refreshed");

        let token = CachedToken::from_issued(issued, self.clock.now());
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Returns a valid secondary token, exchanging a fresh one if needed.
    ///
    /// The exchange consumes a currently valid primary, refreshing the
    /// primary first when it is stale.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if either step fails.
    pub fn obtain_secondary(&self) -> SyncResult<String> {
        let mut slot = self.secondary.lock();
        let now = self.clock.now();
        if let Some(token) = slot.as_ref().filter(|t| t.is_valid_at(now, self.margin)) {
            return Ok(token.value.clone());
        }

        *slot = None;
        let primary = self.obtain_primary()?;
        let issued = with_logging("exchange_secondary_token", || {
            self.auth.exchange_secondary_token(&primary)
        })?;
        self.secondary_refreshes.fetch_add(1, Ordering::SeqCst);
        debug!(ttl_secs = issued.ttl.as_secs(), "secondary token refreshed");

        let token = CachedToken::from_issued(issued, self.clock.now());
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Returns the token pair for one remote call.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if either token cannot be obtained.
    pub fn credentials(&self) -> SyncResult<Credentials> {
        let secondary = self.obtain_secondary()?;
        let primary = self.obtain_primary()?;
        Ok(Credentials::new(primary, secondary))
    }

    /// Drops the cached secondary token, e.g. after the insurer answered 401.
    pub fn invalidate_secondary(&self) {
        *self.secondary.lock() = None;
    }

    /// Drops both cached tokens.
    pub fn invalidate_all(&self) {
        let mut secondary = self.secondary.lock();
        let mut primary = self.primary.lock();
        *secondary = None;
        *primary = None;
    }

    /// Returns refresh counters.
    pub fn stats(&self) -> TokenStats {
        TokenStats {
            primary_refreshes: self.primary_refreshes.load(Ordering::SeqCst),
            secondary_refreshes: self.secondary_refreshes.load(Ordering::SeqCst),
        }
    }
}
