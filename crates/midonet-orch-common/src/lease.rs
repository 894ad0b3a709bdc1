//! Lease-based named locks for multi-process deployments.
//!
//! Several plugin processes can share one [`LeaseStore`]. A lease expires on
//! its own after `ttl_secs`, so a crashed holder cannot wedge the lock
//! forever. Acquisition retries a bounded number of times and then fails
//! with [`LockError::AcquisitionTimeout`].

use crate::lock::{LockError, LockResult, LockToken, NamedLock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Lock lease configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Lease TTL in seconds
    pub ttl_secs: u64,
    /// Max attempts for acquiring the lease
    pub max_retries: u32,
    /// Delay between attempts in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            max_retries: 50,
            retry_backoff_ms: 100,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lease holder information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub token: String,
    /// Owner instance ID
    pub owner: String,
    pub acquired_at: u64,
    pub expires_at: u64,
}

impl LockHolder {
    pub fn new(token: String, owner: String, ttl_secs: u64) -> Self {
        let now = now_secs();
        Self {
            token,
            owner,
            acquired_at: now,
            expires_at: now + ttl_secs,
        }
    }

    /// Check if the lease is still live
    pub fn is_valid(&self) -> bool {
        now_secs() < self.expires_at
    }

    pub fn remaining_ttl(&self) -> u64 {
        self.expires_at.saturating_sub(now_secs())
    }
}

/// Shared storage for leases.
pub trait LeaseStore: Send + Sync {
    /// Atomically stores `holder` under `key` unless a live lease exists.
    /// Returns whether the claim succeeded.
    fn try_claim(&self, key: &str, holder: &LockHolder) -> LockResult<bool>;

    /// Removes the lease under `key` if `token` still owns it. Returns
    /// whether a lease was removed.
    fn release(&self, key: &str, token: &str) -> LockResult<bool>;

    fn holder(&self, key: &str) -> LockResult<Option<LockHolder>>;
}

/// Lease store held in process memory; shared between [`LeaseLock`]s by
/// cloning the `Arc`.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, LockHolder>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn try_claim(&self, key: &str, holder: &LockHolder) -> LockResult<bool> {
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(LockHolder::is_valid) {
            return Ok(false);
        }
        leases.insert(key.to_string(), holder.clone());
        Ok(true)
    }

    fn release(&self, key: &str, token: &str) -> LockResult<bool> {
        let mut leases = self.leases.lock();
        if leases.get(key).map(|h| h.token.as_str()) == Some(token) {
            leases.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn holder(&self, key: &str) -> LockResult<Option<LockHolder>> {
        Ok(self.leases.lock().get(key).cloned())
    }
}

/// Named lock backed by leases in a [`LeaseStore`].
pub struct LeaseLock {
    store: Arc<dyn LeaseStore>,
    owner_id: String,
    config: LeaseConfig,
    acquisition_count: AtomicU64,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn LeaseStore>, owner_id: impl Into<String>, config: LeaseConfig) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            config,
            acquisition_count: AtomicU64::new(0),
        }
    }

    /// Store key for a lock name
    pub fn lease_key(name: &str) -> String {
        format!("lock:{}", name)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn acquisition_count(&self) -> u64 {
        self.acquisition_count.load(Ordering::SeqCst)
    }
}

impl NamedLock for LeaseLock {
    fn acquire(&self, name: &str) -> LockResult<LockToken> {
        let key = Self::lease_key(name);
        let attempts = self.config.max_retries.max(1);

        for attempt in 1..=attempts {
            let token = LockToken::generate(name);
            let holder = LockHolder::new(
                token.token().to_string(),
                self.owner_id.clone(),
                self.config.ttl_secs,
            );
            if self.store.try_claim(&key, &holder)? {
                self.acquisition_count.fetch_add(1, Ordering::SeqCst);
                info!(
                    lock = name,
                    owner = %self.owner_id,
                    ttl = self.config.ttl_secs,
                    attempt,
                    "Acquired lease"
                );
                return Ok(token);
            }
            if attempt < attempts {
                debug!(lock = name, attempt, "Lease busy, backing off");
                thread::sleep(Duration::from_millis(self.config.retry_backoff_ms));
            }
        }

        Err(LockError::AcquisitionTimeout {
            name: name.to_string(),
            attempts,
        })
    }

    fn release(&self, token: &LockToken) -> LockResult<()> {
        let key = Self::lease_key(token.name());
        if !self.store.release(&key, token.token())? {
            return Err(LockError::NotHolder {
                name: token.name().to_string(),
                token: token.token().to_string(),
            });
        }
        info!(lock = token.name(), owner = %self.owner_id, "Released lease");
        Ok(())
    }
}
