//! Named mutual exclusion.
//!
//! A [`NamedLock`] serializes whole operations by name. Callers normally do
//! not touch tokens directly: [`CriticalSection::enter`] acquires and the
//! guard releases on drop, so an early `?` return cannot leak the lock.
//!
//! Locks are not reentrant. Code running inside a critical section must not
//! try to enter the same name again.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("Lock {name} not acquired after {attempts} attempts")]
    AcquisitionTimeout { name: String, attempts: u32 },

    #[error("Lock {name} is not held by token {token}")]
    NotHolder { name: String, token: String },

    #[error("Lease store error: {message}")]
    Store { message: String },
}

impl LockError {
    pub fn store(message: impl Into<String>) -> Self {
        LockError::Store {
            message: message.into(),
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;

/// Proof of holding a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    name: String,
    token: String,
}

impl LockToken {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    /// A token with a fresh random value.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(name, Uuid::new_v4().to_string())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// A lock addressed by name.
pub trait NamedLock: Send + Sync {
    /// Acquires `name`, blocking or retrying as the implementation decides.
    fn acquire(&self, name: &str) -> LockResult<LockToken>;

    /// Releases a lock previously returned by [`NamedLock::acquire`].
    fn release(&self, token: &LockToken) -> LockResult<()>;
}

/// RAII guard for a held [`NamedLock`].
pub struct CriticalSection<'a> {
    lock: &'a dyn NamedLock,
    token: LockToken,
}

impl<'a> CriticalSection<'a> {
    pub fn enter(lock: &'a dyn NamedLock, name: &str) -> LockResult<Self> {
        let token = lock.acquire(name)?;
        debug!(lock = name, "Entered critical section");
        Ok(Self { lock, token })
    }

    pub fn name(&self) -> &str {
        self.token.name()
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        match self.lock.release(&self.token) {
            Ok(()) => debug!(lock = self.token.name(), "Left critical section"),
            Err(e) => warn!(lock = self.token.name(), error = %e, "Failed to release lock"),
        }
    }
}

/// In-process named lock. A second acquirer of the same name blocks until the
/// holder releases.
#[derive(Debug, Default)]
pub struct LocalLock {
    held: Mutex<HashMap<String, String>>,
    released: Condvar,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().contains_key(name)
    }
}

impl NamedLock for LocalLock {
    fn acquire(&self, name: &str) -> LockResult<LockToken> {
        let mut held = self.held.lock();
        while held.contains_key(name) {
            self.released.wait(&mut held);
        }
        let token = LockToken::generate(name);
        held.insert(name.to_string(), token.token().to_string());
        Ok(token)
    }

    fn release(&self, token: &LockToken) -> LockResult<()> {
        let mut held = self.held.lock();
        if held.get(token.name()).map(String::as_str) != Some(token.token()) {
            return Err(LockError::NotHolder {
                name: token.name().to_string(),
                token: token.token().to_string(),
            });
        }
        held.remove(token.name());
        self.released.notify_all();
        Ok(())
    }
}
