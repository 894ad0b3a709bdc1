//! Error type for plugin operations.

use crate::store::StoreError;
use midonet_client::ClientError;
use midonet_orch_common::LockError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} is in use: {reason}")]
    InUse {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("Cannot remove default security group {0}")]
    CannotRemoveDefaultGroup(Uuid),

    #[error("Port {port} is owned by router {router}; remove the router interface instead")]
    L3PortInUse { port: Uuid, router: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The plugin cannot start with this configuration.
    #[error("Fatal configuration error: {0}")]
    ConfigurationFatal(String),

    #[error("Controller error: {0}")]
    Controller(#[from] ClientError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        PluginError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn in_use(kind: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        PluginError::InUse {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        PluginError::InvalidRequest(message.into())
    }

    /// True for failures that may succeed on a later attempt without any
    /// change to the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            PluginError::Controller(e) => e.is_retryable(),
            PluginError::Lock(LockError::AcquisitionTimeout { .. }) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for PluginError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => PluginError::NotFound {
                kind,
                id: id.to_string(),
            },
            StoreError::Referenced { kind, id, by } => PluginError::InUse {
                kind,
                id: id.to_string(),
                reason: format!("referenced by {}", by),
            },
            other => PluginError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
