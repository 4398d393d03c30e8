//! Error types for RESYNC operations

use thiserror::Error;

/// Bulk List failures reported by the remote resource client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("List request failed: network error: {reason}")]
    Network { reason: String },

    #[error("List request unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Resource kind not found: {resource_kind}")]
    NotFound { resource_kind: String },

    #[error("List request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("List request rejected by provider: {reason}")]
    Remote { reason: String },
}

/// Create failures reported by the remote resource client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CreateError {
    #[error("Create input invalid: {reason}")]
    Validation { reason: String },

    #[error("Resource already exists: {id}")]
    Conflict { id: String },

    #[error("Create request failed: network error: {reason}")]
    Network { reason: String },

    #[error("Create request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Create request rejected by provider: {reason}")]
    Remote { reason: String },
}

/// Failure to establish an event subscription.
///
/// Never fatal: the affected lease keeps serving its List-only cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Subscription to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache partition lock poisoned for scope {scope}")]
    LockPoisoned { scope: String },
}

/// Event payload decoding errors. Logged and dropped, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },

    #[error("{kind} event carries no resource id")]
    MissingId { kind: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all RESYNC errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Create error: {0}")]
    Create(#[from] CreateError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Observation of {scope} was released before its initial sync completed")]
    Cancelled { scope: String },
}

impl SyncError {
    /// Returns true if this error came from a failed List.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    /// Returns true if this error came from a failed Create.
    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create(_))
    }
}

/// Result type alias for RESYNC operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_timeout() {
        let err = FetchError::Timeout { timeout_ms: 1500 };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_create_error_display_conflict() {
        let err = CreateError::Conflict {
            id: "pod-1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("already exists"));
        assert!(msg.contains("pod-1"));
    }

    #[test]
    fn test_subscription_error_display() {
        let err = SubscriptionError::Rejected {
            topic: "k8s/c1/pods/ADD".to_string(),
            reason: "bus closed".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("k8s/c1/pods/ADD"));
        assert!(msg.contains("bus closed"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "page_size",
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("page_size"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_sync_error_from_variants() {
        let fetch = SyncError::from(FetchError::Network {
            reason: "reset".to_string(),
        });
        assert!(fetch.is_fetch());
        assert!(!fetch.is_create());

        let create = SyncError::from(CreateError::Validation {
            reason: "missing spec".to_string(),
        });
        assert!(create.is_create());

        let store = SyncError::from(StoreError::LockPoisoned {
            scope: "k8s/c1/pods".to_string(),
        });
        assert!(matches!(store, SyncError::Store(_)));

        let event = SyncError::from(EventError::MissingId {
            kind: "ADD".to_string(),
        });
        assert!(matches!(event, SyncError::Event(_)));

        let subscription = SyncError::from(SubscriptionError::Rejected {
            topic: "t".to_string(),
            reason: "r".to_string(),
        });
        assert!(matches!(subscription, SyncError::Subscription(_)));
    }

    #[test]
    fn test_errors_are_cloneable_for_fan_out() {
        let err = SyncError::from(FetchError::Unauthorized {
            reason: "expired token".to_string(),
        });
        let copies = vec![err.clone(), err.clone()];
        assert!(copies.iter().all(|e| e == &err));
    }
}
