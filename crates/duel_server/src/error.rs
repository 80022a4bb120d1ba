//! Error taxonomy for the coordination core.

use thiserror::Error;

/// Failures reported by the coordination store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// A stored value did not have the expected shape.
    #[error("malformed value under '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// Service-level errors surfaced by the core.
///
/// Callers translate these into the concise user-facing messages; the
/// underlying cause is logged at the failure site.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("peer instance '{server_id}' unreachable: {reason}")]
    PeerUnreachable { server_id: String, reason: String },

    #[error("lock contention: {0}")]
    Contention(&'static str),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0}")]
    User(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = CoreError::PeerUnreachable {
            server_id: "Server-2".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "peer instance 'Server-2' unreachable: connection refused"
        );

        let err: CoreError = StoreError::Unavailable("timeout".into()).into();
        assert_eq!(err.to_string(), "coordination store unavailable: timeout");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
        assert_send_sync::<CoreError>();
    }
}
