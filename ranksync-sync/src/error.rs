//! Error types for ranksync-sync.

use std::time::Duration;

use thiserror::Error;

use ranksync_core::DecodeError;

/// All errors that can arise from store and coordinator operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The ranks relation could not be created or verified. Fatal to startup.
    #[error("cannot create or verify relation '{table}': {source}")]
    Schema {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// A single read or write failed; the cycle is skipped.
    #[error("{operation} failed: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A storage call did not complete within the configured deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Configured relation name is not a plain SQL identifier.
    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    /// Stored RolesText could not be decoded.
    #[error("malformed roles text: {0}")]
    Decode(#[from] DecodeError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl SyncError {
    /// `true` for failures that only cost the current cycle.
    pub fn is_query_failure(&self) -> bool {
        matches!(self, SyncError::Query { .. } | SyncError::Timeout { .. })
    }
}

pub(crate) fn query_err(operation: &'static str, source: sqlx::Error) -> SyncError {
    SyncError::Query { operation, source }
}
