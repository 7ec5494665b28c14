//! Error types for the `snowfall` ID generation system.
//!
//! This module defines the central [`Error`] enum, which captures every
//! recoverable and fatal condition that can arise while claiming, renewing, or
//! spending a leased generator id.

/// A result type specialized to [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the `snowfall` ID generation system.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Construction was attempted with an `epoch_start_ms` in the future of
    /// the current wall clock.
    #[error("epoch_start_ms {epoch_start_ms} is in the future of now ({now_ms})")]
    EpochInFuture { epoch_start_ms: i64, now_ms: i64 },

    /// `next_id` observed a `ms_since_epoch` that no longer fits in the
    /// 41-bit timestamp field.
    #[error("ms_since_epoch {ms_since_epoch} overflows the 41-bit timestamp field")]
    EpochOverflow { ms_since_epoch: i64 },

    /// The calling Snowfall's Syncer no longer holds a live lease on its
    /// generator id.
    #[error("lease on generator id {generator_id} has been lost")]
    LeaseLost { generator_id: u16 },

    /// `try_claim` exhausted its retry budget without finding any row whose
    /// lease had expired.
    #[error("no free generator id available in schema group {schema_group}")]
    NoFreeGeneratorId { schema_group: String },

    /// `try_claim` exhausted its retry budget due to persistent contention on
    /// the rows it was attempting to claim.
    #[error("persistent contention while claiming a generator id in schema group {schema_group}")]
    PersistentClaimContention { schema_group: String },

    /// `create_schema_group` was called for a schema group whose manifest or
    /// properties table already exists.
    #[error("schema group {schema_group} already exists")]
    SchemaGroupExists { schema_group: String },

    /// A Syncer was constructed against a schema group that has not been
    /// bootstrapped.
    #[error("schema group {schema_group} has not been created")]
    SchemaGroupMissing { schema_group: String },

    /// A store operation failed for a reason expected to be transient (lock
    /// contention, connection hiccup). Callers following the store's retry
    /// policy may retry; the background renewal task always retries at its
    /// next tick.
    #[error("transient store error: {context}")]
    StoreTransient { context: String },

    /// A configuration value failed validation at construction time.
    #[error("validation failed: {reason}")]
    ValidationError { reason: String },
}

#[cfg(feature = "relational")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreTransient {
            context: err.to_string(),
        }
    }
}
