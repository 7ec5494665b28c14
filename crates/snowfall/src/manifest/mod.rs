//! The abstract manifest/properties store consumed by [`crate::Syncer`].
//!
//! Two concrete variants are provided: [`memory`], a single-process
//! array-backed store, and [`relational`] (behind the `relational` feature),
//! a Postgres-backed store built on `sqlx`. Both implement [`ManifestStore`]
//! and are otherwise interchangeable from a Syncer's point of view.

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "relational")]
pub mod relational;

use crate::error::Result;
use crate::id::MAX_GENERATOR_ID;
use async_trait::async_trait;

/// Name of a schema group, used to derive deterministic table/registry names.
pub type SchemaGroupName = str;

/// Returns the deterministic manifest table (or registry key) name for a
/// schema group.
pub fn manifest_name(schema_group: &SchemaGroupName) -> String {
    format!("snowfall_{schema_group}_manifest")
}

/// Returns the deterministic properties table (or registry key) name for a
/// schema group.
pub fn properties_name(schema_group: &SchemaGroupName) -> String {
    format!("snowfall_{schema_group}_properties")
}

/// The properties recorded once per schema group at bootstrap time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    /// Renewal period, in whole seconds. Must be `>= 1`.
    pub liveliness_probe_s: u32,
    /// Custom epoch origin, in true milliseconds since the Unix epoch. Must
    /// be `<= now` at the time the schema group is created.
    pub epoch_start_ms: i64,
    /// Maximum number of claim retries. Meaningful only to the relational
    /// variant; the in-memory variant never retries since its claim is not
    /// subject to transient conflicts.
    pub max_claim_retries: u32,
    /// Lower bound, in ms, of the uniform claim-retry backoff window.
    pub min_ms_between_claim_retries: u32,
    /// Upper bound, in ms, of the uniform claim-retry backoff window.
    pub max_ms_between_claim_retries: u32,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            liveliness_probe_s: 5,
            epoch_start_ms: 0,
            max_claim_retries: 3,
            min_ms_between_claim_retries: 10,
            max_ms_between_claim_retries: 200,
        }
    }
}

/// The abstract manifest + properties store protocol.
///
/// Implementations must make `try_claim` linearizable with respect to
/// concurrent claims within the same schema group (two successful claims must
/// return distinct generator ids) and must make `renew` conditional on the
/// caller's previously observed `last_updated_ms`, so a stolen lease is
/// detectable rather than silently clobbered by a late renewal.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Reads the properties row for `schema_group`.
    async fn read_properties(&self, schema_group: &SchemaGroupName) -> Result<Properties>;

    /// Atomically finds one row whose `last_updated_ms < release_threshold_ms`,
    /// sets it to `now_ms`, and returns its generator id.
    ///
    /// Returns [`crate::Error::NoFreeGeneratorId`] if no such row exists (for
    /// the relational variant, only after exhausting its retry policy).
    async fn try_claim(
        &self,
        schema_group: &SchemaGroupName,
        now_ms: i64,
        release_threshold_ms: i64,
    ) -> Result<u16>;

    /// Conditionally sets `last_updated_ms = new_ms` for `generator_id`, but
    /// only if the row's current value still equals `prev_last_alive_ms`.
    /// Returns `true` iff the row was updated.
    async fn renew(
        &self,
        schema_group: &SchemaGroupName,
        generator_id: u16,
        prev_last_alive_ms: i64,
        new_ms: i64,
    ) -> Result<bool>;

    /// Creates both the manifest and properties tables for `schema_group`,
    /// seeding `MAX_GENERATOR_ID + 1` manifest rows at `last_updated_ms = 0`
    /// and the given properties.
    ///
    /// # Errors
    /// Returns [`crate::Error::SchemaGroupExists`] if either table already
    /// exists.
    async fn create_schema_group(
        &self,
        schema_group: &SchemaGroupName,
        properties: Properties,
    ) -> Result<()>;
}

/// Total number of generator id slots in a schema group's manifest.
pub const MANIFEST_ROW_COUNT: usize = MAX_GENERATOR_ID as usize + 1;
