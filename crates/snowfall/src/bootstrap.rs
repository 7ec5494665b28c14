//! Schema-group bootstrapping: the one-time step that must run before any
//! [`crate::Syncer`] can claim a generator id within a schema group.

use crate::error::{Error, Result};
use crate::manifest::{ManifestStore, Properties, SchemaGroupName};
use crate::time::Clock;

/// Creates a new schema group's manifest and properties tables.
///
/// # Errors
/// Returns [`Error::ValidationError`] if `properties.liveliness_probe_s` is
/// `0` or the claim-retry backoff bounds are inverted,
/// [`Error::EpochInFuture`] if `properties.epoch_start_ms` is later than the
/// clock's current reading, or [`Error::SchemaGroupExists`] if the schema
/// group has already been bootstrapped.
pub async fn bootstrap_schema_group(
    store: &dyn ManifestStore,
    clock: &dyn Clock,
    schema_group: &SchemaGroupName,
    properties: Properties,
) -> Result<()> {
    validate_properties(&properties)?;

    let now_ms = clock.now_ms();
    if properties.epoch_start_ms > now_ms {
        return Err(Error::EpochInFuture {
            epoch_start_ms: properties.epoch_start_ms,
            now_ms,
        });
    }

    store.create_schema_group(schema_group, properties).await
}

fn validate_properties(properties: &Properties) -> Result<()> {
    if properties.liveliness_probe_s == 0 {
        return Err(Error::ValidationError {
            reason: "liveliness_probe_s must be >= 1".to_owned(),
        });
    }
    if properties.min_ms_between_claim_retries > properties.max_ms_between_claim_retries {
        return Err(Error::ValidationError {
            reason: format!(
                "min_ms_between_claim_retries ({}) must not exceed max_ms_between_claim_retries ({})",
                properties.min_ms_between_claim_retries, properties.max_ms_between_claim_retries
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::memory::InMemoryStore;
    use crate::time::FixedClock;

    #[tokio::test]
    async fn bootstraps_a_fresh_schema_group() {
        let store = InMemoryStore::new();
        let clock = FixedClock::new(10_000);

        bootstrap_schema_group(&store, &clock, "orders", Properties::default())
            .await
            .unwrap();

        let properties = store.read_properties("orders").await.unwrap();
        assert_eq!(properties, Properties::default());
    }

    #[tokio::test]
    async fn rejects_epoch_in_the_future() {
        let store = InMemoryStore::new();
        let clock = FixedClock::new(10_000);

        let err = bootstrap_schema_group(
            &store,
            &clock,
            "orders",
            Properties {
                epoch_start_ms: 20_000,
                ..Properties::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::EpochInFuture { .. }));
    }

    #[tokio::test]
    async fn rejects_double_bootstrap() {
        let store = InMemoryStore::new();
        let clock = FixedClock::new(10_000);

        bootstrap_schema_group(&store, &clock, "orders", Properties::default())
            .await
            .unwrap();
        let err = bootstrap_schema_group(&store, &clock, "orders", Properties::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaGroupExists { .. }));
    }

    #[tokio::test]
    async fn rejects_zero_liveliness_probe() {
        let store = InMemoryStore::new();
        let clock = FixedClock::new(10_000);

        let err = bootstrap_schema_group(
            &store,
            &clock,
            "orders",
            Properties {
                liveliness_probe_s: 0,
                ..Properties::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ValidationError { .. }));
    }

    #[tokio::test]
    async fn rejects_inverted_backoff_bounds() {
        let store = InMemoryStore::new();
        let clock = FixedClock::new(10_000);

        let err = bootstrap_schema_group(
            &store,
            &clock,
            "orders",
            Properties {
                min_ms_between_claim_retries: 500,
                max_ms_between_claim_retries: 10,
                ..Properties::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ValidationError { .. }));
    }
}
