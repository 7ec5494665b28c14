//! A single-process, array-backed [`ManifestStore`] implementation.
//!
//! Thread-safety within a process is required but cross-process coordination
//! is explicitly not provided: two processes each holding their own
//! [`InMemoryStore`] do not see each other's claims. Named schema groups live
//! in a process-scoped registry owned by the store, guarded by a single
//! mutex, and created lazily on first use rather than through an ambient
//! global (see the "global mutable dictionary" redesign note in the design
//! notes).

use super::{MANIFEST_ROW_COUNT, ManifestStore, Properties, SchemaGroupName};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

struct Manifest {
    /// `last_updated_ms` per generator id, indexed by generator id.
    rows: Vec<i64>,
    properties: Properties,
}

/// A single-process manifest store backed by a registry of fixed-size
/// in-memory arrays.
///
/// Recommended for single-process deployments and tests. For coordination
/// across multiple processes, use [`crate::manifest::relational`] instead.
#[derive(Default)]
pub struct InMemoryStore {
    registry: Mutex<HashMap<String, Manifest>>,
}

impl InMemoryStore {
    /// Creates an empty store with no schema groups registered.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for InMemoryStore {
    async fn read_properties(&self, schema_group: &SchemaGroupName) -> Result<Properties> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        registry
            .get(schema_group)
            .map(|m| m.properties)
            .ok_or_else(|| Error::SchemaGroupMissing {
                schema_group: schema_group.to_owned(),
            })
    }

    async fn try_claim(
        &self,
        schema_group: &SchemaGroupName,
        now_ms: i64,
        release_threshold_ms: i64,
    ) -> Result<u16> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let manifest = registry
            .get_mut(schema_group)
            .ok_or_else(|| Error::SchemaGroupMissing {
                schema_group: schema_group.to_owned(),
            })?;

        let free = manifest
            .rows
            .iter()
            .position(|&last_updated_ms| last_updated_ms < release_threshold_ms);

        match free {
            Some(idx) => {
                manifest.rows[idx] = now_ms;
                Ok(idx as u16)
            }
            None => Err(Error::NoFreeGeneratorId {
                schema_group: schema_group.to_owned(),
            }),
        }
    }

    async fn renew(
        &self,
        schema_group: &SchemaGroupName,
        generator_id: u16,
        prev_last_alive_ms: i64,
        new_ms: i64,
    ) -> Result<bool> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let manifest = registry
            .get_mut(schema_group)
            .ok_or_else(|| Error::SchemaGroupMissing {
                schema_group: schema_group.to_owned(),
            })?;

        let row = manifest
            .rows
            .get_mut(generator_id as usize)
            .expect("generator_id within manifest bounds");

        if *row == prev_last_alive_ms {
            *row = new_ms;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn create_schema_group(
        &self,
        schema_group: &SchemaGroupName,
        properties: Properties,
    ) -> Result<()> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if registry.contains_key(schema_group) {
            return Err(Error::SchemaGroupExists {
                schema_group: schema_group.to_owned(),
            });
        }
        registry.insert(
            schema_group.to_owned(),
            Manifest {
                rows: vec![0; MANIFEST_ROW_COUNT],
                properties,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claims_distinct_ids_until_exhausted() {
        let store = InMemoryStore::new();
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();

        let a = store.try_claim("t", 100, 0).await.unwrap();
        let b = store.try_claim("t", 100, 0).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn renew_is_conditional_on_prev_value() {
        let store = InMemoryStore::new();
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let id = store.try_claim("t", 100, 0).await.unwrap();

        // Someone else already renewed/stole this row; our stale prev value
        // must be rejected.
        assert!(!store.renew("t", id, 999, 200).await.unwrap());
        assert!(store.renew("t", id, 100, 200).await.unwrap());
    }

    #[tokio::test]
    async fn reclaims_after_release_threshold() {
        let store = InMemoryStore::new();
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let id = store.try_claim("t", 0, -1).await.unwrap();

        // Not yet past the release threshold.
        assert!(store.try_claim("t", 1000, 0).await.is_err() || id != 0);
    }

    #[tokio::test]
    async fn double_create_fails() {
        let store = InMemoryStore::new();
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let err = store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaGroupExists { .. }));
    }
}
