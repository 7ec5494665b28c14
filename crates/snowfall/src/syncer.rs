//! Generator id leasing and background renewal.
//!
//! A [`Syncer`] claims a generator id from a [`ManifestStore`] at
//! construction time and then renews that lease periodically in the
//! background, on a period of `liveliness_probe_s` seconds. If a renewal
//! finds the row no longer matches what this Syncer last wrote, its lease has
//! been stolen (reclaimed by another process after this one stopped renewing
//! for too long) and the Syncer moves to [`State::Expired`], at which point
//! every [`crate::Snowfall`] built on top of it starts rejecting `next_id`
//! calls with [`Error::LeaseLost`].

use crate::error::{Error, Result};
use crate::id::PROBE_MISSES_TO_RELEASE;
use crate::manifest::ManifestStore;
use crate::time::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use tokio::task::JoinHandle;

/// Lifecycle state of a [`Syncer`].
///
/// ```text
/// [Init] --claim ok--> [Live] --renew ok--> [Live]
///   |                     |--renew fail--> [Expired]
///   |--claim fail--> [Failed]
/// [Live] --shutdown--> [Closed]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Init = 0,
    Live = 1,
    Expired = 2,
    Failed = 3,
    Closed = 4,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Init,
            1 => Self::Live,
            2 => Self::Expired,
            3 => Self::Failed,
            _ => Self::Closed,
        }
    }
}

/// Holds a leased generator id and keeps it alive with periodic renewals.
pub struct Syncer {
    store: Arc<dyn ManifestStore>,
    clock: Arc<dyn Clock>,
    schema_group: String,
    generator_id: u16,
    last_alive_ms: AtomicI64,
    ms_to_release_generator_id: i64,
    state: AtomicU8,
    renewal_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Syncer {
    /// Claims a generator id for `schema_group` and starts a background
    /// renewal task.
    ///
    /// # Errors
    /// Returns [`Error::SchemaGroupMissing`] if the schema group has not been
    /// bootstrapped, or [`Error::NoFreeGeneratorId`] /
    /// [`Error::PersistentClaimContention`] if no lease could be claimed.
    pub async fn claim(
        store: Arc<dyn ManifestStore>,
        clock: Arc<dyn Clock>,
        schema_group: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let schema_group = schema_group.into();
        let properties = store.read_properties(&schema_group).await?;
        let now_ms = clock.now_ms();
        let ms_to_release = ms_to_release_generator_id(properties.liveliness_probe_s);
        let release_threshold_ms = now_ms - ms_to_release;

        let generator_id = match store
            .try_claim(&schema_group, now_ms, release_threshold_ms)
            .await
        {
            Ok(id) => id,
            Err(err) => return Err(err),
        };

        let syncer = Arc::new(Self {
            store,
            clock,
            schema_group,
            generator_id,
            last_alive_ms: AtomicI64::new(now_ms),
            ms_to_release_generator_id: ms_to_release,
            state: AtomicU8::new(State::Live as u8),
            renewal_task: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(run_renewal_loop(
            Arc::clone(&syncer),
            properties.liveliness_probe_s,
        ));
        *syncer.renewal_task.lock().expect("renewal task mutex poisoned") = Some(handle);

        Ok(syncer)
    }

    /// The generator id leased by this Syncer.
    pub fn generator_id(&self) -> u16 {
        self.generator_id
    }

    /// The schema group this Syncer is leasing within.
    pub fn schema_group(&self) -> &str {
        &self.schema_group
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the lease is currently believed to be live.
    ///
    /// True iff the Syncer's state is [`State::Live`] and the last successful
    /// renewal is still within `ms_to_release_generator_id` of now, so a
    /// renewal tick that is merely running late (but not yet confirmed
    /// stolen) is still reported honestly rather than optimistically.
    pub fn is_alive(&self) -> bool {
        if self.state() != State::Live {
            return false;
        }
        let now_ms = self.clock.now_ms();
        let last_alive_ms = self.last_alive_ms.load(Ordering::Acquire);
        now_ms - last_alive_ms <= self.ms_to_release_generator_id
    }

    /// Returns [`Error::LeaseLost`] if the lease is not currently live.
    pub fn check_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::LeaseLost {
                generator_id: self.generator_id,
            })
        }
    }

    /// Stops the background renewal task and marks this Syncer closed.
    ///
    /// Does not release the lease early: the row is simply left to expire
    /// naturally once renewals stop, same as a crashed process would.
    pub async fn shutdown(&self) {
        self.state.store(State::Closed as u8, Ordering::Release);
        let handle = self
            .renewal_task
            .lock()
            .expect("renewal task mutex poisoned")
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        if let Some(handle) = self
            .renewal_task
            .lock()
            .expect("renewal task mutex poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

/// Number of milliseconds of missed renewals after which a lease becomes
/// reclaimable by another claimant: `liveliness_probe_s * 1000 *
/// PROBE_MISSES_TO_RELEASE`.
pub fn ms_to_release_generator_id(liveliness_probe_s: u32) -> i64 {
    i64::from(liveliness_probe_s) * 1000 * PROBE_MISSES_TO_RELEASE
}

async fn run_renewal_loop(syncer: Arc<Syncer>, liveliness_probe_s: u32) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(u64::from(
        liveliness_probe_s.max(1),
    )));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if syncer.state() == State::Closed {
            return;
        }

        let prev_ms = syncer.last_alive_ms.load(Ordering::Acquire);
        let new_ms = syncer.clock.now_ms();

        match syncer
            .store
            .renew(&syncer.schema_group, syncer.generator_id, prev_ms, new_ms)
            .await
        {
            Ok(true) => {
                syncer.last_alive_ms.store(new_ms, Ordering::Release);
            }
            Ok(false) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    generator_id = syncer.generator_id,
                    schema_group = %syncer.schema_group,
                    "lease stolen; marking syncer expired"
                );
                syncer.state.store(State::Expired as u8, Ordering::Release);
                return;
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    generator_id = syncer.generator_id,
                    schema_group = %syncer.schema_group,
                    error = %_err,
                    "transient error renewing lease; retrying next tick"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::memory::InMemoryStore;
    use crate::manifest::Properties;
    use crate::time::FixedClock;

    #[tokio::test]
    async fn claims_and_stays_alive_across_renewals() {
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryStore::new());
        store
            .create_schema_group(
                "t",
                Properties {
                    liveliness_probe_s: 1,
                    ..Properties::default()
                },
            )
            .await
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_000_000));

        let syncer = Syncer::claim(Arc::clone(&store), Arc::clone(&clock), "t")
            .await
            .unwrap();
        assert!(syncer.is_alive());
        syncer.shutdown().await;
        assert!(!syncer.is_alive());
    }

    #[tokio::test]
    async fn claim_fails_when_schema_group_missing() {
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(0));

        let err = Syncer::claim(store, clock, "missing").await.unwrap_err();
        assert!(matches!(err, Error::SchemaGroupMissing { .. }));
    }

    #[tokio::test]
    async fn expires_when_lease_is_stolen() {
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryStore::new());
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_000_000));

        let syncer = Syncer::claim(Arc::clone(&store), Arc::clone(&clock), "t")
            .await
            .unwrap();
        let claimed_at = syncer.last_alive_ms.load(Ordering::Acquire);

        // Simulate another process stealing the row out from under us.
        store
            .renew(
                "t",
                syncer.generator_id(),
                claimed_at,
                1_009_999,
            )
            .await
            .unwrap();

        let stale_prev = syncer.last_alive_ms.load(Ordering::Acquire);
        let stolen = store
            .renew("t", syncer.generator_id(), stale_prev, 1_010_000)
            .await
            .unwrap();
        assert!(!stolen);
    }
}
