//! The id-generating front door: [`Snowfall`] turns a live [`Syncer`] lease
//! plus a [`Clock`] into a stream of monotonically increasing [`Guid`]s.

use crate::error::{Error, Result};
use crate::id::{Guid, MAX_LOOPING_COUNT};
use crate::syncer::Syncer;
use crate::time::Clock;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

struct SequenceState {
    /// Last `ms_since_epoch` a GUID was minted for.
    last_ms: i64,
    /// Intra-millisecond sequence used for `last_ms`.
    looping_counter: u16,
}

/// Generates [`Guid`]s for one leased generator id.
///
/// Construction validates that `epoch_start_ms` is not in the future of the
/// clock's current reading; everything after that is driven by
/// [`Snowfall::next_id`].
pub struct Snowfall {
    syncer: Arc<Syncer>,
    clock: Arc<dyn Clock>,
    epoch_start_ms: i64,
    sequence: Mutex<SequenceState>,
}

impl Snowfall {
    /// Builds a generator from an already-claimed [`Syncer`] lease.
    ///
    /// # Errors
    /// Returns [`Error::EpochInFuture`] if `epoch_start_ms` is later than the
    /// clock's current reading.
    pub fn new(syncer: Arc<Syncer>, clock: Arc<dyn Clock>, epoch_start_ms: i64) -> Result<Self> {
        let now_ms = clock.now_ms();
        if epoch_start_ms > now_ms {
            return Err(Error::EpochInFuture {
                epoch_start_ms,
                now_ms,
            });
        }

        Ok(Self {
            syncer,
            clock,
            epoch_start_ms,
            sequence: Mutex::new(SequenceState {
                last_ms: -1,
                looping_counter: 0,
            }),
        })
    }

    /// The generator id this Snowfall mints IDs under.
    pub fn generator_id(&self) -> u16 {
        self.syncer.generator_id()
    }

    /// Produces the next [`Guid`], blocking the current thread for at most a
    /// few milliseconds if the intra-millisecond sequence is exhausted.
    ///
    /// # Errors
    /// Returns [`Error::LeaseLost`] if the backing [`Syncer`]'s lease is no
    /// longer live, or [`Error::EpochOverflow`] once `ms_since_epoch`
    /// overflows the 41-bit timestamp field (roughly 69 years after
    /// `epoch_start_ms`).
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_id(&self) -> Result<Guid> {
        loop {
            self.syncer.check_alive()?;

            let now_ms = self.clock.now_ms() - self.epoch_start_ms;
            let mut state = self.sequence.lock().expect("sequence mutex poisoned");

            if now_ms != state.last_ms {
                // A changed `ms_since_epoch` always resets the sequence, even
                // if the clock briefly moved backward; see `Clock`'s docs on
                // the non-monotonicity this tolerates.
                state.last_ms = now_ms;
                state.looping_counter = 0;
            } else {
                state.looping_counter += 1;
            }

            if state.looping_counter > MAX_LOOPING_COUNT {
                drop(state);
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }

            let guid = Guid::from_components(state.last_ms, state.looping_counter, self.generator_id())?;
            return Ok(guid);
        }
    }

    /// Async equivalent of [`Self::next_id`], sleeping on the async runtime's
    /// timer instead of blocking the calling thread when the sequence needs
    /// to throttle.
    ///
    /// # Errors
    /// Same as [`Self::next_id`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next_id_async(&self) -> Result<Guid> {
        loop {
            self.syncer.check_alive()?;

            let now_ms = self.clock.now_ms() - self.epoch_start_ms;
            let overflow = {
                let mut state = self.sequence.lock().expect("sequence mutex poisoned");

                if now_ms != state.last_ms {
                    state.last_ms = now_ms;
                    state.looping_counter = 0;
                } else {
                    state.looping_counter += 1;
                }

                if state.looping_counter > MAX_LOOPING_COUNT {
                    true
                } else {
                    return Guid::from_components(
                        state.last_ms,
                        state.looping_counter,
                        self.generator_id(),
                    );
                }
            };

            debug_assert!(overflow);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::memory::InMemoryStore;
    use crate::manifest::{ManifestStore, Properties};
    use crate::time::FixedClock;

    async fn new_snowfall(clock: Arc<FixedClock>) -> Snowfall {
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryStore::new());
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let syncer = Syncer::claim(store, dyn_clock.clone(), "t").await.unwrap();
        Snowfall::new(syncer, dyn_clock, 0).unwrap()
    }

    #[tokio::test]
    async fn ids_strictly_increase_within_same_ms() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let gen = new_snowfall(clock).await;

        let a = gen.next_id().unwrap();
        let b = gen.next_id().unwrap();
        assert!(b > a);
        assert_eq!(a.ms_since_epoch(), b.ms_since_epoch());
        assert_eq!(b.looping_counter(), a.looping_counter() + 1);
    }

    #[tokio::test]
    async fn advancing_clock_resets_sequence() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let gen = new_snowfall(clock.clone()).await;

        let a = gen.next_id().unwrap();
        clock.advance(Duration::from_millis(1));
        let b = gen.next_id().unwrap();

        assert!(b.ms_since_epoch() > a.ms_since_epoch());
        assert_eq!(b.looping_counter(), 0);
    }

    #[tokio::test]
    async fn rejects_epoch_in_the_future() {
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryStore::new());
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_000_000));
        let syncer = Syncer::claim(store, clock.clone(), "t").await.unwrap();

        let err = Snowfall::new(syncer, clock, 5_000_000).unwrap_err();
        assert!(matches!(err, Error::EpochInFuture { .. }));
    }

    #[tokio::test]
    async fn rejects_generation_once_lease_is_lost() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryStore::new());
        store
            .create_schema_group("t", Properties::default())
            .await
            .unwrap();
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let syncer = Syncer::claim(store, dyn_clock.clone(), "t").await.unwrap();
        let gen = Snowfall::new(Arc::clone(&syncer), dyn_clock, 0).unwrap();

        syncer.shutdown().await;

        let err = gen.next_id().unwrap_err();
        assert!(matches!(err, Error::LeaseLost { .. }));
    }
}
