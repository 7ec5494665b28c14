#![doc = include_str!("../README.md")]

mod bootstrap;
mod error;
mod id;
pub mod manifest;
mod snowfall;
mod syncer;
mod time;

pub use crate::bootstrap::bootstrap_schema_group;
pub use crate::error::{Error, Result};
pub use crate::id::{
    BITS_FOR_GENERATOR_ID, BITS_FOR_LOOPING_COUNT, BITS_FOR_MS_SINCE_EPOCH, Guid,
    MAX_GENERATOR_ID, MAX_LOOPING_COUNT, MAX_MS_SINCE_EPOCH, PROBE_MISSES_TO_RELEASE,
};
pub use crate::manifest::{ManifestStore, Properties};
pub use crate::snowfall::Snowfall;
pub use crate::syncer::{State as SyncerState, Syncer, ms_to_release_generator_id};
pub use crate::time::{Clock, FixedClock, SystemClock};
