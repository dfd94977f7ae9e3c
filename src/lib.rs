//! Live map of community-reported ICE sightings: bulk load, realtime
//! ingest, time-window filtering, screen-space clustering and rendering,
//! plus the report submission flow.

pub mod cluster;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod geo;
pub mod i18n;
pub mod live_map;
pub mod photo;
pub mod push;
pub mod record;
pub mod render;
pub mod report;
pub mod state;
pub mod storage;
pub mod store;
pub mod terminal;
pub mod translate;
pub mod util;

#[cfg(test)]
mod testing;

pub use crate::live_map::{LiveMap, Trigger};
pub use crate::record::{Sighting, SightingId, SightingRecord};
pub use crate::store::LiveViewStore;
