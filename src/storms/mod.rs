//! Storm track data: record types and the sources that provide them.

pub mod live;
pub mod types;

pub use live::{FileStormSource, HttpLiveStormSource, LiveStormSource};
pub use types::{StormTrackPoint, group_by_storm, latest_observation};
