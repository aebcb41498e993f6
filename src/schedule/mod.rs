//! Static schedule model, snapshot and loader.

pub mod loader;
pub mod snapshot;
pub mod types;

pub use snapshot::{AgencySchedule, ScheduleSnapshot, ScheduleStore};
pub use types::{Route, StaticTrip, Stop, StopTime};
