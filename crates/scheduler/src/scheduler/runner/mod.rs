//! Raster scheduler runner -- owns task state, the upload budget and the
//! notification latches.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, accessors, cancellation and shutdown
//! - `scheduling`: Queue replacement and budget-throttled admission
//! - `execution`: Completion polling, upload flushing and client callbacks
//! - `inspect`: State names, throttle state and snapshots

mod core;
mod execution;
mod inspect;
mod scheduling;

pub use self::core::RasterScheduler;
pub use self::inspect::{SchedulerSnapshot, TaskStateCounts, ThrottleState};
