//! Budgeted raster scheduler with a bounded upload pipeline.
//!
//! The tile manager hands [`RasterScheduler`] a full, priority-ordered queue
//! of raster work on every frame. The scheduler admits work while its output
//! fits the upload budget, submits a decode/raster dependency graph to a
//! [`GraphExecutor`], moves finished rasters into GPU memory through an
//! [`UploadTransport`] in FIFO order, and reports back through a
//! [`RasterClient`].
//!
//! Per-task lifecycle: `Unscheduled -> Scheduled -> Uploading -> Completed`.
//! Nothing here blocks; completions are picked up by polling
//! [`RasterScheduler::check_for_completed_tasks`].

pub mod budget;
pub mod cadence;
pub mod graph;
pub mod metrics;
pub mod notify;
pub mod runner;
pub mod state;
pub mod task;
pub mod types;

pub use budget::{FlushOutcome, PendingUploads, UploadBudget};
pub use cadence::{CheckCadence, Clock, MonotonicClock};
pub use graph::{build_task_graph, GraphEdge, GraphNode, GraphNodeId, TaskGraph};
pub use metrics::SchedulerMetrics;
pub use notify::{FiredNotifications, Latch, NotificationGate};
pub use runner::{RasterScheduler, SchedulerSnapshot, TaskStateCounts, ThrottleState};
pub use state::{RasterTaskState, TaskState, TaskStateTable};
pub use task::{
    CompletedTask, GraphExecutor, RasterClient, TargetHandle, TaskFailure, TaskOutcome,
    UploadCompletion, UploadTransport,
};
pub use types::{CompletedRaster, Priority, RasterTaskQueue, RasterWorkItem};
