pub mod scheduler;
pub mod sim;

pub use scheduler::{
    CompletedRaster, GraphExecutor, Priority, RasterClient, RasterScheduler, RasterTaskQueue,
    RasterWorkItem, SchedulerMetrics, SchedulerSnapshot, TargetHandle, TaskFailure, TaskState,
    UploadTransport,
};
