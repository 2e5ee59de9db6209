use serde::{Deserialize, Serialize};

use rasterpool_core::{Resource, TaskId};

use super::graph::{GraphNodeId, TaskGraph};
use super::runner::RasterScheduler;
use super::types::CompletedRaster;

/// Why a raster task completed without producing a visible resource.
///
/// Failures are reported as data on [`CompletedRaster`]; the scheduler never
/// retries. The tile manager re-enqueues the tile if it still needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum TaskFailure {
    #[error("Raster failed: {0}")]
    Raster(String),
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error("Resource needs {bytes} bytes but the upload budget is {max}")]
    ExceedsUploadBudget { bytes: usize, max: usize },
}

/// Opaque handle to an upload target (pixel buffer) owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetHandle(pub u64);

/// Result of running one graph node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Failed(String),
}

/// A graph node the executor finished running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTask {
    pub node: GraphNodeId,
    pub outcome: TaskOutcome,
}

impl CompletedTask {
    pub fn finished(node: GraphNodeId) -> Self {
        Self {
            node,
            outcome: TaskOutcome::Finished,
        }
    }

    pub fn failed(node: GraphNodeId, reason: impl Into<String>) -> Self {
        Self {
            node,
            outcome: TaskOutcome::Failed(reason.into()),
        }
    }
}

/// A transfer the upload transport finished (or gave up on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCompletion {
    pub target: TargetHandle,
    pub result: Result<(), String>,
}

/// Dependency-graph executor running raster and decode work on worker threads.
///
/// Contract: `submit` replaces the previously submitted graph. Nodes that are
/// already running or finished are not run again; pending nodes absent from
/// the new graph are dropped. Completions are buffered by the executor until
/// `drain_completed` is called from the owner thread.
pub trait GraphExecutor {
    fn submit(&mut self, graph: TaskGraph);

    /// Take every completion reported since the last call.
    fn drain_completed(&mut self) -> Vec<CompletedTask>;

    /// Drop a node that has not started yet. Running nodes finish normally.
    fn cancel(&mut self, node: GraphNodeId);
}

/// Resource provider side of the pipeline: upload targets and transfers.
pub trait UploadTransport {
    /// Allocate the target a raster task writes its pixels into.
    fn acquire_target(&mut self, task: TaskId, resource: &Resource) -> TargetHandle;

    /// Start transferring `bytes` from the target into GPU memory.
    fn begin_upload(&mut self, target: TargetHandle, bytes: usize);

    /// Take every transfer that finished since the last call.
    fn poll_upload_completion(&mut self) -> Vec<UploadCompletion>;

    /// Give the target back without making it visible.
    fn release_target(&mut self, target: TargetHandle);

    /// Push issued uploads towards the GPU without waiting for them.
    fn shallow_flush(&mut self) {}
}

/// Tile manager callbacks, invoked on the owner thread from
/// [`RasterScheduler::check_for_completed_tasks`].
///
/// The notification callbacks receive the scheduler so the client can
/// schedule the next batch of work right away.
pub trait RasterClient {
    fn did_complete_raster_task(&mut self, _completed: &CompletedRaster) {}

    /// Every raster task of the current generation has completed.
    fn did_finish_running_tasks(&mut self, scheduler: &mut RasterScheduler);

    /// Every required-for-activation raster task has completed.
    fn did_finish_running_tasks_required_for_activation(&mut self, scheduler: &mut RasterScheduler);
}
