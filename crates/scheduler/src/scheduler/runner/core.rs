use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, info};

use rasterpool_core::{DecodeTaskId, PoolConfig, ResourceFormat, ResourceTarget, TaskId};

use crate::scheduler::budget::{PendingUploads, UploadBudget};
use crate::scheduler::cadence::{CheckCadence, Clock, MonotonicClock};
use crate::scheduler::graph::{GraphNodeId, TaskGraph};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::notify::NotificationGate;
use crate::scheduler::state::{TaskState, TaskStateTable};
use crate::scheduler::task::{GraphExecutor, TargetHandle, TaskFailure, UploadTransport};
use crate::scheduler::types::{CompletedRaster, RasterTaskQueue};

/// The raster scheduler. Turns the tile manager's prioritized queue into
/// uploaded resources under a byte budget for in-flight uploads.
///
/// Owned by a single thread; every method takes `&mut self` and none blocks.
pub struct RasterScheduler {
    pub(super) config: PoolConfig,
    pub(super) executor: Box<dyn GraphExecutor>,
    pub(super) transport: Box<dyn UploadTransport>,
    pub(super) clock: Box<dyn Clock>,
    pub(super) shutdown: bool,
    /// Most recent queue, in caller order.
    pub(super) raster_tasks: RasterTaskQueue,
    pub(super) states: TaskStateTable,
    pub(super) pending_uploads: PendingUploads,
    /// Upload target -> task, for tasks in `Uploading`.
    pub(super) uploads_in_flight: HashMap<TargetHandle, TaskId>,
    /// Retired this poll, reported to the client at the end of it.
    pub(super) completed_tasks: Vec<CompletedRaster>,
    pub(super) completed_decode_tasks: Vec<DecodeTaskId>,
    /// Decodes reported finished; left out of later graphs.
    pub(super) finished_decodes: HashSet<DecodeTaskId>,
    pub(super) budget: UploadBudget,
    pub(super) scheduled_raster_task_count: usize,
    pub(super) raster_tasks_required_for_activation_count: usize,
    pub(super) gate: NotificationGate,
    pub(super) cadence: CheckCadence,
    pub(super) has_performed_uploads_since_last_flush: bool,
    /// Last admission pass left work unscheduled for lack of budget.
    pub(super) throttled: bool,
    pub(super) generation: u64,
    pub(super) metrics: SchedulerMetrics,
}

impl RasterScheduler {
    pub fn new(
        config: PoolConfig,
        executor: Box<dyn GraphExecutor>,
        transport: Box<dyn UploadTransport>,
    ) -> Self {
        info!(
            "Raster scheduler created: {} byte upload budget, {} {}",
            config.max_transfer_buffer_usage_bytes, config.resource_target, config.resource_format
        );
        Self {
            budget: UploadBudget::new(config.max_transfer_buffer_usage_bytes),
            cadence: CheckCadence::new(config.check_delay()),
            config,
            executor,
            transport,
            clock: Box::new(MonotonicClock),
            shutdown: false,
            raster_tasks: RasterTaskQueue::new(),
            states: TaskStateTable::new(),
            pending_uploads: PendingUploads::new(),
            uploads_in_flight: HashMap::new(),
            completed_tasks: Vec::new(),
            completed_decode_tasks: Vec::new(),
            finished_decodes: HashSet::new(),
            scheduled_raster_task_count: 0,
            raster_tasks_required_for_activation_count: 0,
            gate: NotificationGate::new(),
            has_performed_uploads_since_last_flush: false,
            throttled: false,
            generation: 0,
            metrics: SchedulerMetrics::default(),
        }
    }

    /// Replace the clock used to pace completion checks.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn resource_target(&self) -> ResourceTarget {
        self.config.resource_target
    }

    pub fn resource_format(&self) -> ResourceFormat {
        self.config.resource_format
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current state of a tracked task. `None` once it is retired or cancelled.
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.states.get(task).map(|entry| entry.state())
    }

    pub fn scheduled_raster_task_count(&self) -> usize {
        self.scheduled_raster_task_count
    }

    pub fn raster_tasks_required_for_activation_count(&self) -> usize {
        self.raster_tasks_required_for_activation_count
    }

    pub fn bytes_pending_upload(&self) -> usize {
        self.budget.bytes_pending_upload()
    }

    pub fn max_bytes_pending_upload(&self) -> usize {
        self.budget.max_bytes_pending_upload()
    }

    /// Tasks tracked but not yet retired.
    pub fn pending_raster_task_count(&self) -> usize {
        self.states.len()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.states.is_empty() || !self.completed_tasks.is_empty()
    }

    pub fn has_pending_tasks_required_for_activation(&self) -> bool {
        self.raster_tasks_required_for_activation_count > 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// When the next completion check is due, if work is outstanding.
    pub fn next_check_at(&self) -> Option<Instant> {
        self.cadence.next_check()
    }

    /// Cancel and forget all work. No callback fires afterwards, even for
    /// work the executor or transport finishes later.
    pub fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        info!(
            tracked = self.states.len(),
            bytes_pending_upload = self.budget.bytes_pending_upload(),
            "Raster scheduler shutting down"
        );
        self.shutdown = true;

        for task in self.states.task_ids() {
            self.cancel_task(task);
        }
        // Drop everything the executor has not started.
        self.executor.submit(TaskGraph::new());

        self.raster_tasks = RasterTaskQueue::new();
        self.pending_uploads.clear();
        self.uploads_in_flight.clear();
        self.completed_tasks.clear();
        self.completed_decode_tasks.clear();
        self.finished_decodes.clear();
        self.scheduled_raster_task_count = 0;
        self.raster_tasks_required_for_activation_count = 0;
        self.throttled = false;
        self.has_performed_uploads_since_last_flush = false;
        self.gate.disarm();
        self.cadence.clear();

        assert_eq!(
            self.budget.bytes_pending_upload(),
            0,
            "upload budget still reserved after shutdown"
        );
    }

    /// Drop a tracked task regardless of its state, releasing what it holds.
    /// No completion is reported for it.
    pub(super) fn cancel_task(&mut self, task: TaskId) {
        let Some(entry) = self.states.remove(task) else {
            return;
        };
        match entry.state() {
            TaskState::Unscheduled | TaskState::Completed => {}
            TaskState::Scheduled => {
                if entry.raster_finished {
                    self.pending_uploads.remove(task);
                } else {
                    self.executor.cancel(GraphNodeId::Raster(task));
                }
            }
            TaskState::Uploading => {
                self.budget.release(entry.bytes());
                if let Some(target) = entry.target {
                    self.uploads_in_flight.remove(&target);
                }
            }
        }
        if let Some(target) = entry.target {
            self.transport.release_target(target);
        }
        self.metrics.tasks_cancelled += 1;
        debug!(%task, state = ?entry.state(), "Cancelled raster task");
    }

    /// Retire a task as `Completed`, queueing its report for the client.
    pub(super) fn complete_task(&mut self, task: TaskId, failure: Option<TaskFailure>) {
        let Some(mut entry) = self.states.remove(task) else {
            return;
        };
        entry.advance(TaskState::Completed);

        if failure.is_some() {
            if let Some(target) = entry.target {
                self.transport.release_target(target);
            }
        }

        assert!(
            self.scheduled_raster_task_count > 0,
            "scheduled raster task count underflow completing {task}"
        );
        self.scheduled_raster_task_count -= 1;
        if entry.required_for_activation {
            assert!(
                self.raster_tasks_required_for_activation_count > 0,
                "required-for-activation count underflow completing {task}"
            );
            self.raster_tasks_required_for_activation_count -= 1;
        }

        self.metrics.record_completion(failure.as_ref());
        self.completed_tasks.push(CompletedRaster {
            task,
            resource: entry.resource,
            target: entry.target,
            required_for_activation: entry.required_for_activation,
            failure,
        });
    }
}
