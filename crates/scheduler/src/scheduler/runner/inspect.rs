use serde::Serialize;

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::notify::Latch;
use crate::scheduler::state::TaskState;

use super::core::RasterScheduler;

/// How far uploads are holding back raster work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleState {
    pub bytes_pending_upload: usize,
    pub max_bytes_pending_upload: usize,
    /// Rasters finished and waiting for budget to upload.
    pub pending_upload_count: usize,
    /// Tasks not admitted to raster yet.
    pub throttled_task_count: usize,
}

/// Tracked tasks per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStateCounts {
    pub unscheduled: usize,
    pub scheduled: usize,
    pub uploading: usize,
}

/// Point-in-time view of the scheduler, for logs and the simulator's report.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub state: &'static str,
    pub generation: u64,
    pub scheduled_raster_task_count: usize,
    pub raster_tasks_required_for_activation_count: usize,
    pub tasks: TaskStateCounts,
    pub throttle: ThrottleState,
    pub all_finished_latch: Latch,
    pub activation_finished_latch: Latch,
    pub metrics: SchedulerMetrics,
    pub config: serde_json::Value,
}

impl RasterScheduler {
    /// One-word summary of what the scheduler is waiting on.
    pub fn state_name(&self) -> &'static str {
        if self.shutdown {
            "shutdown"
        } else if self.states.is_empty() {
            "idle"
        } else if self.throttled || !self.pending_uploads.is_empty() {
            "throttled"
        } else if self.states.iter().any(|(_, entry)| entry.needs_raster()) {
            "rasterizing"
        } else {
            "waiting_for_uploads"
        }
    }

    pub fn throttle_state(&self) -> ThrottleState {
        ThrottleState {
            bytes_pending_upload: self.budget.bytes_pending_upload(),
            max_bytes_pending_upload: self.budget.max_bytes_pending_upload(),
            pending_upload_count: self.pending_uploads.len(),
            throttled_task_count: self.states.count_in(TaskState::Unscheduled),
        }
    }

    pub fn task_state_counts(&self) -> TaskStateCounts {
        TaskStateCounts {
            unscheduled: self.states.count_in(TaskState::Unscheduled),
            scheduled: self.states.count_in(TaskState::Scheduled),
            uploading: self.states.count_in(TaskState::Uploading),
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            state: self.state_name(),
            generation: self.generation,
            scheduled_raster_task_count: self.scheduled_raster_task_count,
            raster_tasks_required_for_activation_count: self
                .raster_tasks_required_for_activation_count,
            tasks: self.task_state_counts(),
            throttle: self.throttle_state(),
            all_finished_latch: self.gate.all_finished(),
            activation_finished_latch: self.gate.activation_finished(),
            metrics: self.metrics.clone(),
            config: self.config.summary(),
        }
    }
}
