use chrono::{DateTime, Utc};
use serde::Serialize;

use super::task::TaskFailure;

/// Raster scheduler counters, exposed through state snapshots.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Raster tasks whose resource became visible.
    pub tasks_completed: u64,
    /// Raster tasks completed with a failure marker, by kind.
    pub raster_failures: u64,
    pub upload_failures: u64,
    pub oversized_tasks: u64,
    /// Tracked tasks dropped by a later schedule.
    pub tasks_cancelled: u64,
    pub uploads_issued: u64,
    pub bytes_uploaded: u64,
    /// Flush passes that stopped because the head did not fit.
    pub upload_deferrals: u64,
    /// Admission passes that left work unscheduled for lack of budget.
    pub throttled_passes: u64,
    pub graphs_submitted: u64,
    pub all_finished_notifications: u64,
    pub activation_finished_notifications: u64,
    /// Completions from the executor or transport for work no longer tracked.
    pub stale_completions: u64,
    pub last_completion: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record a task reaching `Completed`.
    pub fn record_completion(&mut self, failure: Option<&TaskFailure>) {
        match failure {
            None => self.tasks_completed += 1,
            Some(TaskFailure::Raster(_)) => self.raster_failures += 1,
            Some(TaskFailure::Upload(_)) => self.upload_failures += 1,
            Some(TaskFailure::ExceedsUploadBudget { .. }) => self.oversized_tasks += 1,
        }
        self.last_completion = Some(Utc::now());
    }

    pub fn record_upload(&mut self, bytes: usize) {
        self.uploads_issued += 1;
        self.bytes_uploaded += bytes as u64;
    }

    pub fn failed_tasks(&self) -> u64 {
        self.raster_failures + self.upload_failures + self.oversized_tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.tasks_completed, 0);
        assert_eq!(m.failed_tasks(), 0);
        assert!(m.last_completion.is_none());
    }

    #[test]
    fn completions_split_by_failure_kind() {
        let mut m = SchedulerMetrics::default();
        m.record_completion(None);
        m.record_completion(Some(&TaskFailure::Raster("canvas lost".into())));
        m.record_completion(Some(&TaskFailure::Upload("context lost".into())));
        m.record_completion(Some(&TaskFailure::ExceedsUploadBudget { bytes: 10, max: 5 }));

        assert_eq!(m.tasks_completed, 1);
        assert_eq!(m.raster_failures, 1);
        assert_eq!(m.upload_failures, 1);
        assert_eq!(m.oversized_tasks, 1);
        assert_eq!(m.failed_tasks(), 3);
        assert!(m.last_completion.is_some());
    }

    #[test]
    fn uploads_accumulate_bytes() {
        let mut m = SchedulerMetrics::default();
        m.record_upload(100);
        m.record_upload(28);
        assert_eq!(m.uploads_issued, 2);
        assert_eq!(m.bytes_uploaded, 128);
    }
}
