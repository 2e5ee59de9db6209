//! Upload budget: bytes in flight between raster output and GPU memory.

use std::collections::VecDeque;

use rasterpool_core::TaskId;

/// Tracks bytes reserved for uploads against a fixed maximum.
///
/// Only mutated on the owner thread. Any accounting error elsewhere in the
/// scheduler shows up here as a panic.
#[derive(Debug, Clone)]
pub struct UploadBudget {
    bytes_pending_upload: usize,
    max_bytes_pending_upload: usize,
}

impl UploadBudget {
    pub fn new(max_bytes_pending_upload: usize) -> Self {
        Self {
            bytes_pending_upload: 0,
            max_bytes_pending_upload,
        }
    }

    /// Reserve `bytes` if they fit in what is left of the budget.
    pub fn try_reserve(&mut self, bytes: usize) -> bool {
        match self.bytes_pending_upload.checked_add(bytes) {
            Some(total) if total <= self.max_bytes_pending_upload => {
                self.bytes_pending_upload = total;
                self.check_invariant();
                true
            }
            _ => false,
        }
    }

    /// Return `bytes` once their upload finished or was abandoned.
    pub fn release(&mut self, bytes: usize) {
        assert!(
            bytes <= self.bytes_pending_upload,
            "upload budget underflow: releasing {} of {} pending bytes",
            bytes,
            self.bytes_pending_upload
        );
        self.bytes_pending_upload -= bytes;
        self.check_invariant();
    }

    pub fn bytes_pending_upload(&self) -> usize {
        self.bytes_pending_upload
    }

    pub fn max_bytes_pending_upload(&self) -> usize {
        self.max_bytes_pending_upload
    }

    pub fn available(&self) -> usize {
        self.max_bytes_pending_upload - self.bytes_pending_upload
    }

    pub fn is_exhausted(&self) -> bool {
        self.bytes_pending_upload >= self.max_bytes_pending_upload
    }

    /// Whether a resource of `bytes` could ever be uploaded under this budget.
    pub fn can_ever_fit(&self, bytes: usize) -> bool {
        bytes <= self.max_bytes_pending_upload
    }

    fn check_invariant(&self) {
        assert!(
            self.bytes_pending_upload <= self.max_bytes_pending_upload,
            "upload budget overflow: {} pending > {} max",
            self.bytes_pending_upload,
            self.max_bytes_pending_upload
        );
    }
}

/// FIFO of tasks whose raster finished but whose upload is not issued yet.
#[derive(Debug, Default)]
pub struct PendingUploads {
    queue: VecDeque<(TaskId, usize)>,
}

/// What one flush pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub issued: usize,
    /// The head of the queue did not fit and is still waiting.
    pub blocked: bool,
}

impl PendingUploads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TaskId, bytes: usize) {
        self.queue.push_back((task, bytes));
    }

    /// Drop a cancelled task. Returns whether it was queued.
    pub fn remove(&mut self, task: TaskId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|(id, _)| *id != task);
        self.queue.len() != before
    }

    /// Issue uploads front-to-back until the queue is empty or the head no
    /// longer fits. Later tasks never overtake a blocked head.
    ///
    /// `issue` returns `false` when the task can no longer be uploaded; its
    /// reservation is handed back and the pass moves on.
    pub fn flush(
        &mut self,
        budget: &mut UploadBudget,
        mut issue: impl FnMut(TaskId, usize) -> bool,
    ) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        while let Some(&(task, bytes)) = self.queue.front() {
            if !budget.try_reserve(bytes) {
                outcome.blocked = true;
                break;
            }
            self.queue.pop_front();
            if issue(task, bytes) {
                outcome.issued += 1;
            } else {
                budget.release(bytes);
            }
        }
        outcome
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.queue.iter().any(|(id, _)| *id == task)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.queue.iter().map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_within_budget() {
        let mut budget = UploadBudget::new(100);
        assert!(budget.try_reserve(60));
        assert!(budget.try_reserve(40));
        assert!(budget.is_exhausted());
        assert!(!budget.try_reserve(1));
        assert_eq!(budget.bytes_pending_upload(), 100);
        assert_eq!(budget.available(), 0);
    }

    #[test]
    fn failed_reserve_leaves_counter_untouched() {
        let mut budget = UploadBudget::new(100);
        assert!(budget.try_reserve(70));
        assert!(!budget.try_reserve(31));
        assert_eq!(budget.bytes_pending_upload(), 70);
        assert!(!budget.try_reserve(usize::MAX));
        assert_eq!(budget.bytes_pending_upload(), 70);
    }

    #[test]
    fn release_frees_capacity() {
        let mut budget = UploadBudget::new(100);
        assert!(budget.try_reserve(100));
        budget.release(100);
        assert_eq!(budget.bytes_pending_upload(), 0);
        assert!(budget.try_reserve(100));
    }

    #[test]
    #[should_panic(expected = "upload budget underflow")]
    fn over_release_is_fatal() {
        let mut budget = UploadBudget::new(100);
        assert!(budget.try_reserve(10));
        budget.release(11);
    }

    #[test]
    fn can_ever_fit() {
        let budget = UploadBudget::new(100);
        assert!(budget.can_ever_fit(100));
        assert!(!budget.can_ever_fit(101));
    }

    #[test]
    fn flush_is_fifo_and_never_skips_blocked_head() {
        let mut budget = UploadBudget::new(100);
        let mut pending = PendingUploads::new();
        pending.push(TaskId(1), 60);
        pending.push(TaskId(2), 60);
        pending.push(TaskId(3), 10);

        let mut issued = Vec::new();
        let outcome = pending.flush(&mut budget, |task, _| {
            issued.push(task);
            true
        });
        // Task 3 would fit, but task 2 is ahead of it.
        assert_eq!(issued, vec![TaskId(1)]);
        assert_eq!(outcome, FlushOutcome { issued: 1, blocked: true });
        assert_eq!(pending.len(), 2);

        budget.release(60);
        let outcome = pending.flush(&mut budget, |task, _| {
            issued.push(task);
            true
        });
        assert_eq!(issued, vec![TaskId(1), TaskId(2), TaskId(3)]);
        assert_eq!(outcome, FlushOutcome { issued: 2, blocked: false });
        assert!(pending.is_empty());
        assert_eq!(budget.bytes_pending_upload(), 70);
    }

    #[test]
    fn rejected_issue_returns_reservation() {
        let mut budget = UploadBudget::new(100);
        let mut pending = PendingUploads::new();
        pending.push(TaskId(1), 50);
        pending.push(TaskId(2), 50);

        let outcome = pending.flush(&mut budget, |task, _| task != TaskId(1));
        assert_eq!(outcome, FlushOutcome { issued: 1, blocked: false });
        assert_eq!(budget.bytes_pending_upload(), 50);
    }

    #[test]
    fn remove_cancelled_task() {
        let mut pending = PendingUploads::new();
        pending.push(TaskId(1), 10);
        pending.push(TaskId(2), 10);
        assert!(pending.remove(TaskId(1)));
        assert!(!pending.remove(TaskId(1)));
        assert!(!pending.contains(TaskId(1)));
        assert_eq!(pending.task_ids().collect::<Vec<_>>(), vec![TaskId(2)]);
    }
}
