use std::collections::HashSet;

use tracing::{debug, warn};

use rasterpool_core::{DecodeTaskId, TaskId};

use crate::scheduler::graph::{build_task_graph, ordering_key, GraphCandidate};
use crate::scheduler::state::TaskState;
use crate::scheduler::task::TaskFailure;
use crate::scheduler::types::{RasterTaskQueue, RasterWorkItem};

use super::core::RasterScheduler;

impl RasterScheduler {
    /// Replace the desired set of raster work with `queue`.
    ///
    /// Tasks already tracked keep their progress and pick up the new
    /// priority. Tracked tasks missing from `queue` are cancelled without a
    /// completion callback. Both notification latches are re-armed for the
    /// new generation.
    pub fn schedule_tasks(&mut self, queue: RasterTaskQueue) {
        if self.shutdown {
            warn!(tasks = queue.len(), "schedule_tasks after shutdown ignored");
            return;
        }
        self.generation += 1;

        let mut seen: HashSet<TaskId> = HashSet::with_capacity(queue.len());
        let items: Vec<RasterWorkItem> = queue
            .items
            .into_iter()
            .filter(|item| {
                let first = seen.insert(item.task);
                if !first {
                    warn!(task = %item.task, "Duplicate raster task in queue, keeping the first");
                }
                first
            })
            .collect();

        let mut cancelled = 0;
        for task in self.states.task_ids() {
            if !seen.contains(&task) {
                self.cancel_task(task);
                cancelled += 1;
            }
        }

        let mut added = 0;
        for (index, item) in items.iter().enumerate() {
            if self.states.upsert(item, index) {
                added += 1;
            }
        }
        self.raster_tasks = RasterTaskQueue { items };

        let referenced: HashSet<DecodeTaskId> = self
            .raster_tasks
            .iter()
            .flat_map(|item| item.decode_dependencies.iter().copied())
            .collect();
        self.finished_decodes.retain(|decode| referenced.contains(decode));

        self.scheduled_raster_task_count = self.states.pending_count();
        self.raster_tasks_required_for_activation_count = self.states.pending_required_count();
        self.gate.rearm(
            self.scheduled_raster_task_count,
            self.raster_tasks_required_for_activation_count,
        );

        self.schedule_more_tasks(true);

        if self.has_pending_tasks() {
            let now = self.clock.now();
            self.cadence.schedule(now);
        } else {
            self.cadence.clear();
        }

        debug!(
            generation = self.generation,
            tracked = self.states.len(),
            added,
            cancelled,
            required = self.raster_tasks_required_for_activation_count,
            "Scheduled raster tasks"
        );
    }

    /// Admit unscheduled tasks in ordering-key order while their bytes fit
    /// the upload budget, then hand the executor a fresh graph.
    ///
    /// Admission stops at the first task that does not fit so lower-priority
    /// work never takes budget from higher-priority work. A task larger than
    /// the whole budget is completed with a failure instead.
    pub(super) fn schedule_more_tasks(&mut self, force_submit: bool) {
        let mut order: Vec<usize> = (0..self.raster_tasks.items.len())
            .filter(|&index| self.states.contains(self.raster_tasks.items[index].task))
            .collect();
        order.sort_by_key(|&index| {
            let item = &self.raster_tasks.items[index];
            ordering_key(item.priority, item.required_for_activation, index)
        });

        let max = self.budget.max_bytes_pending_upload();
        let mut committed = self.budget.bytes_pending_upload() + self.states.scheduled_bytes();
        let mut throttled = false;
        let mut admitted = 0;
        let mut oversized: Vec<(TaskId, usize)> = Vec::new();

        for &index in &order {
            let item = &self.raster_tasks.items[index];
            let Some(entry) = self.states.get_mut(item.task) else {
                continue;
            };
            if entry.state() != TaskState::Unscheduled || throttled {
                continue;
            }
            let bytes = entry.bytes();
            if !self.budget.can_ever_fit(bytes) {
                oversized.push((item.task, bytes));
                continue;
            }
            if committed.saturating_add(bytes) > max {
                throttled = true;
                continue;
            }
            committed += bytes;
            entry.target = Some(self.transport.acquire_target(item.task, &item.resource));
            entry.advance(TaskState::Scheduled);
            admitted += 1;
        }

        if throttled {
            self.metrics.throttled_passes += 1;
            debug!(committed, max, "Raster admission throttled by upload budget");
        }
        self.throttled = throttled;

        if admitted > 0 || force_submit {
            let candidates: Vec<GraphCandidate<'_>> = order
                .iter()
                .filter_map(|&index| {
                    let item = &self.raster_tasks.items[index];
                    let entry = self.states.get(item.task)?;
                    entry.needs_raster().then_some(GraphCandidate {
                        task: item.task,
                        priority: entry.priority,
                        required_for_activation: entry.required_for_activation,
                        queue_index: index,
                        decodes: &item.decode_dependencies,
                        target: entry.target,
                    })
                })
                .collect();
            let graph = build_task_graph(candidates, &self.finished_decodes);
            debug!(
                nodes = graph.len(),
                rasters = graph.raster_tasks().len(),
                admitted,
                "Submitting task graph"
            );
            self.executor.submit(graph);
            self.metrics.graphs_submitted += 1;
        }

        for (task, bytes) in oversized {
            warn!(%task, bytes, max, "Raster task can never fit the upload budget");
            self.complete_task(task, Some(TaskFailure::ExceedsUploadBudget { bytes, max }));
        }
    }
}
