use tracing::{debug, trace, warn};

use crate::scheduler::graph::GraphNodeId;
use crate::scheduler::state::TaskState;
use crate::scheduler::task::{RasterClient, TaskFailure, TaskOutcome};

use super::core::RasterScheduler;

impl RasterScheduler {
    /// Drain executor and transport completions, issue whatever uploads the
    /// budget allows, admit more work, and report to `client`.
    ///
    /// Callbacks run last, after all internal state is settled, so a client
    /// may call back into the scheduler from inside any of them.
    pub fn check_for_completed_tasks(&mut self, client: &mut dyn RasterClient) {
        if self.shutdown {
            self.discard_late_completions();
            return;
        }

        let uploads_finished = self.check_for_completed_uploads();
        let rasters_finished = self.check_for_completed_raster_tasks();
        self.flush_uploads();

        if self.states.count_in(TaskState::Unscheduled) > 0 {
            self.schedule_more_tasks(false);
        }

        if self.has_performed_uploads_since_last_flush {
            self.transport.shallow_flush();
            self.has_performed_uploads_since_last_flush = false;
        }

        let completed = std::mem::take(&mut self.completed_tasks);
        let decodes = std::mem::take(&mut self.completed_decode_tasks);

        let fired = self.gate.poll(
            self.scheduled_raster_task_count,
            self.raster_tasks_required_for_activation_count,
        );
        if fired.activation_finished {
            self.metrics.activation_finished_notifications += 1;
        }
        if fired.all_finished {
            self.metrics.all_finished_notifications += 1;
        }

        let now = self.clock.now();
        if self.has_pending_tasks() {
            self.cadence.reschedule(now);
        } else {
            self.cadence.clear();
        }

        trace!(
            uploads_finished,
            rasters_finished,
            decodes = decodes.len(),
            completed = completed.len(),
            bytes_pending_upload = self.budget.bytes_pending_upload(),
            "Checked for completed tasks"
        );

        for task in &completed {
            client.did_complete_raster_task(task);
        }
        if fired.activation_finished && !self.shutdown {
            debug!(generation = self.generation, "Raster tasks required for activation finished");
            client.did_finish_running_tasks_required_for_activation(self);
        }
        if fired.all_finished && !self.shutdown {
            debug!(generation = self.generation, "All raster tasks finished");
            client.did_finish_running_tasks(self);
        }
    }

    /// Run a completion check if the cadence deadline has passed.
    /// Returns whether a check ran.
    pub fn check_if_due(&mut self, client: &mut dyn RasterClient) -> bool {
        if self.shutdown || !self.cadence.is_due(self.clock.now()) {
            return false;
        }
        self.check_for_completed_tasks(client);
        true
    }

    /// Retire tasks whose upload the transport reports done.
    fn check_for_completed_uploads(&mut self) -> usize {
        let mut finished = 0;
        for completion in self.transport.poll_upload_completion() {
            let Some(task) = self.uploads_in_flight.remove(&completion.target) else {
                self.metrics.stale_completions += 1;
                debug!(upload_target = ?completion.target, "Ignoring upload completion for untracked target");
                continue;
            };
            let Some(bytes) = self
                .states
                .get(task)
                .filter(|entry| entry.state() == TaskState::Uploading)
                .map(|entry| entry.bytes())
            else {
                self.metrics.stale_completions += 1;
                continue;
            };

            self.budget.release(bytes);
            match completion.result {
                Ok(()) => self.complete_task(task, None),
                Err(reason) => {
                    warn!(%task, %reason, "Upload failed");
                    self.complete_task(task, Some(TaskFailure::Upload(reason)));
                }
            }
            finished += 1;
        }
        finished
    }

    /// Record finished decodes and rasters. Successful rasters join the
    /// upload FIFO in completion order.
    fn check_for_completed_raster_tasks(&mut self) -> usize {
        let mut finished = 0;
        for completed in self.executor.drain_completed() {
            match completed.node {
                GraphNodeId::Decode(decode) => {
                    if let TaskOutcome::Failed(reason) = &completed.outcome {
                        warn!(%decode, %reason, "Image decode failed, dependents will raster without it");
                    }
                    self.finished_decodes.insert(decode);
                    self.completed_decode_tasks.push(decode);
                }
                GraphNodeId::Raster(task) => {
                    let Some(entry) = self.states.get_mut(task) else {
                        self.metrics.stale_completions += 1;
                        debug!(%task, "Ignoring raster completion for untracked task");
                        continue;
                    };
                    if !entry.needs_raster() {
                        self.metrics.stale_completions += 1;
                        debug!(%task, state = ?entry.state(), "Ignoring duplicate raster completion");
                        continue;
                    }
                    match completed.outcome {
                        TaskOutcome::Finished => {
                            entry.raster_finished = true;
                            let bytes = entry.bytes();
                            self.pending_uploads.push(task, bytes);
                        }
                        TaskOutcome::Failed(reason) => {
                            warn!(%task, %reason, "Raster task failed");
                            self.complete_task(task, Some(TaskFailure::Raster(reason)));
                        }
                    }
                    finished += 1;
                }
            }
        }
        finished
    }

    /// Issue uploads from the FIFO head while the budget allows.
    fn flush_uploads(&mut self) {
        let Self {
            pending_uploads,
            budget,
            states,
            transport,
            uploads_in_flight,
            metrics,
            ..
        } = self;

        let outcome = pending_uploads.flush(budget, |task, bytes| {
            let Some(entry) = states.get_mut(task) else {
                return false;
            };
            let Some(target) = entry.target else {
                return false;
            };
            entry.advance(TaskState::Uploading);
            transport.begin_upload(target, bytes);
            uploads_in_flight.insert(target, task);
            metrics.record_upload(bytes);
            trace!(%task, bytes, "Upload issued");
            true
        });

        if outcome.issued > 0 {
            self.has_performed_uploads_since_last_flush = true;
        }
        if outcome.blocked {
            self.metrics.upload_deferrals += 1;
            debug!(
                waiting = self.pending_uploads.len(),
                bytes_pending_upload = self.budget.bytes_pending_upload(),
                "Uploads deferred, budget exhausted"
            );
        }
    }

    /// After shutdown: swallow whatever the executor and transport still
    /// report so nothing leaks into a later check.
    fn discard_late_completions(&mut self) {
        let late = self.executor.drain_completed().len() + self.transport.poll_upload_completion().len();
        if late > 0 {
            self.metrics.stale_completions += late as u64;
            debug!(late, "Discarded completions after shutdown");
        }
    }
}
