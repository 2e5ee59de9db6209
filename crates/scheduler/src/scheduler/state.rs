use std::collections::HashMap;

use serde::Serialize;

use rasterpool_core::{Resource, TaskId};

use super::task::TargetHandle;
use super::types::{Priority, RasterWorkItem};

/// Lifecycle of a raster task. Variants are ordered; a task only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Unscheduled,
    Scheduled,
    Uploading,
    Completed,
}

/// Per-task record kept between scheduling generations.
#[derive(Debug, Clone)]
pub struct RasterTaskState {
    state: TaskState,
    pub resource: Resource,
    pub target: Option<TargetHandle>,
    pub priority: Priority,
    /// Position in the most recent queue.
    pub queue_index: usize,
    pub required_for_activation: bool,
    /// Raster step done, upload not yet issued.
    pub raster_finished: bool,
}

impl RasterTaskState {
    pub fn new(item: &RasterWorkItem, queue_index: usize) -> Self {
        Self {
            state: TaskState::Unscheduled,
            resource: item.resource,
            target: None,
            priority: item.priority,
            queue_index,
            required_for_activation: item.required_for_activation,
            raster_finished: false,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn bytes(&self) -> usize {
        self.resource.bytes()
    }

    /// Move to `next`. Panics on anything but a forward transition.
    pub fn advance(&mut self, next: TaskState) {
        assert!(
            next > self.state,
            "raster task state regression: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Whether the raster step still needs the executor.
    pub fn needs_raster(&self) -> bool {
        self.state == TaskState::Scheduled && !self.raster_finished
    }
}

/// Task State Table: identity -> lifecycle record.
#[derive(Debug, Default)]
pub struct TaskStateTable {
    entries: HashMap<TaskId, RasterTaskState>,
}

impl TaskStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `item` if it is new, otherwise refresh its ordering attributes.
    /// Returns `true` when a new entry was created.
    pub fn upsert(&mut self, item: &RasterWorkItem, queue_index: usize) -> bool {
        match self.entries.get_mut(&item.task) {
            Some(entry) => {
                entry.priority = item.priority;
                entry.queue_index = queue_index;
                entry.required_for_activation = item.required_for_activation;
                false
            }
            None => {
                self.entries
                    .insert(item.task, RasterTaskState::new(item, queue_index));
                true
            }
        }
    }

    pub fn get(&self, task: TaskId) -> Option<&RasterTaskState> {
        self.entries.get(&task)
    }

    pub fn get_mut(&mut self, task: TaskId) -> Option<&mut RasterTaskState> {
        self.entries.get_mut(&task)
    }

    pub fn remove(&mut self, task: TaskId) -> Option<RasterTaskState> {
        self.entries.remove(&task)
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.entries.contains_key(&task)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &RasterTaskState)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.entries.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Tracked tasks that have not completed.
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state != TaskState::Completed)
            .count()
    }

    /// Tracked required-for-activation tasks that have not completed.
    pub fn pending_required_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state != TaskState::Completed && e.required_for_activation)
            .count()
    }

    pub fn count_in(&self, state: TaskState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    /// Bytes of tasks admitted to raster whose upload has not been reserved yet.
    pub fn scheduled_bytes(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == TaskState::Scheduled)
            .map(|e| e.bytes())
            .sum()
    }
}
