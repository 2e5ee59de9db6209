use serde::{Deserialize, Serialize};

use rasterpool_core::{DecodeTaskId, Resource, TaskId};

use super::task::{TargetHandle, TaskFailure};

/// Caller-assigned raster priority. Lower numeric value = higher priority.
///
/// The scheduler treats it as an opaque ordering key; ties are broken by
/// activation requirement and then by queue position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
}

/// One tile's raster work, as handed over by the tile manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterWorkItem {
    pub task: TaskId,
    /// Texture the raster output is uploaded into.
    pub resource: Resource,
    pub priority: Priority,
    /// Must finish before the pending tree can be activated.
    #[serde(default)]
    pub required_for_activation: bool,
    /// Image decodes that must finish before this raster can run.
    #[serde(default)]
    pub decode_dependencies: Vec<DecodeTaskId>,
}

impl RasterWorkItem {
    pub fn new(task: TaskId, resource: Resource, priority: Priority) -> Self {
        Self {
            task,
            resource,
            priority,
            required_for_activation: false,
            decode_dependencies: Vec::new(),
        }
    }

    pub fn required_for_activation(mut self, required: bool) -> Self {
        self.required_for_activation = required;
        self
    }

    pub fn with_decodes(mut self, decodes: impl IntoIterator<Item = DecodeTaskId>) -> Self {
        self.decode_dependencies.extend(decodes);
        self
    }

    /// Upload size of this item's resource.
    pub fn bytes(&self) -> usize {
        self.resource.bytes()
    }
}

/// Full replacement of the desired in-flight raster work, priority-ordered
/// by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterTaskQueue {
    pub items: Vec<RasterWorkItem>,
}

impl RasterTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: RasterWorkItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RasterWorkItem> {
        self.items.iter()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.items.iter().any(|item| item.task == task)
    }
}

impl FromIterator<RasterWorkItem> for RasterTaskQueue {
    fn from_iter<I: IntoIterator<Item = RasterWorkItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// A raster task that reached `Completed` and was retired from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedRaster {
    pub task: TaskId,
    pub resource: Resource,
    /// Upload target, if one was acquired before the task finished.
    pub target: Option<TargetHandle>,
    pub required_for_activation: bool,
    /// `None` when the resource is uploaded and consumer-visible.
    pub failure: Option<TaskFailure>,
}

impl CompletedRaster {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasterpool_core::ResourceFormat;

    fn resource(id: u64) -> Resource {
        Resource::new(id, 64, 64, ResourceFormat::Rgba8888)
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::HIGHEST < Priority(1));
        assert!(Priority(1) < Priority(7));
    }

    #[test]
    fn work_item_builder() {
        let item = RasterWorkItem::new(TaskId(3), resource(3), Priority(2))
            .required_for_activation(true)
            .with_decodes([DecodeTaskId(10), DecodeTaskId(11)]);
        assert!(item.required_for_activation);
        assert_eq!(item.decode_dependencies, vec![DecodeTaskId(10), DecodeTaskId(11)]);
        assert_eq!(item.bytes(), 64 * 64 * 4);
    }

    #[test]
    fn queue_from_iterator_keeps_order() {
        let queue: RasterTaskQueue = (1..=3)
            .map(|i| RasterWorkItem::new(TaskId(i), resource(i), Priority(0)))
            .collect();
        let ids: Vec<TaskId> = queue.iter().map(|item| item.task).collect();
        assert_eq!(ids, vec![TaskId(1), TaskId(2), TaskId(3)]);
        assert!(queue.contains(TaskId(2)));
        assert!(!queue.contains(TaskId(9)));
    }

    #[test]
    fn work_item_deserializes_with_defaults() {
        let json = r#"{
            "task": 5,
            "resource": { "id": 5, "width": 16, "height": 16, "format": "luminance8" },
            "priority": 4
        }"#;
        let item: RasterWorkItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.task, TaskId(5));
        assert!(!item.required_for_activation);
        assert!(item.decode_dependencies.is_empty());
        assert_eq!(item.bytes(), 256);
    }
}
