use serde::{Deserialize, Serialize};

/// Identity of one tile's raster task. Stable across scheduling generations,
/// so re-scheduling the same tile keeps its progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

/// Identity of an image decode a raster task depends on. Decodes may be
/// shared between several raster tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecodeTaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "raster#{}", self.0)
    }
}

impl std::fmt::Display for DecodeTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decode#{}", self.0)
    }
}
