//! Dependency graph handed to the executor: decode nodes feeding raster nodes.

use std::collections::HashSet;

use rasterpool_core::{DecodeTaskId, TaskId};

use super::task::TargetHandle;
use super::types::Priority;

/// Identity of a node in the executor's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphNodeId {
    Raster(TaskId),
    Decode(DecodeTaskId),
}

impl std::fmt::Display for GraphNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphNodeId::Raster(id) => write!(f, "{id}"),
            GraphNodeId::Decode(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: GraphNodeId,
    /// Executor scheduling key. Lower runs first.
    pub priority: u32,
    /// Number of incoming edges.
    pub dependencies: usize,
    /// Where a raster node writes its pixels. `None` for decodes.
    pub target: Option<TargetHandle>,
}

/// `from` must finish before `to` may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphEdge {
    pub from: GraphNodeId,
    pub to: GraphNodeId,
}

/// A DAG of decode and raster nodes, nodes listed in scheduling order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: GraphNodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: GraphNodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn dependencies_of(&self, id: GraphNodeId) -> impl Iterator<Item = GraphNodeId> + '_ {
        self.edges.iter().filter(move |e| e.to == id).map(|e| e.from)
    }

    pub fn dependents_of(&self, id: GraphNodeId) -> impl Iterator<Item = GraphNodeId> + '_ {
        self.edges.iter().filter(move |e| e.from == id).map(|e| e.to)
    }

    /// Raster tasks in scheduling order.
    pub fn raster_tasks(&self) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter_map(|n| match n.id {
                GraphNodeId::Raster(id) => Some(id),
                GraphNodeId::Decode(_) => None,
            })
            .collect()
    }
}

/// Sort key for raster work: caller priority, then required-for-activation
/// work ahead of best-effort work, then caller queue order.
pub fn ordering_key(
    priority: Priority,
    required_for_activation: bool,
    queue_index: usize,
) -> (Priority, bool, usize) {
    (priority, !required_for_activation, queue_index)
}

/// A raster task admitted into the next graph.
#[derive(Debug, Clone)]
pub struct GraphCandidate<'a> {
    pub task: TaskId,
    pub priority: Priority,
    pub required_for_activation: bool,
    pub queue_index: usize,
    pub decodes: &'a [DecodeTaskId],
    pub target: Option<TargetHandle>,
}

impl GraphCandidate<'_> {
    fn key(&self) -> (Priority, bool, usize) {
        ordering_key(self.priority, self.required_for_activation, self.queue_index)
    }
}

/// Build the executor graph for `candidates`.
///
/// Each raster gets the rank of its ordering key as executor priority. Each
/// distinct decode gets one node, keyed and placed by its most urgent
/// dependent. Decodes in `finished_decodes` are left out along with their edges.
pub fn build_task_graph(
    mut candidates: Vec<GraphCandidate<'_>>,
    finished_decodes: &HashSet<DecodeTaskId>,
) -> TaskGraph {
    candidates.sort_by_key(|c| c.key());

    let mut graph = TaskGraph::new();
    let mut decode_nodes: HashSet<DecodeTaskId> = HashSet::new();

    for (rank, candidate) in candidates.iter().enumerate() {
        let rank = rank as u32;
        let raster = GraphNodeId::Raster(candidate.task);
        let mut seen_here: HashSet<DecodeTaskId> = HashSet::new();
        let mut dependencies = 0;

        for &decode in candidate.decodes {
            if finished_decodes.contains(&decode) || !seen_here.insert(decode) {
                continue;
            }
            if decode_nodes.insert(decode) {
                graph.nodes.push(GraphNode {
                    id: GraphNodeId::Decode(decode),
                    priority: rank,
                    dependencies: 0,
                    target: None,
                });
            }
            graph.edges.push(GraphEdge {
                from: GraphNodeId::Decode(decode),
                to: raster,
            });
            dependencies += 1;
        }

        graph.nodes.push(GraphNode {
            id: raster,
            priority: rank,
            dependencies,
            target: candidate.target,
        });
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate<'a>(
        task: u64,
        priority: u32,
        required: bool,
        queue_index: usize,
        decodes: &'a [DecodeTaskId],
    ) -> GraphCandidate<'a> {
        GraphCandidate {
            task: TaskId(task),
            priority: Priority(priority),
            required_for_activation: required,
            queue_index,
            decodes,
            target: Some(TargetHandle(task)),
        }
    }

    #[test]
    fn rasters_without_decodes() {
        let graph = build_task_graph(
            vec![candidate(1, 0, false, 0, &[]), candidate(2, 1, false, 1, &[])],
            &HashSet::new(),
        );
        assert_eq!(graph.raster_tasks(), vec![TaskId(1), TaskId(2)]);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.node(GraphNodeId::Raster(TaskId(2))).unwrap().priority, 1);
    }

    #[test]
    fn required_wins_ties_on_priority() {
        let graph = build_task_graph(
            vec![candidate(1, 5, false, 0, &[]), candidate(2, 5, true, 1, &[])],
            &HashSet::new(),
        );
        assert_eq!(graph.raster_tasks(), vec![TaskId(2), TaskId(1)]);
        let required = graph.node(GraphNodeId::Raster(TaskId(2))).unwrap();
        let best_effort = graph.node(GraphNodeId::Raster(TaskId(1))).unwrap();
        assert!(required.priority < best_effort.priority);
    }

    #[test]
    fn caller_priority_beats_activation_flag() {
        let graph = build_task_graph(
            vec![candidate(1, 1, true, 0, &[]), candidate(2, 0, false, 1, &[])],
            &HashSet::new(),
        );
        assert_eq!(graph.raster_tasks(), vec![TaskId(2), TaskId(1)]);
    }

    #[test]
    fn equal_keys_keep_queue_order() {
        let graph = build_task_graph(
            vec![
                candidate(9, 3, true, 2, &[]),
                candidate(7, 3, true, 0, &[]),
                candidate(8, 3, true, 1, &[]),
            ],
            &HashSet::new(),
        );
        assert_eq!(graph.raster_tasks(), vec![TaskId(7), TaskId(8), TaskId(9)]);
    }

    #[test]
    fn decode_edges_and_shared_decodes() {
        let a = [DecodeTaskId(100), DecodeTaskId(101)];
        let b = [DecodeTaskId(101)];
        let graph = build_task_graph(
            vec![candidate(1, 0, false, 0, &a), candidate(2, 1, false, 1, &b)],
            &HashSet::new(),
        );

        // One node per distinct decode.
        let decode_count = graph
            .nodes
            .iter()
            .filter(|n| matches!(n.id, GraphNodeId::Decode(_)))
            .count();
        assert_eq!(decode_count, 2);

        let deps: Vec<GraphNodeId> = graph.dependencies_of(GraphNodeId::Raster(TaskId(1))).collect();
        assert_eq!(
            deps,
            vec![GraphNodeId::Decode(DecodeTaskId(100)), GraphNodeId::Decode(DecodeTaskId(101))]
        );
        let dependents: Vec<GraphNodeId> = graph
            .dependents_of(GraphNodeId::Decode(DecodeTaskId(101)))
            .collect();
        assert_eq!(
            dependents,
            vec![GraphNodeId::Raster(TaskId(1)), GraphNodeId::Raster(TaskId(2))]
        );
        assert_eq!(graph.node(GraphNodeId::Raster(TaskId(2))).unwrap().dependencies, 1);

        // Shared decode keyed by its most urgent dependent and placed before it.
        let shared = graph.node(GraphNodeId::Decode(DecodeTaskId(101))).unwrap();
        assert_eq!(shared.priority, 0);
        let pos = |id| graph.nodes.iter().position(|n| n.id == id).unwrap();
        assert!(
            pos(GraphNodeId::Decode(DecodeTaskId(101))) < pos(GraphNodeId::Raster(TaskId(1)))
        );
    }

    #[test]
    fn finished_decodes_are_omitted() {
        let decodes = [DecodeTaskId(100), DecodeTaskId(101)];
        let finished: HashSet<DecodeTaskId> = [DecodeTaskId(100)].into_iter().collect();
        let graph = build_task_graph(vec![candidate(1, 0, false, 0, &decodes)], &finished);
        assert!(!graph.contains(GraphNodeId::Decode(DecodeTaskId(100))));
        assert_eq!(graph.node(GraphNodeId::Raster(TaskId(1))).unwrap().dependencies, 1);
    }

    #[test]
    fn duplicate_decode_in_one_item_counts_once() {
        let decodes = [DecodeTaskId(5), DecodeTaskId(5)];
        let graph = build_task_graph(vec![candidate(1, 0, false, 0, &decodes)], &HashSet::new());
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.node(GraphNodeId::Raster(TaskId(1))).unwrap().dependencies, 1);
    }

    #[test]
    fn empty_input_builds_empty_graph() {
        let graph = build_task_graph(Vec::new(), &HashSet::new());
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }
}
