//! Deterministic executor, transport and client for driving a
//! [`RasterScheduler`] without threads or a GPU.
//!
//! The executor and transport are cheap handles over shared state: clone one,
//! box the clone into the scheduler, and keep the other to step work forward
//! and inspect what happened.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::info;

use rasterpool_core::{
    DecodeTaskId, PoolConfig, RasterPoolError, Resource, ResourceFormat, TaskId,
};

use crate::scheduler::graph::{GraphNodeId, TaskGraph};
use crate::scheduler::runner::{RasterScheduler, SchedulerSnapshot};
use crate::scheduler::task::{
    CompletedTask, GraphExecutor, RasterClient, TargetHandle, UploadCompletion, UploadTransport,
};
use crate::scheduler::types::{CompletedRaster, Priority, RasterTaskQueue, RasterWorkItem};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Executor ────────────────────────────────────────────────────

#[derive(Debug)]
struct SimNode {
    priority: u32,
    order: usize,
    waiting_on: HashSet<GraphNodeId>,
}

#[derive(Debug, Default)]
struct ExecutorState {
    pending: HashMap<GraphNodeId, SimNode>,
    /// Ran but not yet drained by the scheduler.
    undrained: HashSet<GraphNodeId>,
    completions: Vec<CompletedTask>,
    run_order: Vec<GraphNodeId>,
    cancelled: Vec<GraphNodeId>,
    submissions: Vec<TaskGraph>,
    scripted_failures: HashMap<GraphNodeId, String>,
}

impl ExecutorState {
    fn ready(&self) -> Vec<GraphNodeId> {
        let mut ready: Vec<(&GraphNodeId, &SimNode)> = self
            .pending
            .iter()
            .filter(|(_, node)| node.waiting_on.is_empty())
            .collect();
        ready.sort_by_key(|(_, node)| (node.priority, node.order));
        ready.into_iter().map(|(id, _)| *id).collect()
    }

    fn finish(&mut self, id: GraphNodeId, failure: Option<String>) {
        self.pending.remove(&id);
        for node in self.pending.values_mut() {
            node.waiting_on.remove(&id);
        }
        let failure = failure.or_else(|| self.scripted_failures.remove(&id));
        self.completions.push(match failure {
            Some(reason) => CompletedTask::failed(id, reason),
            None => CompletedTask::finished(id),
        });
        self.run_order.push(id);
        self.undrained.insert(id);
    }
}

/// Single-threaded graph executor. Nothing runs until the test or simulator
/// steps it.
#[derive(Debug, Clone, Default)]
pub struct SimExecutor {
    inner: Arc<Mutex<ExecutorState>>,
}

impl SimExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node` report failure the next time it runs.
    pub fn script_failure(&self, node: GraphNodeId, reason: impl Into<String>) {
        lock(&self.inner).scripted_failures.insert(node, reason.into());
    }

    /// Run the most urgent ready node.
    pub fn run_next(&self) -> Option<GraphNodeId> {
        let mut state = lock(&self.inner);
        let next = state.ready().into_iter().next()?;
        state.finish(next, None);
        Some(next)
    }

    /// Run up to `workers` nodes that are ready right now, as if each ran on
    /// its own worker. Nodes unblocked by this step wait for the next one.
    pub fn run_ready(&self, workers: usize) -> usize {
        let mut state = lock(&self.inner);
        let batch: Vec<GraphNodeId> = state.ready().into_iter().take(workers).collect();
        for id in &batch {
            state.finish(*id, None);
        }
        batch.len()
    }

    /// Run everything runnable, in dependency and priority order.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next().is_some() {
            ran += 1;
        }
        ran
    }

    /// Finish `node` now, ignoring its dependencies.
    pub fn complete(&self, node: GraphNodeId) {
        lock(&self.inner).finish(node, None);
    }

    /// Fail `node` now, ignoring its dependencies.
    pub fn fail(&self, node: GraphNodeId, reason: impl Into<String>) {
        lock(&self.inner).finish(node, Some(reason.into()));
    }

    /// Queue a raw completion, whether or not the node was ever submitted.
    pub fn inject_completion(&self, completion: CompletedTask) {
        lock(&self.inner).completions.push(completion);
    }

    pub fn is_pending(&self, node: GraphNodeId) -> bool {
        lock(&self.inner).pending.contains_key(&node)
    }

    /// Pending nodes in the order they would run.
    pub fn pending_nodes(&self) -> Vec<GraphNodeId> {
        let state = lock(&self.inner);
        let mut nodes: Vec<(&GraphNodeId, &SimNode)> = state.pending.iter().collect();
        nodes.sort_by_key(|(_, node)| (node.priority, node.order));
        nodes.into_iter().map(|(id, _)| *id).collect()
    }

    pub fn run_order(&self) -> Vec<GraphNodeId> {
        lock(&self.inner).run_order.clone()
    }

    pub fn cancelled(&self) -> Vec<GraphNodeId> {
        lock(&self.inner).cancelled.clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.inner).submissions.len()
    }

    pub fn last_submission(&self) -> Option<TaskGraph> {
        lock(&self.inner).submissions.last().cloned()
    }
}

impl GraphExecutor for SimExecutor {
    fn submit(&mut self, graph: TaskGraph) {
        let mut state = lock(&self.inner);
        let mut pending = HashMap::with_capacity(graph.len());
        for (order, node) in graph.nodes.iter().enumerate() {
            // Already ran; its completion is still on its way to the scheduler.
            if state.undrained.contains(&node.id) {
                continue;
            }
            let waiting_on = graph
                .dependencies_of(node.id)
                .filter(|dep| !state.undrained.contains(dep))
                .collect();
            pending.insert(
                node.id,
                SimNode {
                    priority: node.priority,
                    order,
                    waiting_on,
                },
            );
        }
        state.pending = pending;
        state.submissions.push(graph);
    }

    fn drain_completed(&mut self) -> Vec<CompletedTask> {
        let mut state = lock(&self.inner);
        state.undrained.clear();
        std::mem::take(&mut state.completions)
    }

    fn cancel(&mut self, node: GraphNodeId) {
        let mut state = lock(&self.inner);
        state.pending.remove(&node);
        state.cancelled.push(node);
    }
}

// ── Transport ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TransportState {
    next_handle: u64,
    owners: HashMap<TargetHandle, TaskId>,
    acquired: Vec<TargetHandle>,
    released: Vec<TargetHandle>,
    issued: Vec<(TargetHandle, usize)>,
    in_flight: Vec<TargetHandle>,
    completions: Vec<UploadCompletion>,
    auto_complete: bool,
    shallow_flushes: usize,
}

/// Upload transport that hands out sequential target handles and completes
/// uploads when told to.
#[derive(Debug, Clone, Default)]
pub struct SimTransport {
    inner: Arc<Mutex<TransportState>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload reports success on the next poll.
    pub fn auto_completing() -> Self {
        let transport = Self::default();
        lock(&transport.inner).auto_complete = true;
        transport
    }

    /// Most recent target acquired for `task`.
    pub fn target_for(&self, task: TaskId) -> Option<TargetHandle> {
        let state = lock(&self.inner);
        state
            .acquired
            .iter()
            .rev()
            .find(|target| state.owners.get(*target) == Some(&task))
            .copied()
    }

    pub fn complete_upload(&self, target: TargetHandle) -> bool {
        self.finish_upload(target, Ok(()))
    }

    pub fn fail_upload(&self, target: TargetHandle, reason: impl Into<String>) -> bool {
        self.finish_upload(target, Err(reason.into()))
    }

    /// Complete the upload for `task`, if one is in flight.
    pub fn complete_upload_for(&self, task: TaskId) -> bool {
        match self.target_for(task) {
            Some(target) => self.complete_upload(target),
            None => false,
        }
    }

    pub fn complete_all_uploads(&self) -> usize {
        let mut state = lock(&self.inner);
        let in_flight = std::mem::take(&mut state.in_flight);
        let count = in_flight.len();
        state.completions.extend(in_flight.into_iter().map(|target| UploadCompletion {
            target,
            result: Ok(()),
        }));
        count
    }

    /// Queue a completion for a target the scheduler may not know about.
    pub fn inject_completion(&self, completion: UploadCompletion) {
        lock(&self.inner).completions.push(completion);
    }

    fn finish_upload(&self, target: TargetHandle, result: Result<(), String>) -> bool {
        let mut state = lock(&self.inner);
        let Some(position) = state.in_flight.iter().position(|t| *t == target) else {
            return false;
        };
        state.in_flight.remove(position);
        state.completions.push(UploadCompletion { target, result });
        true
    }

    /// Tasks in the order their uploads began.
    pub fn upload_order(&self) -> Vec<TaskId> {
        let state = lock(&self.inner);
        state
            .issued
            .iter()
            .filter_map(|(target, _)| state.owners.get(target).copied())
            .collect()
    }

    pub fn uploads_in_flight(&self) -> usize {
        lock(&self.inner).in_flight.len()
    }

    pub fn acquired_count(&self) -> usize {
        lock(&self.inner).acquired.len()
    }

    pub fn is_released(&self, target: TargetHandle) -> bool {
        lock(&self.inner).released.contains(&target)
    }

    /// Tasks whose target was handed back, in release order.
    pub fn released_tasks(&self) -> Vec<TaskId> {
        let state = lock(&self.inner);
        state
            .released
            .iter()
            .filter_map(|target| state.owners.get(target).copied())
            .collect()
    }

    pub fn shallow_flushes(&self) -> usize {
        lock(&self.inner).shallow_flushes
    }
}

impl UploadTransport for SimTransport {
    fn acquire_target(&mut self, task: TaskId, _resource: &Resource) -> TargetHandle {
        let mut state = lock(&self.inner);
        state.next_handle += 1;
        let target = TargetHandle(state.next_handle);
        state.owners.insert(target, task);
        state.acquired.push(target);
        target
    }

    fn begin_upload(&mut self, target: TargetHandle, bytes: usize) {
        let mut state = lock(&self.inner);
        state.issued.push((target, bytes));
        if state.auto_complete {
            state.completions.push(UploadCompletion {
                target,
                result: Ok(()),
            });
        } else {
            state.in_flight.push(target);
        }
    }

    fn poll_upload_completion(&mut self) -> Vec<UploadCompletion> {
        std::mem::take(&mut lock(&self.inner).completions)
    }

    fn release_target(&mut self, target: TargetHandle) {
        let mut state = lock(&self.inner);
        state.in_flight.retain(|t| *t != target);
        state.released.push(target);
    }

    fn shallow_flush(&mut self) {
        lock(&self.inner).shallow_flushes += 1;
    }
}

// ── Client ──────────────────────────────────────────────────────

/// One callback received by a [`RecordingClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Completed { task: TaskId, success: bool },
    ActivationFinished,
    AllFinished,
}

/// Client that records every callback, optionally scheduling a follow-up
/// queue from inside the all-finished notification.
#[derive(Debug, Default)]
pub struct RecordingClient {
    pub completed: Vec<CompletedRaster>,
    pub events: Vec<ClientEvent>,
    pub all_finished: usize,
    pub activation_finished: usize,
    /// Scheduled from inside the next all-finished callback.
    pub reschedule_on_finish: Option<RasterTaskQueue>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_tasks(&self) -> Vec<TaskId> {
        self.completed.iter().map(|c| c.task).collect()
    }

    pub fn failed_tasks(&self) -> Vec<TaskId> {
        self.completed
            .iter()
            .filter(|c| !c.is_success())
            .map(|c| c.task)
            .collect()
    }
}

impl RasterClient for RecordingClient {
    fn did_complete_raster_task(&mut self, completed: &CompletedRaster) {
        self.events.push(ClientEvent::Completed {
            task: completed.task,
            success: completed.is_success(),
        });
        self.completed.push(completed.clone());
    }

    fn did_finish_running_tasks(&mut self, scheduler: &mut RasterScheduler) {
        self.all_finished += 1;
        self.events.push(ClientEvent::AllFinished);
        if let Some(queue) = self.reschedule_on_finish.take() {
            scheduler.schedule_tasks(queue);
        }
    }

    fn did_finish_running_tasks_required_for_activation(&mut self, _scheduler: &mut RasterScheduler) {
        self.activation_finished += 1;
        self.events.push(ClientEvent::ActivationFinished);
    }
}

// ── Scenarios ───────────────────────────────────────────────────

fn default_workers() -> usize {
    2
}

/// One tile in a scenario file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTile {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub required_for_activation: bool,
    #[serde(default)]
    pub decodes: Vec<u64>,
    #[serde(default)]
    pub fail_raster: bool,
}

/// A scripted run for the simulator, loaded from TOML:
///
/// ```toml
/// workers = 2
///
/// [[tiles]]
/// id = 1
/// width = 256
/// height = 256
/// required_for_activation = true
/// decodes = [10]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Executor nodes run per tick.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub tiles: Vec<ScenarioTile>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tiles: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn from_toml(toml_str: &str) -> Result<Self, RasterPoolError> {
        let scenario: Self = toml::from_str(toml_str)?;
        if scenario.workers == 0 {
            return Err(RasterPoolError::Config(
                "scenario workers must be at least 1".to_string(),
            ));
        }
        Ok(scenario)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RasterPoolError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// The scenario's tiles as a queue, in file order.
    pub fn queue(&self, format: ResourceFormat) -> RasterTaskQueue {
        self.tiles
            .iter()
            .map(|tile| {
                RasterWorkItem::new(
                    TaskId(tile.id),
                    Resource::new(tile.id, tile.width, tile.height, format),
                    Priority(tile.priority),
                )
                .required_for_activation(tile.required_for_activation)
                .with_decodes(tile.decodes.iter().copied().map(DecodeTaskId))
            })
            .collect()
    }
}

/// Outcome of [`run_scenario`].
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub ticks: usize,
    pub finished: bool,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub upload_order: Vec<TaskId>,
    pub events: Vec<ClientEvent>,
    pub snapshot: SchedulerSnapshot,
}

/// Drive a scheduler over `scenario` one tick at a time: run up to
/// `workers` ready nodes, then check for completions. Uploads complete one
/// tick after they are issued.
pub fn run_scenario(scenario: &Scenario, config: PoolConfig, max_ticks: usize) -> ScenarioReport {
    let executor = SimExecutor::new();
    let transport = SimTransport::auto_completing();
    for tile in scenario.tiles.iter().filter(|tile| tile.fail_raster) {
        executor.script_failure(GraphNodeId::Raster(TaskId(tile.id)), "scripted raster failure");
    }

    let queue = scenario.queue(config.resource_format);
    let mut scheduler =
        RasterScheduler::new(config, Box::new(executor.clone()), Box::new(transport.clone()));
    let mut client = RecordingClient::new();
    scheduler.schedule_tasks(queue);

    let mut ticks = 0;
    while ticks < max_ticks && scheduler.has_pending_tasks() {
        ticks += 1;
        executor.run_ready(scenario.workers);
        scheduler.check_for_completed_tasks(&mut client);
    }

    let finished = !scheduler.has_pending_tasks();
    info!(
        ticks,
        finished,
        completed = client.completed.len(),
        state = scheduler.state_name(),
        "Scenario run complete"
    );

    ScenarioReport {
        ticks,
        finished,
        completed: client.completed_tasks(),
        failed: client.failed_tasks(),
        upload_order: transport.upload_order(),
        events: client.events.clone(),
        snapshot: scheduler.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::graph::{GraphEdge, GraphNode};

    fn node(id: GraphNodeId, priority: u32, dependencies: usize) -> GraphNode {
        GraphNode {
            id,
            priority,
            dependencies,
            target: None,
        }
    }

    fn tile(id: u64) -> ScenarioTile {
        ScenarioTile {
            id,
            width: 4,
            height: 4,
            priority: 0,
            required_for_activation: false,
            decodes: Vec::new(),
            fail_raster: false,
        }
    }

    #[test]
    fn executor_respects_dependencies_and_priority() {
        let mut executor = SimExecutor::new();
        let decode = GraphNodeId::Decode(DecodeTaskId(1));
        let a = GraphNodeId::Raster(TaskId(1));
        let b = GraphNodeId::Raster(TaskId(2));
        executor.submit(TaskGraph {
            nodes: vec![node(decode, 0, 0), node(a, 0, 1), node(b, 1, 0)],
            edges: vec![GraphEdge { from: decode, to: a }],
        });

        assert_eq!(executor.run_ready(8), 2);
        assert_eq!(executor.run_order(), vec![decode, b]);
        assert_eq!(executor.run_next(), Some(a));
        assert_eq!(executor.run_next(), None);
        assert_eq!(executor.drain_completed().len(), 3);
    }

    #[test]
    fn resubmit_does_not_rerun_undrained_nodes() {
        let mut executor = SimExecutor::new();
        let a = GraphNodeId::Raster(TaskId(1));
        let graph = TaskGraph {
            nodes: vec![node(a, 0, 0)],
            edges: Vec::new(),
        };
        executor.submit(graph.clone());
        executor.run_all();
        executor.submit(graph.clone());
        assert!(!executor.is_pending(a));

        executor.drain_completed();
        executor.submit(graph);
        assert!(executor.is_pending(a));
    }

    #[test]
    fn scripted_failure_reported_once() {
        let mut executor = SimExecutor::new();
        let a = GraphNodeId::Raster(TaskId(1));
        executor.script_failure(a, "boom");
        executor.complete(a);
        executor.complete(a);
        let completions = executor.drain_completed();
        assert_eq!(completions[0], CompletedTask::failed(a, "boom"));
        assert_eq!(completions[1], CompletedTask::finished(a));
    }

    #[test]
    fn transport_tracks_targets_and_uploads() {
        let mut transport = SimTransport::new();
        let resource = Resource::new(1, 4, 4, ResourceFormat::Rgba8888);
        let target = transport.acquire_target(TaskId(1), &resource);
        transport.begin_upload(target, 64);
        assert_eq!(transport.uploads_in_flight(), 1);
        assert!(transport.poll_upload_completion().is_empty());

        assert!(transport.complete_upload_for(TaskId(1)));
        let completions = transport.poll_upload_completion();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].target, target);
        assert_eq!(transport.upload_order(), vec![TaskId(1)]);

        transport.release_target(target);
        assert!(transport.is_released(target));
        assert_eq!(transport.released_tasks(), vec![TaskId(1)]);
    }

    #[test]
    fn scenario_parses_with_defaults() {
        let scenario = Scenario::from_toml(
            r#"
[[tiles]]
id = 3
width = 16
height = 8
required_for_activation = true
decodes = [7, 8]
"#,
        )
        .unwrap();
        assert_eq!(scenario.workers, 2);
        let queue = scenario.queue(ResourceFormat::Rgba8888);
        assert_eq!(queue.len(), 1);
        let item = &queue.items[0];
        assert_eq!(item.bytes(), 16 * 8 * 4);
        assert!(item.required_for_activation);
        assert_eq!(item.decode_dependencies, vec![DecodeTaskId(7), DecodeTaskId(8)]);
    }

    #[test]
    fn scenario_rejects_zero_workers() {
        assert!(Scenario::from_toml("workers = 0").is_err());
    }

    #[test]
    fn run_scenario_drains_everything() {
        let mut failing = tile(3);
        failing.fail_raster = true;
        let scenario = Scenario {
            workers: 1,
            tiles: vec![tile(1), tile(2), failing],
        };
        let config = PoolConfig {
            max_transfer_buffer_usage_bytes: 64,
            ..PoolConfig::default()
        };

        let report = run_scenario(&scenario, config, 100);
        assert!(report.finished);
        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.failed, vec![TaskId(3)]);
        assert_eq!(report.upload_order, vec![TaskId(1), TaskId(2)]);
        assert_eq!(report.events.last(), Some(&ClientEvent::AllFinished));
        assert_eq!(report.snapshot.state, "idle");
        assert_eq!(report.snapshot.throttle.bytes_pending_upload, 0);
    }

    #[test]
    fn run_scenario_stops_at_tick_limit() {
        let scenario = Scenario {
            workers: 1,
            tiles: vec![tile(1), tile(2)],
        };
        let report = run_scenario(&scenario, PoolConfig::default(), 1);
        assert_eq!(report.ticks, 1);
        assert!(!report.finished);
    }
}
