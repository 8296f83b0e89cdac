// src/scheduler/mod.rs

//! Build DAG scheduling
//!
//! [`schedule`] orders a concrete graph dependencies-first and marks the
//! nodes whose hash is already installed as satisfied. [`ReadyQueue`] then
//! tracks, during execution, which pending nodes have all of their
//! dependencies done.

use crate::error::{Error, Result};
use crate::hash;
use crate::spec::{ConcreteGraph, NodeId};
use crate::state::InstallState;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Whether a node needs building
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    /// Already installed at `prefix`
    Satisfied { prefix: PathBuf },
    /// Must be built
    Pending,
}

/// An ordered build plan for one concrete graph
#[derive(Debug, Clone)]
pub struct BuildPlan {
    graph: ConcreteGraph,
    order: Vec<NodeId>,
    status: Vec<NodeStatus>,
}

/// Order a graph for building and detect already-installed nodes
pub fn schedule(graph: ConcreteGraph, state: &InstallState) -> Result<BuildPlan> {
    let order = topological_order(&graph)?;
    let mut status = vec![NodeStatus::Pending; graph.len()];

    for &id in &order {
        let node = graph.node(id);
        if let Some(prefix) = state.installed_prefix(&node.hash)? {
            if prefix.is_dir() {
                debug!("{} already installed at {}", node.name, prefix.display());
                status[id] = NodeStatus::Satisfied { prefix };
            } else {
                warn!(
                    "{} is recorded as installed but {} is missing; rebuilding",
                    node.name,
                    prefix.display()
                );
            }
        }
    }

    let plan = BuildPlan {
        graph,
        order,
        status,
    };
    info!(
        "Planned {} packages: {} to build, {} already installed",
        plan.graph.len(),
        plan.pending().len(),
        plan.satisfied().len()
    );
    Ok(plan)
}

/// Post-order DFS from the root, dependencies visited in name order
fn topological_order(graph: &ConcreteGraph) -> Result<Vec<NodeId>> {
    fn visit(
        graph: &ConcreteGraph,
        id: NodeId,
        done: &mut HashSet<NodeId>,
        stack: &mut Vec<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> Result<()> {
        if done.contains(&id) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|&n| n == id) {
            let mut cycle: Vec<String> = stack[pos..]
                .iter()
                .map(|&n| graph.node(n).name.clone())
                .collect();
            cycle.push(graph.node(id).name.clone());
            return Err(Error::Cycle { cycle });
        }

        stack.push(id);
        for link in graph.node(id).dependencies.values() {
            if link.node >= graph.len() {
                return Err(Error::NotFound(format!(
                    "node {} referenced by {}",
                    link.node,
                    graph.node(id).name
                )));
            }
            visit(graph, link.node, done, stack, order)?;
        }
        stack.pop();
        done.insert(id);
        order.push(id);
        Ok(())
    }

    let mut order = Vec::with_capacity(graph.len());
    if graph.is_empty() {
        return Ok(order);
    }
    if graph.root() >= graph.len() {
        return Err(Error::NotFound(format!("root node {}", graph.root())));
    }
    visit(
        graph,
        graph.root(),
        &mut HashSet::new(),
        &mut Vec::new(),
        &mut order,
    )?;
    Ok(order)
}

impl BuildPlan {
    pub fn graph(&self) -> &ConcreteGraph {
        &self.graph
    }

    /// Nodes in build order, dependencies first
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn status(&self, id: NodeId) -> &NodeStatus {
        &self.status[id]
    }

    /// Prefix of a satisfied node
    pub fn satisfied_prefix(&self, id: NodeId) -> Option<&Path> {
        match &self.status[id] {
            NodeStatus::Satisfied { prefix } => Some(prefix),
            NodeStatus::Pending => None,
        }
    }

    /// Nodes to build, in build order
    pub fn pending(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.status[id] == NodeStatus::Pending)
            .collect()
    }

    /// Already-installed nodes and their prefixes, in build order
    pub fn satisfied(&self) -> Vec<(NodeId, &Path)> {
        self.order
            .iter()
            .filter_map(|&id| self.satisfied_prefix(id).map(|p| (id, p)))
            .collect()
    }

    /// Whether every direct dependency of `id` is satisfied or in `built`
    pub fn is_ready(&self, id: NodeId, built: &HashSet<NodeId>) -> bool {
        self.graph
            .node(id)
            .dependencies
            .values()
            .all(|link| built.contains(&link.node) || self.satisfied_prefix(link.node).is_some())
    }

    /// Execution-time readiness tracker over the pending nodes
    pub fn ready_queue(&self) -> ReadyQueue {
        ReadyQueue::new(self)
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Build plan for {} ({} packages, {} to build)",
            self.graph.root_spec().format_short(),
            self.graph.len(),
            self.pending().len()
        )?;
        for &id in &self.order {
            let node = self.graph.node(id);
            match &self.status[id] {
                NodeStatus::Satisfied { prefix } => writeln!(
                    f,
                    "  [installed] {} /{} -> {}",
                    node.format_short(),
                    hash::short(&node.hash),
                    prefix.display()
                )?,
                NodeStatus::Pending => writeln!(
                    f,
                    "  [build]     {} /{} ({}{})",
                    node.format_short(),
                    hash::short(&node.hash),
                    node.build_system,
                    if node.parallel { "" } else { ", serial" }
                )?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Waiting,
    Ready,
    Running,
    Done,
    Skipped,
}

/// Tracks which pending nodes can be dispatched
///
/// Satisfied nodes count as done from the start. Ready nodes come out in
/// build order.
#[derive(Debug)]
pub struct ReadyQueue {
    /// Unfinished pending dependencies per node
    blockers: Vec<usize>,
    dependents: Vec<Vec<NodeId>>,
    /// Position of each node in the build order
    rank: Vec<usize>,
    state: Vec<QueueState>,
    ready: BTreeSet<(usize, NodeId)>,
}

impl ReadyQueue {
    fn new(plan: &BuildPlan) -> Self {
        let n = plan.graph.len();
        let mut blockers = vec![0; n];
        let mut dependents = vec![Vec::new(); n];
        let mut rank = vec![usize::MAX; n];
        let mut state = vec![QueueState::Done; n];

        for (pos, &id) in plan.order.iter().enumerate() {
            rank[id] = pos;
        }
        for &id in &plan.order {
            if plan.status[id] != NodeStatus::Pending {
                continue;
            }
            state[id] = QueueState::Waiting;
            for link in plan.graph.node(id).dependencies.values() {
                if plan.status[link.node] == NodeStatus::Pending {
                    blockers[id] += 1;
                    dependents[link.node].push(id);
                }
            }
        }

        let mut queue = Self {
            blockers,
            dependents,
            rank,
            state,
            ready: BTreeSet::new(),
        };
        for id in plan.pending() {
            if queue.blockers[id] == 0 {
                queue.make_ready(id);
            }
        }
        queue
    }

    fn make_ready(&mut self, id: NodeId) {
        self.state[id] = QueueState::Ready;
        self.ready.insert((self.rank[id], id));
    }

    /// Next ready node in build order, without taking it
    pub fn peek_ready(&self) -> Option<NodeId> {
        self.ready.first().map(|&(_, id)| id)
    }

    /// Take the next ready node and mark it running
    pub fn take_ready(&mut self) -> Option<NodeId> {
        let (_, id) = self.ready.pop_first()?;
        self.state[id] = QueueState::Running;
        Some(id)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Record a successful build; returns nodes that just became ready
    pub fn complete(&mut self, id: NodeId) -> Vec<NodeId> {
        self.state[id] = QueueState::Done;
        let mut unblocked = Vec::new();
        for i in 0..self.dependents[id].len() {
            let dependent = self.dependents[id][i];
            if self.state[dependent] != QueueState::Waiting {
                continue;
            }
            self.blockers[dependent] -= 1;
            if self.blockers[dependent] == 0 {
                self.make_ready(dependent);
                unblocked.push(dependent);
            }
        }
        unblocked
    }

    /// Record a failed build; returns the transitive dependents now skipped
    pub fn fail(&mut self, id: NodeId) -> Vec<NodeId> {
        self.state[id] = QueueState::Done;
        let mut skipped = Vec::new();
        let mut queue: VecDeque<NodeId> = self.dependents[id].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if matches!(self.state[next], QueueState::Waiting | QueueState::Ready) {
                self.ready.remove(&(self.rank[next], next));
                self.state[next] = QueueState::Skipped;
                skipped.push(next);
                queue.extend(self.dependents[next].iter().copied());
            }
        }
        skipped.sort_by_key(|&n| self.rank[n]);
        skipped
    }

    /// Skip everything not yet dispatched; returns those nodes in build order
    pub fn skip_remaining(&mut self) -> Vec<NodeId> {
        let mut skipped: Vec<NodeId> = (0..self.state.len())
            .filter(|&id| matches!(self.state[id], QueueState::Waiting | QueueState::Ready))
            .collect();
        for &id in &skipped {
            self.state[id] = QueueState::Skipped;
        }
        self.ready.clear();
        skipped.sort_by_key(|&n| self.rank[n]);
        skipped
    }

    /// Number of nodes currently dispatched
    pub fn running(&self) -> usize {
        self.state.iter().filter(|s| **s == QueueState::Running).count()
    }

    /// Nothing ready, running or waiting
    pub fn is_finished(&self) -> bool {
        self.state
            .iter()
            .all(|s| matches!(s, QueueState::Done | QueueState::Skipped))
    }
}
