//! System graph construction.
//!
//! [`ScheduleBuilder`] collects registered systems and turns them into a
//! [`Schedule`]: one [`StageGraph`] per [`Stage`], each an array of
//! [`SystemNode`]s whose dependency lists hold indices into the same array.
//!
//! ## Edges
//!
//! Within a stage, `A → B` ("B waits for A") is added when
//! * B declares `.after(A)` or A declares `.before(B)`, or
//! * A and B conflict on component access (one writes what the other reads
//!   or writes) and nothing already orders them. The earlier-registered
//!   system goes first. Under [`ConflictPolicy::Strict`] an unordered
//!   conflict is rejected instead.
//!
//! Explicit orderings that point at an earlier stage are already satisfied
//! by stage sequencing and add no edge; ones that point at a later stage
//! cannot be satisfied and are rejected.
//!
//! ## Output
//!
//! Nodes are emitted in a deterministic topological order (ties broken by
//! registration order). Every dependency index is therefore smaller than
//! the node's own index, and dependency lists hold direct predecessors only,
//! sorted and de-duplicated.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::Deserialize;
use tracing::{debug, info, trace_span};

use crate::engine::error::{ExecutionError, GraphError};
use crate::engine::systems::{FnSystem, System, SystemContext, SystemDescriptor};
use crate::engine::types::{AccessSets, ExecutionType, Stage};
use crate::engine::world::World;


/// How unordered systems with conflicting access are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Order them by registration: the earlier-registered system runs first.
    #[default]
    RegistrationOrder,
    /// Reject the schedule with [`GraphError::AmbiguousConflict`].
    Strict,
}

/// One schedulable system with its resolved dependencies.
///
/// Immutable once built; per-run bookkeeping lives in the executor.
pub struct SystemNode {
    name: String,
    stage: Stage,
    execution: ExecutionType,
    access: AccessSets,
    dependencies: Vec<usize>,
    system: Box<dyn System>,
}

impl SystemNode {
    /// System name.
    #[inline]
    pub fn name(&self) -> &str { &self.name }

    /// Owning stage.
    #[inline]
    pub fn stage(&self) -> Stage { self.stage }

    /// Execution type.
    #[inline]
    pub fn execution(&self) -> ExecutionType { self.execution }

    /// Declared component access.
    #[inline]
    pub fn access(&self) -> &AccessSets { &self.access }

    /// Indices of the nodes that must complete before this one starts.
    #[inline]
    pub fn dependencies(&self) -> &[usize] { &self.dependencies }

    /// Runs the system against `world` on the current thread.
    pub fn run(&self, world: &World) -> Result<(), ExecutionError> {
        let _span = trace_span!("system", name = %self.name).entered();
        let mut ctx = SystemContext::new(world, &self.name, self.stage, self.access);
        self.system.run(&mut ctx)
    }
}

impl std::fmt::Debug for SystemNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemNode")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("execution", &self.execution)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Ordered node array of one stage.
#[derive(Debug)]
pub struct StageGraph {
    stage: Stage,
    nodes: Vec<SystemNode>,
}

impl StageGraph {
    /// Stage this graph belongs to.
    #[inline]
    pub fn stage(&self) -> Stage { self.stage }

    /// Nodes in topological order.
    #[inline]
    pub fn nodes(&self) -> &[SystemNode] { &self.nodes }

    /// Number of nodes.
    #[inline]
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Returns `true` if the stage has no systems.
    #[inline]
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Index of the node named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.dependencies.len()).sum()
    }
}

/// Per-stage graphs for every [`Stage`].
#[derive(Debug)]
pub struct Schedule {
    stages: Vec<StageGraph>,
}

impl Schedule {
    /// Graph for `stage`.
    #[inline]
    pub fn stage(&self, stage: Stage) -> &StageGraph {
        &self.stages[stage.index()]
    }

    /// All stage graphs in execution order.
    #[inline]
    pub fn stages(&self) -> &[StageGraph] { &self.stages }

    /// Total number of systems.
    pub fn system_count(&self) -> usize {
        self.stages.iter().map(StageGraph::len).sum()
    }
}

struct Registration {
    descriptor: SystemDescriptor,
    system: Box<dyn System>,
}

/// Collects systems and builds a [`Schedule`].
#[derive(Default)]
pub struct ScheduleBuilder {
    policy: ConflictPolicy,
    registrations: Vec<Registration>,
}

impl ScheduleBuilder {
    /// Creates an empty builder with the registration-order policy.
    pub fn new() -> Self { Self::default() }

    /// Sets the conflict policy.
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize { self.registrations.len() }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool { self.registrations.is_empty() }

    /// Registers `system` under `descriptor`.
    pub fn add_system(&mut self, descriptor: SystemDescriptor, system: impl System + 'static) -> &mut Self {
        self.registrations.push(Registration { descriptor, system: Box::new(system) });
        self
    }

    /// Registers a closure as a system.
    pub fn add_fn<F>(&mut self, descriptor: SystemDescriptor, f: F) -> &mut Self
    where
        F: Fn(&mut SystemContext<'_>) -> Result<(), ExecutionError> + Send + Sync + 'static,
    {
        self.add_system(descriptor, FnSystem::new(f))
    }

    /// Resolves all orderings and emits the schedule.
    pub fn build(self) -> Result<Schedule, GraphError> {
        let descriptors: Vec<&SystemDescriptor> = self.registrations.iter().map(|r| &r.descriptor).collect();

        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if by_name.insert(descriptor.name(), index).is_some() {
                return Err(GraphError::DuplicateSystem(descriptor.name().to_owned()));
            }
            if let Some(component_id) = descriptor.first_out_of_range() {
                return Err(GraphError::InvalidComponent { system: descriptor.name().to_owned(), component_id });
            }
        }

        let explicit = resolve_explicit_edges(&descriptors, &by_name)?;

        let mut stage_orders: Vec<(Stage, Vec<usize>, Vec<Vec<usize>>)> = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let members: Vec<usize> = (0..descriptors.len())
                .filter(|&index| descriptors[index].stage() == stage)
                .collect();
            let (order, predecessors) = build_stage(stage, &members, &descriptors, &explicit, self.policy)?;
            stage_orders.push((stage, order, predecessors));
        }

        let mut slots: Vec<Option<Registration>> = self.registrations.into_iter().map(Some).collect();
        let mut stages = Vec::with_capacity(stage_orders.len());
        for (stage, order, predecessors) in stage_orders {
            let mut nodes = Vec::with_capacity(order.len());
            for (position, global) in order.into_iter().enumerate() {
                let Some(Registration { descriptor, system }) = slots[global].take() else { continue };
                nodes.push(SystemNode {
                    name: descriptor.name().to_owned(),
                    stage,
                    execution: descriptor.execution_type(),
                    access: descriptor.access_sets(),
                    dependencies: predecessors[position].clone(),
                    system,
                });
            }
            let graph = StageGraph { stage, nodes };
            if !graph.is_empty() {
                debug!(stage = %stage, systems = graph.len(), edges = graph.edge_count(), "built stage graph");
            }
            stages.push(graph);
        }

        let schedule = Schedule { stages };
        info!(systems = schedule.system_count(), policy = ?self.policy, "schedule built");
        Ok(schedule)
    }
}

/// Explicit `(before, after)` pairs of global indices within one stage.
fn resolve_explicit_edges(
    descriptors: &[&SystemDescriptor],
    by_name: &HashMap<&str, usize>,
) -> Result<Vec<(usize, usize)>, GraphError> {
    let lookup = |system: &SystemDescriptor, other: &str| {
        by_name.get(other).copied().ok_or_else(|| GraphError::UnknownSystem {
            system: system.name().to_owned(),
            missing: other.to_owned(),
        })
    };

    // `first` must complete before `second` starts; `declarer` names the
    // system whose descriptor carries the ordering.
    let order = |declarer: usize, first: usize, second: usize| -> Result<Option<(usize, usize)>, GraphError> {
        match descriptors[first].stage().cmp(&descriptors[second].stage()) {
            std::cmp::Ordering::Equal => Ok(Some((first, second))),
            std::cmp::Ordering::Less => Ok(None),
            std::cmp::Ordering::Greater => {
                let other = if declarer == first { second } else { first };
                Err(GraphError::CrossStageOrdering {
                    system: descriptors[declarer].name().to_owned(),
                    stage: descriptors[declarer].stage(),
                    other: descriptors[other].name().to_owned(),
                    other_stage: descriptors[other].stage(),
                })
            }
        }
    };

    let mut edges = Vec::new();
    for (index, descriptor) in descriptors.iter().enumerate() {
        for other in descriptor.after_names() {
            let predecessor = lookup(*descriptor, other.as_str())?;
            edges.extend(order(index, predecessor, index)?);
        }
        for other in descriptor.before_names() {
            let successor = lookup(*descriptor, other.as_str())?;
            edges.extend(order(index, index, successor)?);
        }
    }
    Ok(edges)
}

/// Orders one stage. Returns the emitted order (global indices) and, per
/// emitted position, the sorted positions of its direct predecessors.
fn build_stage(
    stage: Stage,
    members: &[usize],
    descriptors: &[&SystemDescriptor],
    explicit: &[(usize, usize)],
    policy: ConflictPolicy,
) -> Result<(Vec<usize>, Vec<Vec<usize>>), GraphError> {
    let n = members.len();
    let local: HashMap<usize, usize> = members.iter().enumerate().map(|(l, &g)| (g, l)).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(first, second) in explicit {
        if let (Some(&a), Some(&b)) = (local.get(&first), local.get(&second)) {
            successors[a].push(b);
        }
    }
    for list in &mut successors {
        list.sort_unstable();
        list.dedup();
    }

    if let Some(cycle) = find_cycle(&successors) {
        return Err(GraphError::Cycle {
            stage,
            systems: cycle.into_iter().map(|l| descriptors[members[l]].name().to_owned()).collect(),
        });
    }

    let mut reach = Reachability::new(&successors);
    for i in 0..n {
        for j in (i + 1)..n {
            if reach.ordered(i, j) {
                continue;
            }
            let (a, b) = (descriptors[members[i]], descriptors[members[j]]);
            let (access_a, access_b) = (a.access_sets(), b.access_sets());
            if !access_a.conflicts_with(&access_b) {
                continue;
            }
            if policy == ConflictPolicy::Strict {
                return Err(GraphError::AmbiguousConflict {
                    stage,
                    first: a.name().to_owned(),
                    second: b.name().to_owned(),
                    components: access_a.conflicting_components(&access_b).iterate_over_components().collect(),
                });
            }
            successors[i].push(j);
            reach.add_edge(i, j);
        }
    }

    // Kahn's algorithm, smallest registration index first.
    let mut in_degree = vec![0usize; n];
    for list in &successors {
        for &s in list {
            in_degree[s] += 1;
        }
    }
    let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|&l| in_degree[l] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(l)) = ready.pop() {
        order.push(l);
        for &s in &successors[l] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.push(Reverse(s));
            }
        }
    }
    if order.len() != n {
        let stuck = (0..n).filter(|&l| in_degree[l] > 0);
        return Err(GraphError::Cycle {
            stage,
            systems: stuck.map(|l| descriptors[members[l]].name().to_owned()).collect(),
        });
    }

    let mut position = vec![0usize; n];
    for (p, &l) in order.iter().enumerate() {
        position[l] = p;
    }
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (l, list) in successors.iter().enumerate() {
        for &s in list {
            predecessors[position[s]].push(position[l]);
        }
    }
    for list in &mut predecessors {
        list.sort_unstable();
        list.dedup();
    }

    Ok((order.into_iter().map(|l| members[l]).collect(), predecessors))
}

/// Depth-first search for a cycle. Returns the nodes on the first cycle
/// found, with the first node repeated at the end.
fn find_cycle(successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark { Unvisited, OnPath, Done }

    let n = successors.len();
    let mut marks = vec![Mark::Unvisited; n];
    let mut path: Vec<usize> = Vec::new();

    for root in 0..n {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next successor to visit)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnPath;
        path.push(root);

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&successor) = successors[node].get(top.1) {
                top.1 += 1;
                match marks[successor] {
                    Mark::OnPath => {
                        let start = path.iter().position(|&p| p == successor).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(successor);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks[successor] = Mark::OnPath;
                        path.push(successor);
                        stack.push((successor, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                path.pop();
                stack.pop();
            }
        }
    }
    None
}

/// Transitive closure of a small DAG, kept current as edges are added.
struct Reachability {
    reach: Vec<Vec<bool>>,
}

impl Reachability {
    fn new(successors: &[Vec<usize>]) -> Self {
        let n = successors.len();
        let mut reach = vec![vec![false; n]; n];
        for (start, row) in reach.iter_mut().enumerate() {
            let mut stack = successors[start].clone();
            while let Some(node) = stack.pop() {
                if !row[node] {
                    row[node] = true;
                    stack.extend_from_slice(&successors[node]);
                }
            }
        }
        Self { reach }
    }

    fn ordered(&self, a: usize, b: usize) -> bool {
        self.reach[a][b] || self.reach[b][a]
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        let n = self.reach.len();
        let targets: Vec<usize> = (0..n).filter(|&y| y == to || self.reach[to][y]).collect();
        for x in 0..n {
            if x == from || self.reach[x][from] {
                for &y in &targets {
                    self.reach[x][y] = true;
                }
            }
        }
    }
}
