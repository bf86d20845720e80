//! Build graph (DAG) of steps
//!
//! Flattens the workspace's targets into step nodes and infers the edges
//! between them: every step depends on the previous step of its target, and
//! on every step whose outputs feed one of its inputs. The graph is a pure
//! function of the loaded targets and is rebuilt on every invocation.

use brick_core::{BrickError, Result, Step, StepId, Target};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::patterns::{PathPattern, resolve_all};

/// A single node in the build graph (one step of one target)
#[derive(Debug, Clone, Serialize)]
pub struct StepNode {
    pub id: StepId,
    /// Directory of the owning target relative to the workspace root
    pub rel_dir: String,
    /// Absolute directory of the owning target
    #[serde(skip)]
    pub dir: PathBuf,
    pub step: Step,
    /// Declaration index across the whole workspace, used to break ties
    pub index: usize,
}

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Consecutive steps of the same target
    Sequence,
    /// An output pattern of `from` feeds an input pattern of `to`
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: StepId,
    pub to: StepId,
    pub kind: EdgeKind,
}

/// A directed acyclic graph of every step in the workspace
#[derive(Debug, Clone, Serialize)]
pub struct BuildGraph {
    nodes: Vec<StepNode>,
    edges: Vec<Edge>,
    /// Node identifiers in execution order
    order: Vec<StepId>,
    #[serde(skip)]
    index: HashMap<StepId, usize>,
    #[serde(skip)]
    successors: BTreeMap<StepId, BTreeSet<StepId>>,
    #[serde(skip)]
    predecessors: BTreeMap<StepId, BTreeSet<StepId>>,
}

/// The steps one invocation has to consider
#[derive(Debug, Clone)]
pub struct Selection {
    entries: Vec<StepId>,
    /// Selected steps in topological order
    steps: Vec<StepId>,
    members: HashSet<StepId>,
}

impl Selection {
    pub fn entries(&self) -> &[StepId] {
        &self.entries
    }

    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.members.contains(id)
    }

    pub fn is_entry(&self, id: &StepId) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl BuildGraph {
    /// Builds the graph of all steps across `targets`
    ///
    /// # Errors
    /// * [`BrickError::Config`] - two steps share the same `target:step` id
    /// * [`BrickError::Cycle`] - the inferred edges form a cycle
    pub fn build(targets: &[Target]) -> Result<Self> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        for target in targets {
            for step in &target.steps {
                let id = target.step_id(&step.name);
                if index.insert(id.clone(), nodes.len()).is_some() {
                    return Err(BrickError::config(format!(
                        "Step {} is declared more than once",
                        id
                    )));
                }
                nodes.push(StepNode {
                    id,
                    rel_dir: target.rel_dir.clone(),
                    dir: target.dir.clone(),
                    step: step.clone(),
                    index: nodes.len(),
                });
            }
        }

        let edges = infer_edges(targets, &nodes);

        let mut successors: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();
        let mut predecessors: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();
        for node in &nodes {
            successors.insert(node.id.clone(), BTreeSet::new());
            predecessors.insert(node.id.clone(), BTreeSet::new());
        }
        for edge in &edges {
            if let Some(set) = successors.get_mut(&edge.from) {
                set.insert(edge.to.clone());
            }
            if let Some(set) = predecessors.get_mut(&edge.to) {
                set.insert(edge.from.clone());
            }
        }

        let mut graph = Self {
            nodes,
            edges,
            order: Vec::new(),
            index,
            successors,
            predecessors,
        };

        graph.check_acyclic()?;
        graph.order = graph.topological_sort();

        info!(
            "Built graph with {} step(s) and {} edge(s)",
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn node(&self, id: &StepId) -> Option<&StepNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.index.contains_key(id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Steps with an edge into `id`
    pub fn predecessors(&self, id: &StepId) -> impl Iterator<Item = &StepId> {
        self.predecessors.get(id).into_iter().flatten()
    }

    /// Steps `id` has an edge into
    pub fn successors(&self, id: &StepId) -> impl Iterator<Item = &StepId> {
        self.successors.get(id).into_iter().flatten()
    }

    /// Every step in an order consistent with all edges, ties broken by
    /// declaration order
    pub fn topological_order(&self) -> &[StepId] {
        &self.order
    }

    /// Selects the steps needed to bring `entries` up to date
    ///
    /// The selection holds the entries and all their transitive
    /// predecessors. With `skip_previous`, edges from a step of the entry's
    /// own target into an entry step are not followed, so the earlier steps
    /// of that target are left out unless another path reaches them.
    pub fn subgraph_for(&self, entries: &[StepId], skip_previous: bool) -> Result<Selection> {
        for entry in entries {
            if !self.contains(entry) {
                return Err(BrickError::config(format!("Unknown step {}", entry)));
            }
        }

        let entry_set: HashSet<&StepId> = entries.iter().collect();
        let mut members: HashSet<StepId> = HashSet::new();
        let mut queue: VecDeque<&StepId> = entries.iter().collect();

        while let Some(id) = queue.pop_front() {
            if !members.insert(id.clone()) {
                continue;
            }
            for pred in self.predecessors(id) {
                if skip_previous && entry_set.contains(&id) && pred.target == id.target {
                    debug!("Skipping previous step {} of {}", pred, id);
                    continue;
                }
                if !members.contains(pred) {
                    queue.push_back(pred);
                }
            }
        }

        let steps: Vec<StepId> = self
            .order
            .iter()
            .filter(|id| members.contains(*id))
            .cloned()
            .collect();

        debug!(
            "Selected {} step(s) for {} entr{}",
            steps.len(),
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" }
        );

        Ok(Selection {
            entries: entries.to_vec(),
            steps,
            members,
        })
    }

    /// Copy of the graph keeping only the selected steps and the edges
    /// between them
    pub fn restrict(&self, selection: &Selection) -> BuildGraph {
        let nodes: Vec<StepNode> = self
            .nodes
            .iter()
            .filter(|n| selection.contains(&n.id))
            .cloned()
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let keep = |id: &StepId| selection.contains(id);
        let filter_adjacency =
            |map: &BTreeMap<StepId, BTreeSet<StepId>>| -> BTreeMap<StepId, BTreeSet<StepId>> {
                map.iter()
                    .filter(|(id, _)| keep(*id))
                    .map(|(id, set)| {
                        let kept = set.iter().filter(|s| keep(*s)).cloned().collect();
                        (id.clone(), kept)
                    })
                    .collect()
            };

        BuildGraph {
            nodes,
            edges: self
                .edges
                .iter()
                .filter(|e| keep(&e.from) && keep(&e.to))
                .cloned()
                .collect(),
            order: self.order.iter().filter(|id| keep(*id)).cloned().collect(),
            index,
            successors: filter_adjacency(&self.successors),
            predecessors: filter_adjacency(&self.predecessors),
        }
    }

    /// Predecessors of `id` that are part of `selection`
    pub fn selected_predecessors(&self, id: &StepId, selection: &Selection) -> Vec<StepId> {
        self.predecessors(id)
            .filter(|p| selection.contains(p))
            .cloned()
            .collect()
    }

    fn successor_indices(&self, node: usize) -> Vec<usize> {
        let mut next: Vec<usize> = self
            .successors(&self.nodes[node].id)
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        next.sort_unstable();
        next
    }

    /// Depth-first search with recursion-stack marking
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // Explicit stack of (node, successors, next successor position)
            let mut stack: Vec<(usize, Vec<usize>, usize)> =
                vec![(start, self.successor_indices(start), 0)];
            marks[start] = Mark::InProgress;

            while let Some((node, next, pos)) = stack.last_mut() {
                let Some(&child) = next.get(*pos) else {
                    marks[*node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *pos += 1;

                match marks[child] {
                    Mark::Done => {}
                    Mark::InProgress => {
                        let from = stack.iter().position(|(n, _, _)| *n == child).unwrap_or(0);
                        let mut cycle: Vec<StepId> = stack[from..]
                            .iter()
                            .map(|(n, _, _)| self.nodes[*n].id.clone())
                            .collect();
                        cycle.push(self.nodes[child].id.clone());
                        return Err(BrickError::Cycle { cycle });
                    }
                    Mark::Unvisited => {
                        marks[child] = Mark::InProgress;
                        stack.push((child, self.successor_indices(child), 0));
                    }
                }
            }
        }

        Ok(())
    }

    /// Kahn's algorithm, always releasing the earliest declared ready step
    fn topological_sort(&self) -> Vec<StepId> {
        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| self.predecessors(&n.id).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node].id.clone());
            for child in self.successor_indices(node) {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }
        order
    }
}

/// Sequence edges within each target plus path edges across all steps
fn infer_edges(targets: &[Target], nodes: &[StepNode]) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut offset = 0;

    for target in targets {
        for i in 1..target.steps.len() {
            let (from, to) = (offset + i - 1, offset + i);
            seen.insert((from, to));
            edges.push(Edge {
                from: nodes[from].id.clone(),
                to: nodes[to].id.clone(),
                kind: EdgeKind::Sequence,
            });
        }
        offset += target.steps.len();
    }

    let outputs: Vec<Vec<PathPattern>> = nodes
        .iter()
        .map(|n| resolve_all(&n.rel_dir, &n.step.outputs))
        .collect();
    let inputs: Vec<Vec<PathPattern>> = nodes
        .iter()
        .map(|n| resolve_all(&n.rel_dir, &n.step.inputs))
        .collect();

    for (a, outs) in outputs.iter().enumerate() {
        if outs.is_empty() {
            continue;
        }
        for (b, ins) in inputs.iter().enumerate() {
            if a == b || seen.contains(&(a, b)) {
                continue;
            }
            let feeds = outs.iter().any(|o| ins.iter().any(|i| o.feeds(i)));
            if feeds {
                debug!("{} feeds {}", nodes[a].id, nodes[b].id);
                seen.insert((a, b));
                edges.push(Edge {
                    from: nodes[a].id.clone(),
                    to: nodes[b].id.clone(),
                    kind: EdgeKind::Path,
                });
            }
        }
    }

    edges
}
