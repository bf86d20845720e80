//! Step dispatcher
//!
//! Dependency-count gating over the selected steps. Each step holds the
//! number of scheduled predecessors not yet finished; every terminal
//! transition decrements its successors' counts and a step whose count
//! reaches zero becomes ready. Ready steps run as tasks bounded by a
//! semaphore, earliest in topological order first.

use brick_core::{Result, RunReport, StepId, StepOutcome, StepStatus};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::graph::BuildGraph;
use crate::service::{StepRun, StepService};

/// What to bring up to date and how
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    /// Steps the user asked for; their predecessors are pulled in
    pub entries: Vec<StepId>,
    /// Ignore the earlier steps of each entry's own target
    pub skip_previous: bool,
    /// Run every scheduled step regardless of the cache
    pub force: bool,
    /// Run the entry steps regardless of the cache
    pub force_entries: bool,
    /// Keep dispatching independent steps after a failure
    pub continue_on_error: bool,
    /// Publish the declared ports of the entry steps
    pub publish_ports: bool,
}

impl ScheduleRequest {
    pub fn new(entries: Vec<StepId>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }
}

/// Drives step execution over a build graph
pub struct Scheduler {
    service: Arc<dyn StepService>,
    max_parallel_steps: usize,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    /// * `service` - Runs individual steps
    /// * `max_parallel_steps` - Upper bound of concurrently running steps (at least 1)
    pub fn new(service: Arc<dyn StepService>, max_parallel_steps: usize) -> Self {
        Self {
            service,
            max_parallel_steps: max_parallel_steps.max(1),
        }
    }

    /// Runs the request's entries and everything they depend on
    ///
    /// Outcomes are reported in the order steps reached a terminal state;
    /// steps never dispatched because the run was cancelled come last as
    /// `Blocked`.
    ///
    /// # Errors
    /// Returns [`brick_core::BrickError::Config`] if an entry is not in the
    /// graph. Step failures are reported in the [`RunReport`], not as errors.
    pub async fn run(&self, graph: &BuildGraph, request: &ScheduleRequest) -> Result<RunReport> {
        let selection = graph.subgraph_for(&request.entries, request.skip_previous)?;
        let mut report = RunReport::default();

        if selection.is_empty() {
            info!("Nothing to run");
            return Ok(report);
        }

        info!(
            "Scheduling {} step(s) with up to {} in parallel",
            selection.len(),
            self.max_parallel_steps
        );

        let mut predecessors: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut successors: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for id in selection.steps() {
            let preds = graph.selected_predecessors(id, &selection);
            for pred in &preds {
                successors.entry(pred.clone()).or_default().push(id.clone());
            }
            predecessors.insert(id.clone(), preds);
        }

        let mut remaining: HashMap<StepId, usize> = predecessors
            .iter()
            .map(|(id, preds)| (id.clone(), preds.len()))
            .collect();
        let mut status: HashMap<StepId, StepStatus> = selection
            .steps()
            .iter()
            .map(|id| (id.clone(), StepStatus::Pending))
            .collect();
        let mut fingerprints: HashMap<StepId, String> = HashMap::new();

        let rank: HashMap<&StepId, usize> = selection
            .steps()
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = selection
            .steps()
            .iter()
            .enumerate()
            .filter(|(_, id)| remaining.get(*id) == Some(&0))
            .map(|(i, _)| Reverse(i))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_steps));
        let mut tasks: JoinSet<StepOutcome> = JoinSet::new();
        let mut running: HashMap<Id, StepId> = HashMap::new();
        let mut cancelled = false;

        loop {
            while !cancelled && !ready.is_empty() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    debug!("Max parallel steps reached, waiting for a running step");
                    break;
                };
                let Some(Reverse(next)) = ready.pop() else {
                    break;
                };
                let id = selection.steps()[next].clone();
                let Some(node) = graph.node(&id) else {
                    continue;
                };

                let upstream: Vec<(StepId, String)> = predecessors
                    .get(&id)
                    .into_iter()
                    .flatten()
                    .filter_map(|p| fingerprints.get(p).map(|f| (p.clone(), f.clone())))
                    .collect();

                // Left out by skip-previous; never gates dispatch
                let recorded_upstream: Vec<StepId> = graph
                    .predecessors(&id)
                    .filter(|p| !selection.contains(p))
                    .cloned()
                    .collect();

                let run = StepRun {
                    node: node.clone(),
                    upstream,
                    recorded_upstream,
                    force: request.force || (request.force_entries && selection.is_entry(&id)),
                    publish_ports: request.publish_ports && selection.is_entry(&id),
                };

                status.insert(id.clone(), StepStatus::Running);
                debug!("Dispatching {}", id);
                let task = self.spawn_step_task(&mut tasks, run, permit);
                running.insert(task, id);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let outcome = match joined {
                Ok((task, outcome)) => {
                    running.remove(&task);
                    outcome
                }
                Err(e) => {
                    let Some(id) = running.remove(&e.id()) else {
                        error!("Unknown step task failed to complete: {}", e);
                        continue;
                    };
                    StepOutcome {
                        id,
                        status: StepStatus::Failed,
                        fingerprint: None,
                        duration: Duration::ZERO,
                        output: Vec::new(),
                        error_message: Some(format!("step task panicked: {}", e)),
                    }
                }
            };

            let id = outcome.id.clone();
            status.insert(id.clone(), outcome.status);

            match outcome.status {
                ok if ok.is_ok() => {
                    if let Some(fingerprint) = &outcome.fingerprint {
                        fingerprints.insert(id.clone(), fingerprint.clone());
                    }
                    for next in successors.get(&id).into_iter().flatten() {
                        if let Some(count) = remaining.get_mut(next) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && status.get(next) == Some(&StepStatus::Pending) {
                                if let Some(&i) = rank.get(next) {
                                    ready.push(Reverse(i));
                                }
                            }
                        }
                    }
                    report.push(outcome);
                }
                _ => {
                    error!(
                        "{} failed: {}",
                        id,
                        outcome.error_message.as_deref().unwrap_or("unknown error")
                    );
                    report.push(outcome);

                    for blocked in block_descendants(&id, &successors, &mut status) {
                        info!("{} blocked by failure of {}", blocked, id);
                        report.push(StepOutcome::blocked(
                            blocked,
                            format!("blocked by failure of {}", id),
                        ));
                    }

                    if !request.continue_on_error && !cancelled {
                        warn!("Not dispatching further steps after failure of {}", id);
                        cancelled = true;
                    }
                }
            }
        }

        for id in selection.steps() {
            if status.get(id).is_some_and(|s| !s.is_terminal()) {
                report.push(StepOutcome::blocked(id.clone(), "run cancelled"));
            }
        }

        info!(
            "Run finished: {} succeeded, {} skipped, {} failed, {} blocked",
            report.with_status(StepStatus::Succeeded).len(),
            report.with_status(StepStatus::Skipped).len(),
            report.with_status(StepStatus::Failed).len(),
            report.with_status(StepStatus::Blocked).len()
        );

        Ok(report)
    }

    /// Spawns a task running one step, returning the task's id
    fn spawn_step_task(
        &self,
        tasks: &mut JoinSet<StepOutcome>,
        run: StepRun,
        permit: OwnedSemaphorePermit,
    ) -> Id {
        let service = Arc::clone(&self.service);

        tasks
            .spawn(async move {
                let _permit = permit;
                service.run_step(run).await
                // Permit is released when dropped
            })
            .id()
    }
}

/// Marks every pending step reachable from `failed` as blocked
fn block_descendants(
    failed: &StepId,
    successors: &HashMap<StepId, Vec<StepId>>,
    status: &mut HashMap<StepId, StepStatus>,
) -> Vec<StepId> {
    let mut blocked = Vec::new();
    let mut queue: VecDeque<&StepId> = successors.get(failed).into_iter().flatten().collect();

    while let Some(id) = queue.pop_front() {
        if status.get(id) != Some(&StepStatus::Pending) {
            continue;
        }
        status.insert(id.clone(), StepStatus::Blocked);
        blocked.push(id.clone());
        queue.extend(successors.get(id).into_iter().flatten());
    }

    blocked
}
