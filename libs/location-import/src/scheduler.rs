//! Dependency-ordered batch commit scheduler
//!
//! The scheduler walks a [`Forest`] breadth-first. Every queued [`BatchItem`] is a
//! set of siblings whose parent already has a server id (or that sit at the top
//! level). A batch is only handed out once its parent exists, and the children of
//! a batch are queued only after the server answered with their parents' ids.
//!
//! The scheduler performs no I/O. A driver calls [`Scheduler::step`] with the
//! result of the previous [`Action::Submit`] and acts on whatever comes back:
//!
//! ```text
//! Idle --seed--> Draining --Submit--> AwaitingResult --result--> Draining ... --> Done
//!                                           |
//!                                           +--rejected entries / transport error--> Failed
//! ```

use crate::error::{CommitFailure, RejectedEntry};
use crate::model::{Forest, NodeId, ServerId};
use crate::submitter::{CreateRequest, EntryOutcome};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};

/// Hard cap on create entries per batch.
pub const MAX_BATCH_SIZE: usize = 20;

/// Where the remainder of an oversized sibling set goes after splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Append the remainder to the back of the queue. Branches queued earlier are
    /// committed before the rest of the split set.
    #[default]
    Deferred,
    /// Keep the remainder directly behind the chunk being submitted.
    Contiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_batch_size: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Siblings waiting to be committed under an already persisted parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub parent: Option<ServerId>,
    pub nodes: Vec<NodeId>,
}

/// Nodes to create in one batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    pub parent: Option<ServerId>,
    pub nodes: Vec<NodeId>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn requests(&self, forest: &Forest) -> Vec<CreateRequest> {
        self.nodes
            .iter()
            .map(|id| CreateRequest::for_node(forest, *id, self.parent.as_ref()))
            .collect()
    }
}

/// What the submitter reported for the last batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Entries(Vec<EntryOutcome>),
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Submit(PendingBatch),
    Done,
    Failed(CommitFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitStats {
    pub batches: usize,
    pub created: usize,
    /// Nodes that already carried a server id and were not submitted.
    pub skipped: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Draining,
    AwaitingResult {
        item: BatchItem,
        submitted: Vec<NodeId>,
    },
    Done,
    Failed(CommitFailure),
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    queue: VecDeque<BatchItem>,
    state: State,
    stats: CommitStats,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config: SchedulerConfig {
                max_batch_size: config.max_batch_size.clamp(1, MAX_BATCH_SIZE),
                ..config
            },
            queue: VecDeque::new(),
            state: State::Idle,
            stats: CommitStats::default(),
        }
    }

    /// Queue the roots of `forest`, to be created under `parent` (top level if `None`).
    pub fn seed(&mut self, forest: &Forest, parent: Option<ServerId>) {
        self.queue.clear();
        self.stats = CommitStats::default();
        if !forest.roots().is_empty() {
            self.queue.push_back(BatchItem {
                parent,
                nodes: forest.roots().to_vec(),
            });
        }
        self.state = State::Draining;
    }

    pub fn stats(&self) -> CommitStats {
        self.stats
    }

    /// Sibling sets still waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Failed(_))
    }

    /// Advance to the next externally visible action.
    ///
    /// `last` must carry the outcome of the previously returned
    /// [`Action::Submit`], and must be `None` otherwise.
    pub fn step(&mut self, forest: &mut Forest, last: Option<BatchResult>) -> Action {
        let state = std::mem::replace(&mut self.state, State::Draining);
        match (state, last) {
            (State::AwaitingResult { item, submitted }, Some(result)) => {
                match self.apply_result(forest, item, submitted, result) {
                    Ok(()) => self.drain(forest),
                    Err(failure) => self.fail(failure),
                }
            }
            (State::AwaitingResult { item, .. }, None) => {
                self.queue.push_front(item);
                self.protocol_error("step called without the result of the batch in flight")
            }
            (State::Draining, None) => self.drain(forest),
            (State::Done, None) => {
                self.state = State::Done;
                Action::Done
            }
            (State::Failed(failure), None) => {
                self.state = State::Failed(failure.clone());
                Action::Failed(failure)
            }
            (State::Idle, None) => self.protocol_error("scheduler was never seeded"),
            (_, Some(_)) => {
                self.protocol_error("received a batch result while no batch was in flight")
            }
        }
    }

    fn drain(&mut self, forest: &mut Forest) -> Action {
        let max = self.config.max_batch_size;
        while let Some(mut item) = self.queue.pop_front() {
            if item.nodes.len() > max {
                let remainder = BatchItem {
                    parent: item.parent.clone(),
                    nodes: item.nodes.split_off(max),
                };
                tracing::debug!(
                    parent = ?item.parent,
                    chunk = item.nodes.len(),
                    remainder = remainder.nodes.len(),
                    policy = ?self.config.overflow,
                    "Splitting oversized sibling set"
                );
                match self.config.overflow {
                    OverflowPolicy::Deferred => {
                        self.queue.push_front(item);
                        self.queue.push_back(remainder);
                    }
                    OverflowPolicy::Contiguous => {
                        self.queue.push_front(remainder);
                        self.queue.push_front(item);
                    }
                }
                continue;
            }

            let submitted: Vec<NodeId> = item
                .nodes
                .iter()
                .copied()
                .filter(|id| !forest.node(*id).is_committed())
                .collect();
            self.stats.skipped += item.nodes.len() - submitted.len();

            if submitted.is_empty() {
                self.enqueue_children(forest, &item);
                continue;
            }

            self.stats.batches += 1;
            tracing::info!(
                parent = ?item.parent,
                size = submitted.len(),
                skipped = item.nodes.len() - submitted.len(),
                queued = self.queue.len(),
                "Submitting location batch"
            );
            let batch = PendingBatch {
                parent: item.parent.clone(),
                nodes: submitted.clone(),
            };
            self.state = State::AwaitingResult { item, submitted };
            return Action::Submit(batch);
        }

        self.state = State::Done;
        Action::Done
    }

    fn apply_result(
        &mut self,
        forest: &mut Forest,
        item: BatchItem,
        submitted: Vec<NodeId>,
        result: BatchResult,
    ) -> Result<(), CommitFailure> {
        let outcomes = match result {
            BatchResult::Entries(outcomes) => outcomes,
            BatchResult::Transport(message) => return Err(self.unresolved(item, message)),
        };

        if outcomes.len() != submitted.len() {
            let message = format!(
                "batch of {} entries answered with {} outcomes",
                submitted.len(),
                outcomes.len()
            );
            return Err(self.unresolved(item, message));
        }

        let mut by_key: HashMap<&str, &EntryOutcome> =
            outcomes.iter().map(|o| (o.key(), o)).collect();
        let mut matched = Vec::with_capacity(submitted.len());
        for id in &submitted {
            match by_key.remove(forest.node(*id).name.as_str()) {
                Some(outcome) => matched.push((*id, outcome.clone())),
                None => {
                    let message = format!("no outcome for location '{}'", forest.node(*id).name);
                    return Err(self.unresolved(item, message));
                }
            }
        }

        let mut rejected = Vec::new();
        for (id, outcome) in matched {
            match outcome {
                EntryOutcome::Created { id: server_id, .. } => {
                    forest.assign_server_id(id, server_id);
                    self.stats.created += 1;
                }
                EntryOutcome::Rejected {
                    key,
                    status,
                    message,
                } => {
                    tracing::warn!(
                        location = %key,
                        parent = ?item.parent,
                        status = ?status,
                        "Location rejected: {}",
                        message
                    );
                    rejected.push(RejectedEntry {
                        key,
                        parent: item.parent.clone(),
                        status,
                        message,
                    });
                }
            }
        }
        self.stats.rejected += rejected.len();

        self.enqueue_children(forest, &item);

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(CommitFailure {
                rejected,
                transport: None,
                pending_batches: self.queue.len(),
            })
        }
    }

    /// The whole batch is unresolved: put it back so the pending count includes it.
    fn unresolved(&mut self, item: BatchItem, message: String) -> CommitFailure {
        tracing::error!(
            parent = ?item.parent,
            size = item.nodes.len(),
            "Batch failed: {}",
            message
        );
        self.queue.push_front(item);
        CommitFailure {
            rejected: Vec::new(),
            transport: Some(message),
            pending_batches: self.queue.len(),
        }
    }

    /// Queue the children of every node in `item` that now has a server id.
    fn enqueue_children(&mut self, forest: &Forest, item: &BatchItem) {
        for id in &item.nodes {
            let node = forest.node(*id);
            let Some(server_id) = node.server_id.as_ref() else {
                continue;
            };
            if node.children.is_empty() {
                continue;
            }
            self.queue.push_back(BatchItem {
                parent: Some(server_id.clone()),
                nodes: node.children.clone(),
            });
        }
    }

    fn fail(&mut self, failure: CommitFailure) -> Action {
        self.state = State::Failed(failure.clone());
        Action::Failed(failure)
    }

    fn protocol_error(&mut self, message: &str) -> Action {
        self.fail(CommitFailure {
            rejected: Vec::new(),
            transport: Some(message.to_string()),
            pending_batches: self.queue.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImportNode, LocationKind};

    /// Forest with `roots` top-level buildings, each holding `wards` wards.
    fn campus(roots: usize, wards: usize) -> Forest {
        let mut forest = Forest::new();
        for r in 0..roots {
            let b = forest.insert(
                None,
                ImportNode::new(format!("B{r}"), LocationKind::Building, None),
            );
            for w in 0..wards {
                forest.insert(
                    Some(b),
                    ImportNode::new(format!("B{r}-W{w}"), LocationKind::Ward, None),
                );
            }
        }
        forest
    }

    fn created(forest: &Forest, batch: &PendingBatch) -> BatchResult {
        BatchResult::Entries(
            batch
                .nodes
                .iter()
                .map(|id| {
                    let name = forest.node(*id).name.clone();
                    EntryOutcome::Created {
                        id: ServerId::new(format!("id-{name}")),
                        key: name,
                    }
                })
                .collect(),
        )
    }

    /// Run to completion, answering every batch with success.
    fn run(scheduler: &mut Scheduler, forest: &mut Forest) -> Vec<PendingBatch> {
        let mut batches = Vec::new();
        let mut last = None;
        loop {
            match scheduler.step(forest, last.take()) {
                Action::Submit(batch) => {
                    last = Some(created(forest, &batch));
                    batches.push(batch);
                }
                Action::Done => return batches,
                Action::Failed(f) => panic!("unexpected failure: {f}"),
            }
        }
    }

    fn names(forest: &Forest, batch: &PendingBatch) -> Vec<String> {
        batch
            .nodes
            .iter()
            .map(|id| forest.node(*id).name.clone())
            .collect()
    }

    #[test]
    fn empty_forest_is_done_immediately() {
        let mut forest = Forest::new();
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        assert_eq!(scheduler.step(&mut forest, None), Action::Done);
        assert_eq!(scheduler.step(&mut forest, None), Action::Done);
    }

    #[test]
    fn unseeded_scheduler_fails() {
        let mut forest = campus(1, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        assert!(matches!(scheduler.step(&mut forest, None), Action::Failed(_)));
    }

    #[test]
    fn levels_are_committed_parent_first() {
        let mut forest = campus(2, 2);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].parent, None);
        assert_eq!(names(&forest, &batches[0]), vec!["B0", "B1"]);
        assert_eq!(batches[1].parent, Some(ServerId::from("id-B0")));
        assert_eq!(names(&forest, &batches[1]), vec!["B0-W0", "B0-W1"]);
        assert_eq!(batches[2].parent, Some(ServerId::from("id-B1")));
        assert_eq!(forest.committed_count(), forest.len());
        assert_eq!(scheduler.stats().created, 6);
        assert_eq!(scheduler.stats().batches, 3);
    }

    #[test]
    fn seed_parent_becomes_part_of_for_roots() {
        let mut forest = campus(1, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, Some(ServerId::from("facility-7")));
        match scheduler.step(&mut forest, None) {
            Action::Submit(batch) => {
                assert_eq!(batch.parent, Some(ServerId::from("facility-7")));
                let requests = batch.requests(&forest);
                assert_eq!(
                    requests[0]
                        .body
                        .part_of
                        .as_ref()
                        .and_then(|r| r.reference.as_deref()),
                    Some("Location/facility-7")
                );
            }
            other => panic!("expected a batch, got {other:?}"),
        }
    }

    #[test]
    fn oversized_sibling_sets_are_split_to_the_cap() {
        let mut forest = campus(45, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);

        let sizes: Vec<usize> = batches.iter().map(PendingBatch::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert_eq!(forest.committed_count(), 45);
    }

    #[test]
    fn configured_batch_size_is_clamped_to_the_cap() {
        let mut forest = campus(30, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig {
            max_batch_size: 500,
            overflow: OverflowPolicy::Deferred,
        });
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);
        assert!(batches.iter().all(|b| b.len() <= MAX_BATCH_SIZE));
    }

    /// Two buildings: B0 with 25 wards, B1 with 2.
    fn lopsided() -> Forest {
        let mut forest = campus(1, 25);
        let b1 = forest.insert(None, ImportNode::new("B1", LocationKind::Building, None));
        forest.insert(Some(b1), ImportNode::new("B1-W0", LocationKind::Ward, None));
        forest.insert(Some(b1), ImportNode::new("B1-W1", LocationKind::Ward, None));
        forest
    }

    #[test]
    fn deferred_overflow_lets_queued_branches_go_first() {
        let mut forest = lopsided();
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);

        let parents: Vec<_> = batches
            .iter()
            .map(|b| (b.parent.clone(), b.len()))
            .collect();
        assert_eq!(
            parents,
            vec![
                (None, 2),
                (Some(ServerId::from("id-B0")), 20),
                (Some(ServerId::from("id-B1")), 2),
                (Some(ServerId::from("id-B0")), 5),
            ]
        );
    }

    #[test]
    fn contiguous_overflow_keeps_split_chunks_together() {
        let mut forest = lopsided();
        let mut scheduler = Scheduler::new(SchedulerConfig {
            max_batch_size: MAX_BATCH_SIZE,
            overflow: OverflowPolicy::Contiguous,
        });
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);

        let parents: Vec<_> = batches
            .iter()
            .map(|b| (b.parent.clone(), b.len()))
            .collect();
        assert_eq!(
            parents,
            vec![
                (None, 2),
                (Some(ServerId::from("id-B0")), 20),
                (Some(ServerId::from("id-B0")), 5),
                (Some(ServerId::from("id-B1")), 2),
            ]
        );
    }

    #[test]
    fn committed_nodes_are_not_resubmitted() {
        let mut forest = campus(2, 1);
        let b0 = forest.roots()[0];
        forest.assign_server_id(b0, ServerId::from("existing-b0"));
        let b0_ward = forest.node(b0).children[0];
        forest.assign_server_id(b0_ward, ServerId::from("existing-w0"));

        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);

        assert_eq!(names(&forest, &batches[0]), vec!["B1"]);
        assert_eq!(names(&forest, &batches[1]), vec!["B1-W0"]);
        assert_eq!(batches.len(), 2);
        assert_eq!(
            forest.node(b0).server_id,
            Some(ServerId::from("existing-b0"))
        );
        assert_eq!(scheduler.stats().skipped, 2);
        assert_eq!(scheduler.stats().created, 2);
    }

    #[test]
    fn fully_committed_parent_still_seeds_children() {
        let mut forest = campus(1, 3);
        let b0 = forest.roots()[0];
        forest.assign_server_id(b0, ServerId::from("existing-b0"));

        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let batches = run(&mut scheduler, &mut forest);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].parent, Some(ServerId::from("existing-b0")));
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn rejected_entries_halt_but_keep_successful_siblings() {
        let mut forest = campus(2, 1);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);

        let Action::Submit(batch) = scheduler.step(&mut forest, None) else {
            panic!("expected root batch");
        };
        let result = BatchResult::Entries(vec![
            EntryOutcome::Created {
                key: "B0".into(),
                id: ServerId::from("id-B0"),
            },
            EntryOutcome::Rejected {
                key: "B1".into(),
                status: Some(409),
                message: "duplicate".into(),
            },
        ]);
        assert_eq!(batch.len(), 2);

        let Action::Failed(failure) = scheduler.step(&mut forest, Some(result)) else {
            panic!("expected failure");
        };
        assert_eq!(failure.rejected.len(), 1);
        assert_eq!(failure.rejected[0].key, "B1");
        assert_eq!(failure.rejected[0].status, Some(409));
        assert_eq!(failure.pending_batches, 1, "B0's wards stay queued");
        assert_eq!(scheduler.queued(), 1);
        assert_eq!(
            forest.node(forest.roots()[0]).server_id,
            Some(ServerId::from("id-B0"))
        );
        assert!(forest.node(forest.roots()[1]).server_id.is_none());

        assert!(scheduler.is_finished());
        assert!(matches!(scheduler.step(&mut forest, None), Action::Failed(_)));
    }

    #[test]
    fn transport_error_assigns_nothing() {
        let mut forest = campus(3, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let Action::Submit(_) = scheduler.step(&mut forest, None) else {
            panic!("expected root batch");
        };

        let action = scheduler.step(&mut forest, Some(BatchResult::Transport("timeout".into())));
        let Action::Failed(failure) = action else {
            panic!("expected failure");
        };
        assert_eq!(failure.transport.as_deref(), Some("timeout"));
        assert_eq!(failure.pending_batches, 1);
        assert_eq!(forest.committed_count(), 0);
    }

    #[test]
    fn outcome_count_mismatch_is_a_transport_failure() {
        let mut forest = campus(2, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let Action::Submit(_) = scheduler.step(&mut forest, None) else {
            panic!("expected root batch");
        };

        let result = BatchResult::Entries(vec![EntryOutcome::Created {
            key: "B0".into(),
            id: ServerId::from("id-B0"),
        }]);
        let Action::Failed(failure) = scheduler.step(&mut forest, Some(result)) else {
            panic!("expected failure");
        };
        assert!(failure.transport.is_some());
        assert_eq!(forest.committed_count(), 0);
    }

    #[test]
    fn outcomes_are_matched_by_key() {
        let mut forest = campus(2, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let Action::Submit(_) = scheduler.step(&mut forest, None) else {
            panic!("expected root batch");
        };

        let result = BatchResult::Entries(vec![
            EntryOutcome::Created {
                key: "B1".into(),
                id: ServerId::from("x1"),
            },
            EntryOutcome::Created {
                key: "B0".into(),
                id: ServerId::from("x0"),
            },
        ]);
        assert_eq!(scheduler.step(&mut forest, Some(result)), Action::Done);
        assert_eq!(
            forest.node(forest.roots()[0]).server_id,
            Some(ServerId::from("x0"))
        );
        assert_eq!(
            forest.node(forest.roots()[1]).server_id,
            Some(ServerId::from("x1"))
        );
    }

    #[test]
    fn result_without_batch_in_flight_is_rejected() {
        let mut forest = campus(1, 0);
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.seed(&forest, None);
        let action = scheduler.step(&mut forest, Some(BatchResult::Entries(vec![])));
        assert!(matches!(action, Action::Failed(_)));
    }
}
