//! Batch submission collaborator
//!
//! The scheduler never talks to a server directly. It hands a bounded list of
//! create requests to a [`BatchSubmitter`] and gets one outcome back per request.

use crate::error::SubmitError;
use crate::model::{Forest, NodeId, ServerId};
use async_trait::async_trait;
use locimport_models::Location;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Collection every import request targets.
pub const LOCATION_COLLECTION: &str = "Location";

/// One "create entity" operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub collection: String,
    /// Key used to match the outcome back to the node (the location name).
    pub correlation_key: String,
    pub body: Location,
}

impl CreateRequest {
    /// Create request for a node whose parent is `parent` (or top level).
    pub fn for_node(forest: &Forest, id: NodeId, parent: Option<&ServerId>) -> Self {
        let node = forest.node(id);
        Self {
            collection: LOCATION_COLLECTION.to_string(),
            correlation_key: node.name.clone(),
            body: crate::fhir::location_for(node, parent),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Created {
        key: String,
        id: ServerId,
    },
    Rejected {
        key: String,
        status: Option<u16>,
        message: String,
    },
}

impl EntryOutcome {
    pub fn key(&self) -> &str {
        match self {
            EntryOutcome::Created { key, .. } | EntryOutcome::Rejected { key, .. } => key,
        }
    }
}

/// Submits a batch of create requests and reports a per-request outcome.
///
/// Implementations return outcomes in request order. An `Err` means the batch as a
/// whole could not be resolved (network failure, unreadable response).
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    async fn submit(&self, requests: Vec<CreateRequest>) -> Result<Vec<EntryOutcome>, SubmitError>;
}

/// Submitter that creates nothing and hands out sequential ids.
///
/// Used for dry runs; every batch it receives is kept for inspection.
#[derive(Debug, Default)]
pub struct DryRunSubmitter {
    next_id: AtomicUsize,
    batches: Mutex<Vec<Vec<CreateRequest>>>,
}

impl DryRunSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<CreateRequest>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BatchSubmitter for DryRunSubmitter {
    async fn submit(&self, requests: Vec<CreateRequest>) -> Result<Vec<EntryOutcome>, SubmitError> {
        let outcomes = requests
            .iter()
            .map(|request| {
                let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                EntryOutcome::Created {
                    key: request.correlation_key.clone(),
                    id: ServerId::new(format!("dry-run-{n}")),
                }
            })
            .collect();

        self.batches
            .lock()
            .map_err(|_| SubmitError::Transport("dry-run batch log poisoned".to_string()))?
            .push(requests);
        Ok(outcomes)
    }
}
