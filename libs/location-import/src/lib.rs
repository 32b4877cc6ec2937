//! Bulk location import
//!
//! Turns a flat CSV of `(name, type, description)` column triplets into a location
//! hierarchy ([`parser`]) and commits it to a FHIR server parent-first, in batches
//! of at most [`MAX_BATCH_SIZE`] locations ([`scheduler`], [`commit`]).
//!
//! ```no_run
//! # async fn run(submitter: &dyn locimport_core::BatchSubmitter) -> locimport_core::Result<()> {
//! let csv = "Name,Type,Description\nMain Building,building,\n";
//! let mut forest = locimport_core::parse_csv(csv.as_bytes())?;
//! let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
//! let report = locimport_core::commit(&mut forest, submitter, Default::default(), cancel_rx).await?;
//! println!("created {} locations", report.created);
//! # Ok(())
//! # }
//! ```

pub mod commit;
pub mod error;
pub mod fhir;
pub mod model;
pub mod parser;
pub mod scheduler;
pub mod submitter;

pub use commit::{commit, CommitOptions, CommitReport};
pub use error::{CommitFailure, FormatError, ImportError, RejectedEntry, Result, SubmitError};
pub use model::{Forest, ImportNode, LocationKind, NodeId, ServerId};
pub use parser::{parse_csv, parse_rows};
pub use scheduler::{
    Action, BatchResult, OverflowPolicy, PendingBatch, Scheduler, SchedulerConfig, MAX_BATCH_SIZE,
};
pub use submitter::{BatchSubmitter, CreateRequest, DryRunSubmitter, EntryOutcome};
