//! FHIR resource models used by the location importer.
//!
//! Only the elements the importer reads or writes are modelled; anything else a
//! server returns on a Bundle is preserved in `Bundle::extensions`.

pub mod bundle;
pub mod common;
pub mod location;

pub use bundle::{Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleType};
pub use common::{
    CodeableConcept, Coding, Extension, OperationOutcome, OperationOutcomeIssue, Reference,
};
pub use location::{Location, LocationMode, LocationStatus};
