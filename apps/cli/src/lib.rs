//! Location importer command line support: configuration, logging and the FHIR
//! batch client used as the import's submission backend.

pub mod client;
pub mod config;
pub mod logging;

pub use client::FhirBatchClient;
pub use config::Config;
