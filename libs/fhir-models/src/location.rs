//! FHIR Location resource (the elements the importer writes)

use crate::common::{CodeableConcept, Coding, Extension, Reference};
use serde::{Deserialize, Serialize};

/// Terminology system for `Location.physicalType`.
pub const PHYSICAL_TYPE_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/location-physical-type";

/// Terminology system for `Location.operationalStatus` (v2 bed status).
pub const BED_STATUS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v2-0116";

/// Extension carrying the availability status of a location.
pub const AVAILABILITY_STATUS_URL: &str =
    "http://thalamiq.io/fhir/StructureDefinition/location-availability-status";

/// Location.status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationStatus {
    #[default]
    Active,
    Suspended,
    Inactive,
}

/// Location.mode: a specific place (`instance`) or a class of places (`kind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationMode {
    Instance,
    Kind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LocationStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operational_status: Option<Coding>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<LocationMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_type: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_of: Option<Reference>,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            resource_type: "Location".to_string(),
            id: None,
            extension: Vec::new(),
            status: None,
            operational_status: None,
            name: name.into(),
            description: None,
            mode: None,
            physical_type: None,
            part_of: None,
        }
    }

    pub fn availability_status(&self) -> Option<&str> {
        self.extension
            .iter()
            .find(|e| e.url == AVAILABILITY_STATUS_URL)
            .and_then(Extension::value_code)
    }
}
