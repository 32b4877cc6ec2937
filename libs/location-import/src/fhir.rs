//! FHIR mapping for import nodes and batch bundles
//!
//! Each create request becomes a `POST Location` entry of a `batch` Bundle. Batch
//! responses are positional, so the outcome for entry `i` belongs to request `i`;
//! the `fullUrl` carries the correlation key and is checked when the server echoes it.

use crate::error::SubmitError;
use crate::model::{ImportNode, ServerId};
use crate::submitter::{CreateRequest, EntryOutcome};
use locimport_models::location::{
    AVAILABILITY_STATUS_URL, BED_STATUS_SYSTEM, PHYSICAL_TYPE_SYSTEM,
};
use locimport_models::{
    Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleType, CodeableConcept,
    Coding, Extension, Location, OperationOutcome, Reference,
};

const CORRELATION_URN_PREFIX: &str = "urn:locimport:";

/// Location resource for `node`, placed under `parent` when given.
pub fn location_for(node: &ImportNode, parent: Option<&ServerId>) -> Location {
    let mut location = Location::new(node.name.clone());
    location.status = Some(node.status);
    location.operational_status = Some(Coding::new(
        BED_STATUS_SYSTEM,
        &node.operational_status,
        operational_status_display(&node.operational_status),
    ));
    location.description = node.description.clone();
    location.mode = Some(node.mode);
    location.physical_type = Some(CodeableConcept::from_coding(Coding::new(
        PHYSICAL_TYPE_SYSTEM,
        node.kind.code(),
        node.kind.display(),
    )));
    location.part_of = parent.map(|id| Reference::to("Location", id.as_str()));
    let availability = Extension::code(AVAILABILITY_STATUS_URL, &node.availability_status);
    location.extension.push(availability);
    location
}

fn operational_status_display(code: &str) -> &'static str {
    match code {
        "C" => "Closed",
        "H" => "Housekeeping",
        "I" => "Isolated",
        "K" => "Contaminated",
        "O" => "Occupied",
        _ => "Unoccupied",
    }
}

pub fn correlation_url(key: &str) -> String {
    format!("{}{}", CORRELATION_URN_PREFIX, urlencoding::encode(key))
}

/// Batch bundle with one `POST` entry per request.
pub fn batch_bundle(requests: &[CreateRequest]) -> Result<Bundle, SubmitError> {
    let mut entries = Vec::with_capacity(requests.len());
    for request in requests {
        let resource = serde_json::to_value(&request.body).map_err(encoding_error)?;
        entries.push(BundleEntry {
            full_url: Some(correlation_url(&request.correlation_key)),
            request: Some(BundleEntryRequest {
                method: "POST".to_string(),
                url: request.collection.clone(),
                if_none_exist: None,
            }),
            response: None,
            resource: Some(resource),
        });
    }

    Ok(Bundle::new(BundleType::Batch, entries))
}

fn encoding_error(err: serde_json::Error) -> SubmitError {
    SubmitError::Transport(format!("Failed to encode location: {err}"))
}

/// Map a `batch-response` back onto the requests that produced it.
pub fn read_batch_response(
    bundle: &Bundle,
    requests: &[CreateRequest],
) -> Result<Vec<EntryOutcome>, SubmitError> {
    if bundle.bundle_type != BundleType::BatchResponse {
        return Err(SubmitError::InvalidResponse(format!(
            "expected a batch-response Bundle, got {:?}",
            bundle.bundle_type
        )));
    }

    let entries = bundle.entries();
    if entries.len() != requests.len() {
        return Err(SubmitError::InvalidResponse(format!(
            "batch of {} entries answered with {} entries",
            requests.len(),
            entries.len()
        )));
    }

    entries
        .iter()
        .zip(requests)
        .enumerate()
        .map(|(index, (entry, request))| read_entry(index, entry, request))
        .collect()
}

fn read_entry(
    index: usize,
    entry: &BundleEntry,
    request: &CreateRequest,
) -> Result<EntryOutcome, SubmitError> {
    let key = request.correlation_key.clone();

    if let Some(full_url) = entry.full_url.as_deref() {
        if full_url.starts_with(CORRELATION_URN_PREFIX)
            && full_url != correlation_url(&request.correlation_key)
        {
            return Err(SubmitError::InvalidResponse(format!(
                "entry {} answers '{}' but request was for '{}'",
                index, full_url, request.correlation_key
            )));
        }
    }

    let Some(response) = entry.response.as_ref() else {
        return Ok(EntryOutcome::Rejected {
            key,
            status: None,
            message: format!("entry {} has no response", index),
        });
    };

    if !response.is_success() {
        return Ok(EntryOutcome::Rejected {
            key,
            status: response.status_code(),
            message: rejection_message(response),
        });
    }

    let id = response
        .location
        .as_deref()
        .and_then(|location| id_from_location(location, &request.collection))
        .or_else(|| {
            entry
                .resource
                .as_ref()
                .and_then(|r| r.get("id"))
                .and_then(|id| id.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| {
            SubmitError::InvalidResponse(format!(
                "entry {} ('{}') succeeded without a resource id",
                index, request.correlation_key
            ))
        })?;

    Ok(EntryOutcome::Created {
        key,
        id: ServerId::new(id),
    })
}

fn rejection_message(response: &BundleEntryResponse) -> String {
    response
        .outcome
        .clone()
        .and_then(|outcome| serde_json::from_value::<OperationOutcome>(outcome).ok())
        .and_then(|outcome| outcome.summary())
        .unwrap_or_else(|| response.status.clone())
}

/// Extract the logical id from `Location/<id>`, `Location/<id>/_history/<v>` or an
/// absolute URL ending in either.
fn id_from_location(location: &str, resource_type: &str) -> Option<String> {
    let path = location.split_once('?').map_or(location, |(p, _)| p);
    let mut parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(history) = parts.iter().position(|p| *p == "_history") {
        parts.truncate(history);
    }
    match parts.as_slice() {
        [.., rt, id] if *rt == resource_type => Some(id.to_string()),
        _ => None,
    }
}
