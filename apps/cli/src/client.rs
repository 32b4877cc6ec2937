//! FHIR batch client
//!
//! Submits create requests as a single `batch` Bundle POSTed to the server base
//! URL and maps the `batch-response` back to per-location outcomes.

use crate::config::FhirConfig;
use anyhow::Context;
use async_trait::async_trait;
use locimport_core::fhir::{batch_bundle, read_batch_response};
use locimport_core::{BatchSubmitter, CreateRequest, EntryOutcome, SubmitError};
use locimport_models::Bundle;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// Longest response body excerpt carried in an error message.
const ERROR_BODY_LIMIT: usize = 512;

pub struct FhirBatchClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl FhirBatchClient {
    pub fn new(config: &FhirConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("locimport/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BatchSubmitter for FhirBatchClient {
    async fn submit(&self, requests: Vec<CreateRequest>) -> Result<Vec<EntryOutcome>, SubmitError> {
        let bundle = batch_bundle(&requests)?;
        let body = serde_json::to_vec(&bundle)
            .map_err(|e| SubmitError::Transport(format!("Failed to encode batch bundle: {e}")))?;

        let mut request = self
            .http
            .post(&self.base_url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header(ACCEPT, FHIR_JSON)
            .body(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(url = %self.base_url, entries = requests.len(), "POST batch bundle");
        let response = request
            .send()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(SubmitError::Transport(format!(
                "server answered {status}: {text}"
            )));
        }

        let bundle: Bundle = response
            .json()
            .await
            .map_err(|e| SubmitError::InvalidResponse(e.to_string()))?;
        read_batch_response(&bundle, &requests)
    }
}
