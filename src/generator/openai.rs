//! OpenAI Responses API generator
//!
//! Sends the repair request as a single input:
//! ```text
//! POST {api_base}/responses
//! {"model": "gpt-4o-mini", "input": "<repair request>"}
//! ```
//!
//! and concatenates the `output_text` parts of the returned message items.
//!
//! See: https://platform.openai.com/docs/api-reference/responses

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::PatchGenerator;
use crate::config::GeneratorConfig;
use crate::error::RepairError;
use crate::repair::prompt::RepairRequest;

/// Generator backed by an OpenAI-compatible HTTP API
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig, model: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenated `output_text` of all message items.
fn output_text(response: &ResponsesResponse) -> String {
    response
        .output
        .iter()
        .filter(|item| item.kind == "message")
        .flat_map(|item| item.content.iter())
        .filter(|part| part.kind == "output_text")
        .filter_map(|part| part.text.as_deref())
        .collect()
}

#[async_trait]
impl PatchGenerator for OpenAiGenerator {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &RepairRequest) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(RepairError::configuration(format!(
                "Missing {} env var/secret.",
                super::API_KEY_ENV
            ))
            .into());
        };

        let url = format!("{}/responses", self.api_base);
        info!("Requesting patch from {} ({})", self.name(), self.model);
        debug!("Request length: {} bytes", request.as_str().len());

        let payload = json!({
            "model": self.model,
            "input": request.as_str(),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RepairError::service(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RepairError::service(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            warn!("Generation service returned {}", status);
            return Err(RepairError::service(format!("Service returned {status}: {body}")).into());
        }

        let parsed: ResponsesResponse = serde_json::from_str(&body)
            .map_err(|e| RepairError::service(format!("Unexpected response format: {e}")))?;

        let text = output_text(&parsed);
        if text.trim().is_empty() {
            return Err(RepairError::service("Service returned an empty response").into());
        }

        debug!("Response length: {} bytes", text.len());
        // Untrimmed; line endings inside the patch must survive
        Ok(text)
    }
}
