//! Mock generator for testing.
//!
//! Returns predetermined responses and records every request so tests can
//! drive the repair state machine without network access.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::PatchGenerator;
use crate::error::RepairError;
use crate::repair::prompt::RepairRequest;

/// A single scripted response.
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    /// Return the given text.
    Success(String),
    /// Fail as if no credential were configured.
    MissingCredential,
    /// Fail as if the service rejected the call.
    ServiceFailure(String),
}

#[derive(Debug, Clone)]
pub(crate) struct MockGenerator {
    response: MockResponse,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockGenerator {
    pub fn new(response: MockResponse) -> Self {
        Self {
            response,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always answers with `text`.
    pub fn responding(text: &str) -> Self {
        Self::new(MockResponse::Success(text.to_string()))
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PatchGenerator for MockGenerator {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, request: &RepairRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push(request.as_str().to_string());

        match &self.response {
            MockResponse::Success(text) => Ok(text.clone()),
            MockResponse::MissingCredential => {
                Err(RepairError::configuration("Missing OPENAI_API_KEY env var/secret.").into())
            }
            MockResponse::ServiceFailure(msg) => Err(RepairError::service(msg.clone()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::context::FailureTranscript;
    use crate::repair::prompt;

    fn request() -> RepairRequest {
        prompt::build(&FailureTranscript::new("FAILED"), &[], &[])
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let generator = MockGenerator::responding("--- a/x\n+++ b/x");
        assert!(generator.requests().is_empty());

        let text = generator.generate(&request()).await.unwrap();
        assert_eq!(text, "--- a/x\n+++ b/x");
        assert_eq!(generator.requests().len(), 1);
        assert!(generator.requests()[0].contains("FAILED"));
    }

    #[tokio::test]
    async fn test_mock_failures_are_typed() {
        let generator = MockGenerator::new(MockResponse::ServiceFailure("503".to_string()));
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepairError>(),
            Some(RepairError::Service { .. })
        ));

        let generator = MockGenerator::new(MockResponse::MissingCredential);
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepairError>(),
            Some(RepairError::Configuration { .. })
        ));
    }
}
