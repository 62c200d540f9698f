//! Completion webhook
//!
//! Posts a summary of each request that reaches a terminal status. Delivery
//! is best-effort: failures are logged and never touch the request.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use text2iac_common::{ArtifactKind, InfrastructureRequest, RequestStatus};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub request_id: String,
    pub status: RequestStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requestor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<ArtifactKind, String>>,
    /// Chat-friendly summary line
    pub text: String,
}

impl WebhookPayload {
    pub fn from_request(request: &InfrastructureRequest) -> Self {
        let text = match request.status {
            RequestStatus::Completed => format!(
                "Infrastructure request {} completed: {}",
                request.id, request.message
            ),
            RequestStatus::Failed => {
                format!("Infrastructure request {} failed: {}", request.id, request.message)
            }
            status => format!("Infrastructure request {} is {}", request.id, status),
        };

        Self {
            request_id: request.id.clone(),
            status: request.status,
            message: request.message.clone(),
            requestor: request.requestor.clone(),
            artifacts: request.artifacts.clone(),
            text,
        }
    }
}

#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            http_client,
        }
    }

    /// Send webhook notification
    pub async fn notify(&self, request: &InfrastructureRequest) {
        let payload = WebhookPayload::from_request(request);

        match self.http_client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Webhook sent for request: {}", request.id);
                } else {
                    warn!(
                        "Webhook returned error status {} for request: {}",
                        response.status(),
                        request.id
                    );
                }
            }
            Err(e) => {
                warn!("Failed to send webhook for request {}: {}", request.id, e);
            }
        }
    }
}
