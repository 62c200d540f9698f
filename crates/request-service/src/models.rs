//! API request and response bodies

use serde::{Deserialize, Serialize};
use text2iac_common::{
    Environment, InfrastructureRequest, Priority, RequestOptions, RequestSource, RequestStatus,
};

use crate::orchestrator::Submission;

/// Body of `POST /api/requests`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub description: String,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub requestor: Option<String>,

    /// Template hint
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub options: RequestOptions,
}

impl From<SubmitRequest> for Submission {
    fn from(body: SubmitRequest) -> Self {
        Submission {
            description: body.description,
            environment: body.environment,
            priority: body.priority,
            requestor: body.requestor.filter(|r| !r.trim().is_empty()),
            template: body.template,
            options: body.options,
            source: RequestSource::Api,
        }
    }
}

/// Response to an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: String,
    /// Always `processing`
    pub status: String,
    pub eta: String,
    pub description: String,
    pub environment: Environment,
}

impl SubmitResponse {
    pub fn accepted(request: &InfrastructureRequest) -> Self {
        let eta = if request.options.deploy {
            "5-15 minutes"
        } else {
            "1-2 minutes"
        };

        Self {
            request_id: request.id.clone(),
            status: "processing".to_string(),
            eta: eta.to_string(),
            description: request.description.clone(),
            environment: request.environment,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub request_id: String,
    pub status: RequestStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestorRequestsResponse {
    pub requestor: String,
    pub requests: Vec<InfrastructureRequest>,
}
