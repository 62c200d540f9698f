//! Infrastructure request record and its state machine

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Shortest accepted description, in characters
pub const MIN_DESCRIPTION_CHARS: usize = 10;

/// Longest accepted description, in characters
pub const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Target environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::Validation(format!("unknown environment: {}", other))),
        }
    }
}

/// Request priority. Informational only, it does not affect scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(Error::Validation(format!("unknown priority: {}", other))),
        }
    }
}

/// Pipeline status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Accepted, pipeline not started yet
    Pending,
    /// Waiting on the requirement analyzer
    Analyzing,
    /// Selecting and rendering templates
    Generating,
    /// Applying generated artifacts
    Deploying,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Analyzing => "analyzing",
            RequestStatus::Generating => "generating",
            RequestStatus::Deploying => "deploying",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// `completed`, `failed` and `cancelled` accept no further writes
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Cancelled) => true,
            (Pending, Analyzing) => true,
            (Analyzing, Generating) | (Analyzing, Failed) => true,
            (Generating, Deploying) | (Generating, Completed) | (Generating, Failed) => true,
            (Deploying, Completed) | (Deploying, Failed) => true,
            // Errors raised before analysis starts (e.g. the task panicking early)
            (Pending, Failed) => true,
            _ => false,
        }
    }

    /// Whether a snapshot in `self` may be replaced by one in `next`:
    /// the same status, or a legal move forward
    pub fn is_superseded_by(&self, next: RequestStatus) -> bool {
        *self == next || self.can_transition_to(next)
    }

    pub fn all() -> [RequestStatus; 7] {
        [
            RequestStatus::Pending,
            RequestStatus::Analyzing,
            RequestStatus::Generating,
            RequestStatus::Deploying,
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
        ]
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complexity tier reported by the analyzer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Structured interpretation of a free-text description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub components: Vec<String>,

    #[serde(default)]
    pub complexity: Complexity,

    #[serde(default = "default_project_name")]
    pub project_name: String,

    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default)]
    pub recommendations: Vec<String>,
}

fn default_project_name() -> String {
    "my-infrastructure".to_string()
}

impl Analysis {
    /// Analysis used when the model's answer cannot be interpreted
    pub fn fallback() -> Self {
        Self {
            components: vec!["basic-infrastructure".to_string()],
            complexity: Complexity::Medium,
            project_name: default_project_name(),
            requirements: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Kind of generated infrastructure artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Terraform,
    Kubernetes,
    DockerCompose,
    Monitoring,
    Ci,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Terraform => "terraform",
            ArtifactKind::Kubernetes => "kubernetes",
            ArtifactKind::DockerCompose => "dockerCompose",
            ArtifactKind::Monitoring => "monitoring",
            ArtifactKind::Ci => "ci",
        }
    }

    /// Directory name used when writing artifacts of this kind to disk
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Terraform => "terraform",
            ArtifactKind::Kubernetes => "kubernetes",
            ArtifactKind::DockerCompose => "docker-compose",
            ArtifactKind::Monitoring => "monitoring",
            ArtifactKind::Ci => "ci",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloud provider the generated templates target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[default]
    Aws,
    Azure,
    Gcp,
    Local,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Local => "local",
        }
    }

    /// Region used when the submission does not name one
    pub fn default_region(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "us-east-1",
            CloudProvider::Azure => "eastus",
            CloudProvider::Gcp => "us-central1",
            CloudProvider::Local => "local",
        }
    }
}

/// Generation and deployment options supplied with a submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    pub include_monitoring: bool,

    #[serde(rename = "includeCI")]
    pub include_ci: bool,

    pub cloud_provider: CloudProvider,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Apply the generated artifacts after generation
    pub deploy: bool,
}

impl RequestOptions {
    pub fn region(&self) -> &str {
        self.region
            .as_deref()
            .unwrap_or_else(|| self.cloud_provider.default_region())
    }
}

/// Channel a request arrived through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    #[default]
    Api,
    Email,
}

/// A resource reported by the deployment tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The central request record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureRequest {
    pub id: String,
    pub description: String,
    pub environment: Environment,
    pub priority: Priority,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requestor: Option<String>,

    /// Optional template hint from the submitter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default)]
    pub options: RequestOptions,

    #[serde(default)]
    pub source: RequestSource,

    pub status: RequestStatus,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,

    /// Artifact kind -> storage location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<ArtifactKind, String>>,

    /// Rough monthly cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<DeployedResource>,

    /// Tool output captured when deployment fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_output: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InfrastructureRequest {
    /// Create a new pending request with a fresh id
    pub fn new(description: String, environment: Environment, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            description,
            environment,
            priority,
            requestor: None,
            template: None,
            options: RequestOptions::default(),
            source: RequestSource::Api,
            status: RequestStatus::Pending,
            message: "Request accepted".to_string(),
            analysis: None,
            artifacts: None,
            estimated_monthly_cost: None,
            resources: Vec::new(),
            deploy_output: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, refreshing `message` and `updated_at`
    pub fn transition(&mut self, next: RequestStatus, message: impl Into<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            if self.status.is_terminal() {
                return Err(Error::Terminal {
                    id: self.id.clone(),
                    status: self.status.to_string(),
                });
            }
            return Err(Error::Validation(format!(
                "invalid transition {} -> {} for request {}",
                self.status, next, self.id
            )));
        }

        self.status = next;
        self.message = message.into();
        self.updated_at = Utc::now().max(self.created_at);
        Ok(())
    }

    /// Snapshot of the current status for push subscribers
    pub fn status_update(&self) -> StatusUpdate {
        StatusUpdate {
            request_id: self.id.clone(),
            status: self.status,
            message: self.message.clone(),
            timestamp: self.updated_at,
        }
    }
}

/// Status change broadcast to push subscribers and webhooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub request_id: String,
    pub status: RequestStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Check the description length bounds
pub fn validate_description(description: &str) -> Result<()> {
    let len = description.chars().count();
    if len < MIN_DESCRIPTION_CHARS {
        return Err(Error::Validation(format!(
            "description must be at least {} characters (got {})",
            MIN_DESCRIPTION_CHARS, len
        )));
    }
    if len > MAX_DESCRIPTION_CHARS {
        return Err(Error::Validation(format!(
            "description must be at most {} characters (got {})",
            MAX_DESCRIPTION_CHARS, len
        )));
    }
    Ok(())
}

/// Check that a requestor looks like an email address
pub fn validate_requestor(requestor: &str) -> Result<()> {
    let valid = match requestor.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !requestor.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "requestor must be an email address: {}",
            requestor
        )))
    }
}
