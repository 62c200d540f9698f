//! Shared fakes for the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use iac_generator::TemplateGenerator;
use request_service::executor::{ExecutionOptions, ExecutionResult, ExecutionStatus};
use request_service::{
    Deployer, LlmError, MemoryCache, MemoryStore, Orchestrator, OrchestratorParts,
    RequirementAnalyzer, TextGenerator,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use text2iac_common::{DeployedResource, InfrastructureRequest, Result};

pub const NODE_API_REPLY: &str = r#"Sure, here is the analysis:
{"components": ["api", "database", "postgresql"], "complexity": "medium",
 "projectName": "node-api", "requirements": ["REST API"], "recommendations": ["Enable backups"]}"#;

/// Text generator with a canned reply and optional delay
pub struct FakeLlm {
    reply: std::result::Result<String, String>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for FakeLlm {
    async fn generate(&self, _prompt: &str) -> std::result::Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(LlmError::Http)
    }
}

/// Deployer that records which artifact sets it was asked to apply
pub struct FakeDeployer {
    pub terraform_ok: bool,
    pub kubernetes_ok: bool,
    pub applied: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeDeployer {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            terraform_ok: true,
            kubernetes_ok: true,
            applied: Mutex::new(Vec::new()),
        })
    }

    pub fn terraform_failing() -> Arc<Self> {
        Arc::new(Self {
            terraform_ok: false,
            kubernetes_ok: true,
            applied: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, tool: &str, files: &BTreeMap<String, String>, ok: bool) -> ExecutionResult {
        self.applied
            .lock()
            .unwrap()
            .push((tool.to_string(), files.keys().cloned().collect()));

        ExecutionResult {
            status: if ok {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failed
            },
            output: if ok {
                format!("{} applied", tool)
            } else {
                format!("Error: {} could not reach provider", tool)
            },
            resources: if ok {
                vec![DeployedResource {
                    resource_type: format!("{}_resource", tool),
                    name: "main".to_string(),
                    id: Some("res-1".to_string()),
                }]
            } else {
                Vec::new()
            },
            work_dir: PathBuf::from(format!("/tmp/{}", tool)),
        }
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn apply_terraform(
        &self,
        files: &BTreeMap<String, String>,
        _options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        Ok(self.record("terraform", files, self.terraform_ok))
    }

    async fn apply_kubernetes(
        &self,
        files: &BTreeMap<String, String>,
        _options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        Ok(self.record("kubectl", files, self.kubernetes_ok))
    }
}

pub struct TestEnv {
    pub orchestrator: Arc<Orchestrator>,
    /// Same store the orchestrator writes to, for out-of-band writes
    pub store: Arc<MemoryStore>,
    pub artifact_dir: TempDir,
}

pub fn orchestrator(llm: Arc<FakeLlm>, deployer: Arc<FakeDeployer>) -> TestEnv {
    let artifact_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let orchestrator = Orchestrator::new(OrchestratorParts {
        store: store.clone(),
        cache: Arc::new(MemoryCache::new(Duration::from_secs(3600))),
        analyzer: RequirementAnalyzer::new(llm),
        generator: TemplateGenerator::default(),
        deployer,
        artifact_dir: artifact_dir.path().to_path_buf(),
        notifier: None,
    });

    TestEnv {
        orchestrator,
        store,
        artifact_dir,
    }
}

/// Poll until the request is terminal, recording every status seen
pub async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    id: &str,
) -> (InfrastructureRequest, Vec<text2iac_common::RequestStatus>) {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

    loop {
        let request = orchestrator.get_status(id).await.unwrap();
        if seen.last() != Some(&request.status) {
            seen.push(request.status);
        }
        if request.is_terminal() {
            return (request, seen);
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "request {} stuck in {}",
            id,
            request.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
