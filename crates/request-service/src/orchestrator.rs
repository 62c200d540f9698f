//! Request orchestrator
//!
//! Accepts submissions, runs one detached pipeline task per request
//! (analyze, generate, optionally deploy) and owns every status write.
//! Writes go through [`RequestStore::compare_and_set`] so a request that
//! reached a terminal status never moves again.

use crate::analyzer::{AnalysisContext, RequirementAnalyzer};
use crate::cache::StatusCache;
use crate::executor::{Deployer, ExecutionOptions, ExecutionResult};
use crate::notifier::WebhookNotifier;
use crate::storage::{CasOutcome, RequestStats, RequestStore};
use iac_generator::{GeneratedArtifacts, GenerationContext, TemplateGenerator};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use text2iac_common::{
    validate_description, validate_requestor, ArtifactKind, DeployedResource, Environment, Error,
    InfrastructureRequest, Priority, RequestOptions, RequestSource, RequestStatus, Result,
    StatusUpdate,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// A validated-on-submit infrastructure request
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub description: String,
    pub environment: Environment,
    pub priority: Priority,
    pub requestor: Option<String>,
    pub template: Option<String>,
    pub options: RequestOptions,
    pub source: RequestSource,
}

/// Collaborators injected into the orchestrator
pub struct OrchestratorParts {
    pub store: Arc<dyn RequestStore>,
    pub cache: Arc<dyn StatusCache>,
    pub analyzer: RequirementAnalyzer,
    pub generator: TemplateGenerator,
    pub deployer: Arc<dyn Deployer>,
    /// Root for `<request id>/<kind>/<file>` artifact output
    pub artifact_dir: PathBuf,
    pub notifier: Option<WebhookNotifier>,
}

pub struct Orchestrator {
    store: Arc<dyn RequestStore>,
    cache: Arc<dyn StatusCache>,
    analyzer: RequirementAnalyzer,
    generator: TemplateGenerator,
    deployer: Arc<dyn Deployer>,
    artifact_dir: PathBuf,
    notifier: Option<WebhookNotifier>,
    updates: broadcast::Sender<StatusUpdate>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

fn storage_error(e: anyhow::Error) -> Error {
    Error::Storage(format!("{:#}", e))
}

/// Run `fut` unless `token` fires first
async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Arc::new(Self {
            store: parts.store,
            cache: parts.cache,
            analyzer: parts.analyzer,
            generator: parts.generator,
            deployer: parts.deployer,
            artifact_dir: parts.artifact_dir,
            notifier: parts.notifier,
            updates,
            in_flight: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Stream of every applied status change
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    /// Validate, persist and start processing a request.
    ///
    /// Returns as soon as the pending record is stored.
    pub async fn submit(self: &Arc<Self>, submission: Submission) -> Result<InfrastructureRequest> {
        let description = submission.description.trim().to_string();
        validate_description(&description)?;
        if let Some(requestor) = &submission.requestor {
            validate_requestor(requestor)?;
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::Unavailable("service is shutting down".to_string()));
        }

        let mut request =
            InfrastructureRequest::new(description, submission.environment, submission.priority);
        request.requestor = submission.requestor;
        request.template = submission.template.filter(|t| !t.trim().is_empty());
        request.options = submission.options;
        request.source = submission.source;

        self.store.insert(&request).await.map_err(storage_error)?;
        self.after_write(&request).await;

        info!(
            "Accepted request {} ({}, {:?} source)",
            request.id, request.environment, request.source
        );

        let token = self.shutdown.child_token();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.id.clone(), token.clone());

        self.spawn_pipeline(request.clone(), token);
        Ok(request)
    }

    fn spawn_pipeline(self: &Arc<Self>, request: InfrastructureRequest, token: CancellationToken) {
        let this = Arc::clone(self);
        let id = request.id.clone();

        self.tracker.spawn(async move {
            // Inner task so a panic surfaces as a JoinError here
            let pipeline = tokio::spawn({
                let this = Arc::clone(&this);
                async move { this.run_pipeline(request, token).await }
            });

            if let Err(e) = pipeline.await {
                error!("Pipeline task for request {} aborted: {}", id, e);
                let err = Error::Other(anyhow::anyhow!("pipeline task aborted: {}", e));
                this.fail_by_id(&id, err).await;
            }

            this.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });
    }

    async fn run_pipeline(&self, mut request: InfrastructureRequest, token: CancellationToken) {
        match self.pipeline(&mut request, &token).await {
            Ok(()) => info!("Request {} finished: {}", request.id, request.status),
            Err(Error::Terminal { status, .. }) => {
                debug!(
                    "Request {} already {}, discarding late stage result",
                    request.id, status
                );
            }
            Err(Error::Cancelled) => {
                // Cancelled by the user (record already written) or by shutdown
                let result = self
                    .advance(
                        &mut request,
                        RequestStatus::Cancelled,
                        "Cancelled: service shutting down",
                        |_| {},
                    )
                    .await;
                match result {
                    Ok(()) => info!("Request {} cancelled by shutdown", request.id),
                    Err(Error::Terminal { .. }) => debug!("Request {} cancelled", request.id),
                    Err(e) => error!("Failed to record cancellation of {}: {}", request.id, e),
                }
            }
            Err(e) => {
                error!("Request {} failed: {}", request.id, e);
                self.fail(&mut request, e).await;
            }
        }
    }

    async fn pipeline(
        &self,
        request: &mut InfrastructureRequest,
        token: &CancellationToken,
    ) -> Result<()> {
        self.advance(request, RequestStatus::Analyzing, "Analyzing requirements", |_| {})
            .await?;

        let analysis_ctx = AnalysisContext {
            environment: request.environment,
            cloud_provider: request.options.cloud_provider,
            template_hint: request.template.clone(),
        };
        let analysis = cancellable(
            token,
            self.analyzer.analyze(&request.description, &analysis_ctx),
        )
        .await?;

        let message = format!(
            "Generating templates for {} components",
            analysis.components.len()
        );
        self.advance(request, RequestStatus::Generating, message, |r| {
            r.analysis = Some(analysis.clone())
        })
        .await?;

        let generation_ctx = GenerationContext {
            environment: request.environment,
            options: request.options.clone(),
            template_hint: request.template.clone(),
        };
        let generated = self.generator.generate(&analysis, &generation_ctx)?;
        for shadowed in &generated.shadowed {
            warn!(
                "Request {}: template {} shadowed by {} for {}/{}",
                request.id, shadowed.template, shadowed.shadowed_by, shadowed.kind, shadowed.filename
            );
        }

        let locations = generated.write_to(&self.artifact_dir.join(&request.id))?;
        let artifacts: BTreeMap<ArtifactKind, String> = locations
            .into_iter()
            .map(|(kind, dir)| (kind, dir.display().to_string()))
            .collect();
        let cost = generated.estimated_monthly_cost;

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !request.options.deploy {
            let message = format!(
                "Generated {} artifact kinds (estimated ${:.2}/month)",
                artifacts.len(),
                cost
            );
            return self
                .advance(request, RequestStatus::Completed, message, |r| {
                    r.artifacts = Some(artifacts);
                    r.estimated_monthly_cost = Some(cost);
                })
                .await;
        }

        self.advance(request, RequestStatus::Deploying, "Deploying infrastructure", |_| {})
            .await?;

        let resources = self.deploy(request, &generated, token).await?;
        let message = format!(
            "Deployed {} resources (estimated ${:.2}/month)",
            resources.len(),
            cost
        );
        self.advance(request, RequestStatus::Completed, message, |r| {
            r.artifacts = Some(artifacts);
            r.estimated_monthly_cost = Some(cost);
            r.resources = resources;
        })
        .await
    }

    /// Terraform first, then Kubernetes. Either failing fails the request.
    async fn deploy(
        &self,
        request: &InfrastructureRequest,
        generated: &GeneratedArtifacts,
        token: &CancellationToken,
    ) -> Result<Vec<DeployedResource>> {
        let options = ExecutionOptions {
            request_id: request.id.clone(),
            environment: request.environment.to_string(),
            region: request.options.region().to_string(),
        };
        let mut resources = Vec::new();

        if let Some(files) = generated.get(ArtifactKind::Terraform) {
            let result =
                cancellable(token, self.deployer.apply_terraform(files, &options)).await?;
            resources.extend(Self::check_execution("terraform", result)?);
        }

        if let Some(files) = generated.get(ArtifactKind::Kubernetes) {
            let result =
                cancellable(token, self.deployer.apply_kubernetes(files, &options)).await?;
            resources.extend(Self::check_execution("kubectl", result)?);
        }

        if generated.get(ArtifactKind::Terraform).is_none()
            && generated.get(ArtifactKind::Kubernetes).is_none()
        {
            info!("Request {}: no terraform or kubernetes artifacts to apply", request.id);
        }

        Ok(resources)
    }

    fn check_execution(tool: &str, result: ExecutionResult) -> Result<Vec<DeployedResource>> {
        if result.is_success() {
            return Ok(result.resources);
        }
        Err(Error::execution(
            format!("{} apply failed in {}", tool, result.work_dir.display()),
            Some(result.output),
        ))
    }

    /// Move `request` to `next` with a compare-and-set on its current status
    async fn advance(
        &self,
        request: &mut InfrastructureRequest,
        next: RequestStatus,
        message: impl Into<String>,
        update: impl FnOnce(&mut InfrastructureRequest),
    ) -> Result<()> {
        let expected = request.status;
        let mut updated = request.clone();
        updated.transition(next, message)?;
        update(&mut updated);

        match self
            .store
            .compare_and_set(expected, &updated)
            .await
            .map_err(storage_error)?
        {
            CasOutcome::Applied => {
                *request = updated;
                self.after_write(request).await;
                Ok(())
            }
            CasOutcome::Conflict(current) if current.is_terminal() => Err(Error::Terminal {
                id: request.id.clone(),
                status: current.to_string(),
            }),
            CasOutcome::Conflict(current) => Err(Error::Storage(format!(
                "request {} moved to {} while expected {}",
                request.id, current, expected
            ))),
            CasOutcome::Missing => Err(Error::NotFound(request.id.clone())),
        }
    }

    async fn fail(&self, request: &mut InfrastructureRequest, err: Error) {
        let output = match &err {
            Error::Execution { output, .. } => output.clone(),
            _ => None,
        };

        let result = self
            .advance(request, RequestStatus::Failed, err.to_string(), |r| {
                r.artifacts = None;
                r.deploy_output = output;
            })
            .await;

        match result {
            Ok(()) => {}
            Err(Error::Terminal { status, .. }) => {
                debug!("Request {} already {}, not marking failed", request.id, status)
            }
            Err(e) => error!("Failed to record failure of {}: {}", request.id, e),
        }
    }

    async fn fail_by_id(&self, id: &str, err: Error) {
        match self.store.get(id).await {
            Ok(Some(mut request)) if !request.is_terminal() => self.fail(&mut request, err).await,
            Ok(_) => {}
            Err(e) => error!("Failed to load request {} after task abort: {:#}", id, e),
        }
    }

    /// Cache, broadcast and (for terminal records) webhook
    async fn after_write(&self, request: &InfrastructureRequest) {
        debug!("Request {} -> {}: {}", request.id, request.status, request.message);

        if let Err(e) = self.cache.put(request).await {
            warn!("Failed to cache request {}: {:#}", request.id, e);
        }

        // No subscribers is fine
        let _ = self.updates.send(request.status_update());

        if request.is_terminal() {
            if let Some(notifier) = &self.notifier {
                let notifier = notifier.clone();
                let request = request.clone();
                self.tracker
                    .spawn(async move { notifier.notify(&request).await });
            }
        }
    }

    /// Current record, from the cache when possible
    pub async fn get_status(&self, id: &str) -> Result<InfrastructureRequest> {
        match self.cache.get(id).await {
            Ok(Some(request)) => return Ok(request),
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}: {:#}", id, e),
        }

        let request = self
            .store
            .get(id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let Err(e) = self.cache.put(&request).await {
            warn!("Failed to cache request {}: {:#}", id, e);
        }
        Ok(request)
    }

    /// Mark a request cancelled and interrupt its pipeline
    pub async fn cancel(&self, id: &str) -> Result<InfrastructureRequest> {
        loop {
            let current = self
                .store
                .get(id)
                .await
                .map_err(storage_error)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            if current.is_terminal() {
                return Err(Error::Terminal {
                    id: id.to_string(),
                    status: current.status.to_string(),
                });
            }

            let mut updated = current.clone();
            updated.transition(RequestStatus::Cancelled, "Cancelled by user")?;

            match self
                .store
                .compare_and_set(current.status, &updated)
                .await
                .map_err(storage_error)?
            {
                CasOutcome::Applied => {
                    info!("Request {} cancelled", id);
                    self.after_write(&updated).await;

                    let token = self
                        .in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(id)
                        .cloned();
                    if let Some(token) = token {
                        token.cancel();
                    }
                    return Ok(updated);
                }
                // The pipeline moved on; re-read and try again
                CasOutcome::Conflict(_) => continue,
                CasOutcome::Missing => return Err(Error::NotFound(id.to_string())),
            }
        }
    }

    pub async fn list_by_requestor(&self, requestor: &str) -> Result<Vec<InfrastructureRequest>> {
        self.store
            .list_by_requestor(requestor)
            .await
            .map_err(storage_error)
    }

    pub async fn stats(&self) -> Result<RequestStats> {
        self.store.stats().await.map_err(storage_error)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await.map_err(storage_error)
    }

    /// Number of pipelines still running
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel every running pipeline and wait for the tasks to finish
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator ({} in flight)", self.in_flight());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
