//! Deployment executor
//!
//! Applies generated Terraform code and Kubernetes manifests by running the
//! external CLIs as subprocesses. Every invocation gets a fresh working
//! directory which is left on disk afterwards.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use text2iac_common::{DeployedResource, Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TRUNCATED_MARKER: &str = "\n[output truncated]\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Transcript of every command run, stdout and stderr included
    pub output: String,
    pub resources: Vec<DeployedResource>,
    pub work_dir: PathBuf,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Per-invocation options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub request_id: String,
    pub environment: String,
    pub region: String,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// `terraform init`, `plan` and `apply` over the given files
    async fn apply_terraform(
        &self,
        files: &BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult>;

    /// `kubectl apply` over the given manifests
    async fn apply_kubernetes(
        &self,
        files: &BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult>;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub terraform_bin: String,
    pub kubectl_bin: String,
    /// Parent of the per-invocation working directories
    pub work_root: PathBuf,
    /// Limit for a single command
    pub timeout: Duration,
    /// Cap on captured bytes per stream per command
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            terraform_bin: "terraform".to_string(),
            kubectl_bin: "kubectl".to_string(),
            work_root: PathBuf::from("./output/deployments"),
            timeout: Duration::from_secs(600),
            max_output_bytes: 1024 * 1024,
        }
    }
}

struct CommandOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Runs the real `terraform` and `kubectl` binaries
pub struct CommandDeployer {
    config: ExecutorConfig,
}

impl CommandDeployer {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn prepare_work_dir(
        &self,
        kind: &str,
        files: &BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> Result<PathBuf> {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}-{}", options.request_id, kind, &suffix[..8]);
        let dir = self.config.work_root.join(name);

        std::fs::create_dir_all(&dir)?;
        for (filename, content) in files {
            std::fs::write(dir.join(filename), content)?;
        }

        debug!("Prepared {} work dir {}", kind, dir.display());
        Ok(dir)
    }

    async fn run(&self, program: &str, args: &[&str], dir: &Path) -> Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::execution(format!("failed to start {}: {}", program, e), None))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.max_output_bytes;

        let collect = async {
            let (out, err) = tokio::join!(read_bounded(stdout, limit), read_bounded(stderr, limit));
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out?, err?))
        };

        match timeout(self.config.timeout, collect).await {
            Ok(Ok((status, stdout, stderr))) => Ok(CommandOutput {
                success: status.success(),
                code: status.code(),
                stdout,
                stderr,
            }),
            Ok(Err(e)) => Err(Error::execution(
                format!("{} failed while running: {}", program, e),
                None,
            )),
            Err(_) => Err(Error::execution(
                format!(
                    "{} timed out after {} seconds",
                    program,
                    self.config.timeout.as_secs_f64()
                ),
                None,
            )),
        }
    }

    /// Run the steps in order, stopping at the first failure
    async fn run_steps(
        &self,
        program: &str,
        steps: &[&[&str]],
        dir: &Path,
        transcript: &mut String,
    ) -> bool {
        for args in steps {
            transcript.push_str(&format!("$ {} {}\n", program, args.join(" ")));

            match self.run(program, args, dir).await {
                Ok(out) => {
                    transcript.push_str(&out.stdout);
                    transcript.push_str(&out.stderr);
                    if !out.success {
                        transcript.push_str(&format!(
                            "\n{} exited with status {}\n",
                            program,
                            out.code
                                .map(|c| c.to_string())
                                .unwrap_or_else(|| "signal".to_string())
                        ));
                        return false;
                    }
                }
                Err(e) => {
                    transcript.push_str(&format!("{}\n", e));
                    return false;
                }
            }
        }
        true
    }

    fn failed(output: String, work_dir: PathBuf) -> ExecutionResult {
        ExecutionResult {
            status: ExecutionStatus::Failed,
            output,
            resources: Vec::new(),
            work_dir,
        }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn apply_terraform(
        &self,
        files: &BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let dir = self.prepare_work_dir("terraform", files, options)?;
        let bin = self.config.terraform_bin.as_str();
        let mut transcript = String::new();

        info!(
            "Applying terraform for request {} ({} in {})",
            options.request_id, options.environment, options.region
        );

        let steps: &[&[&str]] = &[
            &["init", "-input=false", "-no-color"],
            &["plan", "-input=false", "-no-color", "-out=tfplan"],
            &["apply", "-input=false", "-no-color", "-auto-approve", "tfplan"],
        ];
        if !self.run_steps(bin, steps, &dir, &mut transcript).await {
            warn!("Terraform failed for request {}", options.request_id);
            return Ok(Self::failed(transcript, dir));
        }

        let resources = match self.run(bin, &["show", "-json"], &dir).await {
            Ok(out) if out.success => parse_terraform_state(&out.stdout).unwrap_or_else(|| {
                warn!("Could not parse terraform state for {}", options.request_id);
                Vec::new()
            }),
            Ok(out) => {
                warn!("terraform show failed: {}", out.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                warn!("terraform show failed: {}", e);
                Vec::new()
            }
        };

        info!(
            "Terraform applied for request {} ({} resources)",
            options.request_id,
            resources.len()
        );

        Ok(ExecutionResult {
            status: ExecutionStatus::Success,
            output: transcript,
            resources,
            work_dir: dir,
        })
    }

    async fn apply_kubernetes(
        &self,
        files: &BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let dir = self.prepare_work_dir("kubernetes", files, options)?;
        let bin = self.config.kubectl_bin.as_str();
        let dir_arg = dir.to_string_lossy().into_owned();
        let mut transcript = String::new();

        info!("Applying kubernetes manifests for request {}", options.request_id);

        let args = ["apply", "-f", dir_arg.as_str(), "-o", "json"];
        transcript.push_str(&format!("$ {} {}\n", bin, args.join(" ")));

        let out = match self.run(bin, &args, &dir).await {
            Ok(out) => out,
            Err(e) => {
                transcript.push_str(&format!("{}\n", e));
                return Ok(Self::failed(transcript, dir));
            }
        };

        transcript.push_str(&out.stdout);
        transcript.push_str(&out.stderr);
        if !out.success {
            warn!("kubectl apply failed for request {}", options.request_id);
            return Ok(Self::failed(transcript, dir));
        }

        let resources = parse_kubectl_json(&out.stdout)
            .unwrap_or_else(|| parse_kubectl_text(&out.stdout));

        Ok(ExecutionResult {
            status: ExecutionStatus::Success,
            output: transcript,
            resources,
            work_dir: dir,
        })
    }
}

/// Read at most `limit` bytes, then drain the rest so the child never blocks
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };

    let mut buf = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if dropped > 0 {
        text.push_str(TRUNCATED_MARKER);
    }
    Ok(text)
}

/// Flatten `terraform show -json` into `{type, name, id}` entries
pub fn parse_terraform_state(json: &str) -> Option<Vec<DeployedResource>> {
    let value: Value = serde_json::from_str(json).ok()?;
    let mut resources = Vec::new();

    // A state with nothing applied has no `values`
    if let Some(root) = value.get("values").and_then(|v| v.get("root_module")) {
        collect_module_resources(root, &mut resources);
    }
    Some(resources)
}

fn collect_module_resources(module: &Value, out: &mut Vec<DeployedResource>) {
    if let Some(resources) = module.get("resources").and_then(Value::as_array) {
        for resource in resources {
            let (Some(kind), Some(name)) = (
                resource.get("type").and_then(Value::as_str),
                resource.get("name").and_then(Value::as_str),
            ) else {
                continue;
            };
            out.push(DeployedResource {
                resource_type: kind.to_string(),
                name: name.to_string(),
                id: resource
                    .get("values")
                    .and_then(|v| v.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    if let Some(children) = module.get("child_modules").and_then(Value::as_array) {
        for child in children {
            collect_module_resources(child, out);
        }
    }
}

/// Parse `kubectl apply -o json` output: a single object or a `List`
pub fn parse_kubectl_json(json: &str) -> Option<Vec<DeployedResource>> {
    let value: Value = serde_json::from_str(json.trim()).ok()?;

    let objects = match value.get("items").and_then(Value::as_array) {
        Some(items) => items.iter().collect::<Vec<_>>(),
        None => vec![&value],
    };

    let resources = objects
        .into_iter()
        .filter_map(|object| {
            let kind = object.get("kind").and_then(Value::as_str)?;
            let metadata = object.get("metadata")?;
            Some(DeployedResource {
                resource_type: kind.to_lowercase(),
                name: metadata.get("name").and_then(Value::as_str)?.to_string(),
                id: metadata
                    .get("uid")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect();
    Some(resources)
}

fn kubectl_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^([\w.\-]+)/([\w.\-]+) (created|configured|unchanged)")
            .expect("valid kubectl line regex")
    })
}

/// Text fallback for `kind/name created|configured|unchanged` lines
pub fn parse_kubectl_text(output: &str) -> Vec<DeployedResource> {
    kubectl_line_regex()
        .captures_iter(output)
        .map(|caps| DeployedResource {
            resource_type: caps[1].to_string(),
            name: caps[2].to_string(),
            id: None,
        })
        .collect()
}
