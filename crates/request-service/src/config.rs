//! Configuration management for the Request Service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::analyzer::{LlmConfig, LlmProvider};
use crate::executor::ExecutorConfig;

/// Where request records and the status cache live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    /// Process memory, lost on restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StorageBackend::Redis),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown STORAGE_BACKEND: {}", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    pub storage_backend: StorageBackend,
    pub redis_url: String,

    /// Lifetime of status cache entries
    pub cache_ttl: Duration,

    /// Root for generated artifacts
    pub artifact_dir: PathBuf,

    /// Root for deployment working directories
    pub work_dir: PathBuf,

    /// Extra template catalog files
    pub templates_dir: Option<PathBuf>,

    pub llm_provider: LlmProvider,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_timeout: Duration,

    pub terraform_bin: String,
    pub kubectl_bin: String,
    pub command_timeout: Duration,
    pub max_output_bytes: usize,

    pub notify_webhook_url: Option<String>,
}

fn parse_var<T>(value: Option<String>, default: &str, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid {} ({}): {}", name, raw, e))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            api_host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: parse_var(var("API_PORT"), "3001", "API_PORT")?,

            storage_backend: var("STORAGE_BACKEND")
                .unwrap_or_else(|| "redis".to_string())
                .parse()?,
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            cache_ttl: Duration::from_secs(parse_var(
                var("CACHE_TTL_SECS"),
                "3600",
                "CACHE_TTL_SECS",
            )?),

            artifact_dir: var("ARTIFACT_DIR")
                .unwrap_or_else(|| "./output/artifacts".to_string())
                .into(),
            work_dir: var("WORK_DIR")
                .unwrap_or_else(|| "./output/deployments".to_string())
                .into(),
            templates_dir: non_empty("TEMPLATES_DIR").map(PathBuf::from),

            llm_provider: var("LLM_PROVIDER")
                .unwrap_or_else(|| "ollama".to_string())
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid LLM_PROVIDER")?,
            llm_url: var("LLM_URL")
                .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string()),
            llm_model: var("LLM_MODEL").unwrap_or_else(|| "llama3".to_string()),
            llm_api_key: non_empty("LLM_API_KEY"),
            llm_timeout: Duration::from_secs(parse_var(
                var("LLM_TIMEOUT_SECS"),
                "60",
                "LLM_TIMEOUT_SECS",
            )?),

            terraform_bin: var("TERRAFORM_BIN").unwrap_or_else(|| "terraform".to_string()),
            kubectl_bin: var("KUBECTL_BIN").unwrap_or_else(|| "kubectl".to_string()),
            command_timeout: Duration::from_secs(parse_var(
                var("COMMAND_TIMEOUT_SECS"),
                "600",
                "COMMAND_TIMEOUT_SECS",
            )?),
            max_output_bytes: parse_var(var("MAX_OUTPUT_BYTES"), "1048576", "MAX_OUTPUT_BYTES")?,

            notify_webhook_url: non_empty("NOTIFY_WEBHOOK_URL"),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }
        if self.cache_ttl.is_zero() {
            anyhow::bail!("CACHE_TTL_SECS must be greater than 0");
        }
        if self.llm_timeout.is_zero() {
            anyhow::bail!("LLM_TIMEOUT_SECS must be greater than 0");
        }
        if self.command_timeout.is_zero() {
            anyhow::bail!("COMMAND_TIMEOUT_SECS must be greater than 0");
        }
        if self.max_output_bytes == 0 {
            anyhow::bail!("MAX_OUTPUT_BYTES must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.llm_provider,
            url: self.llm_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            timeout: self.llm_timeout,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            terraform_bin: self.terraform_bin.clone(),
            kubectl_bin: self.kubectl_bin.clone(),
            work_root: self.work_dir.clone(),
            timeout: self.command_timeout,
            max_output_bytes: self.max_output_bytes,
        }
    }

    /// Ensure output directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.artifact_dir, &self.work_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        if let Some(templates_dir) = &self.templates_dir {
            if !templates_dir.is_dir() {
                anyhow::bail!(
                    "Templates directory does not exist: {}",
                    templates_dir.display()
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[]).expect("Failed to load config");

        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 3001);
        assert_eq!(config.storage_backend, StorageBackend::Redis);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.artifact_dir, PathBuf::from("./output/artifacts"));
        assert_eq!(config.llm_provider, LlmProvider::Ollama);
        assert_eq!(config.llm_model, "llama3");
        assert_eq!(config.command_timeout, Duration::from_secs(600));
        assert_eq!(config.max_output_bytes, 1_048_576);
        assert!(config.templates_dir.is_none());
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let config = load(&[
            ("API_PORT", "9000"),
            ("STORAGE_BACKEND", "memory"),
            ("LLM_PROVIDER", "openai"),
            ("LLM_API_KEY", "sk-test"),
            ("NOTIFY_WEBHOOK_URL", ""),
        ])
        .unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.llm_provider, LlmProvider::OpenAi);
        assert_eq!(config.llm_api_key.as_deref(), Some("sk-test"));
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn test_api_address() {
        let config = load(&[("API_HOST", "127.0.0.1"), ("API_PORT", "9000")]).unwrap();
        assert_eq!(config.api_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = load(&[("API_PORT", "0")]).unwrap_err();
        assert!(err.to_string().contains("API_PORT must be greater than 0"));

        let err = load(&[("CACHE_TTL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("CACHE_TTL_SECS"));

        let err = load(&[("MAX_OUTPUT_BYTES", "0")]).unwrap_err();
        assert!(err.to_string().contains("MAX_OUTPUT_BYTES"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("API_PORT", "eighty")]).is_err());
        assert!(load(&[("STORAGE_BACKEND", "postgres")]).is_err());
        assert!(load(&[("LLM_PROVIDER", "bard")]).is_err());
    }
}
