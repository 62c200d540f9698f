//! Requirement analyzer
//!
//! Asks a text-generation service to turn a free-text description into a
//! structured [`Analysis`]. Only a failed call fails the request; replies
//! that cannot be parsed fall back to [`Analysis::fallback`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use text2iac_common::{Analysis, CloudProvider, Complexity, Environment, Error, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Text-generation client errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Prompt in, raw text out
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError>;
}

/// Wire format spoken by the text-generation endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// `/api/generate` style: `{model, prompt, stream}` -> `{response}`
    #[default]
    Ollama,
    /// Chat completions: `{model, messages}` -> `{choices[0].message.content}`
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown LLM provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            url: "http://localhost:11434/api/generate".to_string(),
            model: "llama3".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP client for Ollama or OpenAI-compatible endpoints
pub struct HttpTextGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpTextGenerator {
    pub fn new(config: LlmConfig) -> std::result::Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn headers(&self) -> std::result::Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| LlmError::Http(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    fn body(&self, prompt: &str) -> std::result::Result<Value, LlmError> {
        let body = match self.config.provider {
            LlmProvider::Ollama => serde_json::to_value(OllamaRequest {
                model: &self.config.model,
                prompt,
                stream: false,
                format: "json",
            }),
            LlmProvider::OpenAi => serde_json::to_value(ChatRequest {
                model: &self.config.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                temperature: 0.1,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            }),
        };
        body.map_err(|e| LlmError::Serialization(e.to_string()))
    }

    fn content(&self, text: &str) -> std::result::Result<String, LlmError> {
        match self.config.provider {
            LlmProvider::Ollama => {
                let parsed: OllamaResponse = serde_json::from_str(text)
                    .map_err(|e| LlmError::Serialization(e.to_string()))?;
                Ok(parsed.response)
            }
            LlmProvider::OpenAi => {
                let parsed: ChatResponse = serde_json::from_str(text)
                    .map_err(|e| LlmError::Serialization(e.to_string()))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| LlmError::Response("no choices in response".to_string()))
            }
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: String,
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        debug!("Calling {:?} model {}", self.config.provider, self.config.model);

        let response = self
            .client
            .post(&self.config.url)
            .headers(self.headers()?)
            .json(&self.body(prompt)?)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Response(format!("HTTP {}: {}", status, text)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        self.content(&text)
    }
}

/// Request details that shape the analysis prompt
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub environment: Environment,
    pub cloud_provider: CloudProvider,
    pub template_hint: Option<String>,
}

pub struct RequirementAnalyzer {
    client: Arc<dyn TextGenerator>,
}

impl RequirementAnalyzer {
    pub fn new(client: Arc<dyn TextGenerator>) -> Self {
        Self { client }
    }

    pub async fn analyze(&self, description: &str, ctx: &AnalysisContext) -> Result<Analysis> {
        let prompt = build_prompt(description, ctx);

        let reply = self
            .client
            .generate(&prompt)
            .await
            .map_err(|e| Error::Analysis(e.to_string()))?;

        match parse_analysis(&reply) {
            Some(analysis) => {
                info!(
                    "Analysis: {} components, complexity {:?}",
                    analysis.components.len(),
                    analysis.complexity
                );
                Ok(analysis)
            }
            None => {
                warn!("Unparseable analyzer reply, using fallback analysis");
                debug!("Analyzer reply: {}", reply);
                Ok(Analysis::fallback())
            }
        }
    }
}

fn build_prompt(description: &str, ctx: &AnalysisContext) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are an infrastructure architect. Analyze the infrastructure request below \
         and reply with ONLY one JSON object of this shape:\n",
    );
    prompt.push_str(
        r#"{"components":["database","api"],"complexity":"low|medium|high","projectName":"kebab-case-name","requirements":["..."],"recommendations":["..."]}"#,
    );
    prompt.push_str("\n\nUse short lowercase component names such as: api, web, database, postgresql, cache, redis, storage, kubernetes, monitoring, network.\n");
    prompt.push_str(&format!("\nEnvironment: {}\n", ctx.environment));
    prompt.push_str(&format!("Cloud provider: {}\n", ctx.cloud_provider.as_str()));
    if let Some(hint) = &ctx.template_hint {
        prompt.push_str(&format!("Preferred template: {}\n", hint));
    }
    prompt.push_str("\nRequest:\n");
    prompt.push_str(description);
    prompt.push('\n');
    prompt
}

/// Substring from the first `{` to the last `}`
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Lenient parse of an analyzer reply.
///
/// `None` when no JSON object can be found or `components` is missing or
/// not a list. Other fields fall back to their defaults individually.
pub fn parse_analysis(text: &str) -> Option<Analysis> {
    let value: Value = serde_json::from_str(extract_json_object(text)?).ok()?;

    let components: Vec<String> = value
        .get("components")?
        .as_array()?
        .iter()
        .filter_map(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let complexity = value
        .get("complexity")
        .and_then(Value::as_str)
        .map(|c| match c.trim().to_lowercase().as_str() {
            "low" => Complexity::Low,
            "high" => Complexity::High,
            _ => Complexity::Medium,
        })
        .unwrap_or_default();

    let project_name = value
        .get("projectName")
        .or_else(|| value.get("project_name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Analysis::fallback().project_name);

    Some(Analysis {
        components,
        complexity,
        project_name,
        requirements: string_list(&value, "requirements"),
        recommendations: string_list(&value, "recommendations"),
    })
}

fn string_list(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(std::result::Result<&'static str, &'static str>);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, LlmError> {
            self.0
                .map(str::to_string)
                .map_err(|e| LlmError::Http(e.to_string()))
        }
    }

    fn analyzer(reply: std::result::Result<&'static str, &'static str>) -> RequirementAnalyzer {
        RequirementAnalyzer::new(Arc::new(Canned(reply)))
    }

    #[test]
    fn test_request_bodies_per_provider() {
        let ollama = HttpTextGenerator::new(LlmConfig::default()).unwrap();
        let body = ollama.body("describe").unwrap();
        assert_eq!(body["prompt"], "describe");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");

        let openai = HttpTextGenerator::new(LlmConfig {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".into(),
            ..Default::default()
        })
        .unwrap();
        let body = openai.body("describe").unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["content"], "describe");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": {\"b\": 1}} hope that helps"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_parse_full_reply() {
        let reply = r#"Here you go:
        {"components": ["api", "PostgreSQL"], "complexity": "HIGH",
         "projectName": "orders", "requirements": ["HA"], "recommendations": []}"#;
        let analysis = parse_analysis(reply).unwrap();
        assert_eq!(analysis.components, vec!["api", "PostgreSQL"]);
        assert_eq!(analysis.complexity, Complexity::High);
        assert_eq!(analysis.project_name, "orders");
        assert_eq!(analysis.requirements, vec!["HA"]);
    }

    #[test]
    fn test_parse_tolerates_missing_optional_fields() {
        let analysis = parse_analysis(r#"{"components": ["cache"], "complexity": "extreme"}"#)
            .unwrap();
        assert_eq!(analysis.complexity, Complexity::Medium);
        assert_eq!(analysis.project_name, "my-infrastructure");
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_components() {
        assert!(parse_analysis(r#"{"components": "database"}"#).is_none());
        assert!(parse_analysis(r#"{"complexity": "low"}"#).is_none());
        assert!(parse_analysis("{ nope").is_none());
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Ollama);
        assert_eq!("openai".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert!("bard".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_prompt_mentions_context() {
        let ctx = AnalysisContext {
            environment: Environment::Production,
            cloud_provider: CloudProvider::Gcp,
            template_hint: Some("kubernetes".into()),
        };
        let prompt = build_prompt("Deploy a web app", &ctx);
        assert!(prompt.contains("Environment: production"));
        assert!(prompt.contains("Cloud provider: gcp"));
        assert!(prompt.contains("Preferred template: kubernetes"));
        assert!(prompt.ends_with("Deploy a web app\n"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back() {
        let analysis = analyzer(Ok("I cannot help with that"))
            .analyze("Create a Node.js API", &AnalysisContext::default())
            .await
            .unwrap();
        assert_eq!(analysis, Analysis::fallback());
    }

    #[tokio::test]
    async fn test_call_failure_is_analysis_error() {
        let err = analyzer(Err("connection refused"))
            .analyze("Create a Node.js API", &AnalysisContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
