//! Email intake
//!
//! Turns an inbound email into a [`Submission`]. Auto-replies, bounces and
//! unsubscribe mail are recognised first and never submitted, even when they
//! quote an infrastructure request subject. Metadata lines such as
//! `environment: production` are read from the body and stripped from the
//! description; without them, keywords like "urgent" or "preprod" decide.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use text2iac_common::{Environment, Priority, RequestSource};

use crate::orchestrator::Submission;

/// Subject markers that route an email into the pipeline
const SUBJECT_MARKERS: &[&str] = &["[text2iac]", "infra request", "infrastructure request"];

/// Checked in subject and body
const AUTO_REPLY_MARKERS: &[&str] = &[
    "auto-reply",
    "automatic reply",
    "auto reply",
    "autoreply",
    "out of office",
    "annual leave",
    "automatic response",
    "auto response",
    "auto-response",
];

/// Checked in the subject only
const BOUNCE_MARKERS: &[&str] = &["delivery failed", "undeliverable", "returned mail"];

/// Checked in the body only
const UNSUBSCRIBE_MARKERS: &[&str] = &["unsubscribe", "opt-out"];

/// What an inbound email is, in the order the checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    AutoReply,
    Bounce,
    Unsubscribe,
    InfraRequest,
    Other,
}

impl EmailKind {
    pub fn describe(&self) -> &'static str {
        match self {
            EmailKind::AutoReply => "automatic reply",
            EmailKind::Bounce => "delivery failure notice",
            EmailKind::Unsubscribe => "unsubscribe request",
            EmailKind::InfraRequest => "infrastructure request",
            EmailKind::Other => "email without an infrastructure request subject",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    pub from: String,
    pub subject: String,
    pub body: String,
}

struct Patterns {
    environment: Regex,
    priority: Regex,
    staging_words: Regex,
    production_words: Regex,
    low_priority_words: Regex,
    high_priority_words: Regex,
    metadata: Vec<Regex>,
    blank_lines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("valid intake regex");
        Patterns {
            environment: re(r"(?i)environment:\s*(\w+)"),
            priority: re(r"(?i)priority:\s*(\w+)"),
            staging_words: re(r"(?i)\b(staging|pre-prod|preprod)\b"),
            production_words: re(r"(?i)\b(prod|production|live)\b"),
            low_priority_words: re(r"(?i)\b(low priority|when you can|not urgent)\b"),
            high_priority_words: re(r"(?i)\b(urgent|asap|high priority|blocking)\b"),
            metadata: vec![
                re(r"(?i)environment:\s*\w+"),
                re(r"(?i)priority:\s*\w+"),
                re(r"(?i)requestor:\s*[\w@.\-]+"),
                re(r"(?i)timeline:[^\n]*"),
                re(r"(?i)expected\s+traffic:[^\n]*"),
            ],
            blank_lines: re(r"\n\s*\n"),
        }
    })
}

pub fn is_infrastructure_request(subject: &str) -> bool {
    let subject = subject.to_lowercase();
    SUBJECT_MARKERS.iter().any(|m| subject.contains(m))
}

pub fn classify(email: &InboundEmail) -> EmailKind {
    let subject = email.subject.to_lowercase();
    let body = email.body.to_lowercase();

    if AUTO_REPLY_MARKERS
        .iter()
        .any(|m| subject.contains(m) || body.contains(m))
    {
        EmailKind::AutoReply
    } else if BOUNCE_MARKERS.iter().any(|m| subject.contains(m)) {
        EmailKind::Bounce
    } else if UNSUBSCRIBE_MARKERS.iter().any(|m| body.contains(m)) {
        EmailKind::Unsubscribe
    } else if is_infrastructure_request(&email.subject) {
        EmailKind::InfraRequest
    } else {
        EmailKind::Other
    }
}

/// Environment named by keywords, staging checked first ("pre-prod")
fn environment_keyword(text: &str) -> Option<Environment> {
    let p = patterns();
    if p.staging_words.is_match(text) {
        Some(Environment::Staging)
    } else if p.production_words.is_match(text) {
        Some(Environment::Production)
    } else {
        None
    }
}

/// Priority named by keywords, low checked first ("not urgent")
fn priority_keyword(text: &str) -> Option<Priority> {
    let p = patterns();
    if p.low_priority_words.is_match(text) {
        Some(Priority::Low)
    } else if p.high_priority_words.is_match(text) {
        Some(Priority::High)
    } else {
        None
    }
}

/// Remove metadata fields and collapse runs of blank lines
pub fn clean_description(body: &str) -> String {
    let p = patterns();
    let mut cleaned = body.replace("\r\n", "\n");
    for pattern in &p.metadata {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    p.blank_lines
        .replace_all(&cleaned, "\n\n")
        .trim()
        .to_string()
}

fn field<'a>(pattern: &Regex, body: &'a str) -> Option<&'a str> {
    pattern
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Sender address out of `Name <addr>` or a bare address
pub fn sender_address(from: &str) -> String {
    match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => from[start + 1..end].trim().to_string(),
        _ => from.trim().to_string(),
    }
}

/// `None` unless [`classify`] reports an infrastructure request
pub fn parse_email(email: &InboundEmail) -> Option<Submission> {
    if classify(email) != EmailKind::InfraRequest {
        return None;
    }

    let p = patterns();
    let text = format!("{}\n{}", email.subject, email.body);

    // An explicit field wins, even when its value is unknown
    let environment = match field(&p.environment, &email.body) {
        Some(value) => value.parse::<Environment>().ok(),
        None => environment_keyword(&text),
    }
    .unwrap_or_default();
    let priority = match field(&p.priority, &email.body) {
        Some(value) => value.parse::<Priority>().ok(),
        None => priority_keyword(&text),
    }
    .unwrap_or_default();

    Some(Submission {
        description: clean_description(&email.body),
        environment,
        priority,
        requestor: Some(sender_address(&email.from)),
        source: RequestSource::Email,
        ..Default::default()
    })
}
