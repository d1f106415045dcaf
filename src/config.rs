//! Configuration for the stub server.
//!
//! Defines request matchers, response definitions, and simulation settings.
//! The same types are used for the YAML config file, the admin API payloads,
//! and the in-process registration calls.

use crate::error::{ResponseError, StubError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration for the stub server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Stubs registered at startup, in evaluation order
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Default response when no stub matches
    #[serde(default)]
    pub default_response: Option<ResponseDefinition>,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, stub) in self.stubs.iter().enumerate() {
            stub.validate()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
        }
        if let Some(default) = &self.default_response {
            default
                .validate()
                .map_err(|e| anyhow::anyhow!("Default response: {}", e))?;
        }
        Ok(())
    }
}

/// A single stub definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    /// Requested identifier (generated when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Optional name/description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Request matcher
    #[serde(default)]
    pub request: RequestMatcher,

    /// Response to return
    pub response: ResponseDefinition,

    /// Latency simulation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayConfig>,

    /// Failure simulation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultConfig>,
}

impl StubDefinition {
    /// A stub without id, name, delay or fault.
    pub fn new(request: RequestMatcher, response: ResponseDefinition) -> Self {
        Self {
            id: None,
            name: None,
            request,
            response,
            delay: None,
            fault: None,
        }
    }

    /// Validate the stub definition.
    pub fn validate(&self) -> Result<(), StubError> {
        if matches!(&self.id, Some(id) if id.is_empty()) {
            return Err(StubError::EmptyId);
        }
        crate::matcher::RequestPredicate::compile(self.request.clone())?;
        self.response.validate()?;
        if let Some(fault) = &self.fault {
            fault.validate()?;
        }
        Ok(())
    }
}

/// Request matching configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// HTTP method(s) to match (empty, `ANY` or `*` = any)
    #[serde(default)]
    pub method: Vec<String>,

    /// Path matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatcher>,

    /// Query parameter matching
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, QueryMatcher>,

    /// Header matching
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, HeaderMatcher>,

    /// Body matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyMatcher>,
}

impl RequestMatcher {
    /// Match a single method and path.
    pub fn new(method: impl Into<String>, path: PathMatcher) -> Self {
        Self {
            method: vec![method.into()],
            path: Some(path),
            ..Self::default()
        }
    }
}

/// Path matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathMatcher {
    /// Exact path match
    Exact { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Path with parameters (e.g., /users/{id})
    Template { template: String },
}

impl PathMatcher {
    pub fn exact(value: impl Into<String>) -> Self {
        PathMatcher::Exact {
            value: value.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        PathMatcher::Regex {
            pattern: pattern.into(),
        }
    }
}

/// Query parameter matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Parameter must be present (any value)
    Present,
    /// Parameter must be absent
    Absent,
}

/// Header matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values
        expressions: HashMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Whether the body is rendered as a template
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// An empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: None,
            template: false,
        }
    }

    /// `200 OK` with a JSON body.
    pub fn ok_for_json(content: serde_json::Value) -> Self {
        Self::new(200).with_body(ResponseBody::Json { content })
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a text body. Combined with [`templated`](Self::templated) this is
    /// the body template.
    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.with_body(ResponseBody::Text {
            content: content.into(),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Enable template rendering for the body.
    pub fn templated(mut self) -> Self {
        self.template = true;
        self
    }

    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), StubError> {
        status_code(self.status).map(|_| ())
    }

    /// Explicit `Content-Type` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ResponseError> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_vec(content)?),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                Ok(base64::engine::general_purpose::STANDARD.decode(content)?)
            }
            ResponseBody::File { path } => std::fs::read(path).map_err(|source| ResponseError::File {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
            ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// Fault injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultConfig {
    /// Return an error response
    Error {
        /// HTTP status code
        status: u16,
        /// Error message
        #[serde(default)]
        message: Option<String>,
    },
    /// Wait, then answer 504
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },
    /// Return empty response
    Empty,
}

impl FaultConfig {
    /// Validate the fault configuration.
    pub fn validate(&self) -> Result<(), StubError> {
        match self {
            FaultConfig::Error { status, .. } => status_code(*status).map(|_| ()),
            FaultConfig::Timeout { .. } | FaultConfig::Empty => Ok(()),
        }
    }
}

/// Convert a configured status, accepting only `100..=599`.
pub(crate) fn status_code(status: u16) -> Result<hyper::StatusCode, StubError> {
    if !(100..=599).contains(&status) {
        return Err(StubError::InvalidStatus(status));
    }
    hyper::StatusCode::from_u16(status).map_err(|_| StubError::InvalidStatus(status))
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched stubs
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Default content type for responses
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Largest request body accepted, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
