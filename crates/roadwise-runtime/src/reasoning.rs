//! [`ReasoningEngine`] – the remote model that looks at the scene and decides
//! which actions to invoke.
//!
//! Two wire protocols are supported:
//!
//! - [`AnthropicReasoner`] – the Anthropic Messages API (`tool_use` blocks).
//! - [`OpenAiCompatReasoner`] – any OpenAI-compatible `/v1/chat/completions`
//!   endpoint with function tools, including local [Ollama](https://ollama.com)
//!   servers.
//!
//! [`FallbackReasoner`] chains engines and answers with the first available
//! one.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roadwise_runtime::reasoning::{
//!     AnthropicReasoner, FallbackReasoner, OpenAiCompatReasoner, ReasoningEngine,
//! };
//!
//! let engine = FallbackReasoner::new(vec![
//!     Arc::new(AnthropicReasoner::new(Some("sk-ant-...".into()))) as Arc<dyn ReasoningEngine>,
//!     Arc::new(OpenAiCompatReasoner::new("http://localhost:11434", "llava", None)),
//! ]);
//! assert!(engine.is_available());
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roadwise_kernel::ActionSchema;
use roadwise_types::RoadwiseError;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Request / response
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the engine sees in one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningRequest {
    /// Base instructions plus injected knowledge.
    pub system: String,
    /// Human-readable rendering of the context snapshot.
    pub context_text: String,
    /// Base64 JPEG of the camera frame.
    pub frame_jpeg_b64: Option<String>,
    pub actions: Vec<ActionSchema>,
}

/// One action the engine asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningResponse {
    pub invocations: Vec<Invocation>,
    /// Free-text scene summary, if the engine wrote one.
    pub text: Option<String>,
    /// Name of the backend that answered.
    pub backend: String,
    /// `true` when a fallback backend answered instead of the primary.
    pub degraded: bool,
}

/// A request/response reasoning backend.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend is configured well enough to try.
    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, RoadwiseError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Transport-level failures of a reasoning backend.
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl From<ReasoningError> for RoadwiseError {
    fn from(e: ReasoningError) -> Self {
        RoadwiseError::ReasoningFailed(e.to_string())
    }
}

fn http_client() -> reqwest::Client {
    roadwise_sources::http_client(Duration::from_secs(30))
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic Messages API backend.
pub struct AnthropicReasoner {
    url: String,
    model: String,
    max_tokens: u32,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicReasoner {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            url: ANTHROPIC_URL.to_string(),
            model: ANTHROPIC_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: http_client(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request body for the Messages API.
    pub fn body(&self, request: &ReasoningRequest) -> Value {
        let mut content = Vec::new();
        if let Some(frame) = &request.frame_jpeg_b64 {
            content.push(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": "image/jpeg", "data": frame},
            }));
        }
        content.push(json!({"type": "text", "text": request.context_text}));

        let tools: Vec<Value> = request
            .actions
            .iter()
            .map(|a| {
                json!({
                    "name": a.name,
                    "description": a.description,
                    "input_schema": a.input_schema,
                })
            })
            .collect();

        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": request.system,
            "tools": tools,
            "messages": [{"role": "user", "content": content}],
        })
    }
}

/// Extract `tool_use` invocations and the last text block.
pub fn parse_anthropic(body: &Value) -> Result<ReasoningResponse, ReasoningError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ReasoningError::BadResponse("missing content array".into()))?;

    let mut response = ReasoningResponse::default();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = non_blank(block.get("text").and_then(Value::as_str)) {
                    response.text = Some(text);
                }
            }
            Some("tool_use") => {
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                response.invocations.push(Invocation {
                    name: name.to_string(),
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }
    Ok(response)
}

#[async_trait]
impl ReasoningEngine for AnthropicReasoner {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, RoadwiseError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ReasoningError::NotConfigured("Anthropic API key".into()))?;
        let body: Value = self
            .client
            .post(&self.url)
            .header("x-api-key", key.trim())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(request))
            .send()
            .await
            .map_err(ReasoningError::from)?
            .error_for_status()
            .map_err(ReasoningError::from)?
            .json()
            .await
            .map_err(ReasoningError::from)?;
        let mut response = parse_anthropic(&body)?;
        response.backend = self.name().to_string();
        debug!(invocations = response.invocations.len(), "anthropic answered");
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible chat completions
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible `/v1/chat/completions` backend with function tools.
pub struct OpenAiCompatReasoner {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatReasoner {
    /// `base_url` without the `/v1/...` suffix, e.g. `http://localhost:11434`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: http_client(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    pub fn body(&self, request: &ReasoningRequest) -> Value {
        let mut user = Vec::new();
        if let Some(frame) = &request.frame_jpeg_b64 {
            user.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/jpeg;base64,{frame}")},
            }));
        }
        user.push(json!({"type": "text", "text": request.context_text}));

        let tools: Vec<Value> = request
            .actions
            .iter()
            .map(|a| {
                json!({
                    "type": "function",
                    "function": {
                        "name": a.name,
                        "description": a.description,
                        "parameters": a.input_schema,
                    },
                })
            })
            .collect();

        json!({
            "model": self.model,
            "stream": false,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": user},
            ],
            "tools": tools,
        })
    }
}

/// Extract `tool_calls` and message text from the first choice.
///
/// Function arguments arrive as a JSON-encoded string; unparsable arguments
/// are passed through as a string so the action rejects them itself.
pub fn parse_openai(body: &Value) -> Result<ReasoningResponse, ReasoningError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ReasoningError::BadResponse("empty choices array".into()))?;

    let invocations = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| call.get("function"))
                .map(|f| {
                    let name = f.get("name").and_then(Value::as_str).unwrap_or_default();
                    let arguments = match f.get("arguments") {
                        Some(Value::String(raw)) => {
                            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                        }
                        Some(other) => other.clone(),
                        None => json!({}),
                    };
                    Invocation {
                        name: name.to_string(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ReasoningResponse {
        invocations,
        text: non_blank(message.get("content").and_then(Value::as_str)),
        ..ReasoningResponse::default()
    })
}

#[async_trait]
impl ReasoningEngine for OpenAiCompatReasoner {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, RoadwiseError> {
        let mut builder = self.client.post(self.endpoint()).json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.trim());
        }
        let body: Value = builder
            .send()
            .await
            .map_err(ReasoningError::from)?
            .error_for_status()
            .map_err(ReasoningError::from)?
            .json()
            .await
            .map_err(ReasoningError::from)?;
        let mut response = parse_openai(&body)?;
        response.backend = self.name().to_string();
        debug!(invocations = response.invocations.len(), "openai-compat answered");
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback chain
// ─────────────────────────────────────────────────────────────────────────────

/// Tries each available backend in order; the first success wins.
pub struct FallbackReasoner {
    engines: Vec<Arc<dyn ReasoningEngine>>,
}

impl FallbackReasoner {
    pub fn new(engines: Vec<Arc<dyn ReasoningEngine>>) -> Self {
        Self { engines }
    }
}

#[async_trait]
impl ReasoningEngine for FallbackReasoner {
    fn name(&self) -> &str {
        self.engines
            .iter()
            .find(|e| e.is_available())
            .map(|e| e.name())
            .unwrap_or("none")
    }

    fn is_available(&self) -> bool {
        self.engines.iter().any(|e| e.is_available())
    }

    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, RoadwiseError> {
        let mut last_err = None;
        for (i, engine) in self.engines.iter().enumerate() {
            if !engine.is_available() {
                continue;
            }
            match engine.invoke(request).await {
                Ok(mut response) => {
                    response.degraded |= i > 0;
                    return Ok(response);
                }
                Err(e) => {
                    warn!(backend = engine.name(), error = %e, "reasoning backend failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            RoadwiseError::ReasoningFailed("no reasoning backend available".into())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            system: "Be brief.".into(),
            context_text: "Vehicle: 60 mph".into(),
            frame_jpeg_b64: Some("AAAA".into()),
            actions: vec![ActionSchema {
                name: "set_alert".into(),
                description: "Show an alert".into(),
                input_schema: json!({"type": "object"}),
            }],
        }
    }

    #[test]
    fn anthropic_body_carries_image_tools_and_system() {
        let body = AnthropicReasoner::new(Some("k".into())).body(&request());
        assert_eq!(body["model"], ANTHROPIC_MODEL);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["tools"][0]["name"], "set_alert");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["data"], "AAAA");
        assert_eq!(content[1]["text"], "Vehicle: 60 mph");
    }

    #[test]
    fn anthropic_body_without_frame_is_text_only() {
        let mut req = request();
        req.frame_jpeg_b64 = None;
        let body = AnthropicReasoner::new(None).body(&req);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn parses_anthropic_tool_use_blocks() {
        let body = json!({"content": [
            {"type": "text", "text": "Construction zone ahead."},
            {"type": "tool_use", "id": "t1", "name": "set_speed_advisory",
             "input": {"speed_mph": 45, "reason": "construction", "confidence": 0.8}},
            {"type": "tool_use", "id": "t2", "name": "set_alert"}
        ]});
        let r = parse_anthropic(&body).unwrap();
        assert_eq!(r.text.as_deref(), Some("Construction zone ahead."));
        assert_eq!(r.invocations.len(), 2);
        assert_eq!(r.invocations[0].arguments["speed_mph"], 45);
        assert_eq!(r.invocations[1].arguments, json!({}));
    }

    #[test]
    fn anthropic_error_body_is_bad_response() {
        let body = json!({"type": "error", "error": {"message": "overloaded"}});
        assert!(matches!(parse_anthropic(&body), Err(ReasoningError::BadResponse(_))));
    }

    #[test]
    fn openai_body_uses_function_tools_and_data_uri() {
        let r = OpenAiCompatReasoner::new("http://localhost:11434/", "llava", None);
        assert_eq!(r.endpoint(), "http://localhost:11434/v1/chat/completions");
        let body = r.body(&request());
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
        assert_eq!(body["messages"][0]["role"], "system");
        let url = body["messages"][1]["content"][0]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn parses_openai_tool_calls_with_string_arguments() {
        let body = json!({"choices": [{"message": {
            "content": "",
            "tool_calls": [
                {"type": "function", "function": {"name": "set_lane_advisory",
                  "arguments": "{\"direction\":\"left\",\"reason\":\"slow truck\",\"confidence\":0.7}"}},
                {"type": "function", "function": {"name": "set_alert", "arguments": "not json"}}
            ]
        }}]});
        let r = parse_openai(&body).unwrap();
        assert_eq!(r.text, None);
        assert_eq!(r.invocations[0].arguments["direction"], "left");
        assert_eq!(r.invocations[1].arguments, json!("not json"));
    }

    #[test]
    fn openai_without_choices_is_bad_response() {
        assert!(parse_openai(&json!({"choices": []})).is_err());
    }

    // ---- fallback

    struct Scripted {
        name: &'static str,
        available: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, available: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                available,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReasoningEngine for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.available
        }
        async fn invoke(&self, _r: &ReasoningRequest) -> Result<ReasoningResponse, RoadwiseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RoadwiseError::ReasoningFailed(format!("{} down", self.name)));
            }
            Ok(ReasoningResponse {
                backend: self.name.to_string(),
                ..ReasoningResponse::default()
            })
        }
    }

    #[tokio::test]
    async fn fallback_skips_unavailable_and_marks_degraded() {
        let primary = Scripted::new("cloud", false, false);
        let local = Scripted::new("local", true, false);
        let chain = FallbackReasoner::new(vec![primary.clone() as Arc<dyn ReasoningEngine>, local.clone()]);
        assert_eq!(chain.name(), "local");
        let r = chain.invoke(&request()).await.unwrap();
        assert_eq!(r.backend, "local");
        assert!(r.degraded);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_moves_on_after_failure() {
        let primary = Scripted::new("cloud", true, true);
        let local = Scripted::new("local", true, false);
        let chain = FallbackReasoner::new(vec![primary.clone() as Arc<dyn ReasoningEngine>, local]);
        let r = chain.invoke(&request()).await.unwrap();
        assert_eq!(r.backend, "local");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn primary_success_is_not_degraded() {
        let chain = FallbackReasoner::new(vec![Scripted::new("cloud", true, false) as Arc<dyn ReasoningEngine>]);
        assert!(!chain.invoke(&request()).await.unwrap().degraded);
    }

    #[tokio::test]
    async fn empty_chain_fails() {
        let chain = FallbackReasoner::new(vec![Scripted::new("cloud", false, false) as Arc<dyn ReasoningEngine>]);
        assert!(!chain.is_available());
        assert_eq!(chain.name(), "none");
        assert!(matches!(
            chain.invoke(&request()).await,
            Err(RoadwiseError::ReasoningFailed(_))
        ));
    }
}
