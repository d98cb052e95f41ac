//! Translation transport: one [`TranslationUnit`] in, an [`EventStream`] out.
//!
//! [`Transport`] is the seam between the dispatcher and the outside world.
//! The dispatcher only ever sees decoded events, so tests inject an
//! in-memory transport and the production code uses [`HttpTransport`].
//!
//! ## Wire format
//!
//! ```text
//! POST {endpoint}
//! Authorization: Bearer {token}
//!
//! { "workflow_id": "...", "user_id": "...", "stream": true,
//!   "auto_save_history": true,
//!   "parameters": { "user_id": "...", "content": "<prompt>" } }
//! ```
//!
//! A streaming answer is a `data:` frame stream handled by
//! [`crate::pipeline::decode`]. A `application/json` answer carries the
//! payload in `output`, either at the top level or inside `data` (an
//! object or a JSON-encoded string).

use crate::config::TransportConfig;
use crate::error::TranslateError;
use crate::output::{TranslationEvent, TranslationUnit};
use crate::pipeline::decode::{decode_stream, EventStream};
use crate::pipeline::payload::{PayloadExtractor, UrlSniffer};
use crate::prompts::render_prompt;
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Submits one unit and returns its decoded events.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the response for `unit`.
    ///
    /// An `Err` means the call never produced a readable body (connection
    /// refused, non-success status). Failures after that surface as an
    /// `Err` item inside the stream.
    async fn translate(&self, unit: &TranslationUnit) -> Result<EventStream, TranslateError>;
}

/// Collect every event of a stream, stopping at the first error.
pub async fn drain(events: EventStream) -> Result<Vec<TranslationEvent>, TranslateError> {
    events.try_collect().await
}

/// HTTP workflow transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
    extractor: Arc<dyn PayloadExtractor>,
    prompt_template: Option<String>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig, timeout_secs: u64) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs.min(30)))
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("edgequake-translate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TranslateError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            extractor: Arc::new(UrlSniffer),
            prompt_template: None,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PayloadExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_prompt_template(mut self, template: Option<String>) -> Self {
        self.prompt_template = template;
        self
    }

    fn request_body(&self, unit: &TranslationUnit) -> Value {
        json!({
            "workflow_id": self.config.workflow_id,
            "user_id": self.config.user_id,
            "stream": self.config.stream,
            "auto_save_history": true,
            "parameters": {
                "user_id": self.config.user_id,
                "content": render_prompt(unit, self.prompt_template.as_deref()),
            },
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn translate(&self, unit: &TranslationUnit) -> Result<EventStream, TranslateError> {
        debug!(
            "Page {}: POST {} ({} chars, {} → {})",
            unit.page_num,
            self.config.endpoint,
            unit.source_text.chars().count(),
            unit.source_language,
            unit.target_language
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .json(&self.request_body(unit))
            .send()
            .await
            .map_err(TranslateError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::TransportFailed {
                status: Some(status.as_u16()),
                detail: format!("HTTP {}: {}", status, body.trim()),
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let body: Value = response.json().await.map_err(TranslateError::transport)?;
            let payload = output_payload(&body)?;
            let events: Vec<Result<TranslationEvent, TranslateError>> = payload
                .and_then(|p| self.extractor.extract(&p))
                .map(Ok)
                .into_iter()
                .collect();
            return Ok(Box::pin(stream::iter(events)));
        }

        Ok(decode_stream(response.bytes_stream(), self.extractor.clone()))
    }
}

/// Pull the payload out of a non-streaming JSON answer.
///
/// A non-zero `code` is a workflow-level failure even under HTTP 200.
fn output_payload(body: &Value) -> Result<Option<String>, TranslateError> {
    if let Some(code) = body.get("code").and_then(Value::as_i64) {
        if code != 0 {
            let msg = body.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(TranslateError::TransportFailed {
                status: None,
                detail: format!("workflow error {code}: {msg}"),
            });
        }
    }

    if let Some(out) = body.get("output").and_then(Value::as_str) {
        return Ok(Some(out.to_string()));
    }

    let nested = match body.get("data") {
        Some(Value::String(s)) => serde_json::from_str::<Value>(s).ok(),
        Some(v @ Value::Object(_)) => Some(v.clone()),
        _ => None,
    };
    Ok(nested
        .as_ref()
        .and_then(|d| d.get("output"))
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Language;
    use crate::output::EventKind;
    use crate::pipeline::payload::MarkerExtractor;
    use crate::test_support::{serve_once, Canned};

    fn unit() -> TranslationUnit {
        TranslationUnit {
            page_num: 3,
            source_language: Language::Chinese,
            target_language: Language::English,
            source_text: "你好".into(),
        }
    }

    fn config(endpoint: String) -> TransportConfig {
        TransportConfig {
            endpoint,
            token: "secret-token".into(),
            workflow_id: "wf-1".into(),
            user_id: "tester".into(),
            stream: true,
        }
    }

    #[test]
    fn request_body_follows_workflow_shape() {
        let t = HttpTransport::new(config("http://unused".into()), 5).unwrap();
        let body = t.request_body(&unit());
        assert_eq!(body["workflow_id"], "wf-1");
        assert_eq!(body["user_id"], "tester");
        assert_eq!(body["stream"], true);
        assert_eq!(body["parameters"]["user_id"], "tester");
        assert_eq!(body["parameters"]["content"], "你好\n翻译成English");
    }

    #[test]
    fn output_payload_locations() {
        assert_eq!(
            output_payload(&json!({"output": "top"})).unwrap().as_deref(),
            Some("top")
        );
        assert_eq!(
            output_payload(&json!({"code": 0, "data": {"output": "obj"}})).unwrap().as_deref(),
            Some("obj")
        );
        assert_eq!(
            output_payload(&json!({"code": 0, "data": "{\"output\":\"str\"}"})).unwrap().as_deref(),
            Some("str")
        );
        assert_eq!(output_payload(&json!({"data": "not json"})).unwrap(), None);
    }

    #[test]
    fn nonzero_code_is_transport_failure() {
        let err = output_payload(&json!({"code": 4100, "msg": "token expired"})).unwrap_err();
        assert!(err.to_string().contains("token expired"));
    }

    #[tokio::test]
    async fn streaming_response_is_decoded() {
        let body = "data: {\"content\":\"Hello \"}\n\ndata: {\"content\":\"world\"}\n\ndata: [DONE]\n";
        let (base, server) = serve_once(Canned::ok("text/event-stream", body)).await;

        let t = HttpTransport::new(config(format!("{base}/v1/workflow/stream_run")), 5).unwrap();
        let events = drain(t.translate(&unit()).await.unwrap()).await.unwrap();
        assert_eq!(
            events,
            vec![TranslationEvent::text("Hello "), TranslationEvent::text("world")]
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/workflow/stream_run"));
        assert!(request.to_lowercase().contains("authorization: bearer secret-token"));
        assert!(request.contains("\"workflow_id\":\"wf-1\""));
    }

    #[tokio::test]
    async fn json_response_yields_single_event() {
        let body = r#"{"code":0,"data":"{\"output\":\"https://cdn.test/out.pdf\"}"}"#;
        let (base, _server) = serve_once(Canned::ok("application/json", body)).await;

        let t = HttpTransport::new(config(base), 5).unwrap();
        let events = drain(t.translate(&unit()).await.unwrap()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ArtifactReference);
    }

    #[tokio::test]
    async fn error_status_is_transport_failed() {
        let (base, _server) =
            serve_once(Canned::status("503 Service Unavailable", "overloaded")).await;

        let t = HttpTransport::new(config(base), 5).unwrap();
        match t.translate(&unit()).await {
            Err(TranslateError::TransportFailed { status, detail }) => {
                assert_eq!(status, Some(503));
                assert!(detail.contains("overloaded"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn custom_extractor_is_used() {
        let body = "data: {\"content\":\"译文：Bonjour\"}\ndata: {\"content\":\"chatter\"}\n";
        let (base, _server) = serve_once(Canned::ok("text/event-stream", body)).await;

        let t = HttpTransport::new(config(base), 5)
            .unwrap()
            .with_extractor(Arc::new(MarkerExtractor));
        let events = drain(t.translate(&unit()).await.unwrap()).await.unwrap();
        assert_eq!(events, vec![TranslationEvent::text("Bonjour")]);
    }
}
