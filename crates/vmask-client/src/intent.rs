//! Conversational-intent service client.
//!
//! The service answers with newline-delimited JSON envelopes:
//!
//! ```text
//! {"event":"delta","text":"Looking for "}
//! {"event":"delta","text":"the red car"}
//! {"event":"result","result":{...},"conversation_id":"c-1"}
//! ```
//!
//! Deltas are advisory text for display. Exactly one `result` (or one
//! `error`) ends the stream. Lines may carry an SSE-style `data: ` prefix.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use validator::Validate;

use vmask_models::ConversationResult;

use crate::config::ServiceConfig;
use crate::error::{ClientError, ClientResult};
use crate::http::HttpService;
use crate::mask::inline_frame_image;

/// One user turn sent to the intent service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_frame_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl IntentRequest {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            current_frame_image: None,
            conversation_id: None,
        }
    }

    pub fn with_frame(mut self, frame_image: impl Into<String>) -> Self {
        self.current_frame_image = Some(frame_image.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }
}

/// One line of the intent stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IntentEnvelope {
    Delta {
        text: String,
    },
    Result {
        result: ConversationResult,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Final outcome of an intent call.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentReply {
    pub result: ConversationResult,
    pub conversation_id: Option<String>,
}

/// Incremental line decoder for the envelope stream.
///
/// Chunks may split lines anywhere, including inside multi-byte characters.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buffer: Vec<u8>,
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every envelope completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> ClientResult<Vec<IntentEnvelope>> {
        self.buffer.extend_from_slice(chunk);
        let mut envelopes = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(envelope) = parse_line(&line)? {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> ClientResult<Option<IntentEnvelope>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> ClientResult<Option<IntentEnvelope>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| ClientError::invalid_response(format!("intent stream is not UTF-8: {e}")))?
        .trim();
    let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| ClientError::invalid_response(format!("bad intent envelope ({e}): {line}")))
}

/// Conversational-intent collaborator.
#[async_trait]
pub trait IntentService: Send + Sync {
    /// Resolve one user turn. Advisory text deltas are forwarded to
    /// `deltas` when given; dropping the receiver does not abort the call.
    async fn resolve(
        &self,
        request: &IntentRequest,
        deltas: Option<mpsc::UnboundedSender<String>>,
    ) -> ClientResult<IntentReply>;
}

/// HTTP client for the intent service.
pub struct HttpIntentService {
    service: HttpService,
}

impl HttpIntentService {
    pub fn new(config: ServiceConfig) -> ClientResult<Self> {
        Ok(Self {
            service: HttpService::new("intent-service", config)?,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ServiceConfig::intent_from_env()?)
    }

    /// Check if the intent service is healthy.
    pub async fn health_check(&self) -> ClientResult<bool> {
        self.service.health_check().await
    }
}

#[async_trait]
impl IntentService for HttpIntentService {
    async fn resolve(
        &self,
        request: &IntentRequest,
        deltas: Option<mpsc::UnboundedSender<String>>,
    ) -> ClientResult<IntentReply> {
        if request.query.trim().is_empty() {
            return Err(ClientError::invalid_request("empty query"));
        }

        let mut body = request.clone();
        if let Some(frame) = &request.current_frame_image {
            body.current_frame_image = Some(inline_frame_image(frame).await?);
        }

        info!(user_id = %request.user_id, "Resolving intent");
        let response = self.service.post_streaming("intent", &body).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = EnvelopeDecoder::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for envelope in decoder.push(&chunk)? {
                if let Some(reply) = handle_envelope(envelope, deltas.as_ref())? {
                    return Ok(reply);
                }
            }
        }
        if let Some(envelope) = decoder.finish()? {
            if let Some(reply) = handle_envelope(envelope, deltas.as_ref())? {
                return Ok(reply);
            }
        }

        Err(ClientError::invalid_response(
            "intent stream ended without a result",
        ))
    }
}

fn handle_envelope(
    envelope: IntentEnvelope,
    deltas: Option<&mpsc::UnboundedSender<String>>,
) -> ClientResult<Option<IntentReply>> {
    match envelope {
        IntentEnvelope::Delta { text } => {
            if let Some(tx) = deltas {
                // receiver gone is fine, deltas are advisory
                let _ = tx.send(text);
            }
            Ok(None)
        }
        IntentEnvelope::Result {
            result,
            conversation_id,
        } => {
            result
                .validate()
                .map_err(|e| ClientError::invalid_response(format!("invalid intent result: {e}")))?;
            debug!(
                valid = result.is_valid_request,
                exists = result.object_exists,
                clarification = result.clarification_needed,
                confidence = result.confidence,
                "Intent resolved"
            );
            Ok(Some(IntentReply {
                result,
                conversation_id,
            }))
        }
        IntentEnvelope::Error { message } => {
            warn!("Intent service reported an error: {}", message);
            Err(ClientError::Service(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULT_LINE: &str = r#"{"event":"result","result":{"is_valid_request":true,"object_exists":true,"text_prompt":"red car","action":"remove","confidence":0.9,"assistant_message":"Removing the red car"},"conversation_id":"c-1"}"#;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = EnvelopeDecoder::new();
        assert!(decoder.push(br#"{"event":"del"#).unwrap().is_empty());
        let envelopes = decoder
            .push(b"ta\",\"text\":\"Look\"}\n\ndata: {\"event\":\"delta\",\"text\":\"ing\"}\n")
            .unwrap();
        assert_eq!(
            envelopes,
            vec![
                IntentEnvelope::Delta { text: "Look".into() },
                IntentEnvelope::Delta { text: "ing".into() },
            ]
        );
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_decoder_trailing_line_without_newline() {
        let mut decoder = EnvelopeDecoder::new();
        assert!(decoder.push(RESULT_LINE.as_bytes()).unwrap().is_empty());
        match decoder.finish().unwrap() {
            Some(IntentEnvelope::Result { result, conversation_id }) => {
                assert_eq!(result.text_prompt, "red car");
                assert_eq!(conversation_id.as_deref(), Some("c-1"));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = EnvelopeDecoder::new();
        assert!(matches!(
            decoder.push(b"not json\n"),
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_streams_deltas() {
        let server = MockServer::start().await;
        let body = format!(
            "{}\n{}\n{}\n",
            r#"{"event":"delta","text":"Finding "}"#,
            r#"{"event":"delta","text":"the car"}"#,
            RESULT_LINE
        );
        Mock::given(method("POST"))
            .and(path("/intent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = HttpIntentService::new(ServiceConfig::new(&server.uri()).unwrap()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = client
            .resolve(&IntentRequest::new("remove the red car", "user-1"), Some(tx))
            .await
            .unwrap();

        assert!(reply.result.is_actionable());
        assert_eq!(reply.conversation_id.as_deref(), Some("c-1"));
        assert_eq!(rx.recv().await.as_deref(), Some("Finding "));
        assert_eq!(rx.recv().await.as_deref(), Some("the car"));
    }

    #[tokio::test]
    async fn test_resolve_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/intent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"event\":\"error\",\"message\":\"model overloaded\"}\n"),
            )
            .mount(&server)
            .await;

        let client = HttpIntentService::new(ServiceConfig::new(&server.uri()).unwrap()).unwrap();
        let err = client
            .resolve(&IntentRequest::new("remove the car", "user-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Service(m) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_resolve_without_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/intent"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"event\":\"delta\",\"text\":\"hm\"}\n"),
            )
            .mount(&server)
            .await;

        let client = HttpIntentService::new(ServiceConfig::new(&server.uri()).unwrap()).unwrap();
        assert!(matches!(
            client.resolve(&IntentRequest::new("q", "u"), None).await,
            Err(ClientError::InvalidResponse(_))
        ));
    }
}
