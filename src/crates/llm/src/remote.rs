//! OpenAI-compatible chat client.
//!
//! One client type covers every provider the backend talks to; lite and
//! pro tiers are two [`RemoteLlmConfig`]s with different model names.
//! Streaming uses the provider's SSE framing (`data: {json}` chunks,
//! `data: [DONE]` terminator); dropping the returned stream cancels the
//! request.

use crate::config::RemoteLlmConfig;
use crate::error::LlmError;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use lexgraph_core::error::{GraphError, Result as GraphResult};
use lexgraph_core::llm::{
    ChatModel, ChatRequest, ChatResponse, ChatStreamResponse, Message, MessageChunk, MessageRole,
    ToolDefinition, UsageMetadata,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct RemoteChatClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl RemoteChatClient {
    pub fn new(config: RemoteLlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn convert_message(msg: &Message) -> WireMessage {
        WireMessage {
            role: match msg.role {
                MessageRole::System => "system",
                MessageRole::Human => "user",
                MessageRole::Assistant => "assistant",
            }
            .to_string(),
            content: msg.content.clone(),
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: self.config.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
            stop: if request.config.stop_sequences.is_empty() {
                None
            } else {
                Some(request.config.stop_sequences.clone())
            },
            tools: if request.config.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .config
                        .tools
                        .iter()
                        .map(|t| WireTool {
                            kind: "function".to_string(),
                            function: t.clone(),
                        })
                        .collect(),
                )
            },
            stream,
        }
    }

    async fn send(&self, body: &WireRequest) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => LlmError::Authentication(error_text),
            429 => LlmError::RateLimit(error_text),
            _ => LlmError::Provider(format!("{} {}: {}", self.config.model, status, error_text)),
        })
    }
}

#[async_trait]
impl ChatModel for RemoteChatClient {
    async fn chat(&self, request: ChatRequest) -> GraphResult<ChatResponse> {
        let body = self.build_body(&request, false);
        let response = self.send(&body).await.map_err(GraphError::from)?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| GraphError::from(LlmError::Http(e)))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::from(LlmError::Provider("response carried no choices".into())))?;

        debug!(model = %wire.model, "chat completion received");

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), serde_json::json!(wire.model));
        if let Some(reason) = &choice.finish_reason {
            metadata.insert("finish_reason".to_string(), serde_json::json!(reason));
        }

        Ok(ChatResponse {
            message: Message::assistant(choice.message.content),
            usage: wire
                .usage
                .map(|u| UsageMetadata::new(u.prompt_tokens, u.completion_tokens)),
            metadata,
        })
    }

    async fn stream(&self, request: ChatRequest) -> GraphResult<ChatStreamResponse> {
        let body = self.build_body(&request, true);
        let response = self.send(&body).await.map_err(GraphError::from)?;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| lexgraph_core::GraphError::Custom(format!("llm stream: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE lines; keep the partial tail.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        yield MessageChunk::finished();
                        return;
                    }
                    if let Ok(delta) = serde_json::from_str::<WireStreamChunk>(data) {
                        if let Some(choice) = delta.choices.into_iter().next() {
                            if let Some(content) = choice.delta.content {
                                if !content.is_empty() {
                                    yield MessageChunk::delta(content);
                                }
                            }
                        }
                    }
                }
            }
            yield MessageChunk::finished();
        };

        Ok(ChatStreamResponse {
            stream: Box::pin(stream),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: ToolDefinition,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Deserialize)]
struct WireDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_core::Message;

    #[test]
    fn test_message_role_mapping() {
        assert_eq!(RemoteChatClient::convert_message(&Message::system("s")).role, "system");
        assert_eq!(RemoteChatClient::convert_message(&Message::human("h")).role, "user");
        assert_eq!(
            RemoteChatClient::convert_message(&Message::assistant("a")).role,
            "assistant"
        );
    }

    #[test]
    fn test_body_omits_empty_options() {
        let client = RemoteChatClient::new(RemoteLlmConfig::new("k", "http://x/v1", "m")).unwrap();
        let body = client.build_body(&ChatRequest::new(vec![Message::human("hi")]), false);
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stop").is_none());
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"The "}}]}"#;
        let chunk: WireStreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("The "));
    }
}
