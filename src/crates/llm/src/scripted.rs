//! Deterministic chat model for tests.
//!
//! Queue replies (or failures) in order; each `chat`/`stream` call pops the
//! next one. Requests are recorded so tests can assert on prompt contents.
//! When the queue runs dry the model keeps returning the configured
//! fallback reply, which keeps long scenario tests from having to count
//! every internal LLM call.

use async_trait::async_trait;
use futures::stream;
use lexgraph_core::error::{GraphError, Result};
use lexgraph_core::llm::{
    ChatModel, ChatRequest, ChatResponse, ChatStreamResponse, Message, MessageChunk,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with this error message.
    Failure(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }
}

/// A chat model that replays a script.
pub struct ScriptedChatModel {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a plain-text reply.
    pub fn push_text(&self, content: impl Into<String>) {
        self.push(ScriptedReply::text(content));
    }

    /// Reply with this text whenever the queue is empty.
    pub fn with_fallback(mut self, content: impl Into<String>) -> Self {
        self.fallback = Some(content.into());
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(ScriptedReply::Text(content)) => Ok(content),
            Some(ScriptedReply::Failure(message)) => Err(GraphError::Custom(message)),
            None => match &self.fallback {
                Some(content) => Ok(content.clone()),
                None => Err(GraphError::Custom("scripted model queue is empty".into())),
            },
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let content = self.next_reply(&request)?;
        Ok(ChatResponse::new(Message::assistant(content)))
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStreamResponse> {
        let content = self.next_reply(&request)?;

        // Split into word-sized deltas so consumers exercise real
        // buffering.
        let mut chunks: Vec<Result<MessageChunk>> = content
            .split_inclusive(' ')
            .map(|piece| Ok(MessageChunk::delta(piece)))
            .collect();
        chunks.push(Ok(MessageChunk::finished()));

        Ok(ChatStreamResponse {
            stream: Box::pin(stream::iter(chunks)),
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replies_in_order_then_fallback() {
        let model = ScriptedChatModel::new("scripted-lite").with_fallback("{}");
        model.push_text("first");
        model.push(ScriptedReply::failure("rate limit"));

        let first = model.chat(ChatRequest::new(vec![Message::human("a")])).await.unwrap();
        assert_eq!(first.text(), "first");

        let err = model
            .chat(ChatRequest::new(vec![Message::human("b")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limit"));

        let fallback = model.chat(ChatRequest::new(vec![Message::human("c")])).await.unwrap();
        assert_eq!(fallback.text(), "{}");
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_stream_reassembles_to_original() {
        let model = ScriptedChatModel::new("scripted");
        model.push_text("Дата подписания: 2023-09-20");

        let response = model
            .stream(ChatRequest::new(vec![Message::human("q")]))
            .await
            .unwrap();
        let chunks: Vec<_> = response.stream.collect().await;
        let text: String = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().content.as_str())
            .collect();
        assert_eq!(text, "Дата подписания: 2023-09-20");
        assert!(chunks.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let model = ScriptedChatModel::new("scripted").with_fallback("ok");
        model
            .chat(ChatRequest::new(vec![Message::system("sys"), Message::human("task")]))
            .await
            .unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].content, "sys");
    }
}
