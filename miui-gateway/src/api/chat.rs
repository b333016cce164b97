use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::{
    api::streaming_handler::{StreamTranslator, stream_exchange},
    core::{chat::{ChatRequest, ChatService}, ids},
    models::{
        error::{ApiError, ApiResult, ErrorResponse},
        openai::{ChatCompletionResponse, ChatCompletionStreamResponse, DeltaMessage},
    },
    utils::{
        parser::{Prompt, extract_messages, parse_json_body},
        request_options::{self, RequestOptions, normalize_model},
        streaming::SseFrame,
    },
};

#[derive(Clone)]
pub struct ChatState {
    pub service: Arc<ChatService>,
}

impl ChatState {
    pub fn new(service: Arc<ChatService>) -> Self {
        Self { service }
    }

    /// Bind a prompt to the caller identified by the request headers.
    pub fn request(&self, headers: &HeaderMap, prompt: Prompt, options: &RequestOptions) -> ChatRequest {
        ChatRequest {
            user_key: request_options::user_key(headers),
            session_id: request_options::session_id(headers),
            query: prompt.into_query(),
            options: options.query_options(),
        }
    }
}

pub async fn chat_completions(
    State(state): State<ChatState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let body = parse_json_body(&body)?;
    let prompt = extract_messages(body.get("messages"));
    if prompt.is_empty() {
        return Err(ApiError::MissingUserMessage);
    }

    let options = RequestOptions::parse(&body, &headers);
    let model = normalize_model(body.get("model"));
    let request = state.request(&headers, prompt, &options);
    debug!(
        "chat completion for session {} (stream: {}, deep: {}, search: {})",
        request.session_id, options.stream, options.deep_thinking, options.online_search
    );

    if options.stream {
        let translator = ChatChunkTranslator::new(model);
        let sse = stream_exchange(state.service.clone(), request, translator).await?;
        return Ok(sse.into_response());
    }

    let content = state.service.perform(&request, None).await?;
    Ok(Json(ChatCompletionResponse::new(model, content)).into_response())
}

/// `chat.completion.chunk` frames, terminated by `[DONE]`.
pub struct ChatChunkTranslator {
    id: String,
    created: i64,
    model: &'static str,
    sent_role: bool,
}

impl ChatChunkTranslator {
    pub fn new(model: &'static str) -> Self {
        Self {
            id: ids::new_id("chatcmpl"),
            created: Utc::now().timestamp(),
            model,
            sent_role: false,
        }
    }

    fn chunk(&self, delta: DeltaMessage) -> SseFrame {
        SseFrame::json(&ChatCompletionStreamResponse::chunk(
            &self.id,
            self.created,
            self.model,
            delta,
        ))
    }
}

impl StreamTranslator for ChatChunkTranslator {
    fn preamble(&mut self) -> Vec<SseFrame> {
        Vec::new()
    }

    fn fragment(&mut self, text: &str) -> Vec<SseFrame> {
        let mut frames = Vec::with_capacity(2);
        if !self.sent_role {
            self.sent_role = true;
            frames.push(self.chunk(DeltaMessage {
                role: Some("assistant".to_string()),
                content: None,
            }));
        }
        frames.push(self.chunk(DeltaMessage {
            role: None,
            content: Some(text.to_string()).filter(|t| !t.is_empty()),
        }));
        frames
    }

    fn finish(&mut self, _full: &str) -> Vec<SseFrame> {
        let mut finish = ChatCompletionStreamResponse::chunk(
            &self.id,
            self.created,
            self.model,
            DeltaMessage::default(),
        );
        finish.choices[0].finish_reason = Some("stop".to_string());
        vec![SseFrame::json(&finish), SseFrame::done()]
    }

    fn failure(&mut self, error: &ApiError) -> Vec<SseFrame> {
        vec![SseFrame::json(&ErrorResponse::from(error))]
    }
}
