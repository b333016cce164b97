use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use crate::{
    api::{
        chat::ChatState,
        streaming_handler::{StreamTranslator, stream_exchange},
    },
    core::ids,
    models::{
        claude::{
            ClaudeError, ClaudeMessage, ClaudeStreamEvent, ContentBlock, ContentDelta,
            MessageDelta, Usage,
        },
        error::{ApiError, ClaudeApiResult},
    },
    utils::{
        parser::{extract_claude_messages, parse_json_body},
        request_options::{RequestOptions, normalize_model},
        streaming::SseFrame,
    },
};

pub async fn create_message(
    State(state): State<ChatState>,
    headers: HeaderMap,
    body: Bytes,
) -> ClaudeApiResult<Response> {
    let body = parse_json_body(&body)?;
    let prompt = extract_claude_messages(&body);
    if prompt.is_empty() {
        return Err(ApiError::MissingUserMessage.into());
    }

    let options = RequestOptions::parse(&body, &headers);
    let model = normalize_model(body.get("model"));
    let request = state.request(&headers, prompt, &options);

    if options.stream {
        let translator = ClaudeEventTranslator::new(model);
        let sse = stream_exchange(state.service.clone(), request, translator).await?;
        return Ok(sse.into_response());
    }

    let text = state.service.perform(&request, None).await?;
    Ok(Json(ClaudeMessage::reply(&ids::new_id("msg"), model, text)).into_response())
}

/// Claude message events for a single text block.
pub struct ClaudeEventTranslator {
    message_id: String,
    model: &'static str,
}

impl ClaudeEventTranslator {
    pub fn new(model: &'static str) -> Self {
        Self {
            message_id: ids::new_id("msg"),
            model,
        }
    }

    fn frame(event: ClaudeStreamEvent) -> SseFrame {
        SseFrame::named(event.name(), &event)
    }
}

impl StreamTranslator for ClaudeEventTranslator {
    fn preamble(&mut self) -> Vec<SseFrame> {
        vec![
            Self::frame(ClaudeStreamEvent::MessageStart {
                message: ClaudeMessage::new(&self.message_id, self.model, Vec::new()),
            }),
            Self::frame(ClaudeStreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::Text {
                    text: String::new(),
                },
            }),
        ]
    }

    fn fragment(&mut self, text: &str) -> Vec<SseFrame> {
        vec![Self::frame(ClaudeStreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: text.to_string(),
            },
        })]
    }

    fn finish(&mut self, _full: &str) -> Vec<SseFrame> {
        vec![
            Self::frame(ClaudeStreamEvent::ContentBlockStop { index: 0 }),
            Self::frame(ClaudeStreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some("end_turn".to_string()),
                    stop_sequence: None,
                },
                usage: Usage::default(),
            }),
            Self::frame(ClaudeStreamEvent::MessageStop),
        ]
    }

    fn failure(&mut self, error: &ApiError) -> Vec<SseFrame> {
        vec![Self::frame(ClaudeStreamEvent::Error {
            error: ClaudeError {
                r#type: error.error_type().to_string(),
                message: error.code(),
            },
        })]
    }
}
