use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::{
    api::{
        chat::ChatState,
        streaming_handler::{StreamTranslator, stream_exchange},
    },
    core::ids,
    models::{
        error::{ApiError, ApiResult},
        responses::{ResponseObject, ResponseStreamEvent},
    },
    utils::{
        parser::{extract_responses_input, parse_json_body},
        request_options::{RequestOptions, normalize_model},
        streaming::SseFrame,
    },
};

pub async fn create_response(
    State(state): State<ChatState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let body = parse_json_body(&body)?;
    let prompt = extract_responses_input(&body);
    if prompt.is_empty() {
        return Err(ApiError::MissingInput);
    }

    let options = RequestOptions::parse(&body, &headers);
    let model = normalize_model(body.get("model"));
    let request = state.request(&headers, prompt, &options);

    if options.stream {
        let translator = ResponseEventTranslator::new(model);
        let sse = stream_exchange(state.service.clone(), request, translator).await?;
        return Ok(sse.into_response());
    }

    let text = state.service.perform(&request, None).await?;
    let response = ResponseObject::completed(
        &ids::new_id("resp"),
        &ids::new_id("msg"),
        model,
        Utc::now().timestamp(),
        text,
    );
    Ok(Json(response).into_response())
}

/// Named `response.*` events around one output text item.
pub struct ResponseEventTranslator {
    response_id: String,
    message_id: String,
    model: &'static str,
    created_at: i64,
}

impl ResponseEventTranslator {
    pub fn new(model: &'static str) -> Self {
        Self {
            response_id: ids::new_id("resp"),
            message_id: ids::new_id("msg"),
            model,
            created_at: Utc::now().timestamp(),
        }
    }

    fn frame(event: ResponseStreamEvent) -> SseFrame {
        SseFrame::named(event.name(), &event)
    }
}

impl StreamTranslator for ResponseEventTranslator {
    fn preamble(&mut self) -> Vec<SseFrame> {
        vec![Self::frame(ResponseStreamEvent::Created {
            response: ResponseObject::started(&self.response_id, self.model, self.created_at),
        })]
    }

    fn fragment(&mut self, text: &str) -> Vec<SseFrame> {
        vec![Self::frame(ResponseStreamEvent::OutputTextDelta {
            item_id: self.message_id.clone(),
            output_index: 0,
            content_index: 0,
            delta: text.to_string(),
        })]
    }

    fn finish(&mut self, full: &str) -> Vec<SseFrame> {
        vec![
            Self::frame(ResponseStreamEvent::OutputTextDone {
                item_id: self.message_id.clone(),
                output_index: 0,
                content_index: 0,
                text: full.to_string(),
            }),
            Self::frame(ResponseStreamEvent::Completed {
                response: ResponseObject::completed(
                    &self.response_id,
                    &self.message_id,
                    self.model,
                    self.created_at,
                    full.to_string(),
                ),
            }),
        ]
    }

    fn failure(&mut self, error: &ApiError) -> Vec<SseFrame> {
        vec![Self::frame(ResponseStreamEvent::Error {
            code: error.code(),
            message: error.code(),
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::streaming_handler::testing::{data, replay};

    #[test]
    fn test_event_order() {
        let frames = replay(ResponseEventTranslator::new("DOUBAO"), &["Hel", "lo"]);
        let names: Vec<_> = frames.iter().map(|f| f.event.unwrap()).collect();
        assert_eq!(
            names,
            [
                "response.created",
                "response.output_text.delta",
                "response.output_text.delta",
                "response.output_text.done",
                "response.completed",
            ]
        );

        let created = data(&frames[0]);
        assert_eq!(created["type"], "response.created");
        let response_id = created["response"]["id"].clone();

        let delta = data(&frames[1]);
        assert_eq!(delta["delta"], "Hel");
        assert_eq!(delta["output_index"], 0);
        let item_id = delta["item_id"].clone();

        let done = data(&frames[3]);
        assert_eq!(done["text"], "Hello");
        assert_eq!(done["item_id"], item_id);

        let completed = data(&frames[4]);
        assert_eq!(completed["response"]["id"], response_id);
        assert_eq!(completed["response"]["output"][0]["id"], item_id);
        assert_eq!(completed["response"]["output_text"], "Hello");
    }

    #[test]
    fn test_failure_event() {
        let frames = ResponseEventTranslator::new("DOUBAO").failure(&ApiError::Upstream("reset".into()));
        assert_eq!(frames[0].event, Some("error"));
        assert_eq!(data(&frames[0])["code"], "upstream_error");
    }
}
