use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

/// One server-sent event ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    /// Unnamed `data:` frame carrying JSON.
    pub fn json<T: Serialize>(payload: &T) -> Self {
        Self {
            event: None,
            data: serde_json::to_string(payload).unwrap_or_default(),
        }
    }

    /// Frame with an `event:` line.
    pub fn named<T: Serialize>(event: &'static str, payload: &T) -> Self {
        Self {
            event: Some(event),
            ..Self::json(payload)
        }
    }

    pub fn done() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }

    pub fn into_event(self) -> Event {
        let event = match self.event {
            Some(name) => Event::default().event(name),
            None => Event::default(),
        };
        event.data(self.data)
    }
}

pub fn create_sse_stream(
    mut rx: mpsc::UnboundedReceiver<SseFrame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let event_stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok(frame.into_event());
        }
    };

    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frames() {
        let frame = SseFrame::named("message_stop", &json!({"type": "message_stop"}));
        assert_eq!(frame.event, Some("message_stop"));
        assert_eq!(frame.data, r#"{"type":"message_stop"}"#);

        let frame = SseFrame::json(&json!({"a": 1}));
        assert_eq!(frame.event, None);
        assert_eq!(SseFrame::done().data, "[DONE]");
    }
}
