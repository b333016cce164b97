use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use miui_search_sdk::FragmentSink;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::chat::{ChatError, ChatRequest, ChatService};
use crate::models::error::{ApiError, ApiResult};
use crate::utils::streaming::{SseFrame, create_sse_stream};

/// Turns one exchange into a protocol's event sequence.
pub trait StreamTranslator: Send + 'static {
    /// Frames sent before the upstream call starts.
    fn preamble(&mut self) -> Vec<SseFrame>;

    fn fragment(&mut self, text: &str) -> Vec<SseFrame>;

    /// Closing frames once the full answer is known.
    fn finish(&mut self, full: &str) -> Vec<SseFrame>;

    /// The single frame reporting a failure after the stream has started.
    fn failure(&mut self, error: &ApiError) -> Vec<SseFrame>;
}

/// Run `request` in a background task and stream its events.
///
/// The conversation is resolved before the response starts so store failures
/// still answer with a plain error body. Nothing here waits on the
/// conversation lock, so a second stream on a busy session gets its preamble
/// at once and only its exchange queues behind the first. If the client goes
/// away the task stops waiting on the upstream call and nothing is recorded.
pub async fn stream_exchange<T: StreamTranslator>(
    service: Arc<ChatService>,
    request: ChatRequest,
    mut translator: T,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let conversation = service
        .cache()
        .resolve(&request.user_key, &request.session_id)
        .await
        .map_err(ChatError::from)?;
    service.cache().touch(&conversation);

    let (tx, rx) = mpsc::unbounded_channel();
    send_all(&tx, translator.preamble());

    tokio::spawn(async move {
        let outcome = {
            let fragment_tx = tx.clone();
            let mut forward = |text: &str| send_all(&fragment_tx, translator.fragment(text));
            let sink: &mut FragmentSink<'_> = &mut forward;

            tokio::select! {
                result = service.perform(&request, Some(sink)) => Some(result),
                _ = tx.closed() => None,
            }
        };

        let frames = match outcome {
            Some(Ok(full)) => translator.finish(&full),
            Some(Err(err)) => {
                let err = ApiError::from(err);
                warn!("Streaming exchange failed: {}", err);
                translator.failure(&err)
            },
            None => {
                info!("Client disconnected, upstream call abandoned");
                return;
            },
        };
        send_all(&tx, frames);
    });

    Ok(create_sse_stream(rx))
}

fn send_all(tx: &mpsc::UnboundedSender<SseFrame>, frames: Vec<SseFrame>) {
    for frame in frames {
        if tx.send(frame).is_err() {
            break;
        }
    }
}
