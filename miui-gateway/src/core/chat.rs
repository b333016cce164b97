//! One chat exchange against the upstream assistant, with conversation
//! context taken from and written back to the cache.

use async_trait::async_trait;
use miui_search_sdk::{
    ConversationContext, FragmentSink, QueryOptions, SdkError, SearchClient,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::store::{ConversationCache, StoreError};

/// The upstream side of an exchange.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn query(
        &self,
        context: ConversationContext<'_>,
        query: &str,
        options: QueryOptions,
        on_fragment: Option<&mut FragmentSink<'_>>,
    ) -> Result<String, SdkError>;
}

#[async_trait]
impl AssistantBackend for SearchClient {
    async fn query(
        &self,
        context: ConversationContext<'_>,
        query: &str,
        options: QueryOptions,
        on_fragment: Option<&mut FragmentSink<'_>>,
    ) -> Result<String, SdkError> {
        SearchClient::query(self, context, query, options, on_fragment).await
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] SdkError),
}

/// A prepared exchange: who is asking, in which session, and what.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_key: String,
    pub session_id: String,
    pub query: String,
    pub options: QueryOptions,
}

pub struct ChatService {
    cache: Arc<ConversationCache>,
    backend: Arc<dyn AssistantBackend>,
}

impl ChatService {
    pub fn new(cache: Arc<ConversationCache>, backend: Arc<dyn AssistantBackend>) -> Self {
        Self { cache, backend }
    }

    pub fn cache(&self) -> &Arc<ConversationCache> {
        &self.cache
    }

    /// Run one exchange and return the full answer.
    ///
    /// The conversation stays marked in use and locked for the whole upstream
    /// call, so exchanges within one conversation are serialized. The turn is
    /// recorded only when the call succeeds with a non-blank answer.
    pub async fn perform(
        &self,
        request: &ChatRequest,
        on_fragment: Option<&mut FragmentSink<'_>>,
    ) -> Result<String, ChatError> {
        let mut on_fragment = on_fragment;

        loop {
            let conversation = self
                .cache
                .resolve(&request.user_key, &request.session_id)
                .await?;
            let _in_use = conversation.acquire();
            let mut state = conversation.lock().await;
            if state.evicted {
                debug!("Conversation {} was evicted, resolving again", conversation.key());
                continue;
            }
            state.last_active = Instant::now();

            let context = ConversationContext {
                oaid: conversation.oaid(),
                mi_id: conversation.mi_id(),
                conversation_id: conversation.internal_id(),
                history: &state.history,
            };
            let answer = self
                .backend
                .query(context, &request.query, request.options, on_fragment.take())
                .await;

            let now = Instant::now();
            state.last_active = now;
            let answer = answer?;

            if answer.trim().is_empty() {
                debug!("Blank answer for {}, turn not recorded", conversation.key());
            } else {
                state.record_turn(&request.query, &answer, now);
                info!(
                    "Exchange on {} complete ({} turns)",
                    conversation.key(),
                    state.history.len() / 2
                );
            }
            return Ok(answer);
        }
    }
}
