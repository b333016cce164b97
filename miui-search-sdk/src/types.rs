//! Wire and domain types shared by the client and its callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Text sent by the caller
    User,
    /// Text produced by the assistant
    Assistant,
}

/// One turn of a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Producer of this turn
    pub source: Source,
    /// Plain text content
    pub content: String,
}

impl Message {
    /// A user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            source: Source::User,
            content: content.into(),
        }
    }

    /// An assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            source: Source::Assistant,
            content: content.into(),
        }
    }
}

/// Upstream identity of the conversation a query belongs to.
///
/// `conversation_id` is the internal id the upstream correlates turns by; it
/// is unrelated to any client-visible session id.
#[derive(Debug, Clone, Copy)]
pub struct ConversationContext<'a> {
    /// Stable per-user upstream token
    pub oaid: &'a str,
    /// Synthetic numeric upstream user id
    pub mi_id: &'a str,
    /// Internal upstream conversation id
    pub conversation_id: &'a str,
    /// Turns exchanged so far, oldest first
    pub history: &'a [Message],
}

/// Assistant modes toggled per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Ask the assistant to reason before answering
    pub deep_thinking: bool,
    /// Allow the assistant to search the web
    pub online_search: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            deep_thinking: true,
            online_search: true,
        }
    }
}

/// Request body posted to the assistant endpoint.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub content: String,
    pub oaid: String,
    pub chat_type: String,
    pub search_id: String,
    pub mi_id: String,
    pub model: String,
    pub business: String,
    pub conversation_id: String,
    pub support_video: bool,
    pub app_version_code: String,
    pub device_type: String,
    pub device_model: String,
    pub scene: String,
    /// Gzipped JSON history; serialized as an array of byte values
    pub raw_last_query_list: Vec<u8>,
    pub online_search: bool,
    pub ai_shooting_mode: Map<String, Value>,
    pub is_un_login_system: bool,
    pub query_source: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_deep_thinking: bool,
}

/// One `data:` record of the assistant event stream.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub intention_info: Option<IntentionInfo>,
}

/// Intent classification the upstream emits ahead of the answer.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentionInfo {
    #[serde(default)]
    pub intention_text: Option<String>,
    #[serde(default)]
    pub end: bool,
}
