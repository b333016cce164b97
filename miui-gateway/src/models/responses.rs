//! OpenAI responses API objects

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseObject {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    pub model: String,
    pub output: Vec<OutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
}

impl ResponseObject {
    /// Skeleton announced before any output exists.
    pub fn started(id: &str, model: &str, created_at: i64) -> Self {
        Self {
            id: id.to_string(),
            object: "response".to_string(),
            created_at,
            model: model.to_string(),
            output: Vec::new(),
            output_text: None,
            usage: None,
        }
    }

    pub fn completed(id: &str, message_id: &str, model: &str, created_at: i64, text: String) -> Self {
        Self {
            output: vec![OutputItem {
                id: message_id.to_string(),
                r#type: "message".to_string(),
                role: "assistant".to_string(),
                content: vec![OutputContent {
                    r#type: "output_text".to_string(),
                    text: text.clone(),
                }],
            }],
            output_text: Some(text),
            usage: Some(ResponseUsage::default()),
            ..Self::started(id, model, created_at)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputItem {
    pub id: String,
    pub r#type: String,
    pub role: String,
    pub content: Vec<OutputContent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputContent {
    pub r#type: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ResponseUsage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
}

/// Streaming events, tagged by `type` exactly as they are named on the wire.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum ResponseStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: ResponseObject },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: i32,
        content_index: i32,
        delta: String,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: i32,
        content_index: i32,
        text: String,
    },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseObject },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ResponseStreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "response.created",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::OutputTextDone { .. } => "response.output_text.done",
            Self::Completed { .. } => "response.completed",
            Self::Error { .. } => "error",
        }
    }
}
