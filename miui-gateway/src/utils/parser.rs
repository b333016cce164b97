//! Prompt extraction from the three client request shapes.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::models::error::ApiError;

pub type JsonBody = Map<String, Value>;

/// Separator placed between the system prompt and the user text.
const USER_INPUT_MARKER: &str = "\n\n用户输入：";

/// System prompt and user text pulled out of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
    }

    /// The single query string sent upstream.
    pub fn into_query(self) -> String {
        build_final_query(&self.system, &self.user)
    }
}

/// Parse a request body into a JSON object. An empty body counts as `{}`.
pub fn parse_json_body(body: &Bytes) -> Result<JsonBody, ApiError> {
    if body.is_empty() {
        return Ok(JsonBody::new());
    }
    serde_json::from_slice::<JsonBody>(body).map_err(|_| ApiError::InvalidJson)
}

/// Flatten message content into plain text.
///
/// Strings are taken as is, arrays are concatenated part by part, and objects
/// contribute their `text` field or, failing that, their nested `content`.
pub fn extract_content(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts.iter().map(extract_content).collect(),
        Value::Object(obj) => match obj.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => obj.get("content").map(extract_content).unwrap_or_default(),
        },
        _ => String::new(),
    }
}

/// Chat-completions `messages`: system messages joined by newline, last
/// non-empty user message wins.
pub fn extract_messages(raw: Option<&Value>) -> Prompt {
    let Some(Value::Array(messages)) = raw else {
        return Prompt::default();
    };

    let mut system_parts = Vec::new();
    let mut user = String::new();
    for message in messages.iter().filter_map(Value::as_object) {
        let content = message.get("content").map(extract_content).unwrap_or_default();
        if content.is_empty() {
            continue;
        }
        match message.get("role").and_then(Value::as_str) {
            Some("system") => system_parts.push(content),
            Some("user") => user = content,
            _ => {},
        }
    }

    Prompt {
        system: system_parts.join("\n"),
        user,
    }
}

/// Responses `input` plus optional `instructions`.
pub fn extract_responses_input(body: &JsonBody) -> Prompt {
    let mut prompt = match body.get("input") {
        Some(Value::String(text)) => Prompt {
            system: String::new(),
            user: text.clone(),
        },
        Some(input @ Value::Array(items)) => {
            let role_messages = items
                .first()
                .and_then(Value::as_object)
                .is_some_and(|first| first.contains_key("role"));
            if role_messages {
                extract_messages(Some(input))
            } else {
                Prompt {
                    system: String::new(),
                    user: extract_content(input),
                }
            }
        },
        _ => Prompt::default(),
    };

    if let Some(Value::String(instructions)) = body.get("instructions")
        && !instructions.is_empty()
    {
        prompt.system = if prompt.system.is_empty() {
            instructions.clone()
        } else {
            format!("{}\n{}", instructions, prompt.system)
        };
    }

    prompt
}

/// Claude messages: top-level `system` plus the last non-empty user message.
pub fn extract_claude_messages(body: &JsonBody) -> Prompt {
    let system = body.get("system").map(extract_content).unwrap_or_default();

    let user = match body.get("messages") {
        Some(Value::Array(messages)) => messages
            .iter()
            .filter_map(Value::as_object)
            .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .map(|m| m.get("content").map(extract_content).unwrap_or_default())
            .filter(|content| !content.is_empty())
            .last()
            .unwrap_or_default(),
        _ => String::new(),
    };

    Prompt { system, user }
}

pub fn build_final_query(system: &str, user: &str) -> String {
    if system.is_empty() {
        user.to_string()
    } else {
        format!("{}{}{}", system, USER_INPUT_MARKER, user)
    }
}
