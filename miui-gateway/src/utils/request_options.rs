use axum::http::HeaderMap;
use miui_search_sdk::{QueryOptions, UPSTREAM_MODEL};
use serde_json::Value;

use crate::core::ids;
use crate::core::store::DEFAULT_SESSION_ID;
use crate::utils::parser::JsonBody;

pub const SESSION_HEADER: &str = "ConversationId";

const DEEP_THINKING_KEYS: [&str; 3] = ["deep_thinking", "deepThinking", "isDeepThinking"];
const ONLINE_SEARCH_KEYS: [&str; 2] = ["online_search", "onlineSearch"];

/// Per-request switches gathered from body, headers and the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub stream: bool,
    pub deep_thinking: bool,
    pub online_search: bool,
}

impl RequestOptions {
    /// Body flags default to on; truthy headers override them and model-name
    /// suffixes have the final say.
    pub fn parse(body: &JsonBody, headers: &HeaderMap) -> Self {
        let mut deep_thinking = body_flag(body, &DEEP_THINKING_KEYS).unwrap_or(true);
        let mut online_search = body_flag(body, &ONLINE_SEARCH_KEYS).unwrap_or(true);

        if header_truthy(headers, "X-Deep-Thinking") {
            deep_thinking = true;
        }
        if header_truthy(headers, "X-Online-Search") {
            online_search = true;
        }
        if header_truthy(headers, "X-Disable-Search") {
            online_search = false;
        }

        if let Some(Value::String(model)) = body.get("model") {
            let model = model.to_lowercase();
            match (model.contains("-thinking"), model.contains("-search")) {
                (true, true) => {
                    deep_thinking = true;
                    online_search = true;
                },
                (true, false) => {
                    deep_thinking = true;
                    online_search = false;
                },
                (false, true) => {
                    deep_thinking = false;
                    online_search = true;
                },
                (false, false) => {},
            }
        }

        Self {
            stream: body_flag(body, &["stream"]).unwrap_or(false),
            deep_thinking,
            online_search,
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            deep_thinking: self.deep_thinking,
            online_search: self.online_search,
        }
    }
}

/// Whatever the client asks for, answers come from the one upstream model.
pub fn normalize_model(_requested: Option<&Value>) -> &'static str {
    UPSTREAM_MODEL
}

/// User key from `Authorization`, with any `Bearer ` prefix removed. Missing
/// header gets a fresh anonymous key, so such requests never share context.
pub fn user_key(headers: &HeaderMap) -> String {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if auth.is_empty() {
        return ids::anonymous_user_key();
    }
    match auth.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => auth[7..].trim().to_string(),
        _ => auth.to_string(),
    }
}

pub fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string()
}

/// First key holding a JSON bool; other value types are ignored.
fn body_flag(body: &JsonBody, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| body.get(*key).and_then(Value::as_bool))
}

fn header_truthy(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
}
