//! HTTP client for the assistant query endpoint

use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Map;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    errors::{Result, SdkError},
    history::compress_history,
    stream_parser::{FragmentSink, parse_event_stream},
    types::{ConversationContext, QueryOptions, QueryPayload},
};

/// Production endpoint of the browser AI-search assistant.
pub const DEFAULT_ENDPOINT: &str = "https://ai.search.miui.com/api/llm/browser/query";

/// The only assistant identity the upstream exposes.
pub const UPSTREAM_MODEL: &str = "DOUBAO";

const EVENT_STREAM: &str = "text/event-stream";

/// Configuration for [`SearchClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Query endpoint URL
    pub endpoint: String,
    /// Headers sent with every request
    pub headers: Vec<(String, String)>,
    /// TCP/TLS connect timeout; the response itself is never timed out
    pub connect_timeout: Duration,
    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            headers: browser_headers(),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 256,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at another endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// Headers the upstream expects from the MIUI browser.
fn browser_headers() -> Vec<(String, String)> {
    [
        ("sec-ch-ua-platform", "\"Android\""),
        (
            "user-agent",
            "Mozilla/5.0 (Linux; U; Android 11; zh-cn; M2012K11AC Build/RKQ1.200826.002) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.7049.79 Mobile Safari/537.36 XiaoMi/MiuiBrowser/20.11.1010115",
        ),
        ("accept", EVENT_STREAM),
        ("content-type", "application/json"),
        ("origin", "https://ai.search.miui.com"),
        (
            "referer",
            "https://ai.search.miui.com/browserAiSearch/?source=homepage",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Search ids only need to be unique per query; the upstream derives them
/// from the user's token and the clock.
pub fn new_search_id(oaid: &str) -> String {
    format!("{}{}", oaid, Utc::now().timestamp_millis())
}

/// Client for the assistant's streaming query API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SearchClient {
    /// Build a client from `config`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SdkError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SdkError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;

        info!("Search client configured for {}", config.endpoint);

        Ok(Self {
            http,
            endpoint: config.endpoint,
        })
    }

    /// Endpoint this client posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the request body for one query.
    pub fn build_payload(
        &self,
        context: ConversationContext<'_>,
        query: &str,
        options: QueryOptions,
    ) -> Result<QueryPayload> {
        Ok(QueryPayload {
            content: query.to_string(),
            oaid: context.oaid.to_string(),
            chat_type: "SUMMARY".to_string(),
            search_id: new_search_id(context.oaid),
            mi_id: context.mi_id.to_string(),
            model: UPSTREAM_MODEL.to_string(),
            business: "BROWSER".to_string(),
            conversation_id: context.conversation_id.to_string(),
            support_video: true,
            app_version_code: "201110100".to_string(),
            device_type: "phone".to_string(),
            device_model: "M2012K11AC".to_string(),
            scene: "main".to_string(),
            raw_last_query_list: compress_history(context.history)?,
            online_search: options.online_search,
            ai_shooting_mode: Map::new(),
            is_un_login_system: false,
            query_source: "operationWord".to_string(),
            is_deep_thinking: options.deep_thinking,
        })
    }

    /// Send `query` and stream the answer.
    ///
    /// Fragments are handed to `on_fragment` as they arrive; the full answer
    /// is returned once the upstream finishes. Dropping the returned future
    /// aborts the upstream request.
    pub async fn query(
        &self,
        context: ConversationContext<'_>,
        query: &str,
        options: QueryOptions,
        on_fragment: Option<&mut FragmentSink<'_>>,
    ) -> Result<String> {
        let payload = self.build_payload(context, query, options)?;

        debug!(
            "Querying upstream (conversation: {}, history turns: {}, deep_thinking: {}, online_search: {})",
            context.conversation_id,
            context.history.len(),
            options.deep_thinking,
            options.online_search
        );

        let response = self.http.post(&self.endpoint).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Upstream rejected query with HTTP {}", status);
            return Err(SdkError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && !content_type.to_ascii_lowercase().starts_with(EVENT_STREAM)
        {
            return Err(SdkError::UnexpectedContentType(content_type.to_string()));
        }

        parse_event_stream(response.bytes_stream(), on_fragment).await
    }
}
