//! Client tests against a mocked upstream

use miui_search_sdk::{
    ClientConfig, ConversationContext, Message, QueryOptions, SdkError, SearchClient,
    history::decompress_history,
};
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/api/llm/browser/query";

fn client_for(server: &MockServer) -> SearchClient {
    SearchClient::new(ClientConfig::with_endpoint(format!(
        "{}{}",
        server.uri(),
        QUERY_PATH
    )))
    .unwrap()
}

fn context(history: &[Message]) -> ConversationContext<'_> {
    ConversationContext {
        oaid: "00112233aabbccdd",
        mi_id: "4000000001",
        conversation_id: "00112233aabbccdd1700000000000",
        history,
    }
}

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

#[tokio::test]
async fn test_query_streams_fragments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(header("accept", "text/event-stream"))
        .and(header("origin", "https://ai.search.miui.com"))
        .respond_with(event_stream(
            "data:{\"intentionInfo\":{\"intentionText\":\"chat\",\"end\":true}}\n\
             data:{\"answer\":\"Hel\"}\n\
             data:{\"answer\":\"lo\"}\n\
             data:[DONE]\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut fragments = Vec::new();
    let mut sink = |text: &str| fragments.push(text.to_string());

    let answer = client
        .query(context(&[]), "hi", QueryOptions::default(), Some(&mut sink))
        .await
        .unwrap();

    assert_eq!(answer, "Hello");
    assert_eq!(fragments, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn test_payload_carries_history_and_flags() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(event_stream("data:{\"answer\":\"ok\"}\n"))
        .mount(&server)
        .await;

    let history = vec![Message::user("first"), Message::assistant("reply")];
    let client = client_for(&server);
    client
        .query(
            context(&history),
            "second",
            QueryOptions {
                deep_thinking: false,
                online_search: false,
            },
            None,
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = requests[0].body_json().unwrap();

    assert_eq!(body["content"], "second");
    assert_eq!(body["model"], "DOUBAO");
    assert_eq!(body["chatType"], "SUMMARY");
    assert_eq!(body["business"], "BROWSER");
    assert_eq!(body["oaid"], "00112233aabbccdd");
    assert_eq!(body["miId"], "4000000001");
    assert_eq!(body["conversationId"], "00112233aabbccdd1700000000000");
    assert_eq!(body["onlineSearch"], false);
    assert!(body.get("isDeepThinking").is_none());
    assert!(
        body["searchId"]
            .as_str()
            .unwrap()
            .starts_with("00112233aabbccdd")
    );

    let raw: Vec<u8> = serde_json::from_value(body["rawLastQueryList"].clone()).unwrap();
    assert_eq!(decompress_history(&raw).unwrap(), history);
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .query(context(&[]), "hi", QueryOptions::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::UpstreamStatus { status: 503 }));
}

#[tokio::test]
async fn test_json_response_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 401})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .query(context(&[]), "hi", QueryOptions::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::UnexpectedContentType(_)));
}

#[tokio::test]
async fn test_unreachable_upstream_is_a_transport_error() {
    let server = MockServer::start().await;
    let endpoint = format!("{}{}", server.uri(), QUERY_PATH);
    drop(server);

    let client = SearchClient::new(ClientConfig::with_endpoint(endpoint)).unwrap();
    let err = client
        .query(context(&[]), "hi", QueryOptions::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::Transport(_)));
}
