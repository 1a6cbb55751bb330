use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use wfcore::{
    EventBus, ExecutionEvent, ExecutionId, IntegrationLookup, NodeContext, NodeError, NodeEvent,
    NodeExecutor, Value,
};
use wfnodes::{HttpClient, HttpMethod, HttpRequest, HttpRequestNode, HttpResponse};

/// Records every request and answers with a fixed response.
struct MockClient {
    status: u16,
    body: String,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockClient {
    fn new(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().expect("a request was sent")
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status: self.status,
            headers: [("content-type".to_string(), "application/json".to_string())].into(),
            body: self.body.clone(),
        })
    }
}

/// Never answers.
struct HangingClient;

#[async_trait]
impl HttpClient for HangingClient {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, String> {
        std::future::pending().await
    }
}

struct Integrations;

#[async_trait]
impl IntegrationLookup for Integrations {
    async fn get_integration(&self, id: &str) -> Option<Value> {
        (id == "crm").then(|| {
            json!({ "headers": { "Authorization": "Bearer secret", "X-Client": "base" } })
        })
    }
}

fn context(config: Value) -> NodeContext {
    let Value::Object(map) = config else {
        panic!("config must be an object");
    };
    NodeContext::new("http", map)
}

#[tokio::test]
async fn test_get_is_the_default_method() {
    let client = MockClient::new(200, r#"{"ok": true}"#);
    let node = HttpRequestNode::with_client(client.clone());

    let output = node
        .execute(context(json!({ "url": "https://api.example.com/status" })))
        .await
        .unwrap();

    assert_eq!(output["status"], json!(200));
    assert_eq!(output["body"], json!({ "ok": true }));
    assert_eq!(output["headers"]["content-type"], json!("application/json"));

    let request = client.last_request();
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.url, "https://api.example.com/status");
    assert!(request.body.is_none());
}

#[tokio::test]
async fn test_post_sends_body_and_headers() {
    let client = MockClient::new(201, "created");
    let node = HttpRequestNode::with_client(client.clone());

    let output = node
        .execute(context(json!({
            "method": "post",
            "url": "https://api.example.com/items",
            "headers": { "X-Attempt": 2, "Content-Type": "application/json" },
            "body": { "name": "widget" },
        })))
        .await
        .unwrap();

    assert_eq!(output["status"], json!(201));
    assert_eq!(output["body"], json!("created"), "non-JSON bodies are kept as text");

    let request = client.last_request();
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.headers["X-Attempt"], "2");
    assert_eq!(request.body, Some(json!({ "name": "widget" })));
}

#[tokio::test]
async fn test_error_status_is_reported_as_warning() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let node = HttpRequestNode::with_client(MockClient::new(503, "unavailable"));
    let ctx = context(json!({ "url": "https://api.example.com/status" }))
        .with_events(bus.create_emitter(ExecutionId::nil(), "http".to_string()));

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output["status"], json!(503));

    let mut warnings = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeMessage { event: NodeEvent::Warning { message }, .. } = event {
            warnings.push(message);
        }
    }
    assert_eq!(warnings, vec!["Response status: 503".to_string()]);
}

#[tokio::test]
async fn test_integration_headers_sit_beneath_node_headers() {
    let client = MockClient::new(200, "{}");
    let node = HttpRequestNode::with_client(client.clone());
    let ctx = context(json!({
        "url": "https://crm.example.com/contacts",
        "integration_id": "crm",
        "headers": { "X-Client": "workflow" },
    }))
    .with_integrations(Arc::new(Integrations));

    node.execute(ctx).await.unwrap();

    let request = client.last_request();
    assert_eq!(request.headers["Authorization"], "Bearer secret");
    assert_eq!(request.headers["X-Client"], "workflow");
}

#[tokio::test]
async fn test_unknown_integration_fails() {
    let node = HttpRequestNode::with_client(MockClient::new(200, "{}"));
    let ctx = context(json!({ "url": "https://x.example.com", "integration_id": "nope" }))
        .with_integrations(Arc::new(Integrations));

    let err = node.execute(ctx).await.unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn test_missing_url_and_bad_method() {
    let node = HttpRequestNode::with_client(MockClient::new(200, "{}"));

    let err = node.execute(context(json!({ "method": "GET" }))).await.unwrap_err();
    assert_eq!(err, NodeError::MissingConfig("url".into()));

    let err = node
        .execute(context(json!({ "method": "TRACE", "url": "https://x.example.com" })))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_timeout_is_reported() {
    let node = HttpRequestNode::with_client(Arc::new(HangingClient));

    let err = node
        .execute(context(json!({ "url": "https://slow.example.com", "timeout": 0.1 })))
        .await
        .unwrap_err();

    match err {
        NodeError::ExecutionFailed(message) => {
            assert!(message.contains("timed out"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unrepresentable_timeout_is_rejected() {
    let client = MockClient::new(200, "{}");
    let node = HttpRequestNode::with_client(client.clone());

    let err = node
        .execute(context(json!({ "url": "https://x.example.com", "timeout": 1e300 })))
        .await
        .unwrap_err();

    assert!(
        matches!(err, NodeError::InvalidConfig { ref field, .. } if field == "timeout"),
        "{:?}",
        err
    );
    assert!(client.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancellation_interrupts_request() {
    let node = HttpRequestNode::with_client(Arc::new(HangingClient));
    let token = CancellationToken::new();
    let ctx =
        context(json!({ "url": "https://slow.example.com" })).with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    assert_eq!(node.execute(ctx).await, Err(NodeError::Cancelled));
}

#[test]
fn test_validate_config() {
    let node = HttpRequestNode::with_client(Arc::new(HangingClient));
    let config = |v: Value| v.as_object().cloned().unwrap();

    assert!(node.validate_config(&config(json!({ "url": "https://x" }))).is_ok());
    assert!(node
        .validate_config(&config(json!({ "url": "{{n1.next}}", "method": "{{n1.verb}}" })))
        .is_ok());
    assert_eq!(
        node.validate_config(&config(json!({ "method": "GET" }))),
        Err(NodeError::MissingConfig("url".into()))
    );
    assert!(node
        .validate_config(&config(json!({ "url": "https://x", "method": "BREW" })))
        .is_err());
    assert!(node
        .validate_config(&config(json!({ "url": "https://x", "timeout": 0 })))
        .is_err());
}

/// Serve one canned HTTP response and hand back the raw request head.
async fn serve_once(
    status_line: &'static str,
    body: &'static str,
) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let response = format!(
            concat!(
                "HTTP/1.1 {}\r\n",
                "Content-Type: application/json\r\n",
                "Content-Length: {}\r\n",
                "Connection: close\r\n\r\n{}"
            ),
            status_line,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&head).to_string());
    });

    (format!("http://{}", addr), rx)
}

#[tokio::test]
async fn test_reqwest_client_against_local_server() {
    let (base, request_head) = serve_once("200 OK", r#"{"items":[1,2,3]}"#).await;
    let node = HttpRequestNode::new();

    let output = node
        .execute(context(json!({
            "url": format!("{}/items", base),
            "headers": { "X-Token": "abc" },
            "timeout": 5,
        })))
        .await
        .unwrap();

    assert_eq!(output["status"], json!(200));
    assert_eq!(output["body"], json!({ "items": [1, 2, 3] }));

    let head = request_head.await.unwrap().to_lowercase();
    assert!(head.starts_with("get /items http/1.1"));
    assert!(head.contains("x-token: abc"));
}

#[tokio::test]
async fn test_reqwest_client_times_out_on_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let node = HttpRequestNode::new();
    let err = node
        .execute(context(json!({ "url": format!("http://{}/", addr), "timeout": 1 })))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NodeError::ExecutionFailed(format!("HTTP request to http://{}/ timed out after 1s", addr))
    );
}
