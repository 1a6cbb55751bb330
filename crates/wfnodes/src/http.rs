use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use wfcore::{
    ConfigField, NodeContext, NodeError, NodeExecutor, NodeMetadata, Value, ValueExt, ValueMap,
};

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method.trim().to_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Transport used by [`HttpRequestNode`]. Errors are human-readable messages.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// `reqwest`-backed transport
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        builder = match request.body {
            Some(Value::String(text)) => builder.body(text),
            Some(body) => builder.json(&body),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;

        Ok(HttpResponse { status, headers, body })
    }
}

/// HTTP request node
pub struct HttpRequestNode {
    client: Arc<dyn HttpClient>,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self::with_client(Arc::new(ReqwestClient::new()))
    }

    pub fn with_client(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    async fn build_request(&self, ctx: &NodeContext) -> Result<HttpRequest, NodeError> {
        let method = match ctx.config.get("method") {
            None | Some(Value::Null) => HttpMethod::Get,
            Some(value) => {
                let raw = value.to_canonical_string();
                HttpMethod::parse(&raw).ok_or_else(|| {
                    NodeError::Configuration(format!("Unsupported method: {}", raw))
                })?
            }
        };

        let url = ctx.require_str("url")?.trim().to_string();
        if url.is_empty() {
            return Err(NodeError::MissingConfig("url".to_string()));
        }

        let mut headers = BTreeMap::new();
        if let Some(integration_id) = ctx.config.get("integration_id").and_then(Value::as_str) {
            let integration = ctx
                .integrations
                .get_integration(integration_id)
                .await
                .ok_or_else(|| {
                    let message = format!("Integration '{}' not found", integration_id);
                    NodeError::ExecutionFailed(message)
                })?;
            if let Some(Value::Object(base)) = integration.get("headers") {
                collect_headers(base, &mut headers);
            }
        }
        match ctx.config.get("headers") {
            None | Some(Value::Null) => {}
            Some(Value::Object(own)) => collect_headers(own, &mut headers),
            Some(other) => return Err(NodeError::invalid("headers", "object", other.type_name())),
        }

        let body = ctx.config.get("body").filter(|b| !b.is_null()).cloned();

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_headers(source: &ValueMap, into: &mut BTreeMap<String, String>) {
    for (key, value) in source {
        into.insert(key.clone(), value.to_canonical_string());
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http_request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let request = self.build_request(&ctx).await?;
        let timeout_secs = ctx.get_f64("timeout")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs <= 0.0 {
            return Err(NodeError::invalid(
                "timeout",
                "positive number of seconds",
                timeout_secs.to_string(),
            ));
        }
        let limit = crate::seconds("timeout", timeout_secs)?;

        ctx.events.info(format!("{} {}", request.method, request.url));
        tracing::info!(
            node_id = %ctx.node_id,
            method = %request.method,
            url = %request.url,
            "HTTP request"
        );

        let url = request.url.clone();
        let send = tokio::time::timeout(limit, self.client.send(request));
        let response = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
            result = send => match result {
                Ok(Ok(response)) => response,
                Ok(Err(message)) => return Err(NodeError::ExecutionFailed(message)),
                Err(_) => {
                    return Err(NodeError::ExecutionFailed(format!(
                        "HTTP request to {} timed out after {}s",
                        url, timeout_secs
                    )))
                }
            },
        };

        if response.status >= 400 {
            ctx.events.warn(format!("Response status: {}", response.status));
        } else {
            ctx.events.info(format!("Response status: {}", response.status));
        }

        let body = serde_json::from_str::<Value>(&response.body)
            .unwrap_or(Value::String(response.body));
        let headers: ValueMap = response
            .headers
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        Ok(serde_json::json!({
            "status": response.status,
            "headers": headers,
            "body": body,
        }))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        match config.get("url") {
            None | Some(Value::Null) => return Err(NodeError::MissingConfig("url".to_string())),
            Some(Value::String(url)) if url.trim().is_empty() => {
                return Err(NodeError::MissingConfig("url".to_string()))
            }
            Some(Value::String(_)) => {}
            Some(other) => return Err(NodeError::invalid("url", "string", other.type_name())),
        }

        if let Some(Value::String(method)) = config.get("method") {
            if !method.contains("{{") && HttpMethod::parse(method).is_none() {
                return Err(NodeError::Configuration(format!("Unsupported method: {}", method)));
            }
        }

        if let Some(Value::Number(timeout)) = config.get("timeout") {
            match timeout.as_f64() {
                Some(t) if t > 0.0 => {
                    crate::seconds("timeout", t)?;
                }
                _ => {
                    return Err(NodeError::invalid(
                        "timeout",
                        "positive number of seconds",
                        timeout.to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            config: vec![
                ConfigField::optional("method", "GET, POST, PUT, DELETE or PATCH (default GET)"),
                ConfigField::required("url", "Request URL, may contain templates"),
                ConfigField::optional("headers", "Header map, values may contain templates"),
                ConfigField::optional("body", "JSON body"),
                ConfigField::optional("timeout", "Seconds before the request fails (default 30)"),
                ConfigField::optional(
                    "integration_id",
                    "Integration whose headers are sent as defaults",
                ),
            ],
        }
    }
}
