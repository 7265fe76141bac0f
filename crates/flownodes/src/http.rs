use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, Value};
use reqwest::{Method, RequestBuilder, StatusCode};
use std::collections::HashMap;

/// HTTP request node.
///
/// With a `batch` config array it sends one request per element, using the
/// element as the body. Each delivered response is recorded in the run
/// variables under `http.batch.<node id>`, and a retried attempt resumes
/// after the last delivered element instead of re-sending it. Connect
/// errors, timeouts, 429 and 5xx are reported as transient so the engine
/// retries them.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured client (proxies, TLS, default timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, ctx: &NodeContext, method: &Method, url: &str, body: Option<&Value>) -> RequestBuilder {
        let mut request = self.client.request(method.clone(), url);

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        match body {
            Some(Value::String(text)) => request.body(text.clone()),
            Some(Value::Null) | None => request,
            Some(other) => request.json(&other.to_json()),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, HashMap<String, Value>, String), NodeError> {
        let response = request.send().await.map_err(classify)?;

        let status = response.status();
        let headers: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();
        let body = response.text().await.map_err(classify)?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(NodeError::Transient(format!("HTTP {}: {}", status, body)));
        }
        if status.is_client_error() {
            return Err(NodeError::Permanent(format!("HTTP {}: {}", status, body)));
        }
        Ok((status.as_u16(), headers, body))
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Append one delivered response under `key` in the run variables.
async fn record_delivery(ctx: &NodeContext, key: &str, response: Value) {
    let mut variables = ctx.variables.write().await;
    match variables
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(done) => done.push(response),
        other => *other = Value::Array(vec![response]),
    }
}

fn classify(error: reqwest::Error) -> NodeError {
    if error.is_builder() {
        NodeError::Configuration(format!("Invalid request: {}", error))
    } else if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        NodeError::Transient(format!("HTTP request failed: {}", error))
    } else {
        NodeError::Permanent(format!("HTTP request failed: {}", error))
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url_value = ctx.require_config("url")?;
        let url = url_value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "url".to_string(),
            expected: "string".to_string(),
            actual: url_value.type_name().to_string(),
        })?;
        let method_value = ctx.get_config_or("method", Value::String("GET".to_string()));
        let method_name = method_value.as_str().unwrap_or("GET").to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| NodeError::Configuration(format!("Unsupported method: {}", method_name)))?;

        if let Some(batch) = ctx.config.get("batch").and_then(Value::as_array) {
            // Responses already delivered by earlier attempts of this node.
            let key = format!("http.batch.{}", ctx.node_id);
            let delivered = match ctx.variable(&key).await {
                Some(Value::Array(done)) => done.len().min(batch.len()),
                _ => 0,
            };
            if delivered > 0 {
                ctx.events.info(format!("{} {} resuming at item {} of {}", method, url, delivered + 1, batch.len()));
            } else {
                ctx.events.info(format!("{} {} x{}", method, url, batch.len()));
            }

            for (i, body) in batch.iter().enumerate().skip(delivered) {
                let (status, _, text) = self.send(self.build(&ctx, &method, url, Some(body))).await?;
                let mut entry = HashMap::new();
                entry.insert("status".to_string(), Value::from(status as u64));
                entry.insert("body".to_string(), Value::String(text));
                record_delivery(&ctx, &key, Value::Object(entry)).await;
                ctx.events.progress((i + 1) as f64 * 100.0 / batch.len() as f64, None);
            }

            let responses = match ctx.variable(&key).await {
                Some(Value::Array(done)) => done,
                _ => Vec::new(),
            };
            return Ok(NodeOutput::new()
                .with_output("count", responses.len() as u64)
                .with_output("responses", responses));
        }

        ctx.events.info(format!("{} {}", method, url));
        let request = self.build(&ctx, &method, url, ctx.inputs.get("body"));
        let (status, headers, body) = self.send(request).await?;

        ctx.events.info(format!("Response status: {}", status));

        Ok(NodeOutput::new()
            .with_output("status", status as u64)
            .with_output("body", body)
            .with_output("headers", Value::Object(headers)))
    }

    fn required_config(&self) -> &[&str] {
        &["url"]
    }

    fn estimate_cost(&self, config: &HashMap<String, Value>) -> Option<u64> {
        Some(config.get("batch").and_then(Value::as_array).map_or(1, |b| b.len() as u64))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
