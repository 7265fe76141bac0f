use flowcore::{
    EventBus, EventEmitter, ExecutionEvent, ExecutionId, GraphModel, NodeContext, NodeError, NodeEvent, NodeExecutor, Value,
    WorkflowEdge, WorkflowNode,
};
use flownodes::{
    register_all, standard_registry, DebugNode, DelayNode, HttpRequestNode, JsonParseNode,
    JsonStringifyNode, LoopNode, SetNode, TriggerNode,
};
use flowruntime::{ExecutionCore, ExecutionOptions, NodeRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Helper function to create a test context
fn create_test_context(
    node_type: &str,
    config: HashMap<String, Value>,
    inputs: HashMap<String, Value>,
) -> NodeContext {
    let mut ctx = NodeContext::new("test-node", node_type, EventEmitter::detached("test-node"));
    ctx.config = config;
    ctx.inputs = inputs;
    ctx
}

fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_trigger_passes_inputs_through() {
    let node = TriggerNode::manual();
    let ctx = create_test_context("manual", HashMap::new(), map(&[("user", Value::from("ada"))]));

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("user").and_then(|v| v.as_str()), Some("ada"));
}

#[tokio::test]
async fn test_trigger_required_config() {
    assert_eq!(TriggerNode::webhook().required_config(), &["path"]);
    assert_eq!(TriggerNode::schedule().required_config(), &["cron"]);
    assert!(TriggerNode::trigger().required_config().is_empty());
}

#[tokio::test]
async fn test_debug_prefers_input_message() {
    let ctx = create_test_context(
        "debug.log",
        map(&[("message", Value::from("from config"))]),
        map(&[("message", Value::from("from input"))]),
    );

    let output = DebugNode.execute(ctx).await.unwrap();
    assert_eq!(
        output.outputs.get("message").and_then(|v| v.as_str()),
        Some("from input")
    );
}

#[tokio::test]
async fn test_delay_passes_inputs_through() {
    let ctx = create_test_context(
        "time.delay",
        map(&[("delay_ms", Value::from(5u64))]),
        map(&[("x", Value::from(1u64))]),
    );

    let output = DelayNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("x").and_then(|v| v.as_u64()), Some(1));
}

#[tokio::test]
async fn test_delay_stops_on_cancellation() {
    let ctx = create_test_context(
        "time.delay",
        map(&[("delay_ms", Value::from(60_000u64))]),
        HashMap::new(),
    );
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { DelayNode.execute(ctx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("delay should stop promptly")
        .unwrap();
    assert_eq!(result.unwrap_err(), NodeError::Cancelled);
}

#[tokio::test]
async fn test_delay_rejects_negative_duration() {
    let ctx = create_test_context(
        "time.delay",
        map(&[("delay_ms", Value::Number(-5.0))]),
        HashMap::new(),
    );

    let err = DelayNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_json_parse() {
    let ctx = create_test_context(
        "transform.json_parse",
        HashMap::new(),
        map(&[("json", Value::from(r#"{"a": 1, "b": [true, null]}"#))]),
    );

    let output = JsonParseNode.execute(ctx).await.unwrap();
    let parsed = output.outputs.get("parsed").unwrap();
    assert_eq!(parsed.get("a").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(parsed.get("b").and_then(|v| v.as_array()).map(|a| a.len()), Some(2));
}

#[tokio::test]
async fn test_json_parse_errors() {
    let bad = create_test_context(
        "transform.json_parse",
        HashMap::new(),
        map(&[("json", Value::from("{not json"))]),
    );
    let err = JsonParseNode.execute(bad).await.unwrap_err();
    assert!(!err.is_transient());

    let wrong_type = create_test_context(
        "transform.json_parse",
        HashMap::new(),
        map(&[("json", Value::from(3u64))]),
    );
    let err = JsonParseNode.execute(wrong_type).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidInputType { .. }));

    let missing = create_test_context("transform.json_parse", HashMap::new(), HashMap::new());
    let err = JsonParseNode.execute(missing).await.unwrap_err();
    assert_eq!(err, NodeError::MissingInput("json".to_string()));
}

#[tokio::test]
async fn test_json_stringify_compact() {
    let ctx = create_test_context(
        "transform.json_stringify",
        map(&[("pretty", Value::Bool(false))]),
        map(&[("value", Value::Array(vec![Value::from(1u64), Value::from("two")]))]),
    );

    let output = JsonStringifyNode.execute(ctx).await.unwrap();
    let text = output.outputs.get("json").and_then(|v| v.as_str()).unwrap();
    assert!(!text.contains('\n'));
    assert!(text.contains("\"two\""));
}

#[tokio::test]
async fn test_set_merges_values_over_inputs() {
    let values = Value::Object(map(&[("status", Value::from("done")), ("x", Value::from(2u64))]));
    let ctx = create_test_context(
        "transform.set",
        map(&[("values", values)]),
        map(&[("x", Value::from(1u64)), ("y", Value::from(3u64))]),
    );

    let output = SetNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("x").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(output.outputs.get("y").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(output.outputs.get("status").and_then(|v| v.as_str()), Some("done"));
}

#[tokio::test]
async fn test_set_requires_object() {
    let ctx = create_test_context(
        "transform.set",
        map(&[("values", Value::from("nope"))]),
        HashMap::new(),
    );
    let err = SetNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_loop_over_items_with_cap() {
    let items = Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    let ctx = create_test_context(
        "flow.loop",
        map(&[("max_iterations", Value::from(2u64))]),
        map(&[("items", items)]),
    );

    let output = LoopNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("count").and_then(|v| v.as_u64()), Some(2));
    let results = output.outputs.get("results").and_then(|v| v.as_array()).unwrap();
    assert_eq!(results[1].get("item").and_then(|v| v.as_str()), Some("b"));
    assert_eq!(results[1].get("index").and_then(|v| v.as_u64()), Some(1));
}

#[tokio::test]
async fn test_loop_streams_each_result() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let mut ctx = create_test_context(
        "flow.loop",
        HashMap::new(),
        map(&[("items", Value::Array(vec![Value::from("x"), Value::from("y")]))]),
    );
    ctx.events = bus.create_emitter(ExecutionId::nil(), "test-node".to_string());

    LoopNode.execute(ctx).await.unwrap();

    let mut streamed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeEvent {
            event: NodeEvent::Data { port, value },
            ..
        } = event
        {
            assert_eq!(port, "results");
            streamed.push(value.get("item").and_then(|v| v.as_str()).map(str::to_string));
        }
    }
    assert_eq!(streamed, vec![Some("x".to_string()), Some("y".to_string())]);
}

#[tokio::test]
async fn test_loop_counts_without_items() {
    let ctx = create_test_context(
        "flow.loop",
        map(&[("max_iterations", Value::from(25u64))]),
        HashMap::new(),
    );
    let output = LoopNode.execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("count").and_then(|v| v.as_u64()), Some(25));

    let empty = create_test_context("flow.loop", HashMap::new(), HashMap::new());
    assert!(LoopNode.execute(empty).await.is_err());
}

#[test]
fn test_cost_estimates() {
    assert_eq!(
        LoopNode.estimate_cost(&map(&[("max_iterations", Value::from(500u64))])),
        Some(500)
    );
    assert_eq!(LoopNode.estimate_cost(&HashMap::new()), Some(u64::MAX));

    let http = HttpRequestNode::new();
    assert_eq!(http.estimate_cost(&HashMap::new()), Some(1));
    let batch = Value::Array((0..1500u64).map(Value::from).collect());
    assert_eq!(http.estimate_cost(&map(&[("batch", batch)])), Some(1500));
    assert_eq!(http.required_config(), &["url"]);
}

#[tokio::test]
async fn test_http_rejects_bad_method() {
    let ctx = create_test_context(
        "http.request",
        map(&[
            ("url", Value::from("http://127.0.0.1:9/")),
            ("method", Value::from("NOT A METHOD")),
        ]),
        HashMap::new(),
    );
    let err = HttpRequestNode::new().execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

/// Serve one canned HTTP response on a local port.
async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });
    format!("http://{}/", addr)
}

fn local_http_node() -> HttpRequestNode {
    HttpRequestNode::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

#[tokio::test]
async fn test_http_success() {
    let url = serve_once("200 OK", "hello").await;
    let ctx = create_test_context("http.request", map(&[("url", Value::from(url))]), HashMap::new());

    let output = local_http_node().execute(ctx).await.unwrap();
    assert_eq!(output.outputs.get("status").and_then(|v| v.as_u64()), Some(200));
    assert_eq!(output.outputs.get("body").and_then(|v| v.as_str()), Some("hello"));
}

#[tokio::test]
async fn test_http_server_error_is_transient() {
    let url = serve_once("503 Service Unavailable", "").await;
    let ctx = create_test_context("http.request", map(&[("url", Value::from(url))]), HashMap::new());

    let err = local_http_node().execute(ctx).await.unwrap_err();
    assert!(err.is_transient(), "503 should be retried: {}", err);
}

#[tokio::test]
async fn test_http_client_error_is_permanent() {
    let url = serve_once("404 Not Found", "missing").await;
    let ctx = create_test_context("http.request", map(&[("url", Value::from(url))]), HashMap::new());

    let err = local_http_node().execute(ctx).await.unwrap_err();
    assert!(!err.is_transient(), "404 should not be retried: {}", err);
}

/// Answer every request with 200, except request number `fail_on` which
/// gets a 503. Returns the URL and the request counter.
async fn serve_counting(fail_on: usize) -> (String, Arc<AtomicUsize>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Read the head and the whole body before answering.
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            let hit = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let status_line = if hit == fail_on { "503 Service Unavailable" } else { "200 OK" };
            let body = format!("hit {}", hit);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{}/", addr), hits)
}

#[tokio::test]
async fn test_http_batch_retry_skips_delivered_items() {
    let (url, hits) = serve_counting(2).await;
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(TriggerNode::manual())).unwrap();
    registry.register(Arc::new(local_http_node())).unwrap();

    let nodes = vec![
        WorkflowNode::new("start", "manual"),
        WorkflowNode::new("post", "http.request")
            .with_config("url", url)
            .with_config("method", "POST")
            .with_config("batch", Value::Array(vec![Value::from("first"), Value::from("second")]))
            .with_retry(1, 1),
    ];
    let graph = Arc::new(GraphModel::new(nodes, vec![WorkflowEdge::new("start", "post")]).unwrap());
    let core = ExecutionCore::new(graph, Arc::new(registry), ExecutionOptions::default());

    let result = core.execute(HashMap::new()).await;
    assert!(result.success, "{:?}", result.state("post"));
    assert_eq!(result.state("post").map(|s| s.attempts), Some(2));
    // First item once, second item twice (503 then 200).
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(result.output("post", "count").and_then(|v| v.as_u64()), Some(2));
    let bodies: Vec<&str> = match result.output("post", "responses") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|r| r.get("body").and_then(|b| b.as_str()))
            .collect(),
        other => panic!("unexpected responses: {:?}", other),
    };
    assert_eq!(bodies, vec!["hit 1", "hit 3"]);
}

#[tokio::test]
async fn test_http_batch_resumes_from_recorded_responses() {
    let (url, hits) = serve_counting(0).await;
    let config = map(&[
        ("url", Value::from(url)),
        ("method", Value::from("POST")),
        ("batch", Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])),
    ]);
    let mut ctx = create_test_context("http.request", config, HashMap::new());
    ctx.attempt = 2;
    let mut earlier = HashMap::new();
    earlier.insert("status".to_string(), Value::from(200u64));
    earlier.insert("body".to_string(), Value::from("earlier"));
    ctx.set_variable("http.batch.test-node", Value::Array(vec![Value::Object(earlier)]))
        .await;

    let output = local_http_node().execute(ctx).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(output.outputs.get("count").and_then(|v| v.as_u64()), Some(3));
}

#[test]
fn test_standard_registry() {
    let registry = standard_registry().unwrap();
    for node_type in [
        "trigger",
        "manual",
        "webhook",
        "schedule",
        "debug.log",
        "time.delay",
        "transform.json_parse",
        "transform.json_stringify",
        "transform.set",
        "flow.loop",
        "http.request",
    ] {
        assert!(registry.contains(node_type), "missing {}", node_type);
    }
    assert_eq!(registry.len(), 11);
    assert_eq!(registry.get_metadata("flow.loop").unwrap().category, "flow");
}

#[test]
fn test_register_all_twice_is_rejected() {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry).unwrap();
    assert!(register_all(&mut registry).is_err());
}
