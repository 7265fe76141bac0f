use flowcore::{
    ChannelObserver, ErrorKind, ExecutionObserver, GraphModel, NodeError, NodeOutput,
    ObserverEvent, RetryPolicy, Value, Workflow, WorkflowEdge, WorkflowError, WorkflowNode,
};

fn node(id: &str, node_type: &str) -> WorkflowNode {
    WorkflowNode::new(id, node_type)
}

fn edge(source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge::new(source, target)
}

#[test]
fn test_duplicate_node_ids_rejected() {
    let result = GraphModel::new(vec![node("a", "trigger"), node("a", "debug.log")], vec![]);
    assert!(matches!(result, Err(WorkflowError::DuplicateNode(id)) if id == "a"));
}

#[test]
fn test_empty_node_id_rejected() {
    let result = GraphModel::new(vec![node("", "trigger")], vec![]);
    assert!(matches!(result, Err(WorkflowError::Invalid(_))));
}

#[test]
fn test_dangling_edges_are_kept() {
    let graph = GraphModel::new(vec![node("a", "trigger")], vec![edge("a", "ghost")]).unwrap();
    assert_eq!(graph.edge_count(), 1);
    assert!(graph.successors("a").is_empty());
    assert!(graph.get_node("ghost").is_none());
}

#[test]
fn test_start_nodes_are_unfed_triggers_in_order() {
    let graph = GraphModel::new(
        vec![
            node("work", "debug.log"),
            node("hook", "webhook"),
            node("fed", "manual"),
            node("cron", "schedule"),
        ],
        vec![edge("hook", "work"), edge("work", "fed")],
    )
    .unwrap();

    assert_eq!(graph.start_nodes(), vec!["hook".to_string(), "cron".to_string()]);
}

#[test]
fn test_neighbours_are_distinct() {
    let graph = GraphModel::new(
        vec![node("a", "trigger"), node("b", "debug.log"), node("c", "debug.log")],
        vec![edge("a", "b"), edge("a", "b"), edge("a", "c"), edge("c", "b")],
    )
    .unwrap();

    assert_eq!(graph.successors("a"), vec!["b", "c"]);
    assert_eq!(graph.predecessors("b"), vec!["a", "c"]);
    assert_eq!(graph.edges_to("b").count(), 3);
    assert_eq!(graph.position("c"), Some(2));
}

#[test]
fn test_workflow_json_shape() {
    let json = r#"{
        "name": "demo",
        "nodes": [
            {"id": "start", "type": "manual"},
            {"id": "log", "type": "debug.log", "config": {"message": "hi"}, "priority": 5,
             "retry": {"max_retries": 1, "delay_ms": 10}}
        ],
        "edges": [{"source": "start", "target": "log"}]
    }"#;

    let workflow: Workflow = serde_json::from_str(json).unwrap();
    let log = workflow.find_node("log").unwrap();
    assert_eq!(log.config.get("message").and_then(|v| v.as_str()), Some("hi"));
    assert_eq!(log.priority, Some(5));
    assert_eq!(log.retry.as_ref().map(|r| r.backoff_multiplier), Some(1.0));

    let graph = GraphModel::from_workflow(&workflow).unwrap();
    assert_eq!(graph.start_nodes(), vec!["start".to_string()]);
}

#[test]
fn test_value_serializes_as_plain_json() {
    let value: Value = serde_json::from_str(r#"{"n": 2, "list": ["x", false, null]}"#).unwrap();
    assert_eq!(value.get("n").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(value.get("list").and_then(|v| v.as_array()).map(|a| a.len()), Some(3));

    let text = serde_json::to_string(&Value::from("plain")).unwrap();
    assert_eq!(text, "\"plain\"");
    assert_eq!(Value::Number(1.5).as_u64(), None);
    assert_eq!(Value::Number(-1.0).as_u64(), None);
}

#[test]
fn test_error_kinds() {
    assert_eq!(NodeError::Transient("x".into()).kind(), ErrorKind::Transient);
    assert_eq!(NodeError::Timeout { ms: 10 }.kind(), ErrorKind::Transient);
    assert_eq!(NodeError::Permanent("x".into()).kind(), ErrorKind::Permanent);
    assert!(!NodeError::MissingInput("x".into()).is_transient());
    assert!(!NodeError::Panicked("boom".into()).is_transient());
    assert!(!NodeError::Cancelled.is_transient());
}

#[test]
fn test_retry_backoff() {
    let policy = RetryPolicy {
        max_retries: 3,
        delay_ms: 100,
        backoff_multiplier: 2.0,
    };
    assert_eq!(policy.delay_for(1), 100);
    assert_eq!(policy.delay_for(2), 200);
    assert_eq!(policy.delay_for(3), 400);
}

#[test]
fn test_channel_observer_forwards_in_order() {
    let (observer, mut rx) = ChannelObserver::new();
    observer.on_node_start("a");
    observer.on_node_retry("a", 2, &NodeError::Transient("flaky".into()));
    observer.on_node_complete("a", &NodeOutput::new());
    observer.on_node_skipped("b", "upstream failed");

    assert_eq!(rx.try_recv().unwrap(), ObserverEvent::Started("a".into()));
    assert!(matches!(rx.try_recv().unwrap(), ObserverEvent::Retrying(_, 2, _)));
    assert!(matches!(rx.try_recv().unwrap(), ObserverEvent::Completed(id, _) if id == "a"));
    assert_eq!(rx.try_recv().unwrap().node_id(), "b");
    assert!(rx.try_recv().is_err());
}
