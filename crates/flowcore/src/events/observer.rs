use crate::{NodeError, NodeOutput};
use tokio::sync::mpsc;

/// Live progress callbacks.
///
/// Called synchronously from the engine's scheduling loop in the order
/// events happen, so implementations must return quickly and hand slow work
/// elsewhere ([`ChannelObserver`] does exactly that).
pub trait ExecutionObserver: Send + Sync {
    fn on_node_start(&self, _node_id: &str) {}

    fn on_node_complete(&self, _node_id: &str, _output: &NodeOutput) {}

    /// Final failure, after retries are exhausted or for permanent errors.
    fn on_node_error(&self, _node_id: &str, _error: &NodeError) {}

    /// A transient failure that will be retried as attempt `next_attempt`.
    fn on_node_retry(&self, _node_id: &str, _next_attempt: u32, _error: &NodeError) {}

    fn on_node_skipped(&self, _node_id: &str, _reason: &str) {}
}

pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Owned copy of an observer callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Started(String),
    Completed(String, NodeOutput),
    Failed(String, NodeError),
    Retrying(String, u32, NodeError),
    Skipped(String, String),
}

impl ObserverEvent {
    pub fn node_id(&self) -> &str {
        match self {
            ObserverEvent::Started(id)
            | ObserverEvent::Completed(id, _)
            | ObserverEvent::Failed(id, _)
            | ObserverEvent::Retrying(id, _, _)
            | ObserverEvent::Skipped(id, _) => id,
        }
    }
}

/// Forwards callbacks into an unbounded channel.
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ObserverEvent) {
        // receiver gone means nobody is watching anymore
        let _ = self.sender.send(event);
    }
}

impl ExecutionObserver for ChannelObserver {
    fn on_node_start(&self, node_id: &str) {
        self.send(ObserverEvent::Started(node_id.to_string()));
    }

    fn on_node_complete(&self, node_id: &str, output: &NodeOutput) {
        self.send(ObserverEvent::Completed(node_id.to_string(), output.clone()));
    }

    fn on_node_error(&self, node_id: &str, error: &NodeError) {
        self.send(ObserverEvent::Failed(node_id.to_string(), error.clone()));
    }

    fn on_node_retry(&self, node_id: &str, next_attempt: u32, error: &NodeError) {
        self.send(ObserverEvent::Retrying(
            node_id.to_string(),
            next_attempt,
            error.clone(),
        ));
    }

    fn on_node_skipped(&self, node_id: &str, reason: &str) {
        self.send(ObserverEvent::Skipped(node_id.to_string(), reason.to_string()));
    }
}
