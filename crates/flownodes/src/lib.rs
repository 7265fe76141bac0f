//! Standard node library
//!
//! Built-in executors for common operations. Each one is a reference
//! implementation of the `NodeExecutor` contract.

mod debug;
mod flow;
mod http;
mod time;
mod transform;
mod trigger;

pub use debug::DebugNode;
pub use flow::LoopNode;
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode, SetNode};
pub use trigger::TriggerNode;

use flowcore::RegistryError;
use flowruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(TriggerNode::trigger()))?;
    registry.register(Arc::new(TriggerNode::manual()))?;
    registry.register(Arc::new(TriggerNode::webhook()))?;
    registry.register(Arc::new(TriggerNode::schedule()))?;
    registry.register(Arc::new(DebugNode))?;
    registry.register(Arc::new(DelayNode))?;
    registry.register(Arc::new(JsonParseNode))?;
    registry.register(Arc::new(JsonStringifyNode))?;
    registry.register(Arc::new(SetNode))?;
    registry.register(Arc::new(LoopNode))?;
    registry.register(Arc::new(HttpRequestNode::new()))?;
    Ok(())
}

/// A registry holding every standard node.
pub fn standard_registry() -> Result<NodeRegistry, RegistryError> {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry)?;
    Ok(registry)
}
