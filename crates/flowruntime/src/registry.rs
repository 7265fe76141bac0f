use flowcore::{ExecutorMetadata, NodeExecutor, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available node types.
///
/// Dispatch is a plain type-keyed lookup. Registrations are checked up
/// front so a run never discovers a bad entry halfway through.
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its own type tag.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) -> Result<(), RegistryError> {
        let node_type = executor.node_type().trim().to_string();
        if node_type.is_empty() {
            return Err(RegistryError::EmptyType);
        }
        if self.executors.contains_key(&node_type) {
            return Err(RegistryError::Duplicate(node_type));
        }
        tracing::info!(node_type = %node_type, "Registering node type");
        self.executors.insert(node_type, executor);
        Ok(())
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Registered types, sorted.
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<ExecutorMetadata> {
        self.executors.get(node_type).map(|e| e.metadata())
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
