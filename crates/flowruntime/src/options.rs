use flowcore::{RetryPolicy, WorkflowNode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Per-run execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub validate_before_execution: bool,
    /// Upper bound on simultaneously running nodes; values below 1 act as 1.
    pub max_concurrency: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub node_timeout_ms: u64,
    pub run_timeout_ms: Option<u64>,
    pub retry_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            validate_before_execution: true,
            max_concurrency: 5,
            max_retries: 3,
            node_timeout_ms: 300_000,
            run_timeout_ms: None,
            retry_delay_ms: 250,
            retry_backoff_multiplier: 2.0,
        }
    }
}

impl ExecutionOptions {
    /// Defaults overridden by `FLOW_*` environment variables.
    ///
    /// - `FLOW_VALIDATE`: validate before executing (true/false)
    /// - `FLOW_MAX_CONCURRENCY`: concurrently running nodes
    /// - `FLOW_MAX_RETRIES`: retries for transient failures
    /// - `FLOW_NODE_TIMEOUT_MS`: per-node timeout
    /// - `FLOW_RUN_TIMEOUT_MS`: whole-run timeout
    /// - `FLOW_RETRY_DELAY_MS`: base delay between retries
    ///
    /// Unset or unparsable variables keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            validate_before_execution: env_parse("FLOW_VALIDATE")
                .unwrap_or(defaults.validate_before_execution),
            max_concurrency: env_parse("FLOW_MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency),
            max_retries: env_parse("FLOW_MAX_RETRIES").unwrap_or(defaults.max_retries),
            node_timeout_ms: env_parse("FLOW_NODE_TIMEOUT_MS").unwrap_or(defaults.node_timeout_ms),
            run_timeout_ms: env_parse("FLOW_RUN_TIMEOUT_MS").or(defaults.run_timeout_ms),
            retry_delay_ms: env_parse("FLOW_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay_ms),
            retry_backoff_multiplier: defaults.retry_backoff_multiplier,
        }
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_before_execution = validate;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_node_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.node_timeout_ms = timeout_ms;
        self
    }

    pub fn with_run_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.run_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// The node's own retry policy, or the run-wide one.
    pub fn retry_policy_for(&self, node: &WorkflowNode) -> RetryPolicy {
        node.retry.clone().unwrap_or(RetryPolicy {
            max_retries: self.max_retries,
            delay_ms: self.retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        })
    }

    pub fn node_timeout_for(&self, node: &WorkflowNode) -> Duration {
        Duration::from_millis(node.timeout_ms.unwrap_or(self.node_timeout_ms))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
