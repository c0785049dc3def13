// Agent loop configuration

use runloom_runtime::RetryPolicy;

/// Configuration for one [`crate::ReActAgent`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Creator label stamped on the agent's emitter.
    pub name: String,

    /// Hard cap on iterations; exceeding it fails the run.
    pub max_iterations: usize,

    /// Backoff policy for the per-iteration model request retries
    /// (decode failures, transient model errors).
    pub retry_policy: RetryPolicy,

    /// Shared retry budget across the whole run; recovered failures
    /// (bad tool names, tool errors, exhausted request retries) all
    /// draw on it.
    pub total_retry_budget: u32,

    /// Stream model output and emit `partial_update` events, or fall
    /// back to single-shot requests.
    pub stream: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            name: "react_agent".to_string(),
            max_iterations: 10,
            retry_policy: RetryPolicy::exponential().with_max_retries(2),
            total_retry_budget: 6,
            stream: true,
        }
    }
}

impl AgentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_total_retry_budget(mut self, budget: u32) -> Self {
        self.total_retry_budget = budget;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}
