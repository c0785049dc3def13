// Error taxonomy for the runtime
//
// Every layer (signals, bus, run scopes, retries, and the crates built on
// top) classifies failures with the same two flags: `fatal` errors
// short-circuit all retry layers, `retryable` errors may be re-attempted
// until a budget runs out. Causes are preserved as boxed sources so a
// top-level failure renders a readable chain instead of a stack trace.

use thiserror::Error;

/// Result type used throughout the runtime.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Boxed cause, kept as a source so `explain()` can walk the chain.
type Cause = Box<RuntimeError>;

/// Normalized failure raised by the runtime and the crates built on it.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// A cancellation signal fired. Always fatal, never retryable.
    #[error("operation aborted: {reason}")]
    Aborted { reason: String },

    /// A listener callback failed while handling an event. Carries the
    /// full dotted path of the event that was being delivered.
    #[error("listener failed for event '{path}': {message}")]
    Bus {
        path: String,
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// Model/backend failure. The provider decides whether it is worth
    /// re-attempting (rate limits and transient network errors are,
    /// malformed requests are not).
    #[error("model error: {message}")]
    Model {
        message: String,
        retryable: bool,
        #[source]
        cause: Option<Cause>,
    },

    /// A tool rejected its input before running.
    #[error("tool '{tool}' received invalid input: {message}")]
    ToolInput {
        tool: String,
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// A tool started running and failed.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        tool: String,
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// The model asked for a tool that is not registered. The agent loop
    /// feeds this back into the conversation instead of raising it.
    #[error("tool '{tool}' does not exist, available tools: {}", available.join(", "))]
    ToolNotFound { tool: String, available: Vec<String> },

    /// The model output did not decode into the expected structure.
    /// Retryable so the loop can ask the model to correct itself.
    #[error("failed to decode model output: {message}")]
    Decode { message: String },

    /// Bus misuse: invalid event or namespace name, or a payload whose
    /// kind contradicts the emitter's registry. A programming error, so
    /// fatal.
    #[error("emitter error: {message}")]
    Emitter { message: String },

    /// Workflow engine failure, normalized from the engine's own error type.
    #[error("workflow error: {message}")]
    Workflow { message: String },

    /// The agent exceeded its configured iteration limit.
    #[error("maximum number of iterations ({limit}) has been reached")]
    MaxIterations { limit: usize },

    /// The shared retry budget ran out. Created once by `RetryCounter`
    /// and handed back frozen on every later use.
    #[error("maximum number of retries ({limit}) has been reached")]
    RetryBudgetExhausted {
        limit: u32,
        #[source]
        cause: Option<Cause>,
    },

    /// Anything the taxonomy has no better home for.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RuntimeError {
    /// Create an abort error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Wrap a failing listener callback with the event path it was handling.
    pub fn bus(path: impl Into<String>, cause: RuntimeError) -> Self {
        Self::Bus {
            path: path.into(),
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Create a non-retryable model error.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            retryable: false,
            cause: None,
        }
    }

    /// Create a retryable model error (rate limit, transient network).
    pub fn model_retryable(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            retryable: true,
            cause: None,
        }
    }

    /// Create a tool input-validation error.
    pub fn tool_input(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInput {
            tool: tool.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Create a tool execution error.
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a bus-misuse error.
    pub fn emitter(message: impl Into<String>) -> Self {
        Self::Emitter {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach a cause to variants that carry one. Variants without a
    /// cause slot return self unchanged.
    pub fn with_cause(mut self, source: RuntimeError) -> Self {
        match &mut self {
            Self::Bus { cause, .. }
            | Self::Model { cause, .. }
            | Self::ToolInput { cause, .. }
            | Self::ToolExecution { cause, .. }
            | Self::RetryBudgetExhausted { cause, .. } => {
                *cause = Some(Box::new(source));
            }
            _ => {}
        }
        self
    }

    /// Fatal errors short-circuit every retry layer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Aborted { .. }
                | Self::MaxIterations { .. }
                | Self::RetryBudgetExhausted { .. }
                | Self::Workflow { .. }
                | Self::Emitter { .. }
                | Self::Internal { .. }
        )
    }

    /// Retryable errors may be re-attempted until a budget runs out.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Model { retryable, .. } => *retryable,
            Self::ToolExecution { .. } | Self::Decode { .. } => true,
            _ => false,
        }
    }

    /// True when the signal that produced this error was a cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Render the error and its cause chain as human-readable lines.
    pub fn explain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: format!("{err:#}"),
        }
    }
}
