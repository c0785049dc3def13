// Runtime Substrate
//
// This crate provides the execution substrate for agent runtimes:
// cooperative cancellation, a hierarchical event bus, run scoping, and
// bounded retry with a shared budget.
//
// Key design decisions:
// - AbortSignal/AbortController for cooperative cancellation; abort is a
//   terminal state and listeners fire in registration order
// - Emitter trees pipe child events upward; listeners are isolated to
//   their own run unless cross-run matching is requested explicitly
// - Event payloads are a closed union (EventBody) checked against a
//   per-emitter name -> kind registry, not free-form maps
// - RunContext::enter wraps an operation in a managed scope with trace
//   stamping, lifecycle events, and guaranteed teardown
// - RetryPolicy/Retryable for per-site backoff, RetryCounter for the
//   budget shared across one higher-level operation
// - One error type (RuntimeError) with fatal/retryable classification
//   drives every retry decision

pub mod abort;
pub mod context;
pub mod emitter;
pub mod error;
pub mod event;
pub mod matcher;
pub mod retry;

// Re-exports for convenience
pub use abort::{AbortController, AbortSignal, ListenerId};
pub use context::{RunContext, RunHandle, RunOptions};
pub use emitter::{ChildOptions, Emitter, ListenerOptions, Subscription};
pub use error::{Result, RuntimeError};
pub use event::{ErrorBody, EventBody, EventKind, EventMeta, Trace};
pub use matcher::EventMatcher;
pub use retry::{RetryAttempt, RetryCounter, RetryPolicy, Retryable};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::abort::{AbortController, AbortSignal};
    pub use crate::context::{RunContext, RunHandle, RunOptions};
    pub use crate::emitter::{ChildOptions, Emitter, ListenerOptions};
    pub use crate::error::{Result, RuntimeError};
    pub use crate::event::{EventBody, EventKind, EventMeta};
    pub use crate::matcher::EventMatcher;
    pub use crate::retry::{RetryCounter, RetryPolicy, Retryable};
}
