// Workflow Engine
//
// Step-indexed state machines on top of the runloom runtime: ordered
// named steps drive one owned state value, navigation happens through a
// closed transition set, and every step emits run-scoped events.
//
// Key design decisions:
// - Handlers take the state by value and return it with a transition;
//   there is no shared mutable state between steps
// - Step names are validated at registration time against the reserved
//   directive strings, never at run time
// - Each run() opens its own run scope; the per-step history of state
//   snapshots is returned with the result, not retained by the engine

pub mod error;
pub mod step;
pub mod workflow;

// Re-exports for convenience
pub use error::WorkflowError;
pub use step::{step_fn, FnHandler, StepHandler, Transition, RESERVED_STEP_NAMES};
pub use workflow::{StepSnapshot, Workflow, WorkflowRun};
