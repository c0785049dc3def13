// ReAct Agent Loop
//
// An iterate-act agent on top of the runloom runtime: each run streams
// model replies through an incremental line-prefix decoder, executes the
// requested tool or finishes with a final answer, and reports progress
// as run-scoped events.
//
// Key design decisions:
// - Collaborators (model, memory, tools) are traits; the loop owns only
//   the iteration policy and the event surface
// - Failures the model can fix (unknown tools, bad input, malformed
//   replies) are rendered as templated feedback and fed back into the
//   conversation instead of raised
// - Every recovered failure draws on one shared retry budget, so the
//   run terminates even when each individual failure is recoverable
// - Model requests and tool calls run under nested run scopes, giving
//   them their own lifecycle events and abort propagation

pub mod agent;
pub mod decoder;
pub mod events;
pub mod memory;
pub mod message;
pub mod model;
pub mod options;
pub mod template;
pub mod tool;

// Re-exports for convenience
pub use agent::{AgentRunOutput, ReActAgent};
pub use decoder::{DecodeUpdate, Field, IterationResult, ReplyDecoder};
pub use events::{IterationUpdate, PartialUpdate, RetryNotice};
pub use memory::{Memory, UnboundedMemory};
pub use message::{Message, Role};
pub use model::{ChatModel, ModelRequest, ModelResponse, ModelStream, ScriptedModel};
pub use options::AgentOptions;
pub use template::{TemplateSet, TEMPLATE_NAMES};
pub use tool::{EchoTool, FailingTool, Tool, ToolOutput, ToolRegistry, ToolSpec};
