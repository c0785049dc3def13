// ReAct agent loop
//
// The composition point for the runtime: each run() opens a run scope,
// and every iteration streams one model reply through the incremental
// decoder, then either executes the requested tool and continues, or
// finishes with the decoded final answer. Model requests run under a
// nested scope and a per-request Retryable; every failure the loop
// recovers from (unknown tool, tool error, exhausted request retries)
// is charged to one shared RetryCounter, so a run cannot retry forever
// across call sites.
//
// Recovery never raises: the loop renders a templated message, appends
// it to the conversation, and lets the model correct itself on the next
// iteration.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use runloom_runtime::{
    ChildOptions, Emitter, EventBody, Result, RetryCounter, Retryable, RunContext, RunHandle,
    RunOptions, RuntimeError,
};

use crate::decoder::{DecodeUpdate, IterationResult, ReplyDecoder};
use crate::events::{agent_event_types, IterationUpdate, PartialUpdate, RetryNotice};
use crate::memory::Memory;
use crate::message::Message;
use crate::model::{ChatModel, ModelRequest};
use crate::options::AgentOptions;
use crate::template::TemplateSet;
use crate::tool::{Tool, ToolOutput, ToolRegistry};

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRunOutput {
    /// The final iteration result; tool fields are cleared.
    pub result: IterationResult,
    /// Iterations executed, including the final one.
    pub iterations: usize,
}

// Everything one run needs, cloned into the run scope's operation.
#[derive(Clone)]
struct RunDeps {
    model: Arc<dyn ChatModel>,
    memory: Arc<dyn Memory>,
    tools: ToolRegistry,
    templates: Arc<TemplateSet>,
    options: AgentOptions,
}

/// Iterate-act agent over a model, a tool registry and a memory.
pub struct ReActAgent {
    emitter: Emitter,
    deps: RunDeps,
}

impl ReActAgent {
    /// Create an agent publishing its events under `root`.
    pub fn new(root: &Emitter, model: Arc<dyn ChatModel>, memory: Arc<dyn Memory>) -> Result<Self> {
        let options = AgentOptions::default();
        let emitter = root.child(
            ChildOptions::new()
                .namespace(["react"])
                .creator(options.name.clone())
                .event_types(agent_event_types()),
        )?;
        Ok(Self {
            emitter,
            deps: RunDeps {
                model,
                memory,
                tools: ToolRegistry::new(),
                templates: Arc::new(TemplateSet::new()?),
                options,
            },
        })
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.deps.tools = tools;
        self
    }

    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        self.deps.templates = Arc::new(templates);
        self
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.deps.options = options;
        self
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn options(&self) -> &AgentOptions {
        &self.deps.options
    }

    /// Run the loop over one user input.
    ///
    /// Returns the lazy run handle; attach listeners through
    /// [`RunHandle::observe`] before awaiting it.
    pub fn run(&self, input: impl Into<String>) -> Result<RunHandle<AgentRunOutput>> {
        let input = input.into();
        let deps = self.deps.clone();
        RunContext::enter(
            &self.emitter,
            RunOptions::new().params(json!({ "input": input })),
            move |ctx| drive(ctx, input, deps),
        )
    }
}

impl std::fmt::Debug for ReActAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReActAgent")
            .field("name", &self.deps.options.name)
            .field("tools", &self.deps.tools.names())
            .field("max_iterations", &self.deps.options.max_iterations)
            .finish()
    }
}

async fn drive(ctx: RunContext, input: String, deps: RunDeps) -> Result<AgentRunOutput> {
    // Seed the system prompt once, for a fresh conversation only.
    if deps.memory.is_empty().await {
        let system = deps
            .templates
            .render("system", json!({ "tools": deps.tools.specs() }))?;
        deps.memory.add(Message::system(system)).await?;
    }
    deps.memory.add(Message::user(&input)).await?;

    let counter = RetryCounter::new(deps.options.total_retry_budget);
    let events = ctx.emitter().clone();

    for iteration in 1..=deps.options.max_iterations {
        info!(run_id = %ctx.run_id(), iteration, "starting iteration");
        if let Some(result) = run_iteration(&ctx, &events, iteration, &deps, &counter).await? {
            return Ok(AgentRunOutput {
                result,
                iterations: iteration,
            });
        }
    }

    warn!(
        run_id = %ctx.run_id(),
        limit = deps.options.max_iterations,
        "iteration limit reached"
    );
    Err(RuntimeError::MaxIterations {
        limit: deps.options.max_iterations,
    })
}

async fn run_iteration(
    ctx: &RunContext,
    events: &Emitter,
    iteration: usize,
    deps: &RunDeps,
    counter: &RetryCounter,
) -> Result<Option<IterationResult>> {
    // Flag guarding against reporting one failure twice: recovery paths
    // set it after emitting `error`, escalation emits only when unset.
    let mut error_emitted = false;
    let outcome = iterate_once(ctx, events, iteration, deps, counter, &mut error_emitted).await;
    if let Err(err) = &outcome {
        if !error_emitted {
            if let Err(emit_err) = events.emit("error", EventBody::error(err)).await {
                warn!(error = %emit_err, "error event listener failed");
            }
        }
    }
    outcome
}

async fn iterate_once(
    ctx: &RunContext,
    events: &Emitter,
    iteration: usize,
    deps: &RunDeps,
    counter: &RetryCounter,
    error_emitted: &mut bool,
) -> Result<Option<IterationResult>> {
    let result = match request_reply(ctx, events, iteration, deps).await {
        Ok(result) => result,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            // Request retries are exhausted; absorb into the shared budget
            // and let the next iteration try a fresh request.
            events.emit("error", EventBody::error(&err)).await?;
            *error_emitted = true;
            charge(counter, err)?;
            return Ok(None);
        }
    };

    if let (Some(name), Some(input)) = (result.tool_name.clone(), result.tool_input.clone()) {
        let Some(tool) = deps.tools.resolve(&name) else {
            warn!(tool = %name, "model asked for an unknown tool");
            let err = RuntimeError::ToolNotFound {
                tool: name.clone(),
                available: deps.tools.names(),
            };
            let feedback = deps.templates.render(
                "tool_not_found",
                json!({ "tool": name, "available": deps.tools.names() }),
            )?;
            events.emit("error", EventBody::error(&err)).await?;
            *error_emitted = true;
            record_recovery(deps, &result, feedback).await?;
            charge(counter, err)?;
            return Ok(None);
        };

        return match execute_tool(ctx, &tool, input).await {
            Ok(output) => {
                let mut result = result;
                result.tool_output = Some(if output.is_empty() {
                    "The tool produced no output.".to_string()
                } else {
                    output.text_content().to_string()
                });
                result.final_answer = None;
                events
                    .emit(
                        "update",
                        EventBody::json(&IterationUpdate {
                            iteration,
                            result: result.clone(),
                        })?,
                    )
                    .await?;

                let call = IterationResult {
                    tool_output: None,
                    ..result.clone()
                };
                deps.memory
                    .add_many(vec![
                        Message::assistant(call.to_reply_text()),
                        Message::tool(format!(
                            "Function Output: {}",
                            result.tool_output.clone().unwrap_or_default()
                        )),
                    ])
                    .await?;
                Ok(None)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                let template = match &err {
                    RuntimeError::ToolInput { .. } => "tool_input_error",
                    _ => "tool_execution_error",
                };
                let feedback = deps.templates.render(
                    template,
                    json!({ "tool": tool.name(), "reason": err.to_string() }),
                )?;
                events.emit("error", EventBody::error(&err)).await?;
                *error_emitted = true;
                record_recovery(deps, &result, feedback).await?;
                charge(counter, err)?;
                Ok(None)
            }
        };
    }

    if let Some(answer) = result.final_answer.clone() {
        let mut result = result;
        // Drop stale tool fields so the final result reads clean.
        result.tool_name = None;
        result.tool_input = None;
        result.tool_output = None;
        deps.memory.add(Message::assistant(&answer)).await?;
        events
            .emit(
                "update",
                EventBody::json(&IterationUpdate {
                    iteration,
                    result: result.clone(),
                })?,
            )
            .await?;
        return Ok(Some(result));
    }

    // The decoder guarantees one of the two cases above.
    Err(RuntimeError::decode(
        "reply contains neither a complete tool call nor a final answer",
    ))
}

/// One model request under a nested run scope, retried per the agent's
/// policy. Decode failures append a format-correction message before the
/// next attempt so the model can fix its own output.
async fn request_reply(
    ctx: &RunContext,
    events: &Emitter,
    iteration: usize,
    deps: &RunDeps,
) -> Result<IterationResult> {
    let deps = deps.clone();
    let events = events.clone();
    let handle = RunContext::enter(
        ctx.emitter(),
        RunOptions::new().params(json!({ "operation": "model_request", "iteration": iteration })),
        move |nested| async move {
            let signal = nested.signal();
            Retryable::new(deps.options.retry_policy.clone(), move |attempt| {
                let deps = deps.clone();
                let events = events.clone();
                async move {
                    if attempt.attempt > 1 {
                        let reason = attempt
                            .last_error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        events
                            .emit(
                                "retry",
                                EventBody::json(&RetryNotice {
                                    iteration,
                                    attempt: attempt.attempt,
                                    reason,
                                })?,
                            )
                            .await?;
                    }

                    let request = ModelRequest::new(deps.memory.messages().await)
                        .with_tools(deps.tools.specs());
                    match decode_reply(&deps, request, &events, iteration).await {
                        Ok(result) => Ok(result),
                        Err(err) => {
                            if matches!(err, RuntimeError::Decode { .. }) {
                                let correction = deps.templates.render(
                                    "format_correction",
                                    json!({ "reason": err.to_string() }),
                                )?;
                                deps.memory.add(Message::user(correction)).await?;
                            }
                            Err(err)
                        }
                    }
                }
            })
            .with_signal(signal)
            .run()
            .await
        },
    )?;
    handle.await
}

async fn decode_reply(
    deps: &RunDeps,
    request: ModelRequest,
    events: &Emitter,
    iteration: usize,
) -> Result<IterationResult> {
    let mut decoder = ReplyDecoder::new();
    if deps.options.stream {
        let mut stream = deps.model.stream(request).await?;
        while let Some(delta) = stream.next().await {
            for update in decoder.push(&delta?) {
                if let DecodeUpdate::Partial { field, delta } = update {
                    events
                        .emit(
                            "partial_update",
                            EventBody::json(&PartialUpdate {
                                iteration,
                                field: field.key().to_string(),
                                delta,
                            })?,
                        )
                        .await?;
                }
            }
            if decoder.tool_call_ready() {
                // Enough structure to act; the rest of the stream is dropped.
                break;
            }
        }
    } else {
        let response = deps.model.create(request).await?;
        decoder.push(response.text_content());
    }
    decoder.finish()
}

/// One tool execution under its own nested run scope, so a parent abort
/// pre-empts the call and its lifecycle is traced like any other run.
async fn execute_tool(
    ctx: &RunContext,
    tool: &Arc<dyn Tool>,
    input: serde_json::Value,
) -> Result<ToolOutput> {
    let tool = tool.clone();
    let handle = RunContext::enter(
        ctx.emitter(),
        RunOptions::new().params(json!({ "operation": "tool_call", "tool": tool.name() })),
        move |nested| async move {
            nested.signal().throw_if_aborted()?;
            tool.run(input).await
        },
    )?;
    handle.await
}

/// Persist a non-actionable exchange: the model's reply plus the
/// corrective feedback the model sees next iteration.
async fn record_recovery(deps: &RunDeps, result: &IterationResult, feedback: String) -> Result<()> {
    deps.memory
        .add_many(vec![
            Message::assistant(result.to_reply_text()),
            Message::user(feedback),
        ])
        .await
}

fn charge(counter: &RetryCounter, error: RuntimeError) -> Result<()> {
    match counter.use_error(error) {
        Ok(()) => Ok(()),
        Err(frozen) => Err((*frozen).clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::UnboundedMemory;
    use crate::model::ScriptedModel;
    use crate::tool::EchoTool;

    fn agent(model: ScriptedModel, memory: UnboundedMemory) -> ReActAgent {
        let root = Emitter::root(["app"]).unwrap();
        ReActAgent::new(&root, Arc::new(model), Arc::new(memory))
            .unwrap()
            .with_tools(ToolRegistry::new().with_tool(EchoTool).unwrap())
    }

    #[tokio::test]
    async fn test_system_prompt_seeded_once() {
        let model = ScriptedModel::new();
        model.reply("Thought: t\nFinal Answer: one").await;
        model.reply("Thought: t\nFinal Answer: two").await;
        let memory = UnboundedMemory::new();
        let agent = agent(model, memory.clone());

        agent.run("first").unwrap().await.unwrap();
        agent.run("second").unwrap().await.unwrap();

        let system_count = memory
            .messages()
            .await
            .iter()
            .filter(|m| m.role == crate::message::Role::System)
            .count();
        assert_eq!(system_count, 1);
    }

    #[tokio::test]
    async fn test_final_answer_clears_stale_tool_fields() {
        let model = ScriptedModel::new();
        model
            .reply("Thought: t\nFunction Output: stale\nFinal Answer: a")
            .await;
        let agent = agent(model, UnboundedMemory::new());

        let output = agent.run("go").unwrap().await.unwrap();
        assert_eq!(output.result.final_answer.as_deref(), Some("a"));
        assert_eq!(output.result.tool_name, None);
        assert_eq!(output.result.tool_input, None);
        assert_eq!(output.result.tool_output, None);
    }

    #[tokio::test]
    async fn test_debug_shows_tools() {
        let model = ScriptedModel::new();
        let agent = agent(model, UnboundedMemory::new());
        let text = format!("{agent:?}");
        assert!(text.contains("echo"));
    }
}
