//! Scripted Run Example - Agent Loop Without a Live Provider
//!
//! Drives the ReAct loop end to end against a scripted model double, so
//! the full event surface can be explored without network access or API
//! keys. The example shows:
//! 1. Implementing a custom tool (a tiny calculator)
//! 2. Scripting model replies, including a bad tool name the loop
//!    recovers from
//! 3. Observing update, partial_update and error events on the run
//!
//! Run with: cargo run -p runloom-agent --example scripted_run

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use runloom_agent::{
    ReActAgent, ScriptedModel, Tool, ToolOutput, ToolRegistry, UnboundedMemory,
};
use runloom_runtime::{
    Emitter, EventMatcher, ListenerOptions, Result as RuntimeResult, RuntimeError,
};

struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Adds two numbers; input is {\"a\": number, \"b\": number}"
    }

    async fn run(&self, input: Value) -> RuntimeResult<ToolOutput> {
        let a = input["a"]
            .as_f64()
            .ok_or_else(|| RuntimeError::tool_input(self.name(), "missing numeric field `a`"))?;
        let b = input["b"]
            .as_f64()
            .ok_or_else(|| RuntimeError::tool_input(self.name(), "missing numeric field `b`"))?;
        Ok(ToolOutput::text(format!("{}", a + b)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Scripted replies: a typo'd tool name first, then the corrected
    // call, then the final answer once the output is in the history.
    let model = ScriptedModel::new().chunked(16);
    model
        .reply("Thought: I should add these\nFunction Name: calc\nFunction Input: {\"a\": 2, \"b\": 40}")
        .await;
    model
        .reply("Thought: wrong name, trying again\nFunction Name: calculator\nFunction Input: {\"a\": 2, \"b\": 40}")
        .await;
    model
        .reply("Thought: the tool answered\nFinal Answer: 2 + 40 = 42\n")
        .await;

    let root = Emitter::root(["demo"])?;
    let agent = ReActAgent::new(
        &root,
        Arc::new(model),
        Arc::new(UnboundedMemory::new()),
    )?
    .with_tools(ToolRegistry::new().with_tool(Calculator)?);

    let output = agent
        .run("What is 2 + 40?")?
        .observe(|emitter| {
            emitter.on_matching(
                EventMatcher::AnyNested,
                |event| async move {
                    println!("[{}] {:?}", event.path, event.body);
                    Ok(())
                },
                ListenerOptions::default(),
            );
        })
        .await?;

    println!();
    println!(
        "final answer after {} iterations: {}",
        output.iterations,
        output.result.final_answer.unwrap_or_default()
    );
    Ok(())
}
