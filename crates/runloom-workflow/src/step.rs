// Step handlers and navigation
//
// A handler consumes the state, does its work, and returns the mutated
// state together with a transition. Transitions are a closed set: an
// explicit step name or one of the five reserved directives. The reserved
// strings exist so step names can be validated against them; handlers
// written in Rust use the enum directly.

use std::future::Future;

use async_trait::async_trait;

use runloom_runtime::Result;

/// Reserved directive strings; step names must not collide with these.
pub const RESERVED_STEP_NAMES: [&str; 5] =
    ["__start__", "__self__", "__prev__", "__next__", "__end__"];

/// Where the workflow goes after a step completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Jump to a step by name; unknown names fail the run.
    Step(String),
    /// Jump back to the first step executed in this run.
    Start,
    /// Re-run the current step.
    Repeat,
    /// Registration-order predecessor; falls off the front ends the run.
    Prev,
    /// Registration-order successor; falls off the end ends the run.
    Next,
    /// Terminate the run.
    End,
}

impl Transition {
    pub fn step(name: impl Into<String>) -> Self {
        Self::Step(name.into())
    }

    /// The reserved string this directive maps to, if it is one.
    pub fn directive_str(&self) -> Option<&'static str> {
        match self {
            Self::Step(_) => None,
            Self::Start => Some("__start__"),
            Self::Repeat => Some("__self__"),
            Self::Prev => Some("__prev__"),
            Self::Next => Some("__next__"),
            Self::End => Some("__end__"),
        }
    }

    /// Interpret a raw name: reserved strings become directives,
    /// everything else a step jump.
    pub fn from_name(name: &str) -> Self {
        match name {
            "__start__" => Self::Start,
            "__self__" => Self::Repeat,
            "__prev__" => Self::Prev,
            "__next__" => Self::Next,
            "__end__" => Self::End,
            other => Self::Step(other.to_string()),
        }
    }
}

/// One unit of workflow work.
#[async_trait]
pub trait StepHandler<S>: Send + Sync
where
    S: Send + 'static,
{
    async fn handle(&self, state: S) -> Result<(S, Transition)>;
}

/// Adapter so plain async closures can be registered as steps.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<S, F, Fut> StepHandler<S> for FnHandler<F>
where
    S: Send + 'static,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(S, Transition)>> + Send,
{
    async fn handle(&self, state: S) -> Result<(S, Transition)> {
        (self.f)(state).await
    }
}

/// Wrap an async closure as a [`StepHandler`].
pub fn step_fn<S, F, Fut>(f: F) -> FnHandler<F>
where
    S: Send + 'static,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(S, Transition)>> + Send,
{
    FnHandler { f }
}
