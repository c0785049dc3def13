// Workflow engine
//
// A workflow is an ordered registry of named steps over one state type.
// run() opens a run scope, then loops: snapshot the state into history,
// emit `start`, invoke the handler, emit `success` (or `error`), and
// resolve the next step from the returned transition. The registry is
// immutable during a run, so independent run() calls on one instance
// proceed concurrently without sharing anything mutable.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use runloom_runtime::{
    ChildOptions, Emitter, EventBody, EventKind, Result, RunContext, RunHandle, RunOptions,
    RuntimeError,
};

use crate::error::WorkflowError;
use crate::step::{StepHandler, Transition, RESERVED_STEP_NAMES};

struct StepEntry<S> {
    name: String,
    handler: Arc<dyn StepHandler<S>>,
}

impl<S> Clone for StepEntry<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// State entering a step, recorded before its handler runs.
#[derive(Debug, Clone, Serialize)]
pub struct StepSnapshot<S> {
    pub name: String,
    pub state: S,
}

/// Outcome of one workflow run: the final state plus the append-only
/// history of per-step snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun<S> {
    pub state: S,
    pub steps: Vec<StepSnapshot<S>>,
}

#[derive(Serialize)]
struct StepEventPayload<'a, S: Serialize> {
    step: &'a str,
    state: &'a S,
}

/// Step-indexed state machine over a state type `S`.
pub struct Workflow<S> {
    name: String,
    emitter: Emitter,
    steps: Vec<StepEntry<S>>,
    start: Option<String>,
}

impl<S> Workflow<S>
where
    S: Send + 'static,
{
    /// Create a workflow publishing its events under `root`.
    pub fn new(name: impl Into<String>, root: &Emitter) -> Result<Self> {
        let name = name.into();
        let emitter = root.child(
            ChildOptions::new()
                .namespace(["workflow"])
                .creator(name.clone())
                .event_types(
                    [
                        ("start".to_string(), EventKind::Json),
                        ("success".to_string(), EventKind::Json),
                        ("error".to_string(), EventKind::Error),
                    ]
                    .into_iter()
                    .collect(),
                ),
        )?;
        Ok(Self {
            name,
            emitter,
            steps: Vec::new(),
            start: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.name == name)
    }

    pub fn start_step(&self) -> Option<&str> {
        self.start.as_deref()
    }

    /// Register a step. Names are validated here, not at run time: they
    /// must be non-empty, unique, and distinct from every reserved
    /// directive string.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        handler: impl StepHandler<S> + 'static,
    ) -> std::result::Result<&mut Self, WorkflowError> {
        let name = name.into();
        if name.is_empty() {
            return Err(WorkflowError::EmptyStepName);
        }
        if RESERVED_STEP_NAMES.contains(&name.as_str()) {
            return Err(WorkflowError::ReservedStep(name));
        }
        if self.has_step(&name) {
            return Err(WorkflowError::DuplicateStep(name));
        }
        self.steps.push(StepEntry {
            name,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Remove a step. Removing the configured start step resets the
    /// start back to first-registered.
    pub fn del_step(&mut self, name: &str) -> std::result::Result<&mut Self, WorkflowError> {
        let Some(position) = self.steps.iter().position(|s| s.name == name) else {
            return Err(WorkflowError::UnknownStep(name.to_string()));
        };
        self.steps.remove(position);
        if self.start.as_deref() == Some(name) {
            self.start = None;
        }
        Ok(self)
    }

    /// Configure the step a run begins at instead of the first registered.
    pub fn set_start(&mut self, name: &str) -> std::result::Result<&mut Self, WorkflowError> {
        if !self.has_step(name) {
            return Err(WorkflowError::UnknownStep(name.to_string()));
        }
        self.start = Some(name.to_string());
        Ok(self)
    }
}

impl<S> Workflow<S>
where
    S: Clone + Serialize + Send + 'static,
{
    /// Execute the workflow from the configured start over `state`.
    ///
    /// Returns the lazy run handle; step events are observable on it
    /// before the first step runs.
    pub fn run(&self, state: S) -> Result<RunHandle<WorkflowRun<S>>> {
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps(self.name.clone()).into());
        }
        let steps = self.steps.clone();
        let start_index = match &self.start {
            Some(name) => steps
                .iter()
                .position(|s| &s.name == name)
                .ok_or_else(|| WorkflowError::UnknownStep(name.clone()))?,
            None => 0,
        };
        let workflow_name = self.name.clone();

        RunContext::enter(
            &self.emitter,
            RunOptions::new().params(serde_json::json!({ "workflow": workflow_name })),
            move |ctx| async move {
                let emitter = ctx.emitter().clone();
                let mut state = state;
                let mut history: Vec<StepSnapshot<S>> = Vec::new();
                let mut first_executed: Option<usize> = None;
                let mut index = start_index;

                loop {
                    let entry = &steps[index];
                    if first_executed.is_none() {
                        first_executed = Some(index);
                    }
                    history.push(StepSnapshot {
                        name: entry.name.clone(),
                        state: state.clone(),
                    });

                    // Built before the await so the `&state` borrow does
                    // not live across it.
                    let body = EventBody::json(&StepEventPayload {
                        step: &entry.name,
                        state: &state,
                    })?;
                    emitter.emit("start", body).await?;

                    match entry.handler.handle(state).await {
                        Ok((next_state, transition)) => {
                            state = next_state;
                            let body = EventBody::json(&StepEventPayload {
                                step: &entry.name,
                                state: &state,
                            })?;
                            emitter.emit("success", body).await?;

                            match transition {
                                Transition::End => break,
                                Transition::Repeat => {}
                                Transition::Start => {
                                    index = first_executed.unwrap_or(start_index);
                                }
                                Transition::Next => {
                                    if index + 1 >= steps.len() {
                                        debug!(
                                            workflow = %workflow_name,
                                            step = %entry.name,
                                            "successor falls outside the registry, ending run"
                                        );
                                        break;
                                    }
                                    index += 1;
                                }
                                Transition::Prev => {
                                    if index == 0 {
                                        warn!(
                                            workflow = %workflow_name,
                                            step = %entry.name,
                                            "predecessor falls outside the registry, ending run"
                                        );
                                        break;
                                    }
                                    index -= 1;
                                }
                                Transition::Step(name) => {
                                    index = steps
                                        .iter()
                                        .position(|s| s.name == name)
                                        .ok_or(WorkflowError::UnknownStep(name))
                                        .map_err(RuntimeError::from)?;
                                }
                            }
                        }
                        Err(err) => {
                            if let Err(emit_err) =
                                emitter.emit("error", EventBody::error(&err)).await
                            {
                                warn!(error = %emit_err, "step error listener failed");
                            }
                            return Err(err);
                        }
                    }
                }

                Ok(WorkflowRun {
                    state,
                    steps: history,
                })
            },
        )
    }
}

impl<S: Send + 'static> std::fmt::Debug for Workflow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("start", &self.start)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::step_fn;

    #[derive(Debug, Clone, Serialize, PartialEq, Default)]
    struct CounterState {
        count: u32,
    }

    fn noop_step() -> impl StepHandler<CounterState> {
        step_fn(|state: CounterState| async move { Ok((state, Transition::Next)) })
    }

    #[tokio::test]
    async fn test_add_step_rejects_reserved_names() {
        let root = Emitter::root(["app"]).unwrap();
        let mut workflow: Workflow<CounterState> = Workflow::new("jobs", &root).unwrap();

        for reserved in RESERVED_STEP_NAMES {
            let err = workflow.add_step(reserved, noop_step()).unwrap_err();
            assert_eq!(err, WorkflowError::ReservedStep(reserved.to_string()));
        }
        assert!(workflow.step_names().is_empty());
    }

    #[tokio::test]
    async fn test_add_step_rejects_empty_and_duplicate() {
        let root = Emitter::root(["app"]).unwrap();
        let mut workflow: Workflow<CounterState> = Workflow::new("jobs", &root).unwrap();

        assert_eq!(
            workflow.add_step("", noop_step()).unwrap_err(),
            WorkflowError::EmptyStepName
        );
        workflow.add_step("fetch", noop_step()).unwrap();
        assert_eq!(
            workflow.add_step("fetch", noop_step()).unwrap_err(),
            WorkflowError::DuplicateStep("fetch".to_string())
        );
    }

    #[tokio::test]
    async fn test_del_step_resets_configured_start() {
        let root = Emitter::root(["app"]).unwrap();
        let mut workflow: Workflow<CounterState> = Workflow::new("jobs", &root).unwrap();
        workflow.add_step("fetch", noop_step()).unwrap();
        workflow.add_step("store", noop_step()).unwrap();
        workflow.set_start("store").unwrap();
        assert_eq!(workflow.start_step(), Some("store"));

        workflow.del_step("store").unwrap();
        assert_eq!(workflow.start_step(), None);
        assert_eq!(workflow.step_names(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_set_start_requires_known_step() {
        let root = Emitter::root(["app"]).unwrap();
        let mut workflow: Workflow<CounterState> = Workflow::new("jobs", &root).unwrap();
        workflow.add_step("fetch", noop_step()).unwrap();

        assert_eq!(
            workflow.set_start("ghost").unwrap_err(),
            WorkflowError::UnknownStep("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn test_debug_lists_registered_steps() {
        let root = Emitter::root(["app"]).unwrap();
        let mut workflow: Workflow<CounterState> = Workflow::new("jobs", &root).unwrap();
        workflow.add_step("fetch", noop_step()).unwrap();
        workflow.add_step("store", noop_step()).unwrap();

        let text = format!("{workflow:?}");
        assert!(text.contains("fetch"));
        assert!(text.contains("store"));
    }

    #[tokio::test]
    async fn test_run_without_steps_fails() {
        let root = Emitter::root(["app"]).unwrap();
        let workflow: Workflow<CounterState> = Workflow::new("jobs", &root).unwrap();

        let err = workflow.run(CounterState::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::Workflow { .. }));
    }
}
