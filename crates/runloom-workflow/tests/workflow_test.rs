// End-to-end workflow runs: navigation directives, event ordering, and
// failure propagation through the run scope.

use std::future::IntoFuture;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use runloom_runtime::{Emitter, EventMatcher, ListenerOptions, RuntimeError};
use runloom_workflow::{step_fn, StepHandler, Transition, Workflow, WorkflowError};

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
struct RouteState {
    hops: Vec<String>,
    fuel: u32,
    looped: bool,
}

fn visit(name: &'static str) -> impl StepHandler<RouteState> {
    step_fn(move |mut state: RouteState| async move {
        state.hops.push(name.to_string());
        Ok((state, Transition::Next))
    })
}

fn record_paths(emitter: &Emitter, into: Arc<Mutex<Vec<String>>>) {
    emitter.on_matching(
        EventMatcher::AnyNested,
        move |event| {
            let into = into.clone();
            async move {
                into.lock().unwrap().push(event.path.clone());
                Ok(())
            }
        },
        ListenerOptions::default(),
    );
}

#[tokio::test]
async fn test_linear_run_visits_steps_in_order() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow.add_step("a", visit("a")).unwrap();
    workflow.add_step("b", visit("b")).unwrap();
    workflow.add_step("c", visit("c")).unwrap();

    let run = workflow.run(RouteState::default()).unwrap().await.unwrap();

    assert_eq!(run.state.hops, vec!["a", "b", "c"]);
    let visited: Vec<&str> = run.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(visited, vec!["a", "b", "c"]);
    // Snapshots hold the state entering each step.
    assert!(run.steps[0].state.hops.is_empty());
    assert_eq!(run.steps[2].state.hops, vec!["a", "b"]);
}

#[tokio::test]
async fn test_self_loop_repeats_until_guard_flips() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow
        .add_step(
            "grind",
            step_fn(|mut state: RouteState| async move {
                state.fuel += 1;
                state.hops.push("grind".to_string());
                let transition = if state.fuel < 3 {
                    Transition::Repeat
                } else {
                    Transition::Next
                };
                Ok((state, transition))
            }),
        )
        .unwrap();
    workflow.add_step("ship", visit("ship")).unwrap();

    let run = workflow.run(RouteState::default()).unwrap().await.unwrap();

    assert_eq!(run.state.fuel, 3);
    assert_eq!(run.state.hops, vec!["grind", "grind", "grind", "ship"]);
}

#[tokio::test]
async fn test_explicit_jump_skips_steps() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow
        .add_step(
            "a",
            step_fn(|mut state: RouteState| async move {
                state.hops.push("a".to_string());
                Ok((state, Transition::step("c")))
            }),
        )
        .unwrap();
    workflow.add_step("b", visit("b")).unwrap();
    workflow
        .add_step(
            "c",
            step_fn(|mut state: RouteState| async move {
                state.hops.push("c".to_string());
                Ok((state, Transition::End))
            }),
        )
        .unwrap();

    let run = workflow.run(RouteState::default()).unwrap().await.unwrap();
    assert_eq!(run.state.hops, vec!["a", "c"]);
}

#[tokio::test]
async fn test_unknown_jump_target_fails_run() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow
        .add_step(
            "a",
            step_fn(|state: RouteState| async move { Ok((state, Transition::step("ghost"))) }),
        )
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let err = workflow
        .run(RouteState::default())
        .unwrap()
        .observe(|emitter| record_paths(emitter, seen_clone))
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Workflow { .. }));
    assert!(err.to_string().contains("ghost"));
    assert!(seen
        .lock()
        .unwrap()
        .contains(&"app.workflow.run.error".to_string()));
}

#[tokio::test]
async fn test_start_directive_returns_to_first_executed() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow.add_step("a", visit("a")).unwrap();
    workflow.add_step("b", visit("b")).unwrap();
    workflow
        .add_step(
            "c",
            step_fn(|mut state: RouteState| async move {
                state.hops.push("c".to_string());
                let transition = if state.looped {
                    Transition::End
                } else {
                    state.looped = true;
                    Transition::Start
                };
                Ok((state, transition))
            }),
        )
        .unwrap();
    workflow.set_start("b").unwrap();

    let run = workflow.run(RouteState::default()).unwrap().await.unwrap();

    // START jumps to the first step executed in this run ("b", the
    // configured start), never to "a".
    assert_eq!(run.state.hops, vec!["b", "c", "b", "c"]);
}

#[tokio::test]
async fn test_prev_from_first_step_ends_run() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow
        .add_step(
            "a",
            step_fn(|mut state: RouteState| async move {
                state.hops.push("a".to_string());
                Ok((state, Transition::Prev))
            }),
        )
        .unwrap();
    workflow.add_step("b", visit("b")).unwrap();

    let run = workflow.run(RouteState::default()).unwrap().await.unwrap();
    assert_eq!(run.state.hops, vec!["a"]);
}

#[tokio::test]
async fn test_step_and_lifecycle_events_in_order() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow.add_step("a", visit("a")).unwrap();
    workflow.add_step("b", visit("b")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let steps = Arc::new(Mutex::new(Vec::new()));
    let steps_clone = steps.clone();

    workflow
        .run(RouteState::default())
        .unwrap()
        .observe(|emitter| {
            record_paths(emitter, seen_clone);
            emitter.on_matching(
                EventMatcher::Path("app.workflow.start".to_string()),
                move |event| {
                    let steps = steps_clone.clone();
                    async move {
                        let body = event.body.as_json().expect("json payload");
                        steps
                            .lock()
                            .unwrap()
                            .push(body["step"].as_str().unwrap_or_default().to_string());
                        Ok(())
                    }
                },
                ListenerOptions::default(),
            );
        })
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "app.workflow.run.start",
            "app.workflow.start",
            "app.workflow.success",
            "app.workflow.start",
            "app.workflow.success",
            "app.workflow.run.success",
            "app.workflow.run.finish"
        ]
    );
    assert_eq!(*steps.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_failing_step_emits_error_event() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow
        .add_step(
            "a",
            step_fn(|_state: RouteState| async move {
                Err(RuntimeError::internal("disk on fire"))
            }),
        )
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let err = workflow
        .run(RouteState::default())
        .unwrap()
        .observe(|emitter| record_paths(emitter, seen_clone))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    let seen = seen.lock().unwrap();
    assert!(seen.contains(&"app.workflow.error".to_string()));
    assert!(seen.contains(&"app.workflow.run.error".to_string()));
    assert!(seen.contains(&"app.workflow.run.finish".to_string()));
}

#[tokio::test]
async fn test_concurrent_runs_share_nothing() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow = Workflow::new("route", &root).unwrap();
    workflow
        .add_step(
            "burn",
            step_fn(|mut state: RouteState| async move {
                state.fuel += 1;
                tokio::task::yield_now().await;
                let transition = if state.fuel % 10 < 3 {
                    Transition::Repeat
                } else {
                    Transition::End
                };
                Ok((state, transition))
            }),
        )
        .unwrap();

    let first = workflow
        .run(RouteState {
            fuel: 0,
            ..Default::default()
        })
        .unwrap();
    let second = workflow
        .run(RouteState {
            fuel: 10,
            ..Default::default()
        })
        .unwrap();

    let (first, second) = tokio::join!(first.into_future(), second.into_future());
    assert_eq!(first.unwrap().state.fuel, 3);
    assert_eq!(second.unwrap().state.fuel, 13);
}

#[tokio::test]
async fn test_reserved_name_rejected_before_any_run() {
    let root = Emitter::root(["app"]).unwrap();
    let mut workflow: Workflow<RouteState> = Workflow::new("route", &root).unwrap();

    let err = workflow
        .add_step("__end__", visit("x"))
        .unwrap_err();
    assert_eq!(err, WorkflowError::ReservedStep("__end__".to_string()));
}
