// Run scope
//
// RunContext::enter wraps an async operation in a managed scope: a fresh
// run id, a trace-stamped child emitter, and an abort controller chained
// to the ambient parent run and any caller-supplied signal. The returned
// handle is lazy; the operation starts when the handle is awaited, after
// listeners have been attached through observe().
//
// Lifecycle events are emitted on a `run` namespace child: `start` with
// the run params, then `success` or `error`, then always `finish`. The
// scope is destroyed afterwards no matter how the operation ended, which
// also aborts the controller so late clones of the signal read terminal.
//
// The ambient parent is tracked with a tokio task-local, so nested
// enter() calls made inline in an operation pick it up automatically.
// Work moved to a spawned task does not carry the ambient scope.

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::abort::{AbortController, AbortSignal};
use crate::emitter::{ChildOptions, Emitter};
use crate::error::Result;
use crate::event::{EventBody, EventKind, Trace};

tokio::task_local! {
    static CURRENT_RUN: RunContext;
}

// Keys the scope manages itself; caller-supplied context entries with
// these names are dropped during the merge.
const RESERVED_CONTEXT_KEYS: &[&str] = &["run_id", "group_id", "parent_run_id", "created_at"];

/// Options for [`RunContext::enter`].
#[derive(Default)]
pub struct RunOptions {
    /// External cancellation source chained into the run's controller.
    pub signal: Option<AbortSignal>,
    /// Payload of the `start` event.
    pub params: Option<Value>,
    /// Entries merged over the parent run's context, reserved keys dropped.
    pub context: HashMap<String, Value>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

struct RunShared {
    run_id: Uuid,
    parent_run_id: Option<Uuid>,
    group_id: Uuid,
    created_at: DateTime<Utc>,
    context: HashMap<String, Value>,
    emitter: Emitter,
    run_events: Emitter,
    controller: AbortController,
}

/// Handle on an active run scope. Cheap to clone.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<RunShared>,
}

impl RunContext {
    /// The ambient run of the current task, if any.
    pub fn current() -> Option<RunContext> {
        CURRENT_RUN.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn parent_run_id(&self) -> Option<Uuid> {
        self.inner.parent_run_id
    }

    pub fn group_id(&self) -> Uuid {
        self.inner.group_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn context(&self) -> &HashMap<String, Value> {
        &self.inner.context
    }

    /// The scope's emitter; the operation emits its own events here.
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    pub fn signal(&self) -> AbortSignal {
        self.inner.controller.signal()
    }

    /// Cancel the run from inside the operation.
    pub fn abort(&self, reason: impl Into<String>) {
        self.inner.controller.abort(reason);
    }

    /// Open a run scope and return the lazy handle.
    ///
    /// If an ambient parent run exists, the new scope's emitter is a
    /// child of the parent run's emitter and inherits its group id and
    /// context; otherwise it is a child of `owner`. The parent's signal
    /// is chained into the new controller either way.
    pub fn enter<R, F, Fut>(owner: &Emitter, options: RunOptions, operation: F) -> Result<RunHandle<R>>
    where
        R: Send + 'static,
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let parent = RunContext::current();
        let run_id = Uuid::now_v7();
        let parent_run_id = parent.as_ref().map(|p| p.run_id());
        let group_id = parent
            .as_ref()
            .map(|p| p.group_id())
            .unwrap_or_else(Uuid::now_v7);
        let trace = Trace {
            group_id,
            run_id,
            parent_run_id,
        };

        let mut context_map = parent
            .as_ref()
            .map(|p| p.context().clone())
            .unwrap_or_default();
        for (key, value) in options.context {
            if RESERVED_CONTEXT_KEYS.contains(&key.as_str()) {
                continue;
            }
            context_map.insert(key, value);
        }

        let base = match &parent {
            Some(parent_ctx) => parent_ctx.emitter(),
            None => owner,
        };
        let scope = base.child(
            ChildOptions::new()
                .trace(trace)
                .group_id(group_id)
                .context(context_map.clone()),
        )?;

        let lifecycle: HashMap<String, EventKind> = [
            ("start".to_string(), EventKind::Json),
            ("success".to_string(), EventKind::Empty),
            ("error".to_string(), EventKind::Error),
            ("finish".to_string(), EventKind::Empty),
        ]
        .into_iter()
        .collect();
        let run_events = scope.child(
            ChildOptions::new()
                .namespace(["run"])
                .event_types(lifecycle),
        )?;

        let controller = AbortController::new();
        let mut upstream = Vec::new();
        if let Some(parent_ctx) = &parent {
            upstream.push(parent_ctx.signal());
        }
        if let Some(signal) = options.signal {
            upstream.push(signal);
        }
        controller.chain(upstream);

        let context = RunContext {
            inner: Arc::new(RunShared {
                run_id,
                parent_run_id,
                group_id,
                created_at: Utc::now(),
                context: context_map,
                emitter: scope,
                run_events,
                controller,
            }),
        };

        Ok(RunHandle {
            context,
            params: options.params.unwrap_or(Value::Null),
            operation: Box::new(move |ctx| Box::pin(operation(ctx))),
        })
    }

    /// Tear the scope down: abort the controller and destroy the scope's
    /// emitters. Called automatically when the run settles.
    pub fn destroy(&self) {
        self.inner.controller.abort("run context destroyed");
        self.inner.run_events.destroy();
        self.inner.emitter.destroy();
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.inner.run_id)
            .field("parent_run_id", &self.inner.parent_run_id)
            .field("group_id", &self.inner.group_id)
            .finish()
    }
}

type Operation<R> = Box<dyn FnOnce(RunContext) -> BoxFuture<'static, Result<R>> + Send>;

/// Lazy run handle returned by [`RunContext::enter`]. Await it to execute
/// the operation; nothing runs until then.
pub struct RunHandle<R> {
    context: RunContext,
    params: Value,
    operation: Operation<R>,
}

impl<R> RunHandle<R> {
    /// Attach listeners to the scope's emitter before the run starts.
    pub fn observe<F>(self, f: F) -> Self
    where
        F: FnOnce(&Emitter),
    {
        f(self.context.emitter());
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn signal(&self) -> AbortSignal {
        self.context.signal()
    }
}

impl<R: Send + 'static> RunHandle<R> {
    async fn drive(self) -> Result<R> {
        let RunHandle {
            context,
            params,
            operation,
        } = self;
        let run_events = context.inner.run_events.clone();
        let signal = context.signal();

        let scope_ctx = context.clone();
        let mut result = CURRENT_RUN
            .scope(context.clone(), async move {
                run_events.emit("start", EventBody::Json(params)).await?;
                let op = operation(scope_ctx);
                tokio::select! {
                    result = op => result,
                    _ = signal.aborted() => Err(signal.abort_error()),
                }
            })
            .await;

        let run_events = context.inner.run_events.clone();
        match &result {
            Ok(_) => {
                if let Err(err) = run_events.emit("success", EventBody::Empty).await {
                    result = Err(err);
                }
            }
            Err(err) => {
                let payload = EventBody::error(err);
                if let Err(emit_err) = run_events.emit("error", payload).await {
                    warn!(error = %emit_err, "error event listener failed");
                }
            }
        }
        if let Err(err) = run_events.emit("finish", EventBody::Empty).await {
            if result.is_ok() {
                result = Err(err);
            }
        }

        context.destroy();
        result
    }
}

impl<R> std::fmt::Debug for RunHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.context.run_id())
            .finish()
    }
}

impl<R: Send + 'static> IntoFuture for RunHandle<R> {
    type Output = Result<R>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.drive())
    }
}
