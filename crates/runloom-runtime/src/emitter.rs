// Hierarchical event bus
//
// Emitters form a tree: a child pipes itself into its parent at
// construction, so events climb the tree through each ancestor's listener
// set. Listener dispatch has two lanes - blocking listeners run strictly
// in registration order and are awaited one by one, non-blocking listeners
// are spawned concurrently - and emit() waits for both lanes, so no
// handler is ever left running past the call.
//
// Run isolation: an emitter carries the trace of the run scope that owns
// it. A listener only sees events stamped with the same run id unless it
// explicitly requested cross-run matching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};
use crate::event::{EventBody, EventKind, EventMeta, Trace};
use crate::matcher::EventMatcher;

type ListenerFn = Box<dyn Fn(Arc<EventMeta>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type CleanupFn = Box<dyn FnOnce() + Send>;

/// Per-listener dispatch options.
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    /// Blocking listeners run in registration order, awaited one by one.
    /// Non-blocking listeners run concurrently with each other.
    pub blocking: bool,
    /// Fire at most once, then self-unregister.
    pub once: bool,
    /// `Some(true)` requests cross-run matching: the listener sees events
    /// from nested and sibling runs. `Some(false)` restricts a nested
    /// matcher to local events. `None` keeps the matcher's default reach.
    pub match_nested: Option<bool>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            once: false,
            match_nested: None,
        }
    }
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn match_nested(mut self, nested: bool) -> Self {
        self.match_nested = Some(nested);
        self
    }
}

struct ListenerEntry {
    id: u64,
    matcher: EventMatcher,
    options: ListenerOptions,
    callback: ListenerFn,
    // Claim flag so a once-listener fires at most once even when several
    // matching events are dispatched concurrently.
    claimed: AtomicBool,
}

struct ListenerRegistry {
    entries: Vec<Arc<ListenerEntry>>,
    next_id: u64,
}

struct EmitterShared {
    namespace: Vec<String>,
    creator: Option<String>,
    context: HashMap<String, Value>,
    group_id: Option<Uuid>,
    trace: Option<Trace>,
    registry: Mutex<ListenerRegistry>,
    event_types: Mutex<HashMap<String, EventKind>>,
    cleanups: Mutex<Vec<CleanupFn>>,
    destroyed: AtomicBool,
}

/// Unsubscribe handle returned by listener registration and [`Emitter::pipe`].
pub struct Subscription {
    emitter: Weak<EmitterShared>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.emitter.upgrade() {
            inner.registry.lock().entries.retain(|e| e.id != self.id);
        }
    }
}

/// Options for [`Emitter::child`]. `None` fields inherit from the parent.
#[derive(Default)]
pub struct ChildOptions {
    /// Namespace segments appended to the parent's namespace.
    pub namespace: Vec<String>,
    pub creator: Option<String>,
    pub context: Option<HashMap<String, Value>>,
    pub group_id: Option<Uuid>,
    pub trace: Option<Trace>,
    pub event_types: Option<HashMap<String, EventKind>>,
}

impl ChildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespace = segments.into_iter().map(Into::into).collect();
        self
    }

    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn context(mut self, context: HashMap<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn group_id(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn event_types(mut self, types: HashMap<String, EventKind>) -> Self {
        self.event_types = Some(types);
        self
    }
}

/// Hierarchical publish/subscribe handle.
///
/// Cheap to clone; clones share the same listener set. Constructed either
/// as an injectable root via [`Emitter::root`] or as a child of another
/// emitter via [`Emitter::child`].
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterShared>,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl Emitter {
    /// Construct a root emitter with the given namespace. Roots are plain
    /// values owned by whoever constructs them; there is no hidden
    /// process-wide instance.
    pub fn root<I, S>(namespace: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let namespace: Vec<String> = namespace.into_iter().map(Into::into).collect();
        for segment in &namespace {
            if !valid_segment(segment) {
                return Err(RuntimeError::emitter(format!(
                    "invalid namespace segment '{segment}'"
                )));
            }
        }
        Ok(Self {
            inner: Arc::new(EmitterShared {
                namespace,
                creator: None,
                context: HashMap::new(),
                group_id: None,
                trace: None,
                registry: Mutex::new(ListenerRegistry {
                    entries: Vec::new(),
                    next_id: 0,
                }),
                event_types: Mutex::new(HashMap::new()),
                cleanups: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Create a child emitter and pipe it into `self`. The unsubscribe for
    /// that pipe is recorded in the child's cleanups, so destroying the
    /// child detaches it without touching this emitter's other children.
    pub fn child(&self, options: ChildOptions) -> Result<Self> {
        for segment in &options.namespace {
            if !valid_segment(segment) {
                return Err(RuntimeError::emitter(format!(
                    "invalid namespace segment '{segment}'"
                )));
            }
        }
        let mut namespace = self.inner.namespace.clone();
        namespace.extend(options.namespace);

        let child = Self {
            inner: Arc::new(EmitterShared {
                namespace,
                creator: options.creator.or_else(|| self.inner.creator.clone()),
                context: options
                    .context
                    .unwrap_or_else(|| self.inner.context.clone()),
                group_id: options.group_id.or(self.inner.group_id),
                trace: options.trace.or(self.inner.trace),
                registry: Mutex::new(ListenerRegistry {
                    entries: Vec::new(),
                    next_id: 0,
                }),
                event_types: Mutex::new(
                    options
                        .event_types
                        .unwrap_or_else(|| self.inner.event_types.lock().clone()),
                ),
                cleanups: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        };

        let pipe = child.pipe(self);
        child
            .inner
            .cleanups
            .lock()
            .push(Box::new(move || pipe.unsubscribe()));
        Ok(child)
    }

    pub fn namespace(&self) -> &[String] {
        &self.inner.namespace
    }

    pub fn trace(&self) -> Option<Trace> {
        self.inner.trace
    }

    pub fn group_id(&self) -> Option<Uuid> {
        self.inner.group_id
    }

    pub fn creator(&self) -> Option<&str> {
        self.inner.creator.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, Value> {
        &self.inner.context
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Declare an event name and the payload kind it carries. Once any
    /// name is declared, the emitter becomes closed-world: emitting or
    /// subscribing by an undeclared name is an error.
    pub fn register_event(&self, name: &str, kind: EventKind) -> Result<()> {
        if !valid_segment(name) {
            return Err(RuntimeError::emitter(format!("invalid event name '{name}'")));
        }
        let mut types = self.inner.event_types.lock();
        if let Some(existing) = types.get(name) {
            if *existing != kind {
                return Err(RuntimeError::emitter(format!(
                    "event '{name}' already registered with kind {existing:?}"
                )));
            }
        }
        types.insert(name.to_string(), kind);
        Ok(())
    }

    /// Subscribe to a single local event name.
    pub fn on<F, Fut>(&self, name: &str, callback: F, options: ListenerOptions) -> Result<Subscription>
    where
        F: Fn(Arc<EventMeta>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        {
            let types = self.inner.event_types.lock();
            if !types.is_empty() && !types.contains_key(name) {
                return Err(RuntimeError::emitter(format!(
                    "unknown event '{name}' for this emitter"
                )));
            }
        }
        Ok(self.on_matching(EventMatcher::Name(name.to_string()), callback, options))
    }

    /// Subscribe with an arbitrary matcher.
    pub fn on_matching<F, Fut>(
        &self,
        matcher: EventMatcher,
        callback: F,
        options: ListenerOptions,
    ) -> Subscription
    where
        F: Fn(Arc<EventMeta>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let callback: ListenerFn = Box::new(move |meta| Box::pin(callback(meta)));
        let mut registry = self.inner.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Arc::new(ListenerEntry {
            id,
            matcher,
            options,
            callback,
            claimed: AtomicBool::new(false),
        }));
        Subscription {
            emitter: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Re-emit every event seen on `self` (descendants included) on
    /// `target`'s listener set. Returns the unsubscribe handle.
    pub fn pipe(&self, target: &Emitter) -> Subscription {
        let target = target.clone();
        self.on_matching(
            EventMatcher::AnyNested,
            move |meta| {
                let target = target.clone();
                async move { target.dispatch(meta).await }
            },
            ListenerOptions::new().match_nested(true),
        )
    }

    /// Build the event metadata and deliver it to every matching listener.
    pub async fn emit(&self, name: &str, body: EventBody) -> Result<()> {
        if !valid_segment(name) {
            return Err(RuntimeError::emitter(format!("invalid event name '{name}'")));
        }
        {
            let types = self.inner.event_types.lock();
            if !types.is_empty() {
                match types.get(name) {
                    Some(expected) if *expected == body.kind() => {}
                    Some(expected) => {
                        return Err(RuntimeError::emitter(format!(
                            "event '{name}' expects a {expected:?} payload, got {:?}",
                            body.kind()
                        )));
                    }
                    None => {
                        return Err(RuntimeError::emitter(format!(
                            "unknown event '{name}' for this emitter"
                        )));
                    }
                }
            }
        }
        let meta = Arc::new(self.create_event(name, body));
        self.dispatch(meta).await
    }

    fn create_event(&self, name: &str, body: EventBody) -> EventMeta {
        let mut path = self.inner.namespace.join(".");
        if path.is_empty() {
            path = name.to_string();
        } else {
            path.push('.');
            path.push_str(name);
        }
        EventMeta {
            id: Uuid::now_v7(),
            name: name.to_string(),
            path,
            created_at: chrono::Utc::now(),
            source: self.inner.namespace.clone(),
            creator: self.inner.creator.clone(),
            context: self.inner.context.clone(),
            group_id: self.inner.group_id,
            trace: self.inner.trace,
            body,
        }
    }

    fn listener_matches(&self, entry: &ListenerEntry, event: &EventMeta) -> bool {
        let nested = entry
            .options
            .match_nested
            .unwrap_or_else(|| entry.matcher.default_match_nested());
        if !nested && event.source != self.inner.namespace {
            return false;
        }
        if !entry.matcher.matches(event, &self.inner.namespace) {
            return false;
        }
        // Run isolation: skipped only when cross-run matching was
        // explicitly requested.
        if entry.options.match_nested != Some(true) {
            let own = self.inner.trace.map(|t| t.run_id);
            if own != event.run_id() {
                return false;
            }
        }
        true
    }

    fn dispatch(&self, meta: Arc<EventMeta>) -> BoxFuture<'static, Result<()>> {
        let emitter = self.clone();
        Box::pin(async move {
            if emitter.is_destroyed() {
                return Ok(());
            }
            let matching: Vec<Arc<ListenerEntry>> = {
                let registry = emitter.inner.registry.lock();
                registry
                    .entries
                    .iter()
                    .filter(|e| emitter.listener_matches(e, &meta))
                    .cloned()
                    .collect()
            };

            let mut to_run = Vec::with_capacity(matching.len());
            let mut fired_once = Vec::new();
            for entry in matching {
                if entry.options.once {
                    if entry.claimed.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    fired_once.push(entry.id);
                }
                to_run.push(entry);
            }
            if !fired_once.is_empty() {
                let mut registry = emitter.inner.registry.lock();
                registry.entries.retain(|e| !fired_once.contains(&e.id));
            }

            // Non-blocking listeners are scheduled up front so they overlap
            // with the blocking chain; all of them are awaited below.
            let mut spawned = Vec::new();
            let mut blocking = Vec::new();
            for entry in to_run {
                if entry.options.blocking {
                    blocking.push(entry);
                } else {
                    let meta = meta.clone();
                    spawned.push(tokio::spawn(async move { (entry.callback)(meta).await }));
                }
            }

            let mut first_error: Option<RuntimeError> = None;
            for entry in blocking {
                match (entry.callback)(meta.clone()).await {
                    Ok(()) => {}
                    Err(err) => {
                        first_error = Some(err);
                        break;
                    }
                }
            }
            for handle in spawned {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                    Err(join_err) => {
                        if first_error.is_none() {
                            first_error =
                                Some(RuntimeError::internal(format!("listener panicked: {join_err}")));
                        }
                    }
                }
            }

            match first_error {
                None => Ok(()),
                // A forwarded dispatch already wrapped the failure with this
                // event's path; avoid stacking identical wrappers.
                Some(RuntimeError::Bus { path, message, cause }) if path == meta.path => {
                    Err(RuntimeError::Bus { path, message, cause })
                }
                Some(err) => {
                    warn!(path = %meta.path, error = %err, "listener failed");
                    Err(RuntimeError::bus(meta.path.clone(), err))
                }
            }
        })
    }

    /// Clear local listeners and run recorded cleanups (un-piping from the
    /// parent). The parent and its other children are untouched.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.registry.lock().entries.clear();
        let cleanups: Vec<CleanupFn> = std::mem::take(&mut *self.inner.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("namespace", &self.inner.namespace)
            .field("trace", &self.inner.trace)
            .field("listeners", &self.inner.registry.lock().entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn collector() -> Arc<StdMutex<Vec<String>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_emit_reaches_named_listener() {
        let emitter = Emitter::root(["agent"]).unwrap();
        let seen = collector();

        let seen_clone = seen.clone();
        emitter
            .on(
                "update",
                move |event| {
                    let seen = seen_clone.clone();
                    async move {
                        seen.lock().unwrap().push(event.path.clone());
                        Ok(())
                    }
                },
                ListenerOptions::default(),
            )
            .unwrap();

        emitter.emit("update", EventBody::text("hi")).await.unwrap();
        emitter.emit("other", EventBody::Empty).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["agent.update"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_listeners_run_in_registration_order() {
        let emitter = Emitter::root(["bus"]).unwrap();
        let seen: Arc<StdMutex<Vec<u32>>> = Arc::new(StdMutex::new(Vec::new()));

        // The first listener sleeps; order must still hold because the
        // blocking lane awaits each listener before the next.
        let seen_a = seen.clone();
        emitter
            .on(
                "tick",
                move |_| {
                    let seen = seen_a.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        seen.lock().unwrap().push(1);
                        Ok(())
                    }
                },
                ListenerOptions::default(),
            )
            .unwrap();
        let seen_b = seen.clone();
        emitter
            .on(
                "tick",
                move |_| {
                    let seen = seen_b.clone();
                    async move {
                        seen.lock().unwrap().push(2);
                        Ok(())
                    }
                },
                ListenerOptions::default(),
            )
            .unwrap();

        emitter.emit("tick", EventBody::Empty).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_blocking_listeners_complete_before_emit_returns() {
        let emitter = Emitter::root(["bus"]).unwrap();
        let seen: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let seen_clone = seen.clone();
        emitter
            .on(
                "tick",
                move |_| {
                    let seen = seen_clone.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        seen.lock().unwrap().push("slow");
                        Ok(())
                    }
                },
                ListenerOptions::new().non_blocking(),
            )
            .unwrap();

        emitter.emit("tick", EventBody::Empty).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["slow"]);
    }

    #[tokio::test]
    async fn test_once_listener_fires_at_most_once_under_concurrent_emits() {
        let emitter = Emitter::root(["bus"]).unwrap();
        let count = Arc::new(StdMutex::new(0u32));

        let count_clone = count.clone();
        emitter
            .on(
                "tick",
                move |_| {
                    let count = count_clone.clone();
                    async move {
                        tokio::task::yield_now().await;
                        *count.lock().unwrap() += 1;
                        Ok(())
                    }
                },
                ListenerOptions::new().once(),
            )
            .unwrap();

        let (a, b) = tokio::join!(
            emitter.emit("tick", EventBody::Empty),
            emitter.emit("tick", EventBody::Empty)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_child_event_climbs_to_parent() {
        let parent = Emitter::root(["agent"]).unwrap();
        let child = parent
            .child(ChildOptions::new().namespace(["run"]))
            .unwrap();
        let seen = collector();

        let seen_clone = seen.clone();
        parent.on_matching(
            EventMatcher::AnyNested,
            move |event| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().unwrap().push(event.path.clone());
                    Ok(())
                }
            },
            ListenerOptions::new().match_nested(true),
        );

        child.emit("update", EventBody::Empty).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["agent.run.update"]);
    }

    #[tokio::test]
    async fn test_star_listener_never_sees_descendant_events() {
        let parent = Emitter::root(["agent"]).unwrap();
        let child = parent
            .child(ChildOptions::new().namespace(["run"]))
            .unwrap();
        let count = Arc::new(StdMutex::new(0u32));

        let count_clone = count.clone();
        parent.on_matching(
            EventMatcher::AnyLocal,
            move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Ok(())
                }
            },
            ListenerOptions::new().match_nested(true),
        );

        child.emit("update", EventBody::Empty).await.unwrap();
        parent.emit("update", EventBody::Empty).await.unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_isolation_filters_other_runs() {
        let root = Emitter::root(["agent"]).unwrap();
        let run = root
            .child(ChildOptions::new().trace(Trace {
                group_id: Uuid::now_v7(),
                run_id: Uuid::now_v7(),
                parent_run_id: None,
            }))
            .unwrap();

        let isolated = Arc::new(StdMutex::new(0u32));
        let cross = Arc::new(StdMutex::new(0u32));

        let isolated_clone = isolated.clone();
        root.on_matching(
            EventMatcher::AnyNested,
            move |_| {
                let n = isolated_clone.clone();
                async move {
                    *n.lock().unwrap() += 1;
                    Ok(())
                }
            },
            ListenerOptions::default(),
        );
        let cross_clone = cross.clone();
        root.on_matching(
            EventMatcher::AnyNested,
            move |_| {
                let n = cross_clone.clone();
                async move {
                    *n.lock().unwrap() += 1;
                    Ok(())
                }
            },
            ListenerOptions::new().match_nested(true),
        );

        run.emit("update", EventBody::Empty).await.unwrap();

        // The run-stamped event does not match the root's (traceless)
        // scope unless cross-run matching was requested.
        assert_eq!(*isolated.lock().unwrap(), 0);
        assert_eq!(*cross.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_run_nested_events_are_visible() {
        let root = Emitter::root(["agent"]).unwrap();
        let trace = Trace {
            group_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            parent_run_id: None,
        };
        let run = root.child(ChildOptions::new().trace(trace)).unwrap();
        // A namespace child created within the run inherits its trace.
        let parser = run
            .child(ChildOptions::new().namespace(["parser"]))
            .unwrap();

        let count = Arc::new(StdMutex::new(0u32));
        let count_clone = count.clone();
        run.on_matching(
            EventMatcher::AnyNested,
            move |_| {
                let n = count_clone.clone();
                async move {
                    *n.lock().unwrap() += 1;
                    Ok(())
                }
            },
            ListenerOptions::default(),
        );

        parser.emit("partial_update", EventBody::Empty).await.unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_destroy_unpipes_without_touching_siblings() {
        let parent = Emitter::root(["agent"]).unwrap();
        let child_a = parent
            .child(ChildOptions::new().namespace(["a"]))
            .unwrap();
        let child_b = parent
            .child(ChildOptions::new().namespace(["b"]))
            .unwrap();

        let seen = collector();
        let seen_clone = seen.clone();
        parent.on_matching(
            EventMatcher::AnyNested,
            move |event| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().unwrap().push(event.path.clone());
                    Ok(())
                }
            },
            ListenerOptions::new().match_nested(true),
        );

        child_a.destroy();
        child_a.emit("tick", EventBody::Empty).await.unwrap();
        child_b.emit("tick", EventBody::Empty).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["agent.b.tick"]);
    }

    #[tokio::test]
    async fn test_listener_error_wraps_event_path() {
        let emitter = Emitter::root(["agent"]).unwrap();
        emitter
            .on(
                "update",
                |_| async { Err(RuntimeError::model("listener exploded")) },
                ListenerOptions::default(),
            )
            .unwrap();

        let err = emitter.emit("update", EventBody::Empty).await.unwrap_err();
        match err {
            RuntimeError::Bus { path, cause, .. } => {
                assert_eq!(path, "agent.update");
                assert!(cause.unwrap().to_string().contains("listener exploded"));
            }
            other => panic!("expected bus error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_blocking_listener_does_not_cancel_scheduled_siblings() {
        let emitter = Emitter::root(["agent"]).unwrap();
        let ran = Arc::new(StdMutex::new(false));

        let ran_clone = ran.clone();
        emitter
            .on(
                "update",
                move |_| {
                    let ran = ran_clone.clone();
                    async move {
                        tokio::task::yield_now().await;
                        *ran.lock().unwrap() = true;
                        Ok(())
                    }
                },
                ListenerOptions::new().non_blocking(),
            )
            .unwrap();
        emitter
            .on(
                "update",
                |_| async { Err(RuntimeError::model("boom")) },
                ListenerOptions::default(),
            )
            .unwrap();

        let err = emitter.emit("update", EventBody::Empty).await;
        assert!(err.is_err());
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_event_type_registry_checks_kind_and_name() {
        let emitter = Emitter::root(["wf"]).unwrap();
        emitter.register_event("start", EventKind::Json).unwrap();

        // Wrong payload kind.
        let err = emitter.emit("start", EventBody::Empty).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Emitter { .. }));

        // Undeclared name once the registry is closed-world.
        let err = emitter.emit("bogus", EventBody::Empty).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Emitter { .. }));

        // Subscribing by an undeclared name fails too.
        assert!(emitter
            .on("bogus", |_| async { Ok(()) }, ListenerOptions::default())
            .is_err());

        emitter
            .emit("start", EventBody::Json(serde_json::json!({"step": "a"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let emitter = Emitter::root(["bus"]).unwrap();
        let count = Arc::new(StdMutex::new(0u32));

        let count_clone = count.clone();
        let sub = emitter
            .on(
                "tick",
                move |_| {
                    let n = count_clone.clone();
                    async move {
                        *n.lock().unwrap() += 1;
                        Ok(())
                    }
                },
                ListenerOptions::default(),
            )
            .unwrap();

        emitter.emit("tick", EventBody::Empty).await.unwrap();
        sub.unsubscribe();
        emitter.emit("tick", EventBody::Empty).await.unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let emitter = Emitter::root(["bus"]).unwrap();
        assert!(emitter.emit("Bad Name", EventBody::Empty).await.is_err());
        assert!(emitter.emit("", EventBody::Empty).await.is_err());
        assert!(Emitter::root(["has.dot"]).is_err());
        assert!(emitter
            .child(ChildOptions::new().namespace(["UPPER"]))
            .is_err());
    }
}
