// Cooperative cancellation primitive
//
// A controller owns exactly one signal; aborting flips the signal into its
// terminal state, invokes observers synchronously in registration order and
// wakes every `aborted()` waiter. Signals never reset. Controllers compose
// by chaining upstream signals, which is how a run scope merges its
// parent's cancellation with the caller-supplied one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Result, RuntimeError};

/// Handle returned by [`AbortSignal::add_listener`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type AbortListener = Box<dyn Fn(&str) + Send + Sync>;

struct SignalState {
    reason: Option<String>,
    listeners: Vec<(ListenerId, AbortListener)>,
    next_id: u64,
}

struct SignalShared {
    state: Mutex<SignalState>,
    // Wait side for `aborted()`; flipped to true exactly once.
    tx: watch::Sender<bool>,
}

/// Observable side of the cancellation primitive.
///
/// Cheap to clone; all clones observe the same state. The state machine is
/// `Active -> Aborted` with no way back.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<SignalShared>,
}

impl AbortSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(SignalShared {
                state: Mutex::new(SignalState {
                    reason: None,
                    listeners: Vec::new(),
                    next_id: 0,
                }),
                tx,
            }),
        }
    }

    /// Returns a signal that aborts itself after `duration`.
    ///
    /// Must be called within a tokio runtime; the countdown runs on a
    /// spawned task.
    pub fn timeout(duration: Duration) -> Self {
        let controller = AbortController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            controller.abort(format!("operation timed out after {}ms", duration.as_millis()));
        });
        signal
    }

    /// True once the signal has fired.
    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().reason.is_some()
    }

    /// The abort reason, once fired.
    pub fn reason(&self) -> Option<String> {
        self.inner.state.lock().reason.clone()
    }

    /// Returns the abort error immediately if the signal already fired.
    pub fn throw_if_aborted(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(RuntimeError::Aborted { reason }),
            None => Ok(()),
        }
    }

    /// Resolves when the signal fires; resolves immediately if it already
    /// has. Never resolves for a signal that is never aborted.
    pub async fn aborted(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives inside our own Arc, so it cannot be dropped
        // while we hold `self`.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// The abort error this signal produces, defaulting the reason when
    /// the signal has not fired.
    pub fn abort_error(&self) -> RuntimeError {
        RuntimeError::Aborted {
            reason: self
                .reason()
                .unwrap_or_else(|| "signal not aborted".to_string()),
        }
    }

    /// Register an observer invoked exactly once when the signal fires.
    ///
    /// Observers registered after the signal has already fired are never
    /// invoked; check [`AbortSignal::is_aborted`] first when that matters.
    pub fn add_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> ListenerId {
        let mut state = self.inner.state.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Box::new(listener)));
        id
    }

    /// Unregister a previously added observer.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut state = self.inner.state.lock();
        state.listeners.retain(|(lid, _)| *lid != id);
    }

    fn fire(&self, reason: String) {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.reason.is_some() {
                // Terminal: later aborts are no-ops.
                return;
            }
            state.reason = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        // Invoke outside the lock so a listener may register or remove
        // listeners on other signals without deadlocking.
        for (_, listener) in listeners {
            listener(&reason);
        }
        // send() would skip the update while no receiver is subscribed;
        // send_replace stores the value unconditionally so a later
        // `aborted()` waiter still observes the fired state.
        self.inner.tx.send_replace(true);
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Owning side of the cancellation primitive.
#[derive(Debug)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(),
        }
    }

    /// A cloneable handle to the controller's signal.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the owned signal. The first call wins; the reason of any
    /// later call is discarded.
    pub fn abort(&self, reason: impl Into<String>) {
        self.signal.fire(reason.into());
    }

    /// Chain upstream signals into this controller.
    ///
    /// For each upstream signal already aborted, the controller aborts
    /// immediately with that reason; otherwise an observer is registered
    /// that aborts the controller when the upstream later fires.
    pub fn chain<I>(&self, upstream: I)
    where
        I: IntoIterator<Item = AbortSignal>,
    {
        for signal in upstream {
            if let Some(reason) = signal.reason() {
                self.abort(reason);
                continue;
            }
            let own = self.signal.clone();
            let _ = signal.add_listener(move |reason| own.fire(reason.to_string()));
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}
