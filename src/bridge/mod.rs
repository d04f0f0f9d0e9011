//! The extension bridge: shared tables, event subscriptions, dispatch.
//!
//! A [`Bridge`] is a cheap-to-clone handle. Every clone, and every connection
//! spawned by [`Bridge::listen`], shares the same method table, variable
//! table and subscriber lists, so a variable pushed from anywhere is visible
//! to every client's next poll.
//!
//! # Locking
//!
//! Each table has its own mutex. Handlers and subscribers are cloned out of
//! their table before being called, so they can call back into the bridge
//! (a `poll` subscriber pushing a fresh value is the common case) without
//! deadlocking.
//!
//! # Example
//!
//! ```no_run
//! use scratch_bridge::{args, Bridge, EventKind};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let bridge = Bridge::new(12345);
//! bridge.register_method("write", |params| {
//!     println!("{}", args::string(params, 0)?);
//!     Ok(())
//! });
//! bridge.push_variable("PI", std::f64::consts::PI);
//!
//! let poller = bridge.clone();
//! bridge.on(EventKind::Poll, move |_| poller.push_variable("random", rand::random::<f64>()));
//!
//! let _listener = bridge.listen()?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod events;
pub mod tables;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::config::BridgeConfig;
use crate::constants::{LEGACY_POLL_METHOD, POLL_METHOD};
use crate::error::BridgeError;
use crate::socket::framing::{encode_update, CommandFrame};

use events::{BridgeEvent, EventBus, EventKind, SubscriptionId};
use tables::{MethodTable, VariableTable};

/// Outcome of dispatching one command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A poll was answered. The caller writes these bytes and then emits
    /// [`BridgeEvent::Poll`].
    PollReply(Vec<u8>),
    /// Fire-and-forget command; nothing goes back to the client.
    NoReply,
}

struct BridgeInner {
    config: BridgeConfig,
    methods: Mutex<MethodTable>,
    variables: Mutex<VariableTable>,
    events: Mutex<EventBus>,
}

/// Handle to a bridge instance.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("port", &self.inner.config.port)
            .field("methods", &*lock(&self.inner.methods))
            .field("variables", &*lock(&self.inner.variables))
            .finish_non_exhaustive()
    }
}

/// Lock a table, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Best-effort message from a caught panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

impl Bridge {
    /// Create a bridge for `port` with default settings. No I/O happens
    /// until [`listen`](Self::listen).
    pub fn new(port: u16) -> Self {
        Self::with_config(BridgeConfig::with_port(port))
    }

    /// Create a bridge from a full configuration.
    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                methods: Mutex::new(MethodTable::new()),
                variables: Mutex::new(VariableTable::new()),
                events: Mutex::new(EventBus::new()),
            }),
        }
    }

    /// The configuration this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register_method<F>(&self, name: &str, handler: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.inner.methods).register(name, Arc::new(handler));
    }

    /// Registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        lock(&self.inner.methods).methods()
    }

    /// Set variable `name` to `value`. Encoding is deferred to the next
    /// poll; a value that cannot be encoded is reported then.
    pub fn push_variable<T>(&self, name: &str, value: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        lock(&self.inner.variables).push(name, Arc::new(value));
    }

    /// Current `(name, value)` pairs in insertion order. Variables that fail
    /// to encode are reported as diagnostics and left out.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.snapshot_for("snapshot")
    }

    /// Snapshot taken on behalf of `conn_id`; encode failures are reported
    /// against that connection.
    fn snapshot_for(&self, conn_id: &str) -> Vec<(String, Value)> {
        let snapshot = lock(&self.inner.variables).snapshot();
        for err in snapshot.errors {
            self.report(conn_id, err);
        }
        snapshot.entries
    }

    /// Subscribe to a lifecycle event.
    pub fn on<F>(&self, kind: EventKind, subscriber: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.events).subscribe(kind, Arc::new(subscriber))
    }

    /// Subscribe to protocol diagnostics. The subscriber receives the id of
    /// the connection that caused each one.
    pub fn on_diagnostic<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&str, &BridgeError) + Send + Sync + 'static,
    {
        lock(&self.inner.events).subscribe_diagnostics(Arc::new(subscriber))
    }

    /// Remove a subscription made with [`on`](Self::on) or
    /// [`on_diagnostic`](Self::on_diagnostic).
    pub fn off(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.events).unsubscribe(id)
    }

    /// Invoke every subscriber of the event's kind, in registration order.
    ///
    /// A panicking subscriber is logged and skipped.
    pub(crate) fn emit(&self, event: &BridgeEvent) {
        let subscribers = lock(&self.inner.events).subscribers(event.kind());
        for subscriber in subscribers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                log::error!(
                    "[Bridge] {:?} subscriber panicked: {}",
                    event.kind(),
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Log a diagnostic and forward it to diagnostic subscribers.
    pub(crate) fn report(&self, conn_id: &str, err: BridgeError) {
        match &err {
            BridgeError::Handler { .. } => log::error!("[Bridge] {conn_id}: {err}"),
            _ => log::warn!("[Bridge] {conn_id}: {} ({})", err, err.kind()),
        }
        let subscribers = lock(&self.inner.events).diagnostic_subscribers();
        for subscriber in subscribers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber(conn_id, &err))) {
                log::error!(
                    "[Bridge] diagnostic subscriber panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Route a command frame.
    ///
    /// `poll` (and the legacy `update-poll`) produce a [`Dispatch::PollReply`]
    /// carrying the encoded snapshot. Anything else is looked up in the
    /// method table and invoked with its params; failures are reported and
    /// never answered.
    pub fn dispatch(&self, conn_id: &str, frame: CommandFrame) -> Dispatch {
        if frame.method == POLL_METHOD || frame.method == LEGACY_POLL_METHOD {
            return Dispatch::PollReply(encode_update(&self.snapshot_for(conn_id)));
        }

        let handler = lock(&self.inner.methods).get(&frame.method);
        let Some(handler) = handler else {
            self.report(conn_id, BridgeError::UnknownMethod { method: frame.method });
            return Dispatch::NoReply;
        };

        log::debug!(
            "[Bridge] {conn_id}: invoking '{}' with {} params",
            frame.method,
            frame.params.len()
        );
        let failure = match catch_unwind(AssertUnwindSafe(|| handler(&frame.params))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        if let Some(message) = failure {
            self.report(
                conn_id,
                BridgeError::Handler {
                    method: frame.method,
                    message,
                },
            );
        }
        Dispatch::NoReply
    }

    /// Decode-and-dispatch for one JSON value.
    pub(crate) fn dispatch_value(&self, conn_id: &str, value: Value) -> Dispatch {
        match CommandFrame::from_value(value) {
            Ok(frame) => self.dispatch(conn_id, frame),
            Err(err) => {
                self.report(conn_id, err);
                Dispatch::NoReply
            }
        }
    }
}
