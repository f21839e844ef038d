// Event bus implementation
//
// Handlers are keyed by `EventKind` and kept sorted by descending priority
// (stable, so equal priorities keep registration order). One lock guards the
// registry; insertion and re-sort happen under the same write guard.
//
// Blocking handlers registered for the synchronous path run on the caller's
// thread with no timeout: a handler that hangs blocks `publish` forever. Only
// fast, non-suspending handlers belong on that path.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::event::{Event, EventKind};
use crate::filter::{self, Filter};
use crate::middleware::{self, AsyncMiddleware, Middleware, MiddlewareFn};
use crate::queue::EventQueue;
use crate::Result;

/// Identifier assigned at registration, `"{kind}_{sequence}"`.
pub type HandlerId = String;

/// Event handler that may suspend.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        (self.0)(event).await
    }
}

/// Wraps an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type BlockingFn = dyn Fn(&Event) -> Result<()> + Send + Sync;

#[derive(Clone)]
enum Callback {
    Blocking(Arc<BlockingFn>),
    Suspending(Arc<dyn EventHandler>),
}

/// Priority and filters for one registration.
#[derive(Clone, Default)]
pub struct HandlerOptions {
    pub priority: i32,
    pub filters: Vec<Arc<dyn Filter>>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }
}

#[derive(Clone)]
struct Registration {
    id: HandlerId,
    priority: i32,
    filters: Vec<Arc<dyn Filter>>,
    callback: Callback,
}

/// Registration builder returned by [`EventBus::subscribe`].
///
/// `register` hands the callback back (behind an `Arc`) so it stays usable as
/// an ordinary function after being subscribed.
pub struct Subscriber<'a> {
    bus: &'a EventBus,
    kind: EventKind,
    options: HandlerOptions,
}

impl Subscriber<'_> {
    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.options.filters.push(Arc::new(filter));
        self
    }

    pub fn register<F>(self, handler: F) -> Arc<F>
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let stored: Arc<BlockingFn> = handler.clone();
        self.bus
            .insert(self.kind, Callback::Blocking(stored), self.options);
        handler
    }

    pub fn register_async<H>(self, handler: Arc<H>) -> Arc<H>
    where
        H: EventHandler + 'static,
    {
        let stored: Arc<dyn EventHandler> = handler.clone();
        self.bus
            .insert(self.kind, Callback::Suspending(stored), self.options);
        handler
    }
}

/// In-process publish/subscribe bus.
///
/// Starts `Stopped`; `start()` enables publishing. While stopped both publish
/// entry points log a warning and return without invoking anything.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    middlewares: RwLock<Vec<MiddlewareFn>>,
    next_handler_id: AtomicU64,
    running: AtomicBool,
    pub(crate) queue: EventQueue,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            middlewares: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
            queue: EventQueue::new(),
        }
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(target: "event_bus", "Event bus started");
        }
    }

    /// Stops publishing and drops every handler, middleware and queued envelope.
    pub fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let removed = self.clear_handlers(None);
        self.middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let dropped = self.queue.clear();
        self.queue.wake();
        if was_running {
            info!(target: "event_bus", handlers = removed, queued_dropped = dropped, "Event bus shut down");
        } else {
            debug!(target: "event_bus", handlers = removed, queued_dropped = dropped, "Shutdown on a stopped bus");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts a registration for `kind`; see [`Subscriber`].
    pub fn subscribe(&self, kind: impl Into<EventKind>) -> Subscriber<'_> {
        Subscriber {
            bus: self,
            kind: kind.into(),
            options: HandlerOptions::default(),
        }
    }

    /// Registers a blocking handler and returns its id.
    pub fn add_handler<F>(&self, kind: impl Into<EventKind>, handler: F, options: HandlerOptions) -> HandlerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.insert(kind.into(), Callback::Blocking(Arc::new(handler)), options)
    }

    /// Registers a suspending handler and returns its id.
    pub fn add_async_handler(
        &self,
        kind: impl Into<EventKind>,
        handler: Arc<dyn EventHandler>,
        options: HandlerOptions,
    ) -> HandlerId {
        self.insert(kind.into(), Callback::Suspending(handler), options)
    }

    fn insert(&self, kind: EventKind, callback: Callback, options: HandlerOptions) -> HandlerId {
        let seq = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{kind}_{seq}");
        let registration = Registration {
            id: id.clone(),
            priority: options.priority,
            filters: options.filters,
            callback,
        };

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let list = handlers.entry(kind.clone()).or_default();
        list.push(registration);
        list.sort_by_key(|r| Reverse(r.priority));
        drop(handlers);

        debug!(target: "event_bus", handler_id = %id, kind = %kind, priority = options.priority, "Added handler");
        id
    }

    pub fn remove_handler(&self, kind: &EventKind, handler_id: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let Some(pos) = list.iter().position(|r| r.id == handler_id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            handlers.remove(kind);
        }
        debug!(target: "event_bus", handler_id, kind = %kind, "Removed handler");
        true
    }

    /// Removes handlers for one kind, or for every kind when `kind` is `None`.
    /// Returns how many were removed.
    pub fn clear_handlers(&self, kind: Option<&EventKind>) -> usize {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let count = match kind {
            Some(kind) => handlers.remove(kind).map(|l| l.len()).unwrap_or(0),
            None => {
                let total = handlers.values().map(Vec::len).sum();
                handlers.clear();
                total
            }
        };
        match kind {
            Some(kind) => info!(target: "event_bus", kind = %kind, count, "Cleared handlers"),
            None => info!(target: "event_bus", count, "Cleared all handlers"),
        }
        count
    }

    pub fn handler_count(&self, kind: Option<&EventKind>) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        match kind {
            Some(kind) => handlers.get(kind).map(Vec::len).unwrap_or(0),
            None => handlers.values().map(Vec::len).sum(),
        }
    }

    /// Kinds that currently have at least one handler.
    pub fn event_kinds(&self) -> Vec<EventKind> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut kinds: Vec<EventKind> = handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn add_middleware(&self, middleware: impl Middleware + 'static) {
        self.middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MiddlewareFn::Blocking(Arc::new(middleware)));
        debug!(target: "event_bus", "Added middleware");
    }

    /// Middleware that only the concurrent path runs.
    pub fn add_async_middleware(&self, middleware: Arc<dyn AsyncMiddleware>) {
        self.middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MiddlewareFn::Suspending(middleware));
        debug!(target: "event_bus", "Added async middleware");
    }

    fn middleware_chain(&self) -> Vec<MiddlewareFn> {
        self.middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Snapshot under the read lock, filter outside it so a filter can never
    // deadlock against registration.
    fn matching(&self, kind: &EventKind, event: &Event) -> Vec<Registration> {
        let snapshot = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(kind) {
                Some(list) => list.clone(),
                None => return Vec::new(),
            }
        };
        snapshot
            .into_iter()
            .filter(|r| filter::accepts_all(&r.filters, event))
            .collect()
    }

    /// Publishes on the caller's thread, one handler at a time in priority order.
    ///
    /// Dispatch uses the kind of the envelope as published; filters see the
    /// envelope after middleware. Suspending handlers cannot be awaited here:
    /// they are spawned on the ambient tokio runtime (in order, not joined) or
    /// skipped with a warning when there is none.
    pub fn publish(&self, event: Event) {
        if !self.is_running() {
            warn!(target: "event_bus", kind = %event.kind(), "Event bus is not running, skipping event publishing");
            return;
        }
        debug!(target: "event_bus", kind = %event.kind(), source = event.source(), "Publishing event");

        let kind = event.kind().clone();
        let processed = Arc::new(middleware::apply(&self.middleware_chain(), event));
        for registration in self.matching(&kind, &processed) {
            match &registration.callback {
                Callback::Blocking(f) => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| f(processed.as_ref())));
                    log_outcome(&registration.id, flatten_panic(outcome));
                }
                Callback::Suspending(h) => match tokio::runtime::Handle::try_current() {
                    Ok(rt) => {
                        let h = Arc::clone(h);
                        let event = Arc::clone(&processed);
                        let id = registration.id.clone();
                        rt.spawn(async move {
                            log_outcome(&id, h.handle(event).await);
                        });
                    }
                    Err(_) => {
                        warn!(target: "event_bus", handler_id = %registration.id, "No async runtime; skipping async handler on blocking publish");
                    }
                },
            }
        }
    }

    /// Publishes concurrently: one task per matching handler, all spawned before
    /// any is awaited, joined before returning. Blocking handlers run on the
    /// blocking pool. Failures and panics are logged per handler.
    pub async fn publish_async(&self, event: Event) {
        if !self.is_running() {
            warn!(target: "event_bus", kind = %event.kind(), "Event bus is not running, skipping event publishing");
            return;
        }
        debug!(target: "event_bus", kind = %event.kind(), source = event.source(), "Async publishing event");

        let kind = event.kind().clone();
        let processed = Arc::new(middleware::apply_async(&self.middleware_chain(), event).await);

        let mut tasks = JoinSet::new();
        for registration in self.matching(&kind, &processed) {
            let event = Arc::clone(&processed);
            let id = registration.id;
            match registration.callback {
                Callback::Blocking(f) => {
                    tasks.spawn_blocking(move || {
                        let outcome = catch_unwind(AssertUnwindSafe(|| f(event.as_ref())));
                        (id, flatten_panic(outcome))
                    });
                }
                Callback::Suspending(h) => {
                    tasks.spawn(async move {
                        let outcome = h.handle(event).await;
                        (id, outcome)
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => log_outcome(&id, outcome),
                Err(join_err) => {
                    error!(target: "event_bus", kind = %kind, error = %join_err, "Handler task failed");
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn flatten_panic(outcome: std::thread::Result<Result<()>>) -> Result<()> {
    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(crate::WeftError::HandlerError(msg))
        }
    }
}

fn log_outcome(handler_id: &str, outcome: Result<()>) {
    if let Err(e) = outcome {
        error!(target: "event_bus", handler_id, error = %e, "Handler failed");
    }
}
