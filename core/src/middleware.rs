//! Middleware: ordered transforms applied to every envelope before dispatch.
//!
//! A middleware returns `Ok(Some(next))` to replace the envelope, `Ok(None)` to
//! keep the current one, or `Err` to be skipped. Errors never stop the chain;
//! the next middleware sees the last good envelope.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::event::Event;
use crate::Result;

/// Blocking middleware, usable on both publish paths.
pub trait Middleware: Send + Sync {
    fn process(&self, event: &Event) -> Result<Option<Event>>;
}

impl<F> Middleware for F
where
    F: Fn(&Event) -> Result<Option<Event>> + Send + Sync,
{
    fn process(&self, event: &Event) -> Result<Option<Event>> {
        self(event)
    }
}

/// Middleware that may suspend. Only `publish_async` runs it.
#[async_trait]
pub trait AsyncMiddleware: Send + Sync {
    async fn process(&self, event: Arc<Event>) -> Result<Option<Event>>;
}

#[derive(Clone)]
pub(crate) enum MiddlewareFn {
    Blocking(Arc<dyn Middleware>),
    Suspending(Arc<dyn AsyncMiddleware>),
}

fn absorb(position: usize, current: Event, outcome: Result<Option<Event>>) -> Event {
    match outcome {
        Ok(Some(next)) => next,
        Ok(None) => current,
        Err(e) => {
            error!(target: "event_bus", middleware = position, error = %e, "Middleware failed; continuing with last good envelope");
            current
        }
    }
}

fn run_blocking(position: usize, mw: &dyn Middleware, current: &Event) -> Result<Option<Event>> {
    match catch_unwind(AssertUnwindSafe(|| mw.process(current))) {
        Ok(outcome) => outcome,
        Err(_) => Err(crate::WeftError::MiddlewareError(format!(
            "middleware {position} panicked"
        ))),
    }
}

/// Blocking pipeline. Suspending middleware cannot be driven here and is skipped.
pub(crate) fn apply(chain: &[MiddlewareFn], event: Event) -> Event {
    let mut current = event;
    for (position, mw) in chain.iter().enumerate() {
        match mw {
            MiddlewareFn::Blocking(mw) => {
                let outcome = run_blocking(position, mw.as_ref(), &current);
                current = absorb(position, current, outcome);
            }
            MiddlewareFn::Suspending(_) => {
                warn!(target: "event_bus", middleware = position, kind = %current.kind(), "Async middleware skipped on blocking publish");
            }
        }
    }
    current
}

/// Suspending pipeline used by `publish_async`.
pub(crate) async fn apply_async(chain: &[MiddlewareFn], event: Event) -> Event {
    let mut current = event;
    for (position, mw) in chain.iter().enumerate() {
        let outcome = match mw {
            MiddlewareFn::Blocking(mw) => run_blocking(position, mw.as_ref(), &current),
            MiddlewareFn::Suspending(mw) => {
                // Run in its own task so a panic stays contained.
                let mw = Arc::clone(mw);
                let input = Arc::new(current.clone());
                match tokio::spawn(async move { mw.process(input).await }).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => Err(crate::WeftError::MiddlewareError(join_err.to_string())),
                }
            }
        };
        current = absorb(position, current, outcome);
    }
    current
}
