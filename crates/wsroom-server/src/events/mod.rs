//! Event dispatch table.
//!
//! Maps event names to handlers. A registration may be marked `protected`,
//! in which case it only runs for connections bound to a live session.
//! Handler errors and panics are contained and reported as
//! [`DispatchOutcome::HandlerFailed`]; they never tear down the connection.

mod context;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, error, warn};
use wsroom_core::Message;

pub use context::Context;

use crate::errors::HubError;
use crate::metrics::WS_DISPATCH_TOTAL;

/// Error a handler may return.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload did not decode into the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    /// A registry operation failed.
    #[error(transparent)]
    Hub(#[from] HubError),
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// Result type returned by handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Trait implemented by every event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one inbound message.
    async fn handle(&self, message: Message, ctx: &Context) -> HandlerResult;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a handler. The closure receives an owned [`Context`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message, Context) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Message, Context) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, message: Message, ctx: &Context) -> HandlerResult {
        (self.0)(message, ctx.clone()).await
    }
}

/// Result of dispatching one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and succeeded.
    Handled,
    /// No handler is registered for the event.
    NoHandler,
    /// The event is protected and the connection has no session.
    ProtectedDenied,
    /// The handler returned an error or panicked.
    HandlerFailed(String),
}

impl DispatchOutcome {
    /// Label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::NoHandler => "no_handler",
            Self::ProtectedDenied => "protected_denied",
            Self::HandlerFailed(_) => "handler_failed",
        }
    }

    /// Convert misses and denials into errors for callers that propagate them.
    ///
    /// Handler failures were already contained and map to `Ok`.
    pub fn into_result(self, event: &str) -> Result<(), HubError> {
        match self {
            Self::Handled | Self::HandlerFailed(_) => Ok(()),
            Self::NoHandler => Err(HubError::DispatchMiss(event.to_owned())),
            Self::ProtectedDenied => Err(HubError::ProtectedAccessDenied(event.to_owned())),
        }
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn EventHandler>,
    protected: bool,
}

/// Event name to handler table.
#[derive(Default)]
pub struct EventTable {
    handlers: RwLock<HashMap<String, Registration>>,
}

impl EventTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any previous registration.
    pub fn register(&self, event: &str, handler: impl EventHandler + 'static, protected: bool) {
        let registration = Registration {
            handler: Arc::new(handler),
            protected,
        };
        if self
            .handlers
            .write()
            .insert(event.to_owned(), registration)
            .is_some()
        {
            debug!(event, "replaced event handler");
        }
    }

    /// Whether a handler is registered for `event`.
    pub fn has_event(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    /// Whether `event` is registered as protected.
    pub fn is_protected(&self, event: &str) -> Option<bool> {
        self.handlers.read().get(event).map(|r| r.protected)
    }

    /// Registered event names (sorted).
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Route `message` to its handler.
    pub async fn dispatch(&self, message: Message, ctx: &Context) -> DispatchOutcome {
        let event = message.event_name.clone();
        let registration = self.handlers.read().get(&event).cloned();

        let outcome = match registration {
            None => {
                debug!(event, connection_id = %ctx.id(), "no handler for event");
                DispatchOutcome::NoHandler
            }
            Some(r) if r.protected && !ctx.has_session() => {
                warn!(event, connection_id = %ctx.id(), "protected event without session");
                DispatchOutcome::ProtectedDenied
            }
            Some(r) => match AssertUnwindSafe(r.handler.handle(message, ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => DispatchOutcome::Handled,
                Ok(Err(err)) => {
                    warn!(event, connection_id = %ctx.id(), error = %err, "event handler failed");
                    DispatchOutcome::HandlerFailed(err.to_string())
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(event, connection_id = %ctx.id(), reason, "event handler panicked");
                    DispatchOutcome::HandlerFailed(format!("handler panicked: {reason}"))
                }
            },
        };

        counter!(WS_DISPATCH_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    use super::*;
    use crate::registry::tests::{attach, make_registry};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _message: Message, _ctx: &Context) -> HandlerResult {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailHandler;

    #[async_trait]
    impl EventHandler for FailHandler {
        async fn handle(&self, _message: Message, _ctx: &Context) -> HandlerResult {
            Err(HandlerError::Failed("boom".into()))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl EventHandler for PanicHandler {
        async fn handle(&self, _message: Message, _ctx: &Context) -> HandlerResult {
            panic!("handler exploded");
        }
    }

    #[tokio::test]
    async fn unknown_event_is_no_handler() {
        let registry = make_registry();
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn, registry.clone());
        let outcome = registry.events().dispatch(Message::new("nope"), &ctx).await;
        assert_eq!(outcome, DispatchOutcome::NoHandler);
        assert!(matches!(
            outcome.into_result("nope"),
            Err(HubError::DispatchMiss(_))
        ));
    }

    #[tokio::test]
    async fn handler_runs_once() {
        let registry = make_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .events()
            .register("ping", CountingHandler(calls.clone()), false);
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn, registry.clone());

        let outcome = registry.events().dispatch(Message::new("ping"), &ctx).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn protected_without_session_is_denied() {
        let registry = make_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .events()
            .register("secret", CountingHandler(calls.clone()), true);
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn, registry.clone());

        let outcome = registry.events().dispatch(Message::new("secret"), &ctx).await;
        assert_eq!(outcome, DispatchOutcome::ProtectedDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn protected_with_session_runs() {
        let registry = make_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .events()
            .register("secret", CountingHandler(calls.clone()), true);
        let (conn, _rx) = attach(&registry, Some("alice"));
        let ctx = Context::new(conn, registry.clone());
        assert!(ctx.has_session());

        let outcome = registry.events().dispatch(Message::new("secret"), &ctx).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn protected_after_session_deleted_is_denied() {
        let registry = make_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .events()
            .register("secret", CountingHandler(calls.clone()), true);
        let (conn, _rx) = attach(&registry, Some("alice"));
        registry.delete_session("alice").unwrap();
        let ctx = Context::new(conn, registry.clone());

        let outcome = registry.events().dispatch(Message::new("secret"), &ctx).await;
        assert_eq!(outcome, DispatchOutcome::ProtectedDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_is_contained() {
        let registry = make_registry();
        registry.events().register("fail", FailHandler, false);
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn.clone(), registry.clone());

        let outcome = registry.events().dispatch(Message::new("fail"), &ctx).await;
        assert_eq!(outcome, DispatchOutcome::HandlerFailed("boom".into()));
        assert!(registry.connection(conn.id()).is_some());
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let registry = make_registry();
        registry.events().register("explode", PanicHandler, false);
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn, registry.clone());

        let outcome = registry.events().dispatch(Message::new("explode"), &ctx).await;
        let DispatchOutcome::HandlerFailed(reason) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("handler exploded"));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = make_registry();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        registry
            .events()
            .register("ev", CountingHandler(first.clone()), false);
        registry
            .events()
            .register("ev", CountingHandler(second.clone()), true);
        assert_eq!(registry.events().is_protected("ev"), Some(true));
        assert_eq!(registry.events().events(), vec!["ev".to_string()]);

        let (conn, _rx) = attach(&registry, Some("bob"));
        let ctx = Context::new(conn, registry.clone());
        let _ = registry.events().dispatch(Message::new("ev"), &ctx).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closure_handler_decodes_payload() {
        #[derive(Deserialize)]
        struct Join {
            room: String,
        }

        let registry = make_registry();
        registry.events().register(
            "join",
            handler_fn(|message: Message, ctx: Context| async move {
                let join: Join = message.decode()?;
                ctx.registry().join_room(ctx.id(), &join.room)?;
                Ok::<_, HandlerError>(())
            }),
            false,
        );
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn.clone(), registry.clone());

        let msg = Message::with_data("join", &serde_json::json!({"room": "lobby"})).unwrap();
        assert_eq!(
            registry.events().dispatch(msg, &ctx).await,
            DispatchOutcome::Handled
        );
        assert_eq!(conn.room().name, "lobby");

        let bad = Message::with_data("join", &serde_json::json!({"nope": 1})).unwrap();
        assert!(matches!(
            registry.events().dispatch(bad, &ctx).await,
            DispatchOutcome::HandlerFailed(_)
        ));
    }
}
