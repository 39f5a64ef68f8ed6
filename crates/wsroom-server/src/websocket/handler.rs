//! Inbound text frame handling.

use tracing::{debug, warn};
use wsroom_core::Message;

use crate::events::{Context, DispatchOutcome};

/// Parse one text frame and dispatch it.
///
/// Frames that are not a valid message envelope are logged and dropped;
/// the connection stays open. Returns `None` for dropped frames.
pub async fn handle_message(text: &str, ctx: &Context) -> Option<DispatchOutcome> {
    let message = match Message::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection_id = %ctx.id(), error = %e, len = text.len(), "dropping malformed message");
            return None;
        }
    };
    debug!(connection_id = %ctx.id(), event = %message.event_name, "inbound message");
    Some(ctx.registry().events().dispatch(message, ctx).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::events::{HandlerError, handler_fn};
    use crate::registry::tests::{attach, make_registry};

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let registry = make_registry();
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn.clone(), registry.clone());
        assert!(handle_message("{not json", &ctx).await.is_none());
        assert!(handle_message(r#"{"data":1}"#, &ctx).await.is_none());
        assert!(registry.connection(conn.id()).is_some());
    }

    #[tokio::test]
    async fn valid_message_reaches_handler() {
        let registry = make_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.events().register(
            "ping",
            handler_fn(move |_message: Message, ctx: Context| {
                let counter = counter.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    ctx.emit(&Message::new("pong"))?;
                    Ok::<_, HandlerError>(())
                }
            }),
            false,
        );
        let (conn, mut rx) = attach(&registry, None);
        let ctx = Context::new(conn, registry.clone());

        let outcome = handle_message(r#"{"eventName":"ping","data":null}"#, &ctx).await;
        assert_eq!(outcome, Some(DispatchOutcome::Handled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unknown_event_keeps_connection() {
        let registry = make_registry();
        let (conn, _rx) = attach(&registry, None);
        let ctx = Context::new(conn.clone(), registry.clone());
        let outcome = handle_message(r#"{"eventName":"who"}"#, &ctx).await;
        assert_eq!(outcome, Some(DispatchOutcome::NoHandler));
        assert!(registry.connection(conn.id()).is_some());
    }
}
