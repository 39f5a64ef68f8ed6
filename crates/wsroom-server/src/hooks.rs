//! Connection lifecycle callbacks.

use crate::events::Context;

/// Callbacks fired as connections open and close.
///
/// Both run synchronously on the task driving the transition, outside any
/// registry lock, so they may call back into the registry.
pub trait ConnectionHooks: Send + Sync {
    /// A connection was registered and is open.
    fn on_connect(&self, _ctx: &Context) {}

    /// A connection was removed. Fires exactly once per connection.
    fn on_close(&self, _ctx: &Context) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl ConnectionHooks for NoopHooks {}
