//! # wsroom-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WsroomSettings::default()`]
//! 2. **Settings file**: `~/.wsroom/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `WSROOM_*` overrides (highest priority)
//!
//! After loading, zero durations and sizes are replaced by their defaults
//! ([`WsroomSettings::merge_defaults`]) and the heartbeat timing is checked
//! ([`WsroomSettings::validate`]).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = WsroomSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = WsroomSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.ws_path, "/ws");
        assert_eq!(settings.socket.write_wait_ms, 10_000);
        assert_eq!(settings.socket.pong_wait_ms, 60_000);
        assert_eq!(settings.socket.ping_period_ms, 54_000);
        assert_eq!(settings.socket.read_limit_bytes, 2560);
        assert_eq!(settings.auth.token_query_param, "jwt");
        assert!(!settings.auth.allow_anonymous);
        assert!(settings.auth.auto_session);
    }
}
