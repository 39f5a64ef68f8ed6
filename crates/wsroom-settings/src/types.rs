//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it wants to change.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default time allowed to write one frame to a peer.
pub const DEFAULT_WRITE_WAIT_MS: u64 = 10_000;
/// Default time allowed between liveness acknowledgments.
pub const DEFAULT_PONG_WAIT_MS: u64 = 60_000;
/// Default maximum inbound message size.
pub const DEFAULT_READ_LIMIT_BYTES: usize = 2560;
/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "socket": { "pongWaitMs": 30000 },
///   "auth": { "jwtSecret": "change-me", "allowAnonymous": false }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsroomSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Per-socket timing and limits.
    pub socket: SocketSettings,
    /// Upgrade-time authentication.
    pub auth: AuthSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl WsroomSettings {
    /// Replace zero timings and sizes with defaults.
    ///
    /// A zero ping period is derived from the effective pong wait (9/10).
    pub fn merge_defaults(&mut self) {
        let socket = &mut self.socket;
        if socket.write_wait_ms == 0 {
            socket.write_wait_ms = DEFAULT_WRITE_WAIT_MS;
        }
        if socket.pong_wait_ms == 0 {
            socket.pong_wait_ms = DEFAULT_PONG_WAIT_MS;
        }
        if socket.ping_period_ms == 0 {
            socket.ping_period_ms = ping_period_for(socket.pong_wait_ms);
        }
        if socket.read_limit_bytes == 0 {
            socket.read_limit_bytes = DEFAULT_READ_LIMIT_BYTES;
        }
        if socket.outbound_buffer == 0 {
            socket.outbound_buffer = DEFAULT_OUTBOUND_BUFFER;
        }
        if self.server.ws_path.is_empty() {
            self.server.ws_path = "/ws".to_string();
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.socket.ping_period_ms == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "pingPeriodMs must be positive (pongWaitMs {} is too short to derive one)",
                self.socket.pong_wait_ms
            )));
        }
        if self.socket.ping_period_ms >= self.socket.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "pingPeriodMs ({}) must be below pongWaitMs ({})",
                self.socket.ping_period_ms, self.socket.pong_wait_ms
            )));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "wsPath must start with '/': {}",
                self.server.ws_path
            )));
        }
        if self.auth.token_query_param.is_empty() {
            return Err(SettingsError::InvalidValue(
                "tokenQueryParam must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ping period derived from a pong wait: 9/10 of it.
pub fn ping_period_for(pong_wait_ms: u64) -> u64 {
    pong_wait_ms * 9 / 10
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,
    /// How long shutdown waits for open connections to close.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            ws_path: "/ws".to_string(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Per-socket timing and limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    /// Time allowed to write one frame to the peer.
    pub write_wait_ms: u64,
    /// Time allowed to read the next frame (pong included) from the peer.
    pub pong_wait_ms: u64,
    /// Ping period. Must be less than `pong_wait_ms`.
    pub ping_period_ms: u64,
    /// Maximum inbound message size in bytes.
    pub read_limit_bytes: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            write_wait_ms: DEFAULT_WRITE_WAIT_MS,
            pong_wait_ms: DEFAULT_PONG_WAIT_MS,
            ping_period_ms: ping_period_for(DEFAULT_PONG_WAIT_MS),
            read_limit_bytes: DEFAULT_READ_LIMIT_BYTES,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Upgrade-time authentication settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret used to verify bearer tokens. `None` disables verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Query parameter carrying the token on the upgrade URL.
    pub token_query_param: String,
    /// Keep connections whose token is missing or invalid.
    pub allow_anonymous: bool,
    /// Bind authenticated connections to their session during the upgrade.
    pub auto_session: bool,
    /// Header carrying the client address when running behind a proxy.
    /// Empty disables the override.
    pub real_ip_header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_query_param: "jwt".to_string(),
            allow_anonymous: false,
            auto_session: true,
            real_ip_header: "x-real-ip".to_string(),
        }
    }
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_nine_tenths_of_pong_wait() {
        assert_eq!(ping_period_for(60_000), 54_000);
        assert_eq!(ping_period_for(1_000), 900);
    }

    #[test]
    fn merge_defaults_fills_zero_values() {
        let mut settings = WsroomSettings::default();
        settings.socket = SocketSettings {
            write_wait_ms: 0,
            pong_wait_ms: 0,
            ping_period_ms: 0,
            read_limit_bytes: 0,
            outbound_buffer: 0,
        };
        settings.merge_defaults();
        assert_eq!(settings.socket.write_wait_ms, DEFAULT_WRITE_WAIT_MS);
        assert_eq!(settings.socket.pong_wait_ms, DEFAULT_PONG_WAIT_MS);
        assert_eq!(settings.socket.ping_period_ms, 54_000);
        assert_eq!(settings.socket.read_limit_bytes, DEFAULT_READ_LIMIT_BYTES);
        assert_eq!(settings.socket.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
    }

    #[test]
    fn merge_defaults_derives_ping_from_custom_pong_wait() {
        let mut settings = WsroomSettings::default();
        settings.socket.pong_wait_ms = 10_000;
        settings.socket.ping_period_ms = 0;
        settings.merge_defaults();
        assert_eq!(settings.socket.ping_period_ms, 9_000);
    }

    #[test]
    fn merge_defaults_keeps_explicit_values() {
        let mut settings = WsroomSettings::default();
        settings.socket.write_wait_ms = 1_234;
        settings.merge_defaults();
        assert_eq!(settings.socket.write_wait_ms, 1_234);
    }

    #[test]
    fn validate_rejects_ping_not_below_pong() {
        let mut settings = WsroomSettings::default();
        settings.socket.ping_period_ms = settings.socket.pong_wait_ms;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("pingPeriodMs"));
    }

    #[test]
    fn validate_rejects_zero_ping_period() {
        let mut settings = WsroomSettings::default();
        settings.socket.pong_wait_ms = 1;
        settings.socket.ping_period_ms = 0;
        settings.merge_defaults();
        assert_eq!(settings.socket.ping_period_ms, 0);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("pingPeriodMs must be positive"));
    }

    #[test]
    fn validate_rejects_relative_ws_path() {
        let mut settings = WsroomSettings::default();
        settings.server.ws_path = "ws".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_token_param() {
        let mut settings = WsroomSettings::default();
        settings.auth.token_query_param = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings: WsroomSettings =
            serde_json::from_str(r#"{"socket":{"pongWaitMs":30000}}"#).unwrap();
        assert_eq!(settings.socket.pong_wait_ms, 30_000);
        assert_eq!(settings.socket.write_wait_ms, DEFAULT_WRITE_WAIT_MS);
        assert_eq!(settings.server.port, 5000);
    }

    #[test]
    fn jwt_secret_omitted_when_none() {
        let json = serde_json::to_value(WsroomSettings::default()).unwrap();
        assert!(json["auth"].get("jwtSecret").is_none());
        assert_eq!(json["auth"]["tokenQueryParam"], "jwt");
    }
}
