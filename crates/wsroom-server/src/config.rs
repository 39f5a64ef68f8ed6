//! Runtime server configuration.

use std::time::Duration;

use wsroom_settings::WsroomSettings;

/// Configuration for the wsroom server, with timings as [`Duration`]s.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path of the upgrade endpoint.
    pub ws_path: String,
    /// Time allowed to write one frame to a peer.
    pub write_wait: Duration,
    /// Read deadline; also the heartbeat timeout.
    pub pong_wait: Duration,
    /// Interval between liveness probes. Must be below `pong_wait`.
    pub ping_period: Duration,
    /// Maximum inbound message size in bytes.
    pub read_limit: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Query parameter carrying the bearer token.
    pub token_query_param: String,
    /// Keep connections whose token is missing or invalid.
    pub allow_anonymous: bool,
    /// Bind authenticated connections to their session on upgrade.
    pub auto_session: bool,
    /// Header overriding the remote address. Empty disables it.
    pub real_ip_header: String,
    /// How long shutdown waits for connections to close.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut config = Self::from(&WsroomSettings::default());
        config.host = "127.0.0.1".into();
        config.port = 0;
        config
    }
}

impl From<&WsroomSettings> for ServerConfig {
    fn from(settings: &WsroomSettings) -> Self {
        let mut settings = settings.clone();
        settings.merge_defaults();
        Self {
            host: settings.server.host,
            port: settings.server.port,
            ws_path: settings.server.ws_path,
            write_wait: Duration::from_millis(settings.socket.write_wait_ms),
            pong_wait: Duration::from_millis(settings.socket.pong_wait_ms),
            ping_period: Duration::from_millis(settings.socket.ping_period_ms),
            read_limit: settings.socket.read_limit_bytes,
            outbound_buffer: settings.socket.outbound_buffer,
            token_query_param: settings.auth.token_query_param,
            allow_anonymous: settings.auth.allow_anonymous,
            auto_session: settings.auth.auto_session,
            real_ip_header: settings.auth.real_ip_header,
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_timings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
        assert!(cfg.ping_period < cfg.pong_wait);
        assert_eq!(cfg.read_limit, 2560);
    }

    #[test]
    fn default_auth_policy() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.token_query_param, "jwt");
        assert!(!cfg.allow_anonymous);
        assert!(cfg.auto_session);
        assert_eq!(cfg.real_ip_header, "x-real-ip");
    }

    #[test]
    fn from_settings_fills_zero_timings() {
        let mut settings = WsroomSettings::default();
        settings.server.port = 7000;
        settings.socket.pong_wait_ms = 2_000;
        settings.socket.ping_period_ms = 0;
        settings.socket.write_wait_ms = 0;
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.pong_wait, Duration::from_secs(2));
        assert_eq!(cfg.ping_period, Duration::from_millis(1_800));
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
    }
}
