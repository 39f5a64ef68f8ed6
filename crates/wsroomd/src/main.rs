//! # wsroomd
//!
//! wsroom server binary: loads settings, starts the WebSocket server with
//! the demo events and waits for a shutdown signal.

#![deny(unsafe_code)]

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use wsroom_auth::JwtVerifier;
use wsroom_server::metrics::install_recorder;
use wsroom_server::shutdown::wait_for_signal;
use wsroom_server::{Registry, ServerConfig, WsroomServer};
use wsroom_settings::WsroomSettings;

/// wsroom WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "wsroomd", about = "wsroom WebSocket pub/sub server")]
struct Cli {
    /// Settings file (defaults to `~/.wsroom/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// HS256 secret used to verify tokens (overrides settings).
    #[arg(long)]
    jwt_secret: Option<String>,

    /// Accept connections without a valid token.
    #[arg(long)]
    allow_anonymous: bool,

    /// Log filter, e.g. `info` or `wsroom_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a signed token for `identity` and exit.
    Token {
        /// Identity placed in the `id` claim.
        identity: String,

        /// Lifetime in seconds.
        #[arg(long, default_value = "3600")]
        ttl_secs: u64,
    },
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut WsroomSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(secret) = &self.jwt_secret {
            settings.auth.jwt_secret = Some(secret.clone());
        }
        if self.allow_anonymous {
            settings.auth.allow_anonymous = true;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<WsroomSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(wsroom_settings::settings_path);
    let mut settings = wsroom_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn build_registry(settings: &WsroomSettings) -> Registry {
    let mut builder =
        Registry::builder(ServerConfig::from(settings)).hooks(Arc::new(handlers::PresenceHooks));
    match settings.auth.jwt_secret.as_deref() {
        Some(secret) if !secret.is_empty() => {
            builder = builder.verifier(Arc::new(JwtVerifier::new(secret)));
        }
        _ if settings.auth.allow_anonymous => {
            warn!("no JWT secret configured, every connection will be anonymous");
        }
        _ => warn!("no JWT secret configured and anonymous access disabled, all upgrades will be rejected"),
    }
    let registry = builder.build();
    handlers::register_all(&registry);
    registry
}

fn issue(settings: &WsroomSettings, identity: &str, ttl_secs: u64) -> Result<String> {
    let Some(secret) = settings.auth.jwt_secret.as_deref().filter(|s| !s.is_empty()) else {
        bail!("a JWT secret is required to issue tokens (--jwt-secret or WSROOM_JWT_SECRET)");
    };
    wsroom_auth::issue_token(identity, secret, Duration::from_secs(ttl_secs))
        .context("Failed to sign token")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    wsroom_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    if let Some(Command::Token { identity, ttl_secs }) = &cli.command {
        println!("{}", issue(&settings, identity, *ttl_secs)?);
        return Ok(());
    }

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let registry = build_registry(&settings);
    let event_count = registry.events().events().len();
    let server = WsroomServer::new(registry, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        "wsroomd listening on ws://{addr}{} ({event_count} events registered)",
        server.config().ws_path
    );

    wait_for_signal().await;
    info!("Shutting down...");
    if !server.shutdown().await {
        warn!("connections did not close before the shutdown timeout");
    }
    let _ = handle.await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("wsroomd").chain(args.iter().copied()))
    }

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = parse(&[]);
        let mut settings = WsroomSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 5000);
        assert!(!settings.auth.allow_anonymous);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--jwt-secret",
            "s3cret",
            "--allow-anonymous",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = WsroomSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert!(settings.auth.allow_anonymous);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn token_subcommand_parses() {
        let cli = parse(&["token", "alice", "--ttl-secs", "60"]);
        let Some(Command::Token { identity, ttl_secs }) = cli.command else {
            panic!("expected token subcommand");
        };
        assert_eq!(identity, "alice");
        assert_eq!(ttl_secs, 60);
    }

    #[test]
    fn settings_file_is_layered_under_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 7000, "wsPath": "/live"}}"#).unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--port", "7001"]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.server.ws_path, "/live");
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap()]);
        assert!(load_settings(&cli).is_err());
    }

    #[test]
    fn issued_token_verifies() {
        let mut settings = WsroomSettings::default();
        settings.auth.jwt_secret = Some("k".into());
        let token = issue(&settings, "alice", 60).unwrap();
        let registry = build_registry(&settings);
        assert_eq!(registry.authenticate(Some(&token)).unwrap(), "alice");
    }

    #[test]
    fn issue_without_secret_fails() {
        let settings = WsroomSettings::default();
        assert!(issue(&settings, "alice", 60).is_err());
    }

    #[test]
    fn registry_has_demo_events() {
        let registry = build_registry(&WsroomSettings::default());
        assert!(registry.events().has_event("ping"));
        assert_eq!(registry.events().is_protected("room.message"), Some(true));
    }
}
