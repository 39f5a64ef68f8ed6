//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WsroomSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WSROOM_*` environment overrides (highest priority)
//! 4. Fill zero values with defaults and validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::WsroomSettings;

/// Resolve the path to the settings file (`~/.wsroom/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wsroom").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WsroomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed
/// [`WsroomSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WsroomSettings> {
    let defaults = serde_json::to_value(WsroomSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WsroomSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.merge_defaults();
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WSROOM_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut WsroomSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_overrides_from<F>(settings: &mut WsroomSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WSROOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("WSROOM_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("WSROOM_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = env.u64("WSROOM_SHUTDOWN_TIMEOUT_MS", 0, 600_000) {
        settings.server.shutdown_timeout_ms = v;
    }

    // ── Socket ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("WSROOM_WRITE_WAIT_MS", 1, 600_000) {
        settings.socket.write_wait_ms = v;
    }
    if let Some(v) = env.u64("WSROOM_PONG_WAIT_MS", 1, 3_600_000) {
        settings.socket.pong_wait_ms = v;
    }
    if let Some(v) = env.u64("WSROOM_PING_PERIOD_MS", 1, 3_600_000) {
        settings.socket.ping_period_ms = v;
    }
    if let Some(v) = env.usize("WSROOM_READ_LIMIT_BYTES", 1, 64 * 1024 * 1024) {
        settings.socket.read_limit_bytes = v;
    }
    if let Some(v) = env.usize("WSROOM_OUTBOUND_BUFFER", 1, 1_000_000) {
        settings.socket.outbound_buffer = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("WSROOM_JWT_SECRET") {
        settings.auth.jwt_secret = Some(v);
    }
    if let Some(v) = env.string("WSROOM_TOKEN_QUERY_PARAM") {
        settings.auth.token_query_param = v;
    }
    if let Some(v) = env.bool("WSROOM_ALLOW_ANONYMOUS") {
        settings.auth.allow_anonymous = v;
    }
    if let Some(v) = env.bool("WSROOM_AUTO_SESSION") {
        settings.auth.auto_session = v;
    }
    if let Some(v) = env.raw("WSROOM_REAL_IP_HEADER") {
        settings.auth.real_ip_header = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WSROOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WSROOM_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Typed readers over a lookup ─────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value as set, empty strings included.
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.raw(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
