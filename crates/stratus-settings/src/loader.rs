//! Layered settings loading.
//!
//! Loading flow:
//! 1. Start with compiled [`StratusSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `STRATUS_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::StratusSettings;

/// Resolve the default settings file path (`~/.stratus/settings.json`).
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".stratus")
        .join("settings.json")
}

/// [`load_settings_from_path`] at [`settings_path`].
pub fn load_settings() -> Result<StratusSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, then the file at `path`, then `STRATUS_*` variables.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`StratusSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<StratusSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file(path: &Path) -> Result<StratusSettings> {
    let defaults = serde_json::to_value(StratusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let overlay: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        deep_merge(defaults, overlay)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Overlay `source` onto `target`, recursing into objects.
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

/// Apply `STRATUS_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut StratusSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (an env var name → value function).
///
/// Numbers outside their bounds and unrecognised flags are skipped with a
/// warning, leaving the file or default value in place.
pub fn apply_overrides_with(
    settings: &mut StratusSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("STRATUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.number("STRATUS_PORT", 0..=65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("STRATUS_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = env.string("STRATUS_RPC_PATH") {
        settings.server.rpc_path = v;
    }
    if let Some(v) = env.number("STRATUS_MAX_MESSAGE_SIZE", 1024..=64 * 1_048_576) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.number("STRATUS_SEND_QUEUE_CAPACITY", 1..=65_536) {
        settings.server.send_queue_capacity = v;
    }
    if let Some(v) = env.number("STRATUS_HEARTBEAT_INTERVAL", 1..=3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.number("STRATUS_PONG_TIMEOUT", 1..=86_400) {
        settings.server.pong_timeout_secs = v;
    }
    if let Some(v) = env.number("STRATUS_HANDLER_TIMEOUT", 1..=86_400) {
        settings.server.handler_timeout_secs = v;
    }
    if let Some(v) = env.bool("STRATUS_CONCURRENT_DISPATCH") {
        settings.server.concurrent_dispatch = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.string("STRATUS_COOKIE_NAME") {
        settings.session.cookie_name = v;
    }
    if let Some(v) = env.bool("STRATUS_COOKIE_SECURE") {
        settings.session.cookie_secure = v;
    }
    if let Some(v) = env.number("STRATUS_SESSION_IDLE_TIMEOUT", 1..=31_536_000) {
        settings.session.idle_timeout_secs = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("STRATUS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("STRATUS_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Value parsing ───────────────────────────────────────────────────────────

/// Interpret a flag value, case-insensitively.
///
/// `true`, `1`, `yes` and `on` are true; `false`, `0`, `no` and `off` are false.
pub fn parse_bool(val: &str) -> Option<bool> {
    let val = val.trim();
    if ["true", "1", "yes", "on"].iter().any(|t| t.eq_ignore_ascii_case(val)) {
        Some(true)
    } else if ["false", "0", "no", "off"].iter().any(|f| f.eq_ignore_ascii_case(val)) {
        Some(false)
    } else {
        None
    }
}

/// Parse a number, accepting it only inside `bounds`.
pub fn parse_bounded<T>(val: &str, bounds: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| bounds.contains(n))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn number<T>(&self, name: &str, bounds: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd,
    {
        self.parsed(name, "number", |v| parse_bounded(v, bounds))
    }
}
