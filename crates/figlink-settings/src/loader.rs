//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FiglinkSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects merge recursively, source wins per key
//! - Arrays and primitives are replaced whole
//! - Nulls in the source are skipped

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::FiglinkSettings;

/// Default settings file, `~/.figlink/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".figlink").join("settings.json")
}

/// Load from the default path, then apply the process environment.
pub fn load_settings() -> Result<FiglinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, then apply the process environment.
///
/// A missing file yields defaults. Malformed JSON is an error. The result
/// is validated before it is returned.
pub fn load_settings_from_path(path: &Path) -> Result<FiglinkSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<FiglinkSettings> {
    let defaults = serde_json::to_value(FiglinkSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut FiglinkSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are warned about and ignored. `PORT` is honored for
/// hosting platforms that inject it; `FIGLINK_PORT` wins when both are set.
pub fn apply_overrides_from<F>(settings: &mut FiglinkSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── server ──────────────────────────────────────────────────────
    if let Some(v) = env.u16_in("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u16_in("FIGLINK_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("FIGLINK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.string("FIGLINK_ROLE_HEADER") {
        settings.server.role_header = v;
    }
    if let Some(v) = env.string("FIGLINK_CHANNEL_HEADER") {
        settings.server.channel_header = v;
    }
    if let Some(v) = env.u64_in("FIGLINK_HEARTBEAT_INTERVAL_MS", 0, 3_600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64_in("FIGLINK_HEARTBEAT_TIMEOUT_MS", 0, 3_600_000) {
        settings.server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.string("FIGLINK_STATIC_DIR") {
        settings.server.static_dir = Some(v);
    }

    // ── relay ───────────────────────────────────────────────────────
    if let Some(v) = env.bool("FIGLINK_EVICT_EMPTY_CHANNELS") {
        settings.relay.evict_empty_channels = v;
    }

    // ── logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("FIGLINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FIGLINK_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`,
/// case-insensitive.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16_in(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }
}
