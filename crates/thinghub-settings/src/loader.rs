//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ProtocolsConfig::default()`]
//! 2. If a settings file exists, deep-merge its values over the defaults
//! 3. Apply `THINGHUB_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ProtocolsConfig;

/// Load the configuration from `path` with env var overrides.
///
/// A missing file yields the defaults. A file with invalid JSON, or a merged
/// result that fails validation, is an error.
pub fn load_config_from_path(path: &Path) -> Result<ProtocolsConfig> {
    let defaults = serde_json::to_value(ProtocolsConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading protocol settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: ProtocolsConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `THINGHUB_*` environment variable overrides.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(config: &mut ProtocolsConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
pub fn apply_overrides_from(config: &mut ProtocolsConfig, lookup: impl Fn(&str) -> Option<String>) {
    let vars = EnvReader { lookup };

    // ── HTTP server ─────────────────────────────────────────────────
    if let Some(v) = vars.string("THINGHUB_HTTP_HOST") {
        config.http_host = v;
    }
    if let Some(v) = vars.u16("THINGHUB_HTTPS_PORT", 0, 65535) {
        config.https_port = v;
    }
    if let Some(v) = vars.string("THINGHUB_SERVER_CERT") {
        config.server_cert_path = Some(v.into());
    }
    if let Some(v) = vars.string("THINGHUB_SERVER_KEY") {
        config.server_key_path = Some(v.into());
    }
    if let Some(v) = vars.string("THINGHUB_CA_CERT") {
        config.ca_cert_path = Some(v.into());
    }

    // ── Subprotocols ────────────────────────────────────────────────
    if let Some(v) = vars.bool("THINGHUB_ENABLE_SSESC") {
        config.enable_ssesc = v;
    }
    if let Some(v) = vars.bool("THINGHUB_ENABLE_WSS") {
        config.enable_wss = v;
    }
    if let Some(v) = vars.bool("THINGHUB_ENABLE_MQTT") {
        config.enable_mqtt = v;
    }
    if let Some(v) = vars.bool("THINGHUB_ENABLE_DISCOVERY") {
        config.enable_discovery = v;
    }

    // ── Timeouts ────────────────────────────────────────────────────
    if let Some(v) = vars.u64("THINGHUB_WRITE_TIMEOUT_MS", 100, 600_000) {
        config.write_timeout_ms = v;
    }
    if let Some(v) = vars.u64("THINGHUB_RPC_TIMEOUT_MS", 100, 3_600_000) {
        config.rpc_timeout_ms = v;
    }
    if let Some(v) = vars.usize("THINGHUB_SEND_QUEUE_SIZE", 1, 65_536) {
        config.send_queue_size = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers (thin wrappers) ────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
