//! Configuration loading and environment parsing.

use super::Config;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load configuration with the following precedence (highest first):
/// 1) File passed explicitly (the `--config` CLI flag)
/// 2) File pointed to by `GAME_STORE_CONFIG_PATH`
/// 3) `config.json` in the current working directory
/// 4) Defaults compiled into the binary
///
/// Individual fields can additionally be overridden by environment variables
/// with prefix `GAME_STORE` using `__` as the nested separator, e.g.
/// `GAME_STORE__NETWORK__LOBBY_PORT=7000` or
/// `GAME_STORE__LOGGING__LEVEL=debug`. Read/parse errors are printed to
/// stderr and the affected source is skipped — `load()` always returns a
/// `Config`.
#[must_use]
pub fn load(explicit_path: Option<&Path>) -> Config {
    let defaults = Config::default();
    let mut merged =
        serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    if let Some(path) = explicit_path {
        merge_file_source(&mut merged, path);
    } else if let Ok(path) = std::env::var("GAME_STORE_CONFIG_PATH") {
        merge_file_source(&mut merged, Path::new(&path));
    } else {
        merge_file_source(&mut merged, Path::new("config.json"));
    }

    apply_env_overrides(&mut merged);

    match serde_json::from_value::<Config>(merged) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to deserialize config; using defaults: {e}");
            defaults
        }
    }
}

/// Sanity checks that should stop a server from starting.
pub fn validate(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();

    if config.transfer.chunk_size == 0 {
        problems.push("transfer.chunk_size must be positive".to_string());
    }
    if config.transfer.max_file_size < config.transfer.chunk_size as u64 {
        problems.push("transfer.max_file_size must be at least one chunk".to_string());
    }
    if config.transfer.max_frame_size < config.transfer.chunk_size * 2 + 1024 {
        // Hex-encoded chunks roughly double in size on the wire.
        problems.push("transfer.max_frame_size too small for the configured chunk_size".to_string());
    }
    if config.network.lobby_port == config.network.developer_port {
        problems.push("network.lobby_port and network.developer_port must differ".to_string());
    }
    if config.network.port_probe_limit == 0 {
        problems.push("network.port_probe_limit must be positive".to_string());
    }
    if config.session.password_salt.is_empty() {
        problems.push("session.password_salt must not be empty".to_string());
    }
    if config.session.session_timeout == 0 {
        problems.push("session.session_timeout must be positive".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}

fn merge_file_source(merged: &mut Value, path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Value>(&contents) {
            Ok(value) => merge_values(merged, value),
            Err(e) => eprintln!("Failed to parse config file {}: {e}", path.display()),
        },
        Err(e) => eprintln!("Failed to read config file {}: {e}", path.display()),
    }
}

/// Deep-merge `incoming` into `base`; objects merge per key, everything else
/// replaces.
fn merge_values(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, incoming_value) => *base_slot = incoming_value,
    }
}

fn apply_env_overrides(merged: &mut Value) {
    const PREFIX: &str = "GAME_STORE__";

    for (key, raw) in std::env::vars() {
        let Some(path) = key.strip_prefix(PREFIX) else {
            continue;
        };
        let segments: Vec<String> = path.split("__").map(str::to_lowercase).collect();
        if segments.iter().any(String::is_empty) {
            continue;
        }

        // Values parse as JSON when they can (numbers, booleans, null) and
        // fall back to plain strings.
        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        set_path(merged, &segments, value);
    }
}

fn set_path(target: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    let Value::Object(map) = target else {
        return;
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }

    let slot = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_path(slot, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_nested_objects() {
        let mut base = json!({"network": {"lobby_port": 8888, "developer_port": 8889}});
        merge_values(&mut base, json!({"network": {"lobby_port": 7000}}));

        assert_eq!(base["network"]["lobby_port"], 7000);
        assert_eq!(base["network"]["developer_port"], 8889);
    }

    #[test]
    fn test_set_path_creates_intermediate_objects() {
        let mut target = json!({});
        set_path(
            &mut target,
            &["logging".to_string(), "level".to_string()],
            json!("debug"),
        );
        assert_eq!(target["logging"]["level"], "debug");
    }

    #[test]
    fn test_validate_rejects_equal_ports() {
        let mut config = Config::default();
        config.network.developer_port = config.network.lobby_port;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate(&Config::default()).is_ok());
    }
}
