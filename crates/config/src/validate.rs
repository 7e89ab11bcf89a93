//! Config validation: syntax, unknown or misspelled fields, and semantic checks
//! that deserialization alone cannot catch.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    env_subst::substitute_env,
    schema::{AdmissionMode, BackendKind, SpokehubConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// One of "syntax", "unknown-field", "type-error", "admission", "limits",
    /// "federation", "store", "file-ref".
    pub category: &'static str,
    /// Dotted path, e.g. `transport.outbound_queue`.
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

// ── Known keys ──────────────────────────────────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Array(Box<KnownKeys>),
    Leaf,
}

fn fields(names: &[&'static str]) -> KnownKeys {
    KnownKeys::Struct(names.iter().map(|n| (*n, KnownKeys::Leaf)).collect())
}

/// Mirrors every field in `schema.rs`.
fn known_keys() -> KnownKeys {
    use KnownKeys::{Array, Struct};

    let peer = fields(&["id", "endpoint", "region", "trust_level"]);
    let federation = Struct(HashMap::from([
        ("forward_timeout_ms", KnownKeys::Leaf),
        ("peers", Array(Box::new(peer))),
    ]));

    Struct(HashMap::from([
        ("server", fields(&["bind", "port"])),
        ("hub", fields(&["id", "region", "namespace"])),
        (
            "transport",
            fields(&[
                "ping_interval_secs",
                "read_timeout_secs",
                "write_timeout_secs",
                "max_frame_bytes",
                "outbound_queue",
                "route_timeout_ms",
            ]),
        ),
        ("admission", fields(&["mode", "allowed_origins"])),
        (
            "store",
            fields(&[
                "enabled",
                "backend",
                "path",
                "key_prefix",
                "spoke_ttl_secs",
                "op_timeout_ms",
                "heartbeat_interval_secs",
            ]),
        ),
        (
            "events",
            fields(&[
                "enabled",
                "backend",
                "path",
                "channel_prefix",
                "publish_timeout_ms",
            ]),
        ),
        ("federation", federation),
        ("metrics", fields(&["enabled"])),
    ]))
}

// ── Suggestions ─────────────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(c, d)| (*d, *c))
        .map(|(c, _)| c)
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Validate the file at `path`, or the discovered config file when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file)
    else {
        let mut result = ValidationResult::default();
        result.push(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        );
        return result;
    };

    let mut result = match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let format = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
            validate_str(&raw, format)
        },
        Err(e) => {
            let mut result = ValidationResult::default();
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            );
            result
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate config text in the given format (`toml`, `yaml`, `yml`, `json`).
#[must_use]
pub fn validate_str(raw: &str, format: &str) -> ValidationResult {
    let mut result = ValidationResult::default();
    let raw = substitute_env(raw);

    let tree = match parse_tree(&raw, format) {
        Ok(tree) => tree,
        Err(message) => {
            result.push(Severity::Error, "syntax", "", message);
            return result;
        },
    };

    check_unknown_fields(&tree, &known_keys(), "", &mut result);

    match serde_json::from_value::<SpokehubConfig>(tree) {
        Ok(config) => check_semantics(&config, &mut result),
        Err(e) => result.push(Severity::Error, "type-error", "", format!("type error: {e}")),
    }
    result
}

fn parse_tree(raw: &str, format: &str) -> Result<Value, String> {
    match format {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| format!("TOML syntax error: {e}"))
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => {
            let value: Value =
                serde_yaml::from_str(raw).map_err(|e| format!("YAML syntax error: {e}"))?;
            // An empty YAML document is null; treat it as an empty table.
            Ok(if value.is_null() {
                Value::Object(Default::default())
            } else {
                value
            })
        },
        "json" => serde_json::from_str(raw).map_err(|e| format!("JSON syntax error: {e}")),
        other => Err(format!("unsupported config format: {other}")),
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    result: &mut ValidationResult,
) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match (value, schema) {
        (Value::Object(map), KnownKeys::Struct(known)) => {
            let candidates: Vec<&str> = known.keys().copied().collect();
            for (key, child) in map {
                let path = join(key);
                match known.get(key.as_str()) {
                    Some(child_schema) => check_unknown_fields(child, child_schema, &path, result),
                    None => {
                        let message = match suggest(key, &candidates, 3) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_string(),
                        };
                        result.push(Severity::Error, "unknown-field", path, message);
                    },
                }
            }
        },
        (Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), result);
            }
        },
        // Leaves and shape mismatches; the latter surface as type errors.
        _ => {},
    }
}

fn check_semantics(config: &SpokehubConfig, result: &mut ValidationResult) {
    // Admission
    if config.admission.mode == AdmissionMode::Strict && config.admission.allowed_origins.is_empty()
    {
        result.push(
            Severity::Warning,
            "admission",
            "admission.allowed_origins",
            "strict mode with no allowed origins falls back to permissive",
        );
    }
    for (i, origin) in config.admission.allowed_origins.iter().enumerate() {
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            result.push(
                Severity::Warning,
                "admission",
                format!("admission.allowed_origins[{i}]"),
                format!("origin \"{origin}\" has no http(s) scheme and will never match"),
            );
        }
    }

    // Limits
    let t = &config.transport;
    let nonzero: [(&str, u64); 7] = [
        ("transport.ping_interval_secs", t.ping_interval_secs),
        ("transport.read_timeout_secs", t.read_timeout_secs),
        ("transport.write_timeout_secs", t.write_timeout_secs),
        ("transport.max_frame_bytes", t.max_frame_bytes as u64),
        ("transport.outbound_queue", t.outbound_queue as u64),
        ("transport.route_timeout_ms", t.route_timeout_ms),
        (
            "federation.forward_timeout_ms",
            config.federation.forward_timeout_ms,
        ),
    ];
    for (path, value) in nonzero {
        if value == 0 {
            result.push(Severity::Error, "limits", path, "must be greater than zero");
        }
    }
    if t.ping_interval_secs >= t.read_timeout_secs && t.read_timeout_secs > 0 {
        result.push(
            Severity::Warning,
            "limits",
            "transport.ping_interval_secs",
            "ping interval is not shorter than the read timeout; idle spokes will be dropped",
        );
    }
    if config.hub.id.trim().is_empty() {
        result.push(Severity::Error, "limits", "hub.id", "hub id must not be empty");
    }

    // Store
    let store = &config.store;
    if store.enabled {
        for (path, value) in [
            ("store.spoke_ttl_secs", store.spoke_ttl_secs),
            ("store.op_timeout_ms", store.op_timeout_ms),
            ("store.heartbeat_interval_secs", store.heartbeat_interval_secs),
        ] {
            if value == 0 {
                result.push(Severity::Error, "store", path, "must be greater than zero");
            }
        }
        if store.heartbeat_interval_secs >= store.spoke_ttl_secs {
            result.push(
                Severity::Warning,
                "store",
                "store.heartbeat_interval_secs",
                "heartbeat interval is not shorter than the spoke TTL; records will expire between refreshes",
            );
        }
        if store.backend == BackendKind::Sqlite && store.path.is_none() {
            result.push(
                Severity::Error,
                "store",
                "store.path",
                "sqlite backend requires a database path",
            );
        }
    }
    if config.events.enabled
        && config.events.backend == BackendKind::Sqlite
        && config.events.path.is_none()
    {
        result.push(
            Severity::Error,
            "store",
            "events.path",
            "sqlite backend requires a database path",
        );
    }

    // Federation
    let mut seen = std::collections::HashSet::new();
    for (i, peer) in config.federation.peers.iter().enumerate() {
        let path = format!("federation.peers[{i}]");
        if !(0.0..=1.0).contains(&peer.trust_level) {
            result.push(
                Severity::Error,
                "federation",
                format!("{path}.trust_level"),
                "trust level must be within 0.0..=1.0",
            );
        }
        if peer.id == config.hub.id {
            result.push(
                Severity::Error,
                "federation",
                format!("{path}.id"),
                "peer id equals this hub's id",
            );
        }
        if !seen.insert(peer.id.as_str()) {
            result.push(
                Severity::Warning,
                "federation",
                format!("{path}.id"),
                format!("duplicate peer \"{}\"; the last entry wins", peer.id),
            );
        }
        if !(peer.endpoint.starts_with("http://") || peer.endpoint.starts_with("https://")) {
            result.push(
                Severity::Error,
                "federation",
                format!("{path}.endpoint"),
                "peer endpoint must be an http(s) URL",
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn paths(result: &ValidationResult, severity: Severity) -> Vec<&str> {
        result
            .diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.path.as_str())
            .collect()
    }

    #[test]
    fn empty_config_is_clean() {
        for format in ["toml", "yaml", "json"] {
            let raw = if format == "json" { "{}" } else { "" };
            let result = validate_str(raw, format);
            assert!(result.diagnostics.is_empty(), "{format}: {:?}", result.diagnostics);
        }
    }

    #[test]
    fn syntax_error_stops_early() {
        let result = validate_str("[server\nport = ", "toml");
        assert_eq!(result.count(Severity::Error), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn misspelled_field_gets_suggestion() {
        let result = validate_str("[transport]\noutbound_queu = 10\n", "toml");
        let d = &result.diagnostics[0];
        assert_eq!(d.category, "unknown-field");
        assert_eq!(d.path, "transport.outbound_queu");
        assert!(d.message.contains("\"outbound_queue\""));
    }

    #[test]
    fn unknown_top_level_section_without_suggestion() {
        let result = validate_str("[telemetryx]\nfoo = 1\n", "toml");
        assert_eq!(paths(&result, Severity::Error), vec!["telemetryx"]);
        assert_eq!(result.diagnostics[0].message, "unknown field");
    }

    #[test]
    fn unknown_field_inside_peer_array() {
        let raw = r#"{"federation":{"peers":[{"id":"b","endpoint":"http://b","trust":0.9}]}}"#;
        let result = validate_str(raw, "json");
        assert!(paths(&result, Severity::Error).contains(&"federation.peers[0].trust"));
    }

    #[test]
    fn type_error_reported() {
        let result = validate_str("[server]\nport = \"eighty\"\n", "toml");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "type-error")
        );
    }

    #[test]
    fn zero_limits_are_errors() {
        let result = validate_str("transport:\n  outbound_queue: 0\n  route_timeout_ms: 0\n", "yaml");
        let errors = paths(&result, Severity::Error);
        assert!(errors.contains(&"transport.outbound_queue"));
        assert!(errors.contains(&"transport.route_timeout_ms"));
    }

    #[test]
    fn strict_without_origins_warns() {
        let result = validate_str("[admission]\nmode = \"strict\"\n", "toml");
        assert_eq!(paths(&result, Severity::Warning), vec![
            "admission.allowed_origins"
        ]);
        assert!(!result.has_errors());
    }

    #[test]
    fn store_checks_apply_only_when_enabled() {
        let disabled = validate_str("[store]\nbackend = \"sqlite\"\n", "toml");
        assert!(disabled.diagnostics.is_empty());

        let enabled = validate_str(
            "[store]\nenabled = true\nbackend = \"sqlite\"\nspoke_ttl_secs = 60\nheartbeat_interval_secs = 60\n",
            "toml",
        );
        assert_eq!(paths(&enabled, Severity::Error), vec!["store.path"]);
        assert_eq!(paths(&enabled, Severity::Warning), vec![
            "store.heartbeat_interval_secs"
        ]);
    }

    #[test]
    fn peer_checks() {
        let raw = r#"
[hub]
id = "hub-a"

[[federation.peers]]
id = "hub-a"
endpoint = "http://a"

[[federation.peers]]
id = "hub-b"
endpoint = "b.example"
trust_level = 1.5

[[federation.peers]]
id = "hub-b"
endpoint = "http://b"
"#;
        let result = validate_str(raw, "toml");
        let errors = paths(&result, Severity::Error);
        assert!(errors.contains(&"federation.peers[0].id"));
        assert!(errors.contains(&"federation.peers[1].trust_level"));
        assert!(errors.contains(&"federation.peers[1].endpoint"));
        assert_eq!(paths(&result, Severity::Warning), vec!["federation.peers[2].id"]);
    }

    #[test]
    fn validate_reads_file_and_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spokehub.toml");
        std::fs::write(&path, "[server]\nprot = 1\n").unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(result.diagnostics[0].path, "server.prot");

        let missing = validate(Some(&dir.path().join("nope.toml")));
        assert!(missing.has_errors());
    }

    #[test]
    fn suggestion_prefers_closest() {
        assert_eq!(suggest("namespce", &["namespace", "region"], 3), Some("namespace"));
        assert_eq!(suggest("zzzzzzzz", &["namespace", "region"], 3), None);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }
}
