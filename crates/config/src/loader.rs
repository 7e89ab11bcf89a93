use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::{AdmissionMode, SpokehubConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "spokehub.toml",
    "spokehub.yaml",
    "spokehub.yml",
    "spokehub.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<SpokehubConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./spokehub.{toml,yaml,yml,json}`
/// 2. `<user config dir>/spokehub/spokehub.{toml,yaml,yml,json}`
///
/// Returns defaults if no file is found or the file fails to load.
pub fn discover_and_load() -> SpokehubConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SpokehubConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory (`~/.config/spokehub/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "spokehub").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<SpokehubConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

/// Apply `SPOKEHUB_*` environment overrides on top of a loaded config.
///
/// - `SPOKEHUB_ENV=production` switches admission to strict
/// - `SPOKEHUB_ALLOWED_ORIGINS` comma-separated origin allowlist
/// - `SPOKEHUB_HUB_ID`, `SPOKEHUB_REGION`
pub fn apply_env_overrides(config: SpokehubConfig) -> SpokehubConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_env_overrides_with(
    mut config: SpokehubConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> SpokehubConfig {
    if lookup("SPOKEHUB_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production")) {
        config.admission.mode = AdmissionMode::Strict;
    }
    if let Some(raw) = lookup("SPOKEHUB_ALLOWED_ORIGINS") {
        config.admission.allowed_origins = raw
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(id) = lookup("SPOKEHUB_HUB_ID").filter(|v| !v.is_empty()) {
        config.hub.id = id;
    }
    if let Some(region) = lookup("SPOKEHUB_REGION").filter(|v| !v.is_empty()) {
        config.hub.region = region;
    }
    config
}
