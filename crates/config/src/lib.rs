//! Configuration loading, validation and env substitution.
//!
//! Config files: `spokehub.toml`, `spokehub.yaml`, `spokehub.yml` or
//! `spokehub.json`, searched in `./` then the user config directory
//! (`~/.config/spokehub/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values, and a small set
//! of `SPOKEHUB_*` environment overrides applied after loading.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        AdmissionConfig, AdmissionMode, BackendKind, EventsConfig, FederationConfig, HubSection,
        MetricsConfig, PeerEntry, ServerConfig, SpokehubConfig, StoreConfig, TransportConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
