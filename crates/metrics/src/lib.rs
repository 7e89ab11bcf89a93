//! Metrics collection and export for spokehub.
//!
//! Everything records through the `metrics` crate facade. Without the
//! `prometheus` feature the facade has no recorder installed and every call is
//! a no-op; with it, [`init_metrics`] installs a Prometheus recorder whose
//! handle renders the `/metrics` endpoint.
//!
//! ```rust,ignore
//! use spokehub_metrics::{counter, hub, labels};
//!
//! counter!(hub::ROUTED_TOTAL, labels::STRATEGY => "direct").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
