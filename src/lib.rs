// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod config;
pub mod errors;
pub mod model;
pub mod normalize;

// Ingestion: feed -> windows -> one run artifact
pub mod accumulate;
pub mod extract;
pub mod ingest;

// Persistence, multi-run fold and derived series
pub mod aggregate;
pub mod artifact;
pub mod timeseries;

// Read API
pub mod api;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router as router;
pub use crate::config::TrackerConfig;
pub use crate::normalize::NormalizationEngine;
