//! Brasília air quality pipeline: collects measurements from heterogeneous
//! official sources, normalizes them into one canonical schema and
//! validates them before publication.
//!
//! Stages: connectors fetch raw records per time window (through a
//! content-addressed cache, under retry and throttle discipline), the
//! normalization engine maps them to canonical records, and the validation
//! engine checks plausibility and consistency. Each stage is independently
//! invocable and idempotent.

pub mod cache;
pub mod common;
pub mod config;
pub mod connectors;
pub mod domain;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod registry;

pub use common::error::{PipelineError, Result};
pub use domain::{CanonicalRecord, Pollutant, RawRecord, SourceDescriptor, TimeWindow};
