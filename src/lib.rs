//! # Plume
//!
//! A daily map-reduce pipeline over air-quality sensor feeds.
//!
//! Each run ingests one day of gzipped NDJSON sensor readings from a blob
//! store, pivots them into wide per-location rows in parallel, folds the
//! rows into per-location daily min/max/mean statistics per pollutant,
//! writes one CSV artifact, deletes its intermediates, and publishes a
//! run-outcome message.
//!
//! ## Modules
//!
//! - `pipeline` - The five stages and the orchestrator that drives them
//! - `store` - Blob store and message sink traits plus the adapters
//! - `model` - Record shapes shared across the stages
//! - `config` - TOML-loadable configuration
//! - `error` - Per-stage error types
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;
