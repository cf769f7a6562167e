//! streamloom-config
//! ============================================================================
//! Module: Config Reference Resolution
//! Description: Loads a `PipelineConfig` from a TOML file, selecting a
//!              `Store` backend and the chunk/polling knobs the scheduler
//!              roles run with.
//! Purpose: Turn a config-ref (explicit path, env var, or default filename)
//!          into a validated, ready-to-use pipeline configuration.
//! Dependencies: streamloom-core, streamloom-store-sqlite, serde, thiserror,
//!               toml
//! ============================================================================

pub mod config;

pub use config::{load, ConfigError, PipelineConfig, StoreConfig};
