//! Shared types, error model, and configuration for Newsdesk.
//!
//! This crate is the foundation depended on by all other Newsdesk crates.
//! It provides:
//! - [`NewsdeskError`]: the run-level error type
//! - [`StageError`] / [`ErrorKind`]: the per-stage failure vocabulary
//! - Domain types ([`SourceMeta`], [`SourceKind`], [`StageKind`], [`RunId`])
//! - Configuration ([`AppConfig`], [`RunSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LlmConfig, RunModeSetting, RunSettings, SourceEntry, api_key, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_config_path,
};
pub use error::{ErrorKind, NewsdeskError, Result, StageError};
pub use types::{RunId, SourceKind, SourceMeta, StageKind};
