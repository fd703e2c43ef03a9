//! Configuration module
//!
//! Handles user configuration (`<data_dir>/config.toml`) and directory layout.
//! Persisted instance state lives in [`crate::storage`], not here.

mod settings;

pub use settings::*;
