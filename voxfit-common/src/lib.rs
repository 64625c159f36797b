//! # voxfit Common Library
//!
//! Shared code for the voxfit crates:
//! - Error type used by configuration loading
//! - Configuration value object and file resolution

pub mod config;
pub mod error;

pub use config::VoxfitConfig;
pub use error::{Error, Result};
