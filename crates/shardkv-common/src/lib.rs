//! shardkv Common - Shared types and utilities
//!
//! This crate provides the error type, configuration and key/identity
//! types used by the storage tier and the admin CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
