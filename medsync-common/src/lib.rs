//! # MedSync Common Library
//!
//! Shared code for the MedSync mirror synchronization engine:
//! - Common error type
//! - Event types (SyncEvent enum) and EventBus
//! - Configuration loading (TOML / environment / CLI priority)
//! - Database initialization and shared queries

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
