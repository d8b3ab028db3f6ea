//! PerMail Common - Shared types and utilities
//!
//! This crate provides the configuration, error taxonomy and common types
//! shared across all PerMail components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result, TransportErrorKind};
