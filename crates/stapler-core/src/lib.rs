//! # stapler-core
//!
//! Core types, traits, and configuration for Stapler RS.
//!
//! This crate provides the building blocks the attachment engine expects from
//! its host application:
//! - Record identifiers and the `Record` collaborator trait
//! - Validation error collection
//! - Engine configuration
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod telemetry;
pub mod traits;
pub mod types;

pub use config::{ConfigError, StaplerConfig};
pub use error::*;
pub use traits::*;
pub use types::*;
