//! Common types, errors, and configuration for wit-guest.
//!
//! This crate provides shared functionality used across the wit-guest workspace:
//! - Error types using `thiserror` for host-side contract violations
//! - Configuration structures for the in-process host and the lifecycle audit
//! - The [`HandleMode`] shared by guest handle types and the host table

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{AuditConfig, DestructorTiming, HandleMode, HostConfig};
pub use config_file::{ConfigFile, ConfigFileError, ImportEntry};
pub use error::HostError;
