//! Configuration structures for wit-guest.
//!
//! This module defines configuration options for the in-process host and the
//! lifecycle audit:
//! - [`HostConfig`]: Handle representation, table capacity and destructor timing
//! - [`AuditConfig`]: How the lifecycle audit exercises the guest types
//! - [`HandleMode`]: Integer or pointer-sized resource handles
//! - [`DestructorTiming`]: When the host runs an exported resource's destructor

use std::fmt;

use serde::{Deserialize, Serialize};

/// Representation of resource handles crossing the canonical ABI.
///
/// Exactly one mode is active per guest build; the host must agree with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleMode {
    /// 32-bit signed integers, `-1` is the invalid sentinel.
    #[default]
    Integer,
    /// Pointer-sized tokens, null is the invalid sentinel.
    Pointer,
}

impl fmt::Display for HandleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleMode::Integer => write!(f, "integer"),
            HandleMode::Pointer => write!(f, "pointer"),
        }
    }
}

/// When the host invokes the destructor of an exported resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DestructorTiming {
    /// Run the destructor inside the guest's drop request (reentrant).
    #[default]
    Immediate,
    /// Queue the destructor until the host flushes pending work.
    Deferred,
}

/// In-process host configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Handle representation the guest build uses.
    #[serde(default)]
    pub handle_mode: HandleMode,

    /// Maximum number of live handles in the resource table.
    ///
    /// Registrations beyond this limit are rejected with a table-full fault.
    #[serde(default = "defaults::max_handles")]
    pub max_handles: usize,

    /// Destructor scheduling for exported resources.
    #[serde(default)]
    pub destructor_timing: DestructorTiming,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handle_mode: HandleMode::default(),
            max_handles: defaults::max_handles(),
            destructor_timing: DestructorTiming::default(),
        }
    }
}

/// Lifecycle audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// How many times each resource scenario is repeated.
    ///
    /// Repetition exercises slot reuse in the host table.
    #[serde(default = "defaults::iterations")]
    pub iterations: u32,

    /// Payload copied through the buffer scenarios.
    #[serde(default = "defaults::payload")]
    pub payload: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            iterations: defaults::iterations(),
            payload: defaults::payload(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_handles() -> usize {
        1024
    }

    pub const fn iterations() -> u32 {
        4
    }

    pub fn payload() -> String {
        "hello".to_string()
    }
}
