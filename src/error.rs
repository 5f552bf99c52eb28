//! Error handling for the pipeline runtime
//!
//! This module defines the crate-wide error type and Result alias. These are
//! the *configuration* errors of the taxonomy: mistakes detected while a
//! pipeline is assembled or torn down, which abort assembly rather than being
//! retried. Transient runtime conditions (window not written yet, registry
//! idle) are distinguished status values on the buffer/registry read and
//! write paths, not errors of this type.

use crate::types::BufferId;
use thiserror::Error;

/// Main error type for pipeline assembly and control operations
#[derive(Error, Debug)]
pub enum SigFlowError {
    /// The fixed-size buffer table has no free slot
    #[error("Buffer table full")]
    BufferTableFull,

    /// The fixed-size runnable table has no free slot
    #[error("Runnable table full")]
    RunnableTableFull,

    /// A buffer id that is out of range or whose slot is empty
    #[error("Invalid buffer id {0:?}")]
    InvalidBufferId(BufferId),

    /// A buffer id whose slot has since been reused (generation mismatch)
    #[error("Stale buffer id {0:?}")]
    StaleBufferId(BufferId),

    /// Sample byte length disagrees with the declared stream shape
    #[error("Shape mismatch: expected {expected} bytes, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    /// A duration spec string that could not be resolved to samples
    #[error("Invalid duration spec '{0}'")]
    DurationSpec(String),

    /// Assembly operation attempted while the registry is running
    #[error("Operation only legal while idle")]
    NotIdle,

    /// Start attempted while already running, or stop while idle
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(&'static str),

    /// Sync handshake failure (malformed message, unexpected peer behavior)
    #[error("Sync protocol error: {0}")]
    Sync(String),

    /// Errors reported by a sensor implementation
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors (sockets, report file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SigFlowError>;
