//! Error types for grid, field and scheduling construction
//!
//! Construction problems are reported as [`GridError`] and propagated to the
//! caller, who is expected to fix the configuration and abort the run.
//! Missing neighbors are NOT errors: they are represented by
//! [`crate::field::NghData`] with `is_valid == false`.

use crate::core_types::Index3;
use thiserror::Error;

/// Result alias used across the runtime
pub type GridResult<T> = Result<T, GridError>;

/// Runtime error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    /// Domain size, stencil or refinement description cannot produce a grid
    #[error("invalid domain: {message}")]
    InvalidDomain {
        /// Description of the problem
        message: String,
    },

    /// A device partition is too thin for the halo the stencil requires
    #[error(
        "device {device} owns {slabs} block slab(s) but the stencil needs at least {required}"
    )]
    PartitionTooThin {
        /// Offending device
        device: usize,
        /// Block slabs assigned to it
        slabs: usize,
        /// Minimum number of slabs
        required: usize,
    },

    /// Two objects that must agree in shape do not
    #[error("incompatible shape for '{name}': {message}")]
    IncompatibleShape {
        /// Field or container name
        name: String,
        /// Description of the mismatch
        message: String,
    },

    /// The requested data view is not supported for this operation
    #[error("operation '{operation}' does not support data view {view} with {devices} devices")]
    UnsupportedDataView {
        /// Operation name
        operation: &'static str,
        /// Requested view
        view: String,
        /// Number of devices of the grid
        devices: usize,
    },

    /// Operation that the runtime does not implement for this configuration
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Host-side access to a cell that is not part of the domain
    #[error("cell ({}, {}, {}) is not active in field '{field}'", .index.x, .index.y, .index.z)]
    InactiveCell {
        /// Field name
        field: String,
        /// Global cell index
        index: Index3,
    },

    /// Cardinality component out of range
    #[error("component {component} out of range for field '{field}' with cardinality {cardinality}")]
    ComponentOutOfRange {
        /// Field name
        field: String,
        /// Requested component
        component: usize,
        /// Field cardinality
        cardinality: usize,
    },

    /// The operation graph contains a cycle
    #[error("cyclic dependency in operation graph '{graph}' involving '{container}'")]
    CyclicDependency {
        /// Graph name
        graph: String,
        /// One container that is part of the cycle
        container: String,
    },

    /// A partition is already locked in a conflicting mode
    #[error("field '{field}' (device {device}) is already locked by another access")]
    FieldBusy {
        /// Field name
        field: String,
        /// Device index
        device: usize,
    },

    /// Multi-resolution protocol phases issued out of order
    #[error("protocol violation at level {level}: {message}")]
    Protocol {
        /// Level at which the violation was detected
        level: usize,
        /// Description
        message: String,
    },
}

impl GridError {
    /// Shorthand for [`GridError::InvalidDomain`]
    pub fn invalid_domain(message: impl Into<String>) -> Self {
        Self::InvalidDomain {
            message: message.into(),
        }
    }

    /// Shorthand for [`GridError::IncompatibleShape`]
    pub fn incompatible(name: &str, message: impl Into<String>) -> Self {
        Self::IncompatibleShape {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for [`GridError::Unsupported`]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }
}
