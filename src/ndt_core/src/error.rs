//! Error types.
//!
//! Nothing inside the registration loop is fallible. Errors only come from
//! malformed configuration (rejected at construction) and from parsing
//! packed point records.

use thiserror::Error;

/// Invalid grid or matcher configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("resolution on axis {axis} must be finite and positive, got {value}")]
    InvalidResolution { axis: usize, value: f64 },

    #[error("origin on axis {axis} must be finite, got {value}")]
    InvalidOrigin { axis: usize, value: f64 },

    #[error("max_iterations must be at least 1")]
    ZeroIterations,

    #[error("parameter `{name}` is invalid: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Malformed packed point cloud.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudFormatError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{name}` has offset {found}, expected {expected}")]
    FieldOffset {
        name: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("field `{0}` is not FLOAT32")]
    FieldType(&'static str),

    #[error("point_step is {0}, expected 16")]
    PointStep(u32),

    #[error("big-endian payloads are not supported")]
    BigEndian,

    #[error("data too short: {found} < {expected} bytes")]
    DataLength { expected: usize, found: usize },
}

/// Top-level error for fallible library operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NdtError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    CloudFormat(#[from] CloudFormatError),
}

pub type Result<T, E = NdtError> = std::result::Result<T, E>;
