//! Error and Result types for indexing and dataset assembly.

use crate::value::{NativeType, Value};
use std::io;
use thiserror::Error;

/// A convenience `Result` type for msgcube operations.
pub type Result<T> = std::result::Result<T, CubeError>;

/// The error type for indexing and dataset assembly.
#[derive(Debug, Error)]
pub enum CubeError {
    /// A requested key is absent from a message and no default was supplied.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The decoder reported a failure other than a missing key.
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A key was expected to hold exactly one distinct value in an index.
    #[error("Not one value for {key:?}: {count}")]
    NotSingleValued {
        /// The index key queried.
        key: String,
        /// Number of distinct values found.
        count: usize,
    },

    /// Two messages contributing to one variable disagree on an attribute.
    #[error("Conflicting attribute {key:?}: {existing} != {new}")]
    ConflictingAttribute {
        /// Attribute name.
        key: String,
        /// Value already recorded.
        existing: Value,
        /// Value that failed to merge.
        new: Value,
    },

    /// Two variables of one dataset disagree on the size of a dimension.
    #[error("Conflicting dimension {name:?}: {existing} != {new}")]
    ConflictingDimension {
        /// Dimension name.
        name: String,
        /// Size already recorded.
        existing: usize,
        /// Size that failed to merge.
        new: usize,
    },

    /// Two variables of one dataset disagree on the values of a coordinate.
    #[error("Conflicting coordinate values for {0:?}")]
    ConflictingCoordinate(String),

    /// A data variable and a coordinate variable share a name.
    #[error("Duplicate variable name {0:?}")]
    DuplicateVariable(String),

    /// A key is not one of the index keys.
    #[error("Unknown index key: {0}")]
    UnknownIndexKey(String),

    /// The index holds no messages.
    #[error("Index is empty")]
    EmptyIndex,

    /// A value could not be read as the requested native type.
    #[error("Type mismatch for key {key:?}: cannot read as {expected}")]
    TypeMismatch {
        /// The key read.
        key: String,
        /// The requested native type.
        expected: NativeType,
    },

    /// A payload does not have the number of points the grid requires.
    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch {
        /// Number of grid points expected.
        expected: usize,
        /// Number of values in the payload.
        actual: usize,
    },

    /// Two messages address the same slice of the output array (strict mode).
    #[error("Duplicate field at offset {offset}")]
    DuplicateField {
        /// Offset of the message that would overwrite an earlier one.
        offset: u64,
    },

    /// A variable cannot be written with the requested layout.
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// Invalid magic bytes at the start of a record.
    #[error("Invalid magic bytes: expected MREC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported record format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Record checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The output array could not be built with the inferred shape.
    #[error("Array layout error: {0}")]
    Layout(#[from] ndarray::ShapeError),
}

impl CubeError {
    /// Returns true if the error means the key is absent from a message.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CubeError::KeyNotFound(_))
    }
}
