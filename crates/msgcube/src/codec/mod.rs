//! Decoder contract for self-describing record streams.
//!
//! The index and assembly code never look at bytes directly. They go through
//! a [`Decoder`], which turns the bytes at a reader's current position into one
//! [`MessageHandle`], and the handle answers typed key lookups for that single
//! record. [`record`] provides the reference implementation of the contract.

pub mod record;

pub use record::{MessageRecord, RecordDecoder, RecordEntry, RecordFileHandle, RecordHandle, RecordWriter};

use crate::error::Result;
use crate::value::{NativeType, RawValues};
use std::io::{Read, Seek};

/// Reserved key holding a message's own byte offset in the file.
pub const OFFSET_KEY: &str = "offset";

/// Reserved key holding a message's payload array.
pub const VALUES_KEY: &str = "values";

/// One decoded record.
///
/// Lookups of a key the record does not carry must fail with
/// [`CubeError::KeyNotFound`](crate::CubeError::KeyNotFound); every other
/// failure is treated as a decode failure and propagated.
pub trait MessageHandle {
    /// Byte offset of the record in its file.
    fn offset(&self) -> u64;

    /// Native type of the key.
    fn native_type(&self, key: &str) -> Result<NativeType>;

    /// Number of values stored under the key.
    fn size(&self, key: &str) -> Result<usize>;

    /// Encoded length in bytes of a string-typed key.
    fn length(&self, key: &str) -> Result<usize>;

    /// Reads the key, converting to `native_type` when one is requested.
    fn read(&self, key: &str, native_type: Option<NativeType>) -> Result<RawValues>;

    /// Enumerates the key names of the record, optionally restricted to a namespace.
    fn key_names<'a>(&'a self, namespace: Option<&'a str>)
        -> Box<dyn Iterator<Item = String> + 'a>;
}

/// Decodes records one at a time from a seekable reader.
pub trait Decoder: Clone {
    /// Handle type produced for each record.
    type Handle: MessageHandle;

    /// Decodes the record at the reader's current position.
    ///
    /// Returns `Ok(None)` when the reader is cleanly at end of stream. A
    /// truncated or corrupt record is an error, never end of stream.
    fn decode<R: Read + Seek>(&self, reader: &mut R) -> Result<Option<Self::Handle>>;
}
