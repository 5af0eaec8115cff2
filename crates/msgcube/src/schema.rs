//! Per-stream key schema.
//!
//! The schema is probed once from a representative message and reused to read
//! every message of the same pass with a consistent native type.

use crate::codec::MessageHandle;
use crate::message::Message;
use crate::value::NativeType;
use indexmap::IndexMap;
use tracing::warn;

/// Native type, value count and (for strings) encoded length of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// Native type reported by the decoder.
    pub native_type: NativeType,
    /// Number of values.
    pub size: usize,
    /// Encoded length, for string keys only.
    pub length: Option<usize>,
}

/// Schema entry for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySchema {
    /// The probe succeeded; read with this spec.
    Native(KeySpec),
    /// The representative message does not carry the key. It is still read
    /// from every message, so computed keys and keys present only in later
    /// messages are indexed.
    Absent,
    /// The probe failed; the key reads as `undef` for the whole pass.
    Disabled,
}

/// Ordered mapping from key name to schema entry.
pub type Schema = IndexMap<String, KeySchema>;

/// Probes `key_names` on `message`, in order.
pub fn build_schema<H, S>(message: &Message<H>, key_names: &[S]) -> Schema
where
    H: MessageHandle,
    S: AsRef<str>,
{
    let handle = message.handle();
    let mut schema = Schema::with_capacity(key_names.len());

    for key in key_names {
        let key = key.as_ref();
        let entry = match probe(handle, key) {
            Ok(spec) => KeySchema::Native(spec),
            Err(e) if e.is_not_found() => KeySchema::Absent,
            Err(e) => {
                warn!("Schema probe for key {:?} failed, key disabled: {}", key, e);
                KeySchema::Disabled
            }
        };
        schema.insert(key.to_string(), entry);
    }

    schema
}

fn probe<H: MessageHandle>(handle: &H, key: &str) -> crate::Result<KeySpec> {
    let native_type = handle.native_type(key)?;
    let size = handle.size(key)?;
    let length = if native_type == NativeType::String {
        Some(handle.length(key)?)
    } else {
        None
    };
    Ok(KeySpec {
        native_type,
        size,
        length,
    })
}
