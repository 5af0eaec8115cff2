//! Message handles and computed keys.
//!
//! A [`Message`] wraps one decoded record and turns the decoder's raw buffers
//! into [`Value`]s: single values are unwrapped, text is decoded with the
//! stream's encoding. A [`ComputedKeysMessage`] adds virtual keys from a
//! [`ComputedKeys`] table so that derived values can be indexed exactly like
//! physical ones.
//!
//! Messages are meant to be short-lived: read what you need and drop them
//! before asking the stream for the next one.

use crate::codec::{Decoder, MessageHandle, OFFSET_KEY, VALUES_KEY};
use crate::dataset::Attributes;
use crate::error::{CubeError, Result};
use crate::schema::KeySpec;
use crate::value::{NativeType, RawValues, TextEncoding, Value};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::debug;

/// Read-only key lookup shared by messages and attribute maps.
pub trait KeyLookup {
    /// Returns the value of `key`, failing with `KeyNotFound` when absent.
    fn get_value(&self, key: &str) -> Result<Value>;

    /// Enumerates key names, optionally restricted to a namespace.
    fn key_names<'a>(&'a self, namespace: Option<&'a str>)
        -> Box<dyn Iterator<Item = String> + 'a>;

    /// Number of keys.
    fn len(&self) -> usize {
        self.key_names(None).count()
    }

    /// Returns true if there are no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded record.
#[derive(Debug)]
pub struct Message<H> {
    handle: H,
    encoding: TextEncoding,
}

impl<H: MessageHandle> Message<H> {
    /// Wraps a decoder handle.
    pub fn new(handle: H, encoding: TextEncoding) -> Self {
        Self { handle, encoding }
    }

    /// Decodes the message at `offset` (or at the current position when `None`).
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn read_from<D, R>(
        decoder: &D,
        reader: &mut R,
        offset: Option<u64>,
        encoding: TextEncoding,
    ) -> Result<Option<Self>>
    where
        D: Decoder<Handle = H>,
        R: Read + Seek,
    {
        if let Some(offset) = offset {
            reader.seek(SeekFrom::Start(offset))?;
        }
        Ok(decoder
            .decode(reader)?
            .map(|handle| Self::new(handle, encoding)))
    }

    /// Returns the value of `key`.
    ///
    /// # Errors
    ///
    /// Returns `CubeError::KeyNotFound` if the message does not carry the key.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.handle.read(key, None)?.into_value(self.encoding)
    }

    /// Returns the value of `key`, or `default` if the key is absent.
    ///
    /// Only a missing key yields the default; decode failures propagate.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        match self.get(key) {
            Err(e) if e.is_not_found() => Ok(default),
            other => other,
        }
    }

    /// Returns the value of `key` read as the schema's native type.
    pub fn get_typed(&self, key: &str, spec: &KeySpec) -> Result<Value> {
        let raw = self.handle.read(key, Some(spec.native_type))?;
        if raw.len() != spec.size {
            debug!(
                "Key {:?} at offset {} has {} values, schema recorded {}",
                key,
                self.handle.offset(),
                raw.len(),
                spec.size
            );
        }
        raw.into_value(self.encoding)
    }

    /// Returns the payload array.
    pub fn values(&self) -> Result<Vec<f64>> {
        match self.handle.read(VALUES_KEY, Some(NativeType::Double))? {
            RawValues::Double(v) => Ok(v),
            _ => Err(CubeError::TypeMismatch {
                key: VALUES_KEY.to_string(),
                expected: NativeType::Double,
            }),
        }
    }

    /// Byte offset of the message, read through the reserved `offset` key.
    pub fn offset(&self) -> Result<u64> {
        match self.get(OFFSET_KEY)? {
            Value::Long(v) if v >= 0 => Ok(v as u64),
            other => Err(CubeError::DecodeFailure(format!(
                "invalid message offset: {}",
                other
            ))),
        }
    }

    /// Enumerates key names, optionally restricted to a namespace.
    pub fn keys<'a>(&'a self, namespace: Option<&'a str>) -> impl Iterator<Item = String> + 'a {
        self.handle.key_names(namespace)
    }

    /// Text encoding used for string values.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Returns the decoder handle.
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H: MessageHandle> KeyLookup for Message<H> {
    fn get_value(&self, key: &str) -> Result<Value> {
        self.get(key)
    }

    fn key_names<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        self.handle.key_names(namespace)
    }
}

/// Function computing a virtual key from a read-only view of a message.
pub type ComputeFn = fn(&dyn KeyLookup) -> Result<Value>;

/// A named virtual key.
#[derive(Debug, Clone, Copy)]
pub struct ComputedKey {
    /// Key name.
    pub name: &'static str,
    /// Function producing the key's value.
    pub compute: ComputeFn,
}

/// Name of the computed reference time key.
pub const REFERENCE_TIME_KEY: &str = "forecast_reference_time";

fn compute_reference_time(message: &dyn KeyLookup) -> Result<Value> {
    crate::dataset::from_grib_date_time(message).map(Value::Long)
}

/// Table of computed keys, checked before the physical keys of a message.
#[derive(Debug, Clone, Default)]
pub struct ComputedKeys {
    entries: Vec<ComputedKey>,
}

impl ComputedKeys {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard table: `forecast_reference_time` from `dataDate` and `dataTime`.
    pub fn standard() -> Self {
        Self::new().with(ComputedKey {
            name: REFERENCE_TIME_KEY,
            compute: compute_reference_time,
        })
    }

    /// Adds a computed key, replacing one with the same name.
    pub fn with(mut self, key: ComputedKey) -> Self {
        match self.entries.iter_mut().find(|e| e.name == key.name) {
            Some(existing) => *existing = key,
            None => self.entries.push(key),
        }
        self
    }

    /// Looks up a computed key by name.
    pub fn get(&self, name: &str) -> Option<&ComputedKey> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Names of the computed keys, in table order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }

    /// Number of computed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A message decorated with computed keys.
#[derive(Debug)]
pub struct ComputedKeysMessage<H> {
    message: Message<H>,
    computed: Arc<ComputedKeys>,
}

impl<H: MessageHandle> ComputedKeysMessage<H> {
    /// Decorates `message` with the keys of `computed`.
    pub fn new(message: Message<H>, computed: Arc<ComputedKeys>) -> Self {
        Self { message, computed }
    }

    /// Returns the value of `key`, computed keys first.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self.computed.get(key) {
            Some(computed) => (computed.compute)(&self.message),
            None => self.message.get(key),
        }
    }

    /// Returns the value of `key`, or `default` if the key is absent.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        match self.get(key) {
            Err(e) if e.is_not_found() => Ok(default),
            other => other,
        }
    }

    /// Returns the value of `key` read as the schema's native type.
    pub fn get_typed(&self, key: &str, spec: &KeySpec) -> Result<Value> {
        match self.computed.get(key) {
            Some(computed) => (computed.compute)(&self.message),
            None => self.message.get_typed(key, spec),
        }
    }

    /// Returns the payload array.
    pub fn values(&self) -> Result<Vec<f64>> {
        self.message.values()
    }

    /// Byte offset of the message.
    pub fn offset(&self) -> Result<u64> {
        self.message.offset()
    }

    /// Underlying keys first, then computed keys not already seen.
    ///
    /// Computed keys have no namespace, so they are only listed when
    /// `namespace` is `None`.
    pub fn keys<'a>(&'a self, namespace: Option<&'a str>) -> impl Iterator<Item = String> + 'a {
        KeyLookup::key_names(self, namespace)
    }

    /// Returns the decorated message.
    pub fn message(&self) -> &Message<H> {
        &self.message
    }

    /// Returns the computed key table.
    pub fn computed_keys(&self) -> &ComputedKeys {
        &self.computed
    }
}

impl<H: MessageHandle> KeyLookup for ComputedKeysMessage<H> {
    fn get_value(&self, key: &str) -> Result<Value> {
        self.get(key)
    }

    fn key_names<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        let physical = self.message.keys(namespace);
        if namespace.is_some() {
            return Box::new(physical);
        }
        let handle = self.message.handle();
        let computed = self
            .computed
            .names()
            .filter(move |name| matches!(handle.size(name), Err(e) if e.is_not_found()))
            .map(str::to_string);
        Box::new(physical.chain(computed))
    }
}

impl KeyLookup for Attributes {
    fn get_value(&self, key: &str) -> Result<Value> {
        self.get(key)
            .cloned()
            .ok_or_else(|| CubeError::KeyNotFound(key.to_string()))
    }

    fn key_names<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        match namespace {
            None => Box::new(self.keys().cloned()),
            Some(_) => Box::new(std::iter::empty()),
        }
    }
}
