//! Header-tuple index over a message stream.
//!
//! An [`Index`] maps the tuple of index-key values of every message to the
//! byte offsets of the messages sharing that tuple. It is built by one full
//! scan and never mutated; [`Index::subindex`] filters into a new index that
//! shares the stream and the tuples of the original.
//!
//! # Example
//!
//! ```no_run
//! use msgcube::Stream;
//!
//! let stream = Stream::new("levels.mrec");
//! let index = stream.index(&["paramId", "topLevel"])?;
//! let temperature = index.subindex([("paramId", 130)])?;
//! for level in temperature.header_values("topLevel")? {
//!     println!("{}", level);
//! }
//! # Ok::<(), msgcube::CubeError>(())
//! ```

use crate::codec::{Decoder, MessageHandle, RecordDecoder};
use crate::error::{CubeError, Result};
use crate::message::ComputedKeysMessage;
use crate::schema::{build_schema, KeySchema};
use crate::stream::Stream;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tracing::debug;

/// Values of the index keys of one message, in index-key order.
pub type HeaderTuple = Arc<[Value]>;

/// Immutable mapping from header tuples to message offsets.
#[derive(Debug, Clone)]
pub struct Index<D: Decoder = RecordDecoder> {
    stream: Arc<Stream<D>>,
    index_keys: Vec<String>,
    offsets: IndexMap<HeaderTuple, Vec<u64>>,
    header_values: IndexMap<String, Vec<Value>>,
}

impl<D: Decoder> Index<D> {
    /// Scans `stream` and groups its messages by the values of `index_keys`.
    ///
    /// The key schema is probed on the first message. A key that cannot be
    /// read from a message is recorded as [`Value::Undef`]; a stream decode
    /// failure aborts the scan.
    pub fn from_stream<S: AsRef<str>>(stream: &Stream<D>, index_keys: &[S]) -> Result<Self> {
        let index_keys: Vec<String> = index_keys
            .iter()
            .map(|k| k.as_ref().to_string())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        let stream = Arc::new(stream.clone());

        let schema = match stream.first()? {
            Some(first) => build_schema(first.message(), index_keys.as_slice()),
            None => {
                debug!("Stream {:?} holds no messages", stream.path());
                return Ok(Self::from_parts(stream, index_keys, IndexMap::new()));
            }
        };

        let mut offsets: IndexMap<HeaderTuple, Vec<u64>> = IndexMap::new();
        let mut count = 0usize;
        for message in stream.iter() {
            let message = message?;
            let header: HeaderTuple = index_keys
                .iter()
                .map(|key| read_header_value(&message, key, schema.get(key)))
                .collect();
            offsets.entry(header).or_default().push(message.offset()?);
            count += 1;
        }

        debug!(
            "Indexed {} messages of {:?} into {} buckets",
            count,
            stream.path(),
            offsets.len()
        );
        Ok(Self::from_parts(stream, index_keys, offsets))
    }

    pub(crate) fn from_parts(
        stream: Arc<Stream<D>>,
        index_keys: Vec<String>,
        offsets: IndexMap<HeaderTuple, Vec<u64>>,
    ) -> Self {
        let header_values = index_keys
            .iter()
            .enumerate()
            .map(|(pos, key)| {
                let distinct: IndexSet<&Value> = offsets.keys().map(|t| &t[pos]).collect();
                (key.clone(), distinct.into_iter().cloned().collect())
            })
            .collect();
        Self {
            stream,
            index_keys,
            offsets,
            header_values,
        }
    }

    /// Distinct values of `key`, in first-seen order.
    pub fn header_values(&self, key: &str) -> Result<&[Value]> {
        self.header_values
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| CubeError::UnknownIndexKey(key.to_string()))
    }

    /// Alias of [`Index::header_values`].
    pub fn get(&self, key: &str) -> Result<&[Value]> {
        self.header_values(key)
    }

    /// The single distinct value of `key`.
    ///
    /// # Errors
    ///
    /// Returns `CubeError::NotSingleValued` unless `key` has exactly one
    /// distinct value.
    pub fn getone(&self, key: &str) -> Result<&Value> {
        match self.header_values(key)? {
            [value] => Ok(value),
            values => Err(CubeError::NotSingleValued {
                key: key.to_string(),
                count: values.len(),
            }),
        }
    }

    /// Keeps the tuples that match every `(key, value)` of `query` exactly.
    ///
    /// All query keys are checked before filtering; an empty query keeps
    /// every tuple.
    ///
    /// Values compare by type as well as content: `Value::Long(850)` does not
    /// match a key stored as `Value::Double(850.0)`. Query with the native
    /// type reported by [`Index::header_values`].
    pub fn subindex<I, K, V>(&self, query: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let filters = query
            .into_iter()
            .map(|(key, value)| {
                let key = key.as_ref();
                self.position(key)
                    .map(|pos| (pos, value.into()))
                    .ok_or_else(|| CubeError::UnknownIndexKey(key.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let offsets = self
            .offsets
            .iter()
            .filter(|(header, _)| filters.iter().all(|(pos, value)| &header[*pos] == value))
            .map(|(header, offsets)| (Arc::clone(header), offsets.clone()))
            .collect();

        Ok(Self::from_parts(
            Arc::clone(&self.stream),
            self.index_keys.clone(),
            offsets,
        ))
    }

    /// Decodes the first message of the first bucket.
    pub fn first(&self) -> Result<ComputedKeysMessage<D::Handle>> {
        let offset = self
            .offsets
            .values()
            .find_map(|offsets| offsets.first())
            .copied()
            .ok_or(CubeError::EmptyIndex)?;
        self.stream.message_at(offset)
    }

    /// Number of index keys.
    pub fn len(&self) -> usize {
        self.index_keys.len()
    }

    /// Returns true if the index has no keys.
    pub fn is_empty(&self) -> bool {
        self.index_keys.is_empty()
    }

    /// Index keys, in tuple order.
    pub fn index_keys(&self) -> &[String] {
        &self.index_keys
    }

    /// Position of `key` within the header tuples.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index_keys.iter().position(|k| k == key)
    }

    /// Buckets in discovery order.
    pub fn offsets(&self) -> impl Iterator<Item = (&HeaderTuple, &[u64])> + '_ {
        self.offsets.iter().map(|(h, o)| (h, o.as_slice()))
    }

    /// Number of distinct header tuples.
    pub fn bucket_count(&self) -> usize {
        self.offsets.len()
    }

    /// Number of indexed messages.
    pub fn message_count(&self) -> usize {
        self.offsets.values().map(Vec::len).sum()
    }

    /// The stream the index was built from.
    pub fn stream(&self) -> &Stream<D> {
        &self.stream
    }
}

fn read_header_value<H: MessageHandle>(
    message: &ComputedKeysMessage<H>,
    key: &str,
    schema: Option<&KeySchema>,
) -> Value {
    let result = match schema {
        Some(KeySchema::Native(spec)) => message.get_typed(key, spec),
        Some(KeySchema::Absent) | None => message.get(key),
        Some(KeySchema::Disabled) => return Value::Undef,
    };
    match result {
        Ok(value) => value,
        Err(e) => {
            if !e.is_not_found() {
                debug!("Reading key {:?} failed, recorded as undef: {}", key, e);
            }
            Value::Undef
        }
    }
}
