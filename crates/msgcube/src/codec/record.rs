//! Reference record format.
//!
//! A record file is a plain concatenation of records. Each record carries its
//! own key table, so a reader needs no external schema:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Record Header (10 bytes)                                    │
//! │  - Magic: "MREC" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 1                                │
//! │  - Body Length: u32 (4 bytes)                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Body                                                        │
//! │  - Entry Count: u16                                          │
//! │  - Entries: name, namespace, kind, count, values             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Body CRC32: u32 (4 bytes)                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use super::{Decoder, MessageHandle, OFFSET_KEY};
use crate::error::{CubeError, Result};
use crate::value::{NativeType, RawValues};
use indexmap::IndexMap;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every record: "MREC"
pub const RECORD_MAGIC: [u8; 4] = *b"MREC";

/// Current record format version.
pub const RECORD_VERSION: u16 = 1;

/// Record header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 10;

/// Upper bound on the buffer reserved from a header's claimed body length.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Record trailer (CRC32) size in bytes.
pub const RECORD_TRAILER_SIZE: usize = 4;

/// One key of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    /// Key name.
    pub name: String,
    /// Namespace the key belongs to (empty for none).
    pub namespace: String,
    /// Stored values.
    pub values: RawValues,
}

impl RecordEntry {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_str16(writer, &self.name)?;
        write_str16(writer, &self.namespace)?;
        writer.write_all(&[self.values.native_type() as u8])?;
        writer.write_all(&(self.values.len() as u32).to_le_bytes())?;
        match &self.values {
            RawValues::Long(v) => {
                for x in v {
                    writer.write_all(&x.to_le_bytes())?;
                }
            }
            RawValues::Double(v) => {
                for x in v {
                    writer.write_all(&x.to_le_bytes())?;
                }
            }
            RawValues::Bytes(v) => {
                for b in v {
                    let len = u16::try_from(b.len()).map_err(|_| {
                        CubeError::DecodeFailure(format!(
                            "text value of key {:?} exceeds {} bytes",
                            self.name,
                            u16::MAX
                        ))
                    })?;
                    writer.write_all(&len.to_le_bytes())?;
                    writer.write_all(b)?;
                }
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let name = read_str16(reader)?;
        let namespace = read_str16(reader)?;

        let mut buf1 = [0u8; 1];
        reader.read_exact(&mut buf1)?;
        let kind = NativeType::from_u8(buf1[0]).ok_or_else(|| {
            CubeError::DecodeFailure(format!("unknown value kind {} for key {:?}", buf1[0], name))
        })?;

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let count = u32::from_le_bytes(buf4) as usize;

        let mut buf8 = [0u8; 8];
        let values = match kind {
            NativeType::Long => {
                let mut v = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    reader.read_exact(&mut buf8)?;
                    v.push(i64::from_le_bytes(buf8));
                }
                RawValues::Long(v)
            }
            NativeType::Double => {
                let mut v = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    reader.read_exact(&mut buf8)?;
                    v.push(f64::from_le_bytes(buf8));
                }
                RawValues::Double(v)
            }
            NativeType::String => {
                let mut v = Vec::with_capacity(count.min(1 << 16));
                let mut buf2 = [0u8; 2];
                for _ in 0..count {
                    reader.read_exact(&mut buf2)?;
                    let len = u16::from_le_bytes(buf2) as usize;
                    let mut bytes = vec![0u8; len];
                    reader.read_exact(&mut bytes)?;
                    v.push(bytes);
                }
                RawValues::Bytes(v)
            }
        };

        Ok(Self {
            name,
            namespace,
            values,
        })
    }
}

fn write_str16<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| CubeError::DecodeFailure(format!("key name too long: {} bytes", bytes.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_str16<R: Read>(reader: &mut R) -> Result<String> {
    let mut buf2 = [0u8; 2];
    reader.read_exact(&mut buf2)?;
    let len = u16::from_le_bytes(buf2) as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| CubeError::DecodeFailure(format!("Invalid UTF-8 in key name: {}", e)))
}

/// A record under construction, written with [`RecordWriter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRecord {
    entries: Vec<RecordEntry>,
    namespace: String,
}

impl MessageRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace for the entries added after this call.
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Adds an integer key.
    pub fn long(self, name: &str, value: i64) -> Self {
        self.entry(name, RawValues::Long(vec![value]))
    }

    /// Adds a floating point key.
    pub fn double(self, name: &str, value: f64) -> Self {
        self.entry(name, RawValues::Double(vec![value]))
    }

    /// Adds a text key.
    pub fn text(self, name: &str, value: &str) -> Self {
        self.entry(name, RawValues::Bytes(vec![value.as_bytes().to_vec()]))
    }

    /// Adds an integer array key.
    pub fn longs(self, name: &str, values: Vec<i64>) -> Self {
        self.entry(name, RawValues::Long(values))
    }

    /// Adds a floating point array key.
    pub fn doubles(self, name: &str, values: Vec<f64>) -> Self {
        self.entry(name, RawValues::Double(values))
    }

    /// Adds a key with raw values.
    pub fn entry(mut self, name: &str, values: RawValues) -> Self {
        self.push(name, values);
        self
    }

    /// Adds a key with raw values in place, replacing an existing key of the same name.
    pub fn push(&mut self, name: &str, values: RawValues) {
        let entry = RecordEntry {
            name: name.to_string(),
            namespace: self.namespace.clone(),
            values,
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Returns the entries in insertion order.
    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }

    /// Writes the record (header, body, CRC) and returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let entry_count = u16::try_from(self.entries.len()).map_err(|_| {
            CubeError::DecodeFailure(format!("too many keys: {}", self.entries.len()))
        })?;

        let mut body = Vec::new();
        body.extend_from_slice(&entry_count.to_le_bytes());
        for entry in &self.entries {
            entry.write_to(&mut body)?;
        }
        let body_len = u32::try_from(body.len())
            .map_err(|_| CubeError::DecodeFailure(format!("record too large: {} bytes", body.len())))?;

        // Magic (4 bytes)
        writer.write_all(&RECORD_MAGIC)?;
        // Version (2 bytes)
        writer.write_all(&RECORD_VERSION.to_le_bytes())?;
        // Body length (4 bytes)
        writer.write_all(&body_len.to_le_bytes())?;
        // Body
        writer.write_all(&body)?;
        // Body CRC32 (4 bytes)
        writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;

        Ok(RECORD_HEADER_SIZE + body.len() + RECORD_TRAILER_SIZE)
    }
}

/// A decoded record.
#[derive(Debug, Clone)]
pub struct RecordHandle {
    offset: u64,
    entries: IndexMap<String, RecordEntry>,
}

impl RecordHandle {
    fn entry(&self, key: &str) -> Result<&RecordEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| CubeError::KeyNotFound(key.to_string()))
    }
}

impl MessageHandle for RecordHandle {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn native_type(&self, key: &str) -> Result<NativeType> {
        if key == OFFSET_KEY {
            return Ok(NativeType::Long);
        }
        Ok(self.entry(key)?.values.native_type())
    }

    fn size(&self, key: &str) -> Result<usize> {
        if key == OFFSET_KEY {
            return Ok(1);
        }
        Ok(self.entry(key)?.values.len())
    }

    fn length(&self, key: &str) -> Result<usize> {
        match &self.entry(key)?.values {
            RawValues::Bytes(v) => Ok(v.iter().map(Vec::len).max().unwrap_or(0)),
            _ => Err(CubeError::TypeMismatch {
                key: key.to_string(),
                expected: NativeType::String,
            }),
        }
    }

    fn read(&self, key: &str, native_type: Option<NativeType>) -> Result<RawValues> {
        let stored = if key == OFFSET_KEY {
            RawValues::Long(vec![self.offset as i64])
        } else {
            self.entry(key)?.values.clone()
        };
        match native_type {
            None => Ok(stored),
            Some(requested) => coerce(key, stored, requested),
        }
    }

    fn key_names<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        let names = self
            .entries
            .values()
            .filter(move |e| namespace.map_or(true, |ns| e.namespace == ns))
            .map(|e| e.name.clone());
        match namespace {
            None => Box::new(names.chain(std::iter::once(OFFSET_KEY.to_string()))),
            Some(_) => Box::new(names),
        }
    }
}

/// Converts stored values to the requested native type.
fn coerce(key: &str, values: RawValues, requested: NativeType) -> Result<RawValues> {
    let mismatch = || CubeError::TypeMismatch {
        key: key.to_string(),
        expected: requested,
    };
    match (values, requested) {
        (v, t) if v.native_type() == t => Ok(v),
        (RawValues::Long(v), NativeType::Double) => {
            Ok(RawValues::Double(v.into_iter().map(|x| x as f64).collect()))
        }
        (RawValues::Double(v), NativeType::Long) => v
            .into_iter()
            .map(|x| {
                if x.fract() == 0.0 && x.is_finite() {
                    Ok(x as i64)
                } else {
                    Err(mismatch())
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(RawValues::Long),
        (RawValues::Long(v), NativeType::String) => Ok(RawValues::Bytes(
            v.into_iter().map(|x| x.to_string().into_bytes()).collect(),
        )),
        (RawValues::Double(v), NativeType::String) => Ok(RawValues::Bytes(
            v.into_iter().map(|x| x.to_string().into_bytes()).collect(),
        )),
        _ => Err(mismatch()),
    }
}

/// Decoder for the reference record format.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDecoder;

impl RecordDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RecordDecoder {
    type Handle = RecordHandle;

    fn decode<R: Read + Seek>(&self, reader: &mut R) -> Result<Option<RecordHandle>> {
        let offset = reader.stream_position()?;

        let mut header = [0u8; RECORD_HEADER_SIZE];
        let filled = read_up_to(reader, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_HEADER_SIZE {
            return Err(CubeError::DecodeFailure(format!(
                "truncated record header at offset {}: {} of {} bytes",
                offset, filled, RECORD_HEADER_SIZE
            )));
        }

        let magic: [u8; 4] = [header[0], header[1], header[2], header[3]];
        if magic != RECORD_MAGIC {
            return Err(CubeError::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != RECORD_VERSION {
            return Err(CubeError::UnsupportedVersion(version));
        }
        let body_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let mut body = Vec::with_capacity(body_len.min(INITIAL_BODY_CAPACITY));
        reader.by_ref().take(body_len as u64).read_to_end(&mut body)?;
        if body.len() < body_len {
            return Err(CubeError::DecodeFailure(format!(
                "truncated record at offset {}: body has {} of {} bytes",
                offset,
                body.len(),
                body_len
            )));
        }
        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf).map_err(|e| truncated(e, offset))?;

        let expected = u32::from_le_bytes(crc_buf);
        let actual = crc32fast::hash(&body);
        if expected != actual {
            return Err(CubeError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = Cursor::new(body.as_slice());
        let entries = parse_body(&mut cursor).map_err(|e| match e {
            CubeError::IoError(io) => truncated(io, offset),
            other => other,
        })?;

        Ok(Some(RecordHandle { offset, entries }))
    }
}

fn parse_body<R: Read>(reader: &mut R) -> Result<IndexMap<String, RecordEntry>> {
    let mut buf2 = [0u8; 2];
    reader.read_exact(&mut buf2)?;
    let entry_count = u16::from_le_bytes(buf2) as usize;

    let mut entries = IndexMap::with_capacity(entry_count);
    for _ in 0..entry_count {
        let entry = RecordEntry::read_from(reader)?;
        entries.insert(entry.name.clone(), entry);
    }
    Ok(entries)
}

/// Reads until `buf` is full or the reader is exhausted; returns the bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn truncated(e: io::Error, offset: u64) -> CubeError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CubeError::DecodeFailure(format!("truncated record at offset {}", offset))
    } else {
        CubeError::IoError(e)
    }
}

/// Summary of a finished record file.
#[derive(Debug, Clone)]
pub struct RecordFileHandle {
    /// Path to the record file.
    pub path: PathBuf,
    /// Number of records written.
    pub message_count: u64,
    /// Total bytes written.
    pub bytes_written: u64,
}

/// Writes records sequentially to a new file.
pub struct RecordWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
    message_count: u64,
}

impl RecordWriter {
    /// Creates a record file at `path`, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            position: 0,
            message_count: 0,
        })
    }

    /// Appends a record and returns its byte offset.
    pub fn write(&mut self, record: &MessageRecord) -> Result<u64> {
        let offset = self.position;
        let written = record.write_to(&mut self.writer)?;
        self.position += written as u64;
        self.message_count += 1;
        Ok(offset)
    }

    /// Returns the number of records written so far.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Flushes and syncs the file.
    pub fn finish(mut self) -> Result<RecordFileHandle> {
        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| io::Error::other(e.to_string()))?;
        file.sync_all()?;

        Ok(RecordFileHandle {
            path: self.path,
            message_count: self.message_count,
            bytes_written: self.position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> MessageRecord {
        MessageRecord::new()
            .in_namespace("parameter")
            .long("paramId", 130)
            .text("shortName", "t")
            .in_namespace("geography")
            .text("gridType", "regular_ll")
            .long("Ni", 4)
            .in_namespace("")
            .doubles("values", vec![1.0, 2.0, 3.0, 4.0])
    }

    fn decode_one(bytes: Vec<u8>) -> Result<Option<RecordHandle>> {
        RecordDecoder::new().decode(&mut Cursor::new(bytes))
    }

    #[test]
    fn test_record_size_matches_bytes_written() {
        let mut buf = Vec::new();
        let written = sample_record().write_to(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(&buf[0..4], b"MREC");
    }

    #[test]
    fn test_decode_reads_keys() {
        let mut buf = Vec::new();
        sample_record().write_to(&mut buf).unwrap();

        let handle = decode_one(buf).unwrap().unwrap();
        assert_eq!(handle.offset(), 0);
        assert_eq!(handle.native_type("paramId").unwrap(), NativeType::Long);
        assert_eq!(handle.size("values").unwrap(), 4);
        assert_eq!(handle.length("gridType").unwrap(), 10);
        assert_eq!(
            handle.read("shortName", None).unwrap(),
            RawValues::Bytes(vec![b"t".to_vec()])
        );
        assert!(matches!(
            handle.read("missing", None),
            Err(CubeError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_key_names_by_namespace() {
        let mut buf = Vec::new();
        sample_record().write_to(&mut buf).unwrap();
        let handle = decode_one(buf).unwrap().unwrap();

        let geography: Vec<String> = handle.key_names(Some("geography")).collect();
        assert_eq!(geography, vec!["gridType", "Ni"]);

        let all: Vec<String> = handle.key_names(None).collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all.last().map(String::as_str), Some(OFFSET_KEY));
    }

    #[test]
    fn test_coercion() {
        let mut buf = Vec::new();
        MessageRecord::new()
            .long("level", 850)
            .double("half", 0.5)
            .write_to(&mut buf)
            .unwrap();
        let handle = decode_one(buf).unwrap().unwrap();

        assert_eq!(
            handle.read("level", Some(NativeType::Double)).unwrap(),
            RawValues::Double(vec![850.0])
        );
        assert_eq!(
            handle.read("level", Some(NativeType::String)).unwrap(),
            RawValues::Bytes(vec![b"850".to_vec()])
        );
        assert!(matches!(
            handle.read("half", Some(NativeType::Long)),
            Err(CubeError::TypeMismatch { .. })
        ));
        assert_eq!(
            handle.read(OFFSET_KEY, None).unwrap(),
            RawValues::Long(vec![0])
        );
    }

    #[test]
    fn test_empty_input_is_end_of_stream() {
        assert!(decode_one(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_fails() {
        let mut buf = Vec::new();
        sample_record().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(decode_one(buf), Err(CubeError::DecodeFailure(_))));

        assert!(matches!(
            decode_one(b"MRE".to_vec()),
            Err(CubeError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = Vec::new();
        sample_record().write_to(&mut buf).unwrap();
        buf[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(decode_one(buf), Err(CubeError::InvalidMagic(_))));
    }

    #[test]
    fn test_oversized_body_length_is_truncation() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&RECORD_MAGIC);
        buf.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        buf.extend_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        match decode_one(buf) {
            Err(CubeError::DecodeFailure(message)) => {
                assert!(message.contains("16 of 4294967280 bytes"), "{}", message);
            }
            other => panic!("expected a truncated record, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_versions_are_rejected() {
        for version in [0u16, RECORD_VERSION + 1] {
            let mut buf = Vec::new();
            sample_record().write_to(&mut buf).unwrap();
            buf[4..6].copy_from_slice(&version.to_le_bytes());
            assert!(matches!(
                decode_one(buf),
                Err(CubeError::UnsupportedVersion(v)) if v == version
            ));
        }
    }

    #[test]
    fn test_corrupted_body_fails_checksum() {
        let mut buf = Vec::new();
        sample_record().write_to(&mut buf).unwrap();
        let mid = RECORD_HEADER_SIZE + 4;
        buf[mid] ^= 0xff;
        assert!(matches!(
            decode_one(buf),
            Err(CubeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_push_replaces_existing_key() {
        let mut record = MessageRecord::new().long("topLevel", 500);
        record.push("topLevel", RawValues::Long(vec![850]));
        assert_eq!(record.entries().len(), 1);
        assert_eq!(record.entries()[0].values, RawValues::Long(vec![850]));
    }
}
