//! Restartable message streams over a record file.
//!
//! A [`Stream`] holds no open file. Every call to [`Stream::iter`] opens the
//! file again, so independent iterations never share a cursor.

use crate::codec::{Decoder, RecordDecoder};
use crate::error::{CubeError, Result};
use crate::index::Index;
use crate::message::{ComputedKeys, ComputedKeysMessage, Message};
use crate::value::TextEncoding;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File open mode for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read only (default).
    #[default]
    Read,
    /// Read and write, for files other processes may append to.
    ReadWrite,
}

/// A restartable stream of messages stored in one file.
#[derive(Debug, Clone)]
pub struct Stream<D = RecordDecoder> {
    path: PathBuf,
    mode: OpenMode,
    decoder: D,
    encoding: TextEncoding,
    computed_keys: Arc<ComputedKeys>,
}

impl Stream<RecordDecoder> {
    /// Creates a stream over a record file using the reference decoder.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_decoder(path, RecordDecoder::new())
    }
}

impl<D: Decoder> Stream<D> {
    /// Creates a stream using a custom decoder.
    pub fn with_decoder(path: impl AsRef<Path>, decoder: D) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode: OpenMode::default(),
            decoder,
            encoding: TextEncoding::default(),
            computed_keys: Arc::new(ComputedKeys::new()),
        }
    }

    /// Sets the open mode.
    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the text encoding used to decode string values.
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the computed keys every message of the stream is decorated with.
    pub fn with_computed_keys(mut self, computed_keys: ComputedKeys) -> Self {
        self.computed_keys = Arc::new(computed_keys);
        self
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open mode.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Text encoding.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Computed key table.
    pub fn computed_keys(&self) -> &ComputedKeys {
        &self.computed_keys
    }

    /// Decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Opens the underlying file with the stream's mode.
    pub fn open_file(&self) -> Result<BufReader<File>> {
        let file = match self.mode {
            OpenMode::Read => File::open(&self.path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)?,
        };
        Ok(BufReader::new(file))
    }

    /// Returns a fresh iterator over the messages of the file.
    ///
    /// The file is opened on the first call to `next`.
    pub fn iter(&self) -> StreamIter<'_, D> {
        StreamIter {
            stream: self,
            reader: None,
            done: false,
        }
    }

    /// Returns the first message, or `None` if the file holds no messages.
    pub fn first(&self) -> Result<Option<ComputedKeysMessage<D::Handle>>> {
        self.iter().next().transpose()
    }

    /// Decodes the message at `offset` using an already open reader.
    pub fn read_at<R: Read + Seek>(
        &self,
        reader: &mut R,
        offset: u64,
    ) -> Result<ComputedKeysMessage<D::Handle>> {
        Message::read_from(&self.decoder, reader, Some(offset), self.encoding)?
            .map(|m| self.decorate(m))
            .ok_or_else(|| {
                CubeError::DecodeFailure(format!("no message at offset {}", offset))
            })
    }

    /// Opens the file and decodes the message at `offset`.
    pub fn message_at(&self, offset: u64) -> Result<ComputedKeysMessage<D::Handle>> {
        let mut reader = self.open_file()?;
        self.read_at(&mut reader, offset)
    }

    /// Builds an index of the stream over `index_keys`.
    pub fn index<S: AsRef<str>>(&self, index_keys: &[S]) -> Result<Index<D>> {
        Index::from_stream(self, index_keys)
    }

    fn decorate(&self, message: Message<D::Handle>) -> ComputedKeysMessage<D::Handle> {
        ComputedKeysMessage::new(message, Arc::clone(&self.computed_keys))
    }
}

/// Iterator over the messages of a [`Stream`].
///
/// Yields `Err` once on a decode failure and then stops.
pub struct StreamIter<'a, D: Decoder> {
    stream: &'a Stream<D>,
    reader: Option<BufReader<File>>,
    done: bool,
}

impl<D: Decoder> Iterator for StreamIter<'_, D> {
    type Item = Result<ComputedKeysMessage<D::Handle>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.reader.is_none() {
            match self.stream.open_file() {
                Ok(reader) => self.reader = Some(reader),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        let reader = self.reader.as_mut()?;

        match Message::read_from(&self.stream.decoder, reader, None, self.stream.encoding) {
            Ok(Some(message)) => Some(Ok(self.stream.decorate(message))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
