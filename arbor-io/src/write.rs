use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;

use crate::SharedFile;

/// The on-disk location of a record appended to a [`RecordSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    /// Byte offset of the first byte of the record.
    pub seek: u64,
    /// Length of the record in bytes.
    pub size: u32,
}

/// An append-only destination for records.
pub trait RecordSink: Send {
    /// Position at which the next record will be written.
    fn position(&self) -> u64;

    /// Append `record`, returning where it landed.
    fn write_record(&mut self, record: &[u8]) -> io::Result<Locator>;

    /// Flush any buffered bytes to the underlying storage.
    fn flush(&mut self) -> io::Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<Locator> {
        (**self).write_record(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

fn record_size(record: &[u8]) -> io::Result<u32> {
    u32::try_from(record.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("record of {} bytes is too large", record.len()),
        )
    })
}

/// A growable in-memory sink.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    buf: Vec<u8>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink whose first record starts after `reserved` zero bytes, leaving room for a
    /// container header written by the enclosing layer.
    pub fn with_reserved(reserved: usize) -> Self {
        Self {
            buf: vec![0; reserved],
        }
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the sink, returning a readable view of its bytes.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

impl RecordSink for MemorySink {
    fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<Locator> {
        let size = record_size(record)?;
        let seek = self.position();
        self.buf.extend_from_slice(record);
        Ok(Locator { seek, size })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink appending records to a file.
#[derive(Debug)]
pub struct FileSink {
    file: BufWriter<File>,
    pos: u64,
}

impl FileSink {
    /// Create (or truncate) a file on the current file system.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(File::create(path)?)
    }

    /// Append to an already opened file, starting at its current end.
    pub fn new(mut file: File) -> io::Result<Self> {
        let pos = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file: BufWriter::new(file),
            pos,
        })
    }

    /// Flush and reopen the written file for positioned reads.
    pub fn into_shared(mut self) -> io::Result<SharedFile> {
        self.file.flush()?;
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        Ok(SharedFile::from(file))
    }
}

impl RecordSink for FileSink {
    fn position(&self) -> u64 {
        self.pos
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, record), fields(len = record.len())))]
    fn write_record(&mut self, record: &[u8]) -> io::Result<Locator> {
        let size = record_size(record)?;
        let seek = self.pos;
        self.file.write_all(record)?;
        self.pos += u64::from(size);
        log::trace!("wrote record of {} bytes at {}", size, seek);
        Ok(Locator { seek, size })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
