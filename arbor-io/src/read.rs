use std::io;
use std::ops::Range;
use std::sync::Arc;

use arbor_error::arbor_err;
use bytes::Bytes;

/// A trait for types that support positioned reads.
///
/// Readers are shared between the consumer thread and the read-ahead threads, so references
/// must be safe to [share across threads][Sync].
pub trait ReadAt: Send + Sync + 'static {
    /// Read exactly the bytes in `range`.
    ///
    /// If the reader does not have the requested number of bytes, the read fails with
    /// [`UnexpectedEof`][std::io::ErrorKind::UnexpectedEof].
    fn read_byte_range(&self, range: Range<u64>) -> io::Result<Bytes>;

    /// Get the number of bytes of data readable.
    fn size(&self) -> io::Result<u64>;
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_byte_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        T::read_byte_range(self, range)
    }

    fn size(&self) -> io::Result<u64> {
        T::size(self)
    }
}

impl ReadAt for Bytes {
    fn read_byte_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        let start = usize::try_from(range.start).map_err(io::Error::other)?;
        let end = usize::try_from(range.end).map_err(io::Error::other)?;
        if start > end || end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                arbor_err!(
                    "unexpected eof reading {}..{} of {} bytes",
                    range.start,
                    range.end,
                    self.len()
                ),
            ));
        }
        Ok(self.slice(start..end))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::ReadAt;

    #[test]
    fn bytes_reads_are_bounded() {
        let data = Bytes::from_static(b"0123456789");
        assert_eq!(data.read_byte_range(2..5).unwrap(), "234".as_bytes());
        assert_eq!(data.size().unwrap(), 10);

        let err = data.read_byte_range(8..11).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn shared_readers_delegate() {
        let data: Arc<dyn ReadAt> = Arc::new(Bytes::from_static(b"abc"));
        let shared = Arc::clone(&data);
        assert_eq!(shared.read_byte_range(1..3).unwrap(), "bc".as_bytes());
        assert_eq!(shared.size().unwrap(), 3);
    }
}
