use std::collections::HashMap;

use arbor_error::{ArborResult, arbor_err};
use bytes::Bytes;

use crate::{BYTE_COUNT_MASK, BigEndian, CLASS_MASK, MAP_OFFSET, NEW_CLASS_TAG, ObjectId};

/// A growable big-endian write cursor.
///
/// Positions reported by [`WBuffer::pos`] include the buffer's logical offset, so records can be
/// encoded as if the record key were already in front of them.
#[derive(Debug, Default)]
pub struct WBuffer {
    buf: Vec<u8>,
    offset: u64,
    objects: HashMap<ObjectId, u64>,
    classes: HashMap<String, u64>,
}

impl WBuffer {
    /// Create an empty writer whose first byte sits at logical position `offset`.
    pub fn new(offset: u64) -> Self {
        Self {
            buf: Vec::new(),
            offset,
            objects: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    /// Create an empty writer with room for `capacity` bytes.
    pub fn with_capacity(offset: u64, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::new(offset)
        }
    }

    /// Current logical position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.buf.len() as u64 + self.offset
    }

    /// Logical offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop all written bytes and reference bookkeeping, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.objects.clear();
        self.classes.clear();
    }

    /// Consume the writer, returning its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Consume the writer, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// Encode one fixed-width value.
    #[inline]
    pub fn write<T: BigEndian>(&mut self, v: T) {
        v.encode(&mut self.buf);
    }

    /// Encode values with no count prefix.
    pub fn write_fast_array<T: BigEndian>(&mut self, values: &[T]) {
        self.buf.reserve(values.len() * T::SIZE);
        for &v in values {
            v.encode(&mut self.buf);
        }
    }

    /// Encode values with an `i32` count prefix.
    pub fn write_static_array<T: BigEndian>(&mut self, values: &[T]) -> ArborResult<()> {
        let n = i32::try_from(values.len())
            .map_err(|_| arbor_err!(InvalidArgument: "array of {} elements too long", values.len()))?;
        self.write_i32(n);
        self.write_fast_array(values);
        Ok(())
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a boolean byte.
    pub fn write_bool(&mut self, v: bool) {
        self.write(v)
    }

    /// Write an `i8`.
    pub fn write_i8(&mut self, v: i8) {
        self.write(v)
    }

    /// Write a `u8`.
    pub fn write_u8(&mut self, v: u8) {
        self.write(v)
    }

    /// Write an `i16`.
    pub fn write_i16(&mut self, v: i16) {
        self.write(v)
    }

    /// Write a `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.write(v)
    }

    /// Write an `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.write(v)
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.write(v)
    }

    /// Write an `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.write(v)
    }

    /// Write a `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.write(v)
    }

    /// Write an `f32`.
    pub fn write_f32(&mut self, v: f32) {
        self.write(v)
    }

    /// Write an `f64`.
    pub fn write_f64(&mut self, v: f64) {
        self.write(v)
    }

    /// Write a length-prefixed string.
    pub fn write_string(&mut self, v: &str) {
        let n = v.len();
        match u8::try_from(n) {
            Ok(short) if short < 255 => self.write_u8(short),
            _ => {
                self.write_u8(255);
                self.write_u32(u32::try_from(n).unwrap_or(u32::MAX));
            }
        }
        self.write_bytes(v.as_bytes());
    }

    /// Write a NUL-terminated string.
    pub fn write_cstring(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
        self.write_u8(0);
    }

    /// Overwrite a previously written `u32` at logical position `pos`.
    pub fn patch_u32(&mut self, pos: u64, v: u32) -> ArborResult<()> {
        let at = pos
            .checked_sub(self.offset)
            .and_then(|at| usize::try_from(at).ok())
            .filter(|&at| at + 4 <= self.buf.len())
            .ok_or_else(|| arbor_err!(InvalidArgument: "cannot patch position {}", pos))?;
        self.buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Open a versioned record: reserve the byte count and write the class version.
    ///
    /// Returns the position to hand to [`WBuffer::set_byte_count`] once the record is complete.
    pub fn write_version(&mut self, version: i16) -> u64 {
        let beg = self.pos();
        self.write_u32(0);
        self.write_i16(version);
        beg
    }

    /// Close the record opened at `beg`, patching its byte count.
    pub fn set_byte_count(&mut self, beg: u64) -> ArborResult<()> {
        let n = self.pos() - beg - 4;
        let n = u32::try_from(n)
            .ok()
            .filter(|&n| n & BYTE_COUNT_MASK == 0)
            .ok_or_else(|| arbor_err!(InvalidArgument: "record of {} bytes too long", n))?;
        self.patch_u32(beg, n | BYTE_COUNT_MASK)
    }

    /// Write a possibly-shared object reference.
    ///
    /// `None` writes a null reference. An object already written through this buffer is emitted
    /// as a back-reference to its first occurrence; otherwise `encode` streams its fields after
    /// the class tag.
    pub fn write_object_any<F>(&mut self, obj: Option<(ObjectId, &str)>, encode: F) -> ArborResult<()>
    where
        F: FnOnce(&mut WBuffer) -> ArborResult<()>,
    {
        let Some((id, class)) = obj else {
            self.write_u32(0);
            return Ok(());
        };

        if let Some(&at) = self.objects.get(&id) {
            let at = u32::try_from(at)
                .map_err(|_| arbor_err!(InvalidArgument: "object offset {} too large", at))?;
            self.write_u32(at);
            return Ok(());
        }

        let beg = self.pos();
        self.write_u32(0);
        let start = self.pos();
        match self.classes.get(class) {
            Some(&tag) => {
                let tag = u32::try_from(tag)
                    .map_err(|_| arbor_err!(InvalidArgument: "class offset {} too large", tag))?;
                self.write_u32(tag | CLASS_MASK);
            }
            None => {
                self.write_u32(NEW_CLASS_TAG);
                self.write_cstring(class);
                self.classes.insert(class.to_string(), start + MAP_OFFSET);
            }
        }
        self.objects.insert(id, beg + MAP_OFFSET);

        encode(self)?;

        let bcnt = u32::try_from(self.pos() - start)
            .ok()
            .filter(|&n| n & BYTE_COUNT_MASK == 0)
            .ok_or_else(|| arbor_err!(InvalidArgument: "object of class {} too long", class))?;
        self.patch_u32(beg, bcnt | BYTE_COUNT_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RBuffer;

    #[test]
    fn version_header_layout() {
        let mut w = WBuffer::new(0);
        let beg = w.write_version(2);
        w.write_i16(-1);
        w.set_byte_count(beg).unwrap();
        assert_eq!(w.as_slice(), &[0x40, 0x00, 0x00, 0x04, 0x00, 0x02, 0xff, 0xff]);
    }

    #[test]
    fn static_arrays_carry_their_count() {
        let mut w = WBuffer::new(0);
        w.write_static_array(&[3i32, 4, 5]).unwrap();
        w.write_fast_array(&[9i64]);
        let bytes = w.into_vec();
        assert_eq!(bytes.len(), 4 + 12 + 8);

        let mut r = RBuffer::new(&bytes, 0);
        assert_eq!(r.read_static_array::<i32>().unwrap(), vec![3, 4, 5]);
        assert_eq!(r.read_fast_array::<i64>(1).unwrap(), vec![9]);
    }

    #[test]
    fn repeated_class_uses_class_tag() {
        let mut w = WBuffer::new(0);
        w.write_object_any(Some((ObjectId(1), "TLeafF")), |_| Ok(()))
            .unwrap();
        let first = w.len();
        w.write_object_any(Some((ObjectId(2), "TLeafF")), |_| Ok(()))
            .unwrap();
        // byte count, then the class tag pointing at the first class name
        assert_eq!(w.len() - first, 8);
        let tag = u32::from_be_bytes(w.as_slice()[first + 4..first + 8].try_into().unwrap());
        assert_eq!(tag, (4 + MAP_OFFSET as u32) | CLASS_MASK);
    }

    #[test]
    fn patching_outside_the_buffer_fails() {
        let mut w = WBuffer::new(10);
        w.write_u32(0);
        assert!(w.patch_u32(9, 1).is_err());
        assert!(w.patch_u32(11, 1).is_err());
        w.patch_u32(10, 7).unwrap();
        assert_eq!(w.as_slice(), &[0, 0, 0, 7]);
    }
}
