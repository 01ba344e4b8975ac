use std::collections::HashMap;
use std::io;

use arbor_error::{ArborResult, arbor_bail, arbor_err};

use crate::{
    BYTE_COUNT_MASK, BYTE_COUNT_VMASK, BigEndian, CLASS_MASK, MAP_OFFSET, MAX_CLASS_NAME,
    NEW_CLASS_TAG, ObjectId, VersionHeader,
};

/// Entries of the read-side reference map.
#[derive(Debug, Clone)]
enum Ref {
    Class(String),
    Object(ObjectId),
}

/// A big-endian read cursor over a borrowed record.
///
/// Positions reported by [`RBuffer::pos`] include the buffer's logical offset.
pub struct RBuffer<'a> {
    data: &'a [u8],
    cursor: usize,
    offset: u64,
    refs: HashMap<u64, Ref>,
}

impl<'a> RBuffer<'a> {
    /// Create a cursor over `data` whose first byte sits at logical position `offset`.
    pub fn new(data: &'a [u8], offset: u64) -> Self {
        Self {
            data,
            cursor: 0,
            offset,
            refs: HashMap::new(),
        }
    }

    /// Current logical position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.cursor as u64 + self.offset
    }

    /// Logical offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Move the cursor to the logical position `pos`.
    pub fn set_pos(&mut self, pos: u64) -> ArborResult<()> {
        let cursor = pos
            .checked_sub(self.offset)
            .and_then(|c| usize::try_from(c).ok())
            .filter(|&c| c <= self.data.len())
            .ok_or_else(|| {
                arbor_err!(
                    InvalidSerde: "position {} outside of buffer [{}, {})",
                    pos,
                    self.offset,
                    self.offset + self.data.len() as u64
                )
            })?;
        self.cursor = cursor;
        Ok(())
    }

    /// Total number of bytes in the underlying record.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying record is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Consume and return the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> ArborResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "need {} bytes at position {}, {} available",
                        n,
                        self.pos(),
                        self.remaining()
                    ),
                )
            })?;
        let bytes = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    /// Decode one fixed-width value.
    #[inline]
    pub fn read<T: BigEndian>(&mut self) -> ArborResult<T> {
        Ok(T::decode(self.read_bytes(T::SIZE)?))
    }

    /// Decode `n` consecutive values with no count prefix.
    pub fn read_fast_array<T: BigEndian>(&mut self, n: usize) -> ArborResult<Vec<T>> {
        let bytes = self.read_bytes(n * T::SIZE)?;
        Ok(bytes.chunks_exact(T::SIZE).map(T::decode).collect())
    }

    /// Decode values with no count prefix into an existing slice.
    pub fn read_into<T: BigEndian>(&mut self, dst: &mut [T]) -> ArborResult<()> {
        let bytes = self.read_bytes(dst.len() * T::SIZE)?;
        for (v, raw) in dst.iter_mut().zip(bytes.chunks_exact(T::SIZE)) {
            *v = T::decode(raw);
        }
        Ok(())
    }

    /// Decode an `i32`-counted array.
    pub fn read_static_array<T: BigEndian>(&mut self) -> ArborResult<Vec<T>> {
        let n = self.read_i32()?;
        let n = usize::try_from(n)
            .map_err(|_| arbor_err!(InvalidSerde: "negative array length {}", n))?;
        self.read_fast_array(n)
    }

    /// Read a boolean byte.
    pub fn read_bool(&mut self) -> ArborResult<bool> {
        self.read()
    }

    /// Read an `i8`.
    pub fn read_i8(&mut self) -> ArborResult<i8> {
        self.read()
    }

    /// Read a `u8`.
    pub fn read_u8(&mut self) -> ArborResult<u8> {
        self.read()
    }

    /// Read an `i16`.
    pub fn read_i16(&mut self) -> ArborResult<i16> {
        self.read()
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> ArborResult<u16> {
        self.read()
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> ArborResult<i32> {
        self.read()
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> ArborResult<u32> {
        self.read()
    }

    /// Read an `i64`.
    pub fn read_i64(&mut self) -> ArborResult<i64> {
        self.read()
    }

    /// Read a `u64`.
    pub fn read_u64(&mut self) -> ArborResult<u64> {
        self.read()
    }

    /// Read an `f32`.
    pub fn read_f32(&mut self) -> ArborResult<f32> {
        self.read()
    }

    /// Read an `f64`.
    pub fn read_f64(&mut self) -> ArborResult<f64> {
        self.read()
    }

    /// Read a length-prefixed string: one length byte, or `255` followed by a `u32` length.
    pub fn read_string(&mut self) -> ArborResult<String> {
        let short = self.read_u8()?;
        let n = if short == 255 {
            self.read_u32()? as usize
        } else {
            short as usize
        };
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| arbor_err!(InvalidSerde: "invalid utf-8 string at {}: {}", self.pos(), e))
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    pub fn read_cstring(&mut self, max: usize) -> ArborResult<String> {
        let window = &self.data[self.cursor..];
        let limit = window.len().min(max);
        let n = window[..limit]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| arbor_err!(InvalidSerde: "unterminated string at {}", self.pos()))?;
        let bytes = self.read_bytes(n + 1)?;
        String::from_utf8(bytes[..n].to_vec())
            .map_err(|e| arbor_err!(InvalidSerde: "invalid utf-8 string at {}: {}", self.pos(), e))
    }

    /// Read a record header: an optional byte count followed by the class version.
    pub fn read_version(&mut self) -> ArborResult<VersionHeader> {
        let pos = self.pos();
        let raw = self.read_u32()?;
        let bcnt = if raw & BYTE_COUNT_MASK != 0 {
            raw & !BYTE_COUNT_MASK
        } else {
            self.set_pos(pos)?;
            0
        };
        let version = self.read_i16()?;
        Ok(VersionHeader { version, pos, bcnt })
    }

    /// Verify that exactly the declared number of bytes was consumed since `hdr` was read.
    pub fn check_byte_count(&self, hdr: &VersionHeader, class: &str) -> ArborResult<()> {
        if hdr.bcnt == 0 {
            return Ok(());
        }
        let expected = u64::from(hdr.bcnt) + 4;
        let consumed = self.pos() - hdr.pos;
        if consumed < expected {
            arbor_bail!(
                InvalidSerde: "{}: read too few bytes ({} < {})",
                class,
                consumed,
                expected
            );
        }
        if consumed > expected {
            arbor_bail!(
                InvalidSerde: "{}: read too many bytes ({} > {})",
                class,
                consumed,
                expected
            );
        }
        Ok(())
    }

    /// Skip past the remainder of the record opened by `hdr`.
    pub fn skip_record(&mut self, hdr: &VersionHeader) -> ArborResult<()> {
        if hdr.bcnt == 0 {
            arbor_bail!(InvalidSerde: "cannot skip record at {} without a byte count", hdr.pos);
        }
        self.set_pos(hdr.pos + u64::from(hdr.bcnt) + 4)
    }

    /// Skip a bare version, as found in front of the base object fields.
    pub fn skip_version(&mut self) -> ArborResult<i16> {
        let version = self.read_i16()?;
        if version as u16 & BYTE_COUNT_VMASK != 0 {
            let _ = self.read_i16()?;
            return self.read_i16();
        }
        Ok(version)
    }

    /// Read a possibly-shared object reference.
    ///
    /// `decode` is invoked with the class name for every object met for the first time and
    /// returns the identity it assigned, or `None` to skip the object using its byte count.
    /// Back-references resolve to the identity recorded the first time.
    pub fn read_object_any<F>(&mut self, mut decode: F) -> ArborResult<Option<ObjectId>>
    where
        F: FnMut(&str, &mut RBuffer<'a>) -> ArborResult<Option<ObjectId>>,
    {
        let beg = self.pos();
        let first = self.read_u32()?;
        let (tag, bcnt, start) = if first & BYTE_COUNT_MASK == 0 || first == NEW_CLASS_TAG {
            (first, 0, None)
        } else {
            let start = self.pos();
            (self.read_u32()?, first & !BYTE_COUNT_MASK, Some(start))
        };

        if tag & CLASS_MASK == 0 {
            if tag == 0 {
                return Ok(None);
            }
            return match self.refs.get(&u64::from(tag)) {
                Some(Ref::Object(id)) => Ok(Some(*id)),
                Some(Ref::Class(name)) => {
                    arbor_bail!(InvalidSerde: "object reference {} points to class {}", tag, name)
                }
                None => {
                    log::debug!("unresolved object reference {} at {}", tag, beg);
                    if bcnt > 0 {
                        self.set_pos(beg + u64::from(bcnt) + 4)?;
                    }
                    Ok(None)
                }
            };
        }

        let class = if tag == NEW_CLASS_TAG {
            let class = self.read_cstring(MAX_CLASS_NAME)?;
            let key = match start {
                Some(start) => start + MAP_OFFSET,
                None => self.refs.len() as u64 + 1,
            };
            self.refs.insert(key, Ref::Class(class.clone()));
            class
        } else {
            let key = u64::from(tag & !CLASS_MASK);
            match self.refs.get(&key) {
                Some(Ref::Class(name)) => name.clone(),
                Some(Ref::Object(_)) => {
                    arbor_bail!(InvalidSerde: "class reference {} points to an object", key)
                }
                None => arbor_bail!(InvalidSerde: "unknown class reference {} at {}", key, beg),
            }
        };

        let id = decode(&class, self)?;
        match id {
            Some(id) => {
                let key = match start {
                    Some(_) => beg + MAP_OFFSET,
                    None => self.refs.len() as u64 + 1,
                };
                self.refs.insert(key, Ref::Object(id));
            }
            None => {
                if bcnt == 0 {
                    arbor_bail!(InvalidSerde: "cannot skip object of class {} without a byte count", class);
                }
                log::debug!("skipping object of class {} at {}", class, beg);
                self.set_pos(beg + u64::from(bcnt) + 4)?;
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::WBuffer;

    #[test]
    fn primitives_are_big_endian() {
        let data = [0x00, 0x01, 0xff, 0xff, 0xff, 0xfe, 0x3f, 0x80, 0x00, 0x00, 0x01];
        let mut r = RBuffer::new(&data, 0);
        assert_eq!(r.read_u16().unwrap(), 1);
        assert_eq!(r.read_i32().unwrap(), -2);
        assert_eq!(r.read_f32().unwrap(), 1.0);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.remaining(), 0);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn positions_include_offset() {
        let data = [0u8; 8];
        let mut r = RBuffer::new(&data, 100);
        assert_eq!(r.pos(), 100);
        r.read_i32().unwrap();
        assert_eq!(r.pos(), 104);
        r.set_pos(106).unwrap();
        assert_eq!(r.remaining(), 2);
        assert!(r.set_pos(99).is_err());
        assert!(r.set_pos(109).is_err());
    }

    #[rstest]
    #[case("")]
    #[case("px")]
    #[case(&"a".repeat(254))]
    #[case(&"long".repeat(100))]
    fn strings(#[case] value: &str) {
        let mut w = WBuffer::new(0);
        w.write_string(value);
        let expected_len = if value.len() < 255 { 1 } else { 5 } + value.len();
        assert_eq!(w.len(), expected_len);
        let bytes = w.into_vec();
        let mut r = RBuffer::new(&bytes, 0);
        assert_eq!(r.read_string().unwrap(), value);
    }

    #[test]
    fn cstring_requires_terminator_within_limit() {
        let data = b"TBranch\0rest";
        let mut r = RBuffer::new(data, 0);
        assert_eq!(r.read_cstring(80).unwrap(), "TBranch");
        assert_eq!(r.pos(), 8);

        let mut r = RBuffer::new(data, 0);
        assert!(r.read_cstring(4).is_err());
    }

    #[test]
    fn byte_count_mismatch_is_rejected() {
        let mut w = WBuffer::new(0);
        let beg = w.write_version(3);
        w.write_i32(7);
        w.write_i32(8);
        w.set_byte_count(beg).unwrap();
        let bytes = w.into_vec();

        let mut r = RBuffer::new(&bytes, 0);
        let hdr = r.read_version().unwrap();
        assert_eq!(hdr.version, 3);
        assert_eq!(hdr.bcnt, 10);
        r.read_i32().unwrap();
        let err = r.check_byte_count(&hdr, "TThing").unwrap_err();
        assert!(err.to_string().contains("read too few bytes"));
        r.read_i32().unwrap();
        r.check_byte_count(&hdr, "TThing").unwrap();
    }

    #[test]
    fn version_without_byte_count() {
        let data = [0x00, 0x05, 0xAA];
        let mut r = RBuffer::new(&data, 0);
        let hdr = r.read_version().unwrap();
        assert_eq!(hdr.version, 5);
        assert_eq!(hdr.bcnt, 0);
        assert_eq!(r.pos(), 2);
    }

    #[test]
    fn skip_version_with_byte_count() {
        let data = [0x40, 0x00, 0x00, 0x0A, 0x00, 0x01, 0xEE];
        let mut r = RBuffer::new(&data, 0);
        assert_eq!(r.skip_version().unwrap(), 1);
        assert_eq!(r.read_u8().unwrap(), 0xEE);
    }

    #[test]
    fn shared_objects_resolve_to_the_same_identity() {
        let mut w = WBuffer::new(40);
        for id in [1u64, 2, 1] {
            w.write_object_any(Some((ObjectId(id), "TLeafI")), |w| {
                w.write_i32(i32::try_from(id * 10).unwrap());
                Ok(())
            })
            .unwrap();
        }
        w.write_object_any(None, |_| Ok(())).unwrap();
        let bytes = w.into_vec();

        let mut r = RBuffer::new(&bytes, 40);
        let mut seen = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(
                r.read_object_any(|class, r| {
                    assert_eq!(class, "TLeafI");
                    let v = r.read_i32()?;
                    seen.push(v);
                    Ok(Some(ObjectId(u64::try_from(v).unwrap())))
                })
                .unwrap(),
            );
        }
        assert_eq!(seen, vec![10, 20]);
        assert_eq!(
            ids,
            vec![Some(ObjectId(10)), Some(ObjectId(20)), Some(ObjectId(10)), None]
        );
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn unknown_objects_are_skipped() {
        let mut w = WBuffer::new(0);
        w.write_object_any(Some((ObjectId(9), "TList")), |w| {
            w.write_string("payload");
            Ok(())
        })
        .unwrap();
        w.write_i16(77);
        let bytes = w.into_vec();

        let mut r = RBuffer::new(&bytes, 0);
        let id = r.read_object_any(|_, _| Ok(None)).unwrap();
        assert_eq!(id, None);
        assert_eq!(r.read_i16().unwrap(), 77);
    }
}
