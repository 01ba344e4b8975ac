//! Baskets: the physical records holding a contiguous run of entries of one branch.
//!
//! A flushed basket is a [`Key`], the basket header and the (possibly compressed) payload. Once
//! decompressed, the payload holds the serialized entries, optionally followed by an `i32`
//! count and as many `i32` entry offsets for variable-length entries. Positions inside the
//! payload are logical: the first payload byte sits at the key length, as if the key still
//! preceded it.

use arbor_buffer::{RBuffer, WBuffer};
use arbor_compress::{Compression, compress, decompress, inflated_len};
use arbor_error::{ArborResult, ErrorContext, arbor_bail, arbor_err};

use crate::key::{Datime, Key};
use crate::wire::IoFeatures;

/// Version of the basket header written by this crate.
pub const BASKET_VERSION: i16 = 3;

/// Size of the basket header following the key, without I/O features.
pub const BASKET_HEADER_LEN: usize = 2 + 4 + 4 + 4 + 4 + 1;

/// Class name of baskets.
pub const BASKET_CLASS: &str = "TBasket";

const DISPLACEMENT_MASK: u32 = 0xFF00_0000;

/// The fixed fields of a basket header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasketHeader {
    /// Header version.
    pub version: i16,
    /// Size of the in-memory buffer the basket was filled in.
    pub bufsize: i32,
    /// Size of an entry for fixed-size entries, otherwise the capacity of the offset table.
    pub nevsize: i32,
    /// Number of entries in the basket.
    pub nevbuf: i32,
    /// Logical position of the first byte after the entries.
    pub last: i32,
    /// I/O features of the basket.
    pub iobits: IoFeatures,
}

/// A decoded basket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Basket {
    key: Key,
    header: BasketHeader,
    offsets: Vec<i32>,
    displ: Vec<i32>,
    payload: Vec<u8>,
}

impl Basket {
    /// The record key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The basket header.
    pub fn header(&self) -> &BasketHeader {
        &self.header
    }

    /// Logical start of every entry, empty for fixed-size entries.
    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    /// Displacement of every entry, as recorded by writers of streamed objects.
    pub fn displacements(&self) -> &[i32] {
        &self.displ
    }

    /// The decompressed payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of entries.
    pub fn entries(&self) -> usize {
        usize::try_from(self.header.nevbuf).unwrap_or(0)
    }

    fn keylen(&self) -> u64 {
        u64::try_from(self.key.keylen).unwrap_or(0)
    }

    /// Logical position of the leaf at `leaf_offset` in the entry `local` of this basket.
    pub fn entry_position(&self, local: u64, leaf_offset: i32) -> ArborResult<u64> {
        let leaf_offset = u64::try_from(leaf_offset)
            .map_err(|_| arbor_err!(InvalidSerde: "negative leaf offset {}", leaf_offset))?;
        if self.offsets.is_empty() {
            let nevsize = u64::try_from(self.header.nevsize).unwrap_or(0);
            return Ok(local * nevsize + self.keylen() + leaf_offset);
        }
        let index = usize::try_from(local).unwrap_or(usize::MAX);
        let start = self
            .offsets
            .get(index)
            .ok_or_else(|| arbor_err!(OutOfBounds: index, 0, self.offsets.len()))?;
        let start = u64::try_from(*start)
            .map_err(|_| arbor_err!(InvalidSerde: "negative entry offset {}", start))?;
        Ok(start + leaf_offset)
    }

    /// A cursor over the payload, positioned on the leaf at `leaf_offset` of entry `local`.
    pub fn entry_reader(&self, local: u64, leaf_offset: i32) -> ArborResult<RBuffer<'_>> {
        let mut r = RBuffer::new(&self.payload, self.keylen());
        r.set_pos(self.entry_position(local, leaf_offset)?)?;
        Ok(r)
    }

    /// Decode an on-disk basket record, reusing the allocations of `self`.
    ///
    /// When `entry_offset_len` is positive the offset table is read from the end of the
    /// payload.
    pub fn read_record(&mut self, record: &[u8], entry_offset_len: i32) -> ArborResult<()> {
        let mut r = RBuffer::new(record, 0);
        let raw = self.unmarshal_fields(&mut r)?;
        if raw.is_some() {
            log::debug!("basket record at {} embeds its buffer", self.key.seek_key);
        }

        let keylen = usize::try_from(self.key.keylen)
            .map_err(|_| arbor_err!(InvalidSerde: "negative key length {}", self.key.keylen))?;
        let nbytes = usize::try_from(self.key.nbytes).unwrap_or(0);
        let objlen = usize::try_from(self.key.objlen)
            .map_err(|_| arbor_err!(InvalidSerde: "negative object length {}", self.key.objlen))?;
        if nbytes > record.len() || keylen > nbytes {
            arbor_bail!(
                InvalidSerde: "basket record of {} bytes declares {} bytes with a {}-byte key",
                record.len(),
                nbytes,
                keylen
            );
        }

        let stored = &record[keylen..nbytes];
        if self.key.is_compressed() {
            let declared = inflated_len(stored)?;
            if objlen > declared {
                arbor_bail!(
                    InvalidSerde: "basket declares {} bytes, its blocks inflate to {}",
                    objlen,
                    declared
                );
            }
            self.payload.clear();
            self.payload.resize(objlen, 0);
            decompress(stored, &mut self.payload).context(|| {
                format!("decompressing basket {} at {}", self.key.name, self.key.seek_key)
            })?;
        } else if stored.len() == objlen {
            self.payload.clear();
            self.payload.extend_from_slice(stored);
        } else {
            arbor_bail!(
                InvalidSerde: "uncompressed basket holds {} bytes, expected {}",
                stored.len(),
                objlen
            );
        }

        if entry_offset_len > 0 {
            self.read_offset_table()?;
        }
        Ok(())
    }

    fn read_offset_table(&mut self) -> ArborResult<()> {
        let last = u64::try_from(self.header.last)
            .map_err(|_| arbor_err!(InvalidSerde: "negative last byte {}", self.header.last))?;
        let mut r = RBuffer::new(&self.payload, self.keylen());
        r.set_pos(last)?;
        let n = r.read_i32()?;
        let n = usize::try_from(n)
            .map_err(|_| arbor_err!(InvalidSerde: "negative offset count {}", n))?;
        self.offsets.resize(n, 0);
        r.read_into(&mut self.offsets)
    }

    /// Decode a basket embedded in branch metadata, whose class tag was already read.
    pub(crate) fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let mut basket = Self::default();
        let Some(raw) = basket.unmarshal_fields(r)? else {
            return Ok(basket);
        };
        let keylen = usize::try_from(basket.key.keylen).unwrap_or(0);
        if raw.len() < keylen {
            arbor_bail!(
                InvalidSerde: "resident basket of {} bytes is shorter than its key",
                raw.len()
            );
        }
        basket.payload = raw[keylen..].to_vec();
        Ok(basket)
    }

    /// Decode the key and header, returning the embedded buffer if the basket carries one.
    fn unmarshal_fields<'a>(&mut self, r: &mut RBuffer<'a>) -> ArborResult<Option<&'a [u8]>> {
        self.key = Key::unmarshal(r)?;
        if self.key.class != BASKET_CLASS {
            arbor_bail!(InvalidSerde: "key of class {} is not a basket", self.key.class);
        }

        let version = r.read_i16()?;
        if version > BASKET_VERSION {
            arbor_bail!(
                InvalidSerde: "unknown basket version {} > {}",
                version,
                BASKET_VERSION
            );
        }
        let bufsize = r.read_i32()?;
        let mut nevsize = r.read_i32()?;
        let mut iobits = IoFeatures::default();
        if nevsize < 0 {
            nevsize = -nevsize;
            iobits = IoFeatures::unmarshal(r)?;
        }
        let nevbuf = r.read_i32()?;
        let last = r.read_i32()?;
        let mut flag = r.read_u8()?;
        self.header = BasketHeader {
            version,
            bufsize: bufsize.max(last),
            nevsize,
            nevbuf,
            last,
            iobits,
        };

        let generated = flag >= 80;
        if generated {
            flag -= 80;
        }

        self.offsets.clear();
        self.displ.clear();
        if !generated && flag != 0 && flag % 10 != 2 {
            if nevbuf > 0 {
                self.offsets = r.read_static_array()?;
                if 20 < flag && flag < 40 {
                    for v in self.offsets.iter_mut() {
                        *v = (*v as u32 & !DISPLACEMENT_MASK) as i32;
                    }
                }
            }
            if flag > 40 {
                self.displ = r.read_static_array()?;
            }
        } else if generated && flag <= 40 {
            arbor_bail!(InvalidSerde: "invalid basket state: generated offsets with flag {}", flag);
        }

        if flag == 1 || flag > 10 {
            let size = if version <= 1 { r.read_i32()? } else { last };
            let size = usize::try_from(size)
                .map_err(|_| arbor_err!(InvalidSerde: "negative basket buffer size {}", size))?;
            return Ok(Some(r.read_bytes(size)?));
        }
        Ok(None)
    }

    /// Encode the basket as embedded in branch metadata, together with its buffer.
    pub(crate) fn marshal_resident(&self, w: &mut WBuffer) -> ArborResult<()> {
        self.key.marshal(w)?;
        w.write_i16(BASKET_VERSION);
        w.write_i32(self.header.bufsize);
        if self.header.iobits != IoFeatures::default() {
            w.write_i32(-self.header.nevsize);
            self.header.iobits.marshal(w)?;
        } else {
            w.write_i32(self.header.nevsize);
        }
        w.write_i32(self.header.nevbuf);
        w.write_i32(self.header.last);

        let with_offsets = !self.offsets.is_empty() && self.header.nevbuf > 0;
        let flag = if with_offsets { 1 } else { 2 } + 10;
        w.write_u8(flag);
        if with_offsets {
            let n = self.entries().min(self.offsets.len());
            w.write_static_array(&self.offsets[..n])?;
        }

        let keylen = usize::try_from(self.key.keylen).unwrap_or(0);
        let last = usize::try_from(self.header.last).unwrap_or(0);
        let used = last.saturating_sub(keylen).min(self.payload.len());
        w.write_bytes(&vec![0; keylen]);
        w.write_bytes(&self.payload[..used]);
        Ok(())
    }
}

/// Accumulates the entries of one branch until they are flushed as a basket record.
#[derive(Debug)]
pub struct BasketBuilder {
    key: Key,
    wbuf: WBuffer,
    offsets: Vec<i32>,
    nevbuf: i32,
    nevsize: i32,
    variable: bool,
}

impl BasketBuilder {
    /// Start a basket for the branch `name` of the tree `title`.
    ///
    /// Variable-length baskets record the start of every entry in an offset table sized
    /// `entry_offset_len`; fixed-size baskets derive their entry size from the first entry.
    pub fn new(name: &str, title: &str, big: bool, entry_offset_len: i32, capacity: usize) -> Self {
        let mut key = Key::new(BASKET_CLASS, name, title, big);
        key.keylen = i16::try_from(key.encoded_len() + BASKET_HEADER_LEN).unwrap_or(i16::MAX);
        let offset = u64::try_from(key.keylen).unwrap_or(0);
        Self {
            key,
            wbuf: WBuffer::with_capacity(offset, capacity),
            offsets: Vec::new(),
            nevbuf: 0,
            nevsize: entry_offset_len.max(0),
            variable: entry_offset_len > 0,
        }
    }

    /// Length of the key and basket header in front of the payload.
    pub fn keylen(&self) -> i16 {
        self.key.keylen
    }

    /// Number of buffered entries.
    pub fn entries(&self) -> i32 {
        self.nevbuf
    }

    /// Whether no entry is buffered.
    pub fn is_empty(&self) -> bool {
        self.nevbuf == 0
    }

    /// Number of buffered payload bytes.
    pub fn len(&self) -> usize {
        self.wbuf.len()
    }

    /// Append one entry produced by `encode`, returning its size in bytes.
    ///
    /// Nothing is buffered when encoding fails or the entry does not fit the basket.
    pub fn append<F>(&mut self, encode: F) -> ArborResult<usize>
    where
        F: FnOnce(&mut WBuffer) -> ArborResult<()>,
    {
        let mut entry = WBuffer::new(0);
        encode(&mut entry)?;
        self.push(entry.as_slice())
    }

    /// Check that an entry of `size` bytes can be appended.
    pub fn check(&self, size: usize) -> ArborResult<()> {
        let end = u64::try_from(size)
            .ok()
            .and_then(|n| self.wbuf.pos().checked_add(n));
        if end.and_then(|e| i32::try_from(e).ok()).is_none() {
            arbor_bail!(
                InvalidArgument: "basket at {} too large for an entry of {} bytes",
                self.wbuf.pos(),
                size
            );
        }
        if !self.variable && self.nevbuf > 0 && i32::try_from(size).ok() != Some(self.nevsize) {
            arbor_bail!(
                InvalidArgument: "fixed-size entry of {} bytes after entries of {} bytes",
                size,
                self.nevsize
            );
        }
        Ok(())
    }

    /// Append one encoded entry, returning its size in bytes.
    pub fn push(&mut self, entry: &[u8]) -> ArborResult<usize> {
        self.check(entry.len())?;
        let start = i32::try_from(self.wbuf.pos())
            .map_err(|_| arbor_err!(InvalidArgument: "basket too large at {}", self.wbuf.pos()))?;
        if self.variable {
            self.offsets.push(start);
        } else if self.nevbuf == 0 {
            self.nevsize = i32::try_from(entry.len())
                .map_err(|_| arbor_err!(InvalidArgument: "entry of {} bytes too large", entry.len()))?;
        }
        self.wbuf.write_bytes(entry);
        self.nevbuf += 1;
        Ok(entry.len())
    }

    /// Encode the buffered entries as a basket record located at `seek`.
    ///
    /// The entries stay buffered until [`reset`](Self::reset), so a record that could not be
    /// stored can be encoded again.
    pub fn finish(&self, compression: Compression, seek: u64, bufsize: i32) -> ArborResult<Vec<u8>> {
        let last = i32::try_from(self.wbuf.pos())
            .map_err(|_| arbor_err!(InvalidArgument: "basket too large: {}", self.wbuf.pos()))?;
        let mut payload = self.wbuf.as_slice().to_vec();
        if self.variable {
            let mut offsets = Vec::with_capacity(self.offsets.len() + 1);
            offsets.extend_from_slice(&self.offsets);
            offsets.push(last);
            let mut table = WBuffer::with_capacity(0, 4 * (offsets.len() + 1));
            table.write_static_array(&offsets)?;
            payload.extend_from_slice(table.as_slice());
        }

        let compressed = compress(compression, &payload)?;
        let stored = compressed.as_deref().unwrap_or(&payload);

        let keylen = usize::try_from(self.key.keylen).unwrap_or(0);
        let mut key = self.key.clone();
        key.objlen = i32::try_from(payload.len())
            .map_err(|_| arbor_err!(InvalidArgument: "payload too large: {}", payload.len()))?;
        key.nbytes = i32::try_from(keylen + stored.len())
            .map_err(|_| arbor_err!(InvalidArgument: "record too large: {}", stored.len()))?;
        key.seek_key = i64::try_from(seek)
            .map_err(|_| arbor_err!(InvalidArgument: "seek {} too large", seek))?;
        key.datime = Datime::now();

        let mut w = WBuffer::with_capacity(0, keylen + stored.len());
        key.marshal(&mut w)?;
        w.write_i16(BASKET_VERSION);
        w.write_i32(bufsize.max(last));
        w.write_i32(self.nevsize);
        w.write_i32(self.nevbuf);
        w.write_i32(last);
        w.write_u8(0);
        if w.len() != keylen {
            arbor_bail!(
                AssertionFailed: "basket header of {} bytes, expected {}",
                w.len(),
                keylen
            );
        }
        w.write_bytes(stored);
        Ok(w.into_vec())
    }

    /// Drop the buffered entries once their record is stored.
    pub fn reset(&mut self) {
        self.wbuf.clear();
        self.offsets.clear();
        self.nevbuf = 0;
    }

    /// Turn the buffered entries into a basket kept in memory by its branch.
    pub fn to_resident(&self, bufsize: i32) -> ArborResult<Basket> {
        let last = i32::try_from(self.wbuf.pos())
            .map_err(|_| arbor_err!(InvalidArgument: "basket too large: {}", self.wbuf.pos()))?;
        let mut key = self.key.clone();
        key.objlen = i32::try_from(self.wbuf.len()).unwrap_or(i32::MAX);
        key.nbytes = 0;
        Ok(Basket {
            key,
            header: BasketHeader {
                version: BASKET_VERSION,
                bufsize: bufsize.max(last),
                nevsize: self.nevsize,
                nevbuf: self.nevbuf,
                last,
                iobits: IoFeatures::default(),
            },
            offsets: self.offsets.clone(),
            displ: Vec::new(),
            payload: self.wbuf.as_slice().to_vec(),
        })
    }
}
