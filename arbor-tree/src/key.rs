use std::fmt::{Display, Formatter};

use arbor_buffer::{RBuffer, WBuffer};
use arbor_error::{ArborResult, arbor_bail, arbor_err};
use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;

/// Version of the keys written by this crate.
pub const KEY_VERSION: i16 = 4;

/// Added to the key version when seek pointers are 64 bits wide.
pub const BIG_KEY_OFFSET: i16 = 1000;

const KEY_FIXED_LEN: usize = 4 + 2 + 4 + 4 + 2 + 2 + 4 + 4;

/// A packed UTC timestamp with a one second resolution, counting years from 1995.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Datime(pub u32);

impl Datime {
    /// The current time.
    pub fn now() -> Self {
        Self::from_timestamp(Timestamp::now())
    }

    /// Pack `ts`. Dates before 1995 are clamped to its first second.
    pub fn from_timestamp(ts: Timestamp) -> Self {
        let dt = ts.to_zoned(TimeZone::UTC).datetime();
        let year = u32::try_from(i32::from(dt.year()) - 1995).unwrap_or(0);
        let field = |v: i8| u32::try_from(v).unwrap_or(0);
        Self(
            (year << 26)
                | (field(dt.month()) << 22)
                | (field(dt.day()) << 17)
                | (field(dt.hour()) << 12)
                | (field(dt.minute()) << 6)
                | field(dt.second()),
        )
    }

    /// Unpack into a civil UTC date and time.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_datetime(&self) -> ArborResult<DateTime> {
        let v = self.0;
        let year = (v >> 26) as i16 + 1995;
        let month = ((v >> 22) & 0xf) as i8;
        let day = ((v >> 17) & 0x1f) as i8;
        let hour = ((v >> 12) & 0x1f) as i8;
        let minute = ((v >> 6) & 0x3f) as i8;
        let second = (v & 0x3f) as i8;
        DateTime::new(year, month, day, hour, minute, second, 0)
            .map_err(|e| arbor_err!(InvalidSerde: "invalid packed date {:#x}: {}", v, e))
    }
}

impl Display for Datime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Ok(dt) => write!(f, "{dt}"),
            Err(_) => write!(f, "{:#x}", self.0),
        }
    }
}

/// The header in front of every persisted record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Key {
    /// Number of bytes of the record on disk, header included.
    pub nbytes: i32,
    /// Key version. Versions above [`BIG_KEY_OFFSET`] carry 64-bit seek pointers.
    pub version: i16,
    /// Length of the uncompressed payload.
    pub objlen: i32,
    /// Creation time.
    pub datime: Datime,
    /// Length of the header, which is also the logical position of the first payload byte.
    pub keylen: i16,
    /// Cycle number.
    pub cycle: i16,
    /// Position of the record.
    pub seek_key: i64,
    /// Position of the directory holding the record.
    pub seek_pdir: i64,
    /// Class of the stored object.
    pub class: String,
    /// Name of the stored object.
    pub name: String,
    /// Title of the stored object.
    pub title: String,
}

fn string_len(s: &str) -> usize {
    if s.len() < 255 { 1 + s.len() } else { 5 + s.len() }
}

impl Key {
    /// Create a key for an object of `class`, sized for the given strings.
    pub fn new(class: &str, name: &str, title: &str, big: bool) -> Self {
        let mut key = Self {
            version: if big {
                KEY_VERSION + BIG_KEY_OFFSET
            } else {
                KEY_VERSION
            },
            datime: Datime::now(),
            cycle: 1,
            class: class.to_string(),
            name: name.to_string(),
            title: title.to_string(),
            ..Self::default()
        };
        key.keylen = i16::try_from(key.encoded_len()).unwrap_or(i16::MAX);
        key
    }

    /// Whether seek pointers are stored on 64 bits.
    pub fn is_big(&self) -> bool {
        self.version > BIG_KEY_OFFSET
    }

    /// Number of bytes taken by this key when encoded.
    pub fn encoded_len(&self) -> usize {
        let seeks = if self.is_big() { 8 } else { 0 };
        KEY_FIXED_LEN
            + seeks
            + string_len(&self.class)
            + string_len(&self.name)
            + string_len(&self.title)
    }

    /// Whether the payload is stored compressed.
    pub fn is_compressed(&self) -> bool {
        self.objlen != self.nbytes - i32::from(self.keylen)
    }

    /// Decode a key.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let nbytes = r.read_i32()?;
        if nbytes < 0 {
            arbor_bail!(InvalidSerde: "negative key length {} at {}", nbytes, r.pos());
        }
        let version = r.read_i16()?;
        let objlen = r.read_i32()?;
        let datime = Datime(r.read_u32()?);
        let keylen = r.read_i16()?;
        let cycle = r.read_i16()?;
        let (seek_key, seek_pdir) = if version > BIG_KEY_OFFSET {
            (r.read_i64()?, r.read_i64()?)
        } else {
            (i64::from(r.read_i32()?), i64::from(r.read_i32()?))
        };
        Ok(Self {
            nbytes,
            version,
            objlen,
            datime,
            keylen,
            cycle,
            seek_key,
            seek_pdir,
            class: r.read_string()?,
            name: r.read_string()?,
            title: r.read_string()?,
        })
    }

    /// Encode the key.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        w.write_i32(self.nbytes);
        w.write_i16(self.version);
        w.write_i32(self.objlen);
        w.write_u32(self.datime.0);
        w.write_i16(self.keylen);
        w.write_i16(self.cycle);
        if self.is_big() {
            w.write_i64(self.seek_key);
            w.write_i64(self.seek_pdir);
        } else {
            let small = |v: i64| {
                i32::try_from(v).map_err(|_| {
                    arbor_err!(InvalidArgument: "seek {} does not fit a small key, use 64-bit seeks", v)
                })
            };
            w.write_i32(small(self.seek_key)?);
            w.write_i32(small(self.seek_pdir)?);
        }
        w.write_string(&self.class);
        w.write_string(&self.name);
        w.write_string(&self.title);
        Ok(())
    }
}
