#![deny(missing_docs)]

//! Compression of basket payloads.
//!
//! Payloads are cut into blocks of at most [`MAX_BLOCK_SIZE`] bytes. Each block starts with a
//! [`HEADER_SIZE`]-byte header naming the codec and both sizes, followed by the codec output.
//! The codecs themselves are used as opaque byte transforms.

use std::fmt::{Display, Formatter};
use std::io::{Read, Write};

use arbor_error::{ArborResult, arbor_bail, arbor_err};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Size of a block header.
pub const HEADER_SIZE: usize = 9;
/// Largest number of uncompressed bytes held by a single block.
pub const MAX_BLOCK_SIZE: usize = 0xff_ffff;
/// Payloads shorter than this are always stored raw.
pub const MIN_COMPRESSED_SIZE: usize = 512;
/// Size of the checksum preceding every LZ4 block.
pub const LZ4_CHECKSUM_SIZE: usize = 8;

/// A compression algorithm, as encoded in the hundreds of a compression setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Algorithm {
    /// Use the default algorithm of the enclosing container.
    Inherit = 0,
    /// zlib.
    Zlib = 1,
    /// LZMA.
    Lzma = 2,
    /// The legacy in-house deflate variant.
    OldCompression = 3,
    /// LZ4.
    Lz4 = 4,
    /// Zstandard.
    Zstd = 5,
}

impl Algorithm {
    fn magic(self) -> [u8; 3] {
        match self {
            Algorithm::Inherit | Algorithm::Zlib => [b'Z', b'L', 8],
            Algorithm::Lzma => [b'X', b'Z', 0],
            Algorithm::OldCompression => [b'C', b'S', 8],
            Algorithm::Lz4 => [b'L', b'4', 1],
            Algorithm::Zstd => [b'Z', b'S', 1],
        }
    }

    fn from_magic(magic: [u8; 2]) -> ArborResult<Self> {
        Ok(match &magic {
            b"ZL" => Algorithm::Zlib,
            b"XZ" => Algorithm::Lzma,
            b"CS" => Algorithm::OldCompression,
            b"L4" => Algorithm::Lz4,
            b"ZS" => Algorithm::Zstd,
            _ => arbor_bail!(
                InvalidSerde: "unknown compression block magic {:02x}{:02x}",
                magic[0],
                magic[1]
            ),
        })
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Algorithm::Inherit => "inherit",
            Algorithm::Zlib => "zlib",
            Algorithm::Lzma => "lzma",
            Algorithm::OldCompression => "old-compression",
            Algorithm::Lz4 => "lz4",
            Algorithm::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// A compression setting: an algorithm and a level in `0..=99`.
///
/// Persisted as the integer `algorithm * 100 + level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Compression {
    algorithm: Algorithm,
    level: u8,
}

impl Default for Compression {
    fn default() -> Self {
        Self::ZLIB_DEFAULT
    }
}

impl Compression {
    /// No compression.
    pub const NONE: Self = Self {
        algorithm: Algorithm::Inherit,
        level: 0,
    };

    /// zlib at level 1.
    pub const ZLIB_DEFAULT: Self = Self {
        algorithm: Algorithm::Zlib,
        level: 1,
    };

    /// Create a setting for `algorithm` at `level`.
    pub fn new(algorithm: Algorithm, level: u8) -> ArborResult<Self> {
        if level > 99 {
            arbor_bail!(InvalidArgument: "compression level {} out of range", level);
        }
        Ok(Self { algorithm, level })
    }

    /// Decode a persisted setting. Negative settings mean "no compression".
    pub fn from_settings(settings: i32) -> ArborResult<Self> {
        let Ok(settings) = u32::try_from(settings) else {
            return Ok(Self::NONE);
        };
        let algorithm = u8::try_from(settings / 100)
            .ok()
            .and_then(|a| Algorithm::try_from(a).ok())
            .ok_or_else(|| arbor_err!(InvalidSerde: "unknown compression setting {}", settings))?;
        #[allow(clippy::cast_possible_truncation)]
        let level = (settings % 100) as u8;
        Ok(Self { algorithm, level })
    }

    /// The persisted form of this setting.
    pub fn settings(&self) -> i32 {
        i32::from(u8::from(self.algorithm)) * 100 + i32::from(self.level)
    }

    /// The algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Whether this setting stores payloads raw.
    pub fn is_none(&self) -> bool {
        self.level == 0
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.level)
    }
}

/// Compress `src` into framed blocks.
///
/// Returns `None` when the payload should be stored raw: compression is disabled, the payload is
/// too short, or the framed output would not be smaller than the input.
pub fn compress(settings: Compression, src: &[u8]) -> ArborResult<Option<Vec<u8>>> {
    if settings.is_none() || src.len() < MIN_COMPRESSED_SIZE {
        return Ok(None);
    }

    let mut out = Vec::with_capacity(src.len());
    for block in src.chunks(MAX_BLOCK_SIZE) {
        let payload = encode_block(settings, block)?;
        if payload.len() + HEADER_SIZE >= block.len() {
            log::trace!(
                "{} block of {} bytes does not shrink, storing raw",
                settings,
                block.len()
            );
            return Ok(None);
        }
        out.extend_from_slice(&settings.algorithm.magic());
        out.extend_from_slice(&size_bytes(payload.len())?);
        out.extend_from_slice(&size_bytes(block.len())?);
        out.extend_from_slice(&payload);
    }

    if out.len() >= src.len() {
        return Ok(None);
    }
    Ok(Some(out))
}

fn encode_block(settings: Compression, block: &[u8]) -> ArborResult<Vec<u8>> {
    match settings.algorithm {
        Algorithm::Inherit | Algorithm::Zlib => {
            let level = u32::from(settings.level.min(9));
            let mut enc = flate2::write::ZlibEncoder::new(
                Vec::with_capacity(block.len()),
                flate2::Compression::new(level),
            );
            enc.write_all(block)?;
            Ok(enc.finish()?)
        }
        Algorithm::Zstd => Ok(zstd::bulk::compress(block, i32::from(settings.level))?),
        Algorithm::Lz4 | Algorithm::Lzma | Algorithm::OldCompression => {
            Err(arbor_err!(NotImplemented: "compress", settings.algorithm))
        }
    }
}

fn size_bytes(n: usize) -> ArborResult<[u8; 3]> {
    if n > MAX_BLOCK_SIZE {
        arbor_bail!(InvalidArgument: "block size {} exceeds {}", n, MAX_BLOCK_SIZE);
    }
    let le = u32::try_from(n)
        .map_err(|_| arbor_err!(InvalidArgument: "block size {} too large", n))?
        .to_le_bytes();
    Ok([le[0], le[1], le[2]])
}

fn read_size(raw: &[u8]) -> usize {
    usize::from(raw[0]) | (usize::from(raw[1]) << 8) | (usize::from(raw[2]) << 16)
}

/// Total size the framed blocks of `src` declare once decompressed.
///
/// Only block headers are read, so the size can be checked before allocating the destination.
pub fn inflated_len(src: &[u8]) -> ArborResult<usize> {
    let mut input = src;
    let mut total = 0usize;
    while !input.is_empty() {
        if input.len() < HEADER_SIZE {
            arbor_bail!(
                InvalidSerde: "truncated compression block header at {}",
                src.len() - input.len()
            );
        }
        Algorithm::from_magic([input[0], input[1]])?;
        let end = HEADER_SIZE + read_size(&input[3..6]);
        total += read_size(&input[6..9]);
        input = input.get(end..).unwrap_or_default();
    }
    Ok(total)
}

/// Decompress framed blocks from `src` until `dst` is full.
pub fn decompress(src: &[u8], dst: &mut [u8]) -> ArborResult<()> {
    let mut input = src;
    let mut filled = 0;

    while filled < dst.len() {
        if input.len() < HEADER_SIZE {
            arbor_bail!(
                InvalidSerde: "truncated compression block header: {} of {} bytes decoded",
                filled,
                dst.len()
            );
        }
        let algorithm = Algorithm::from_magic([input[0], input[1]])?;
        let srcsz = read_size(&input[3..6]);
        let tgtsz = read_size(&input[6..9]);
        let end = HEADER_SIZE + srcsz;
        if input.len() < end {
            arbor_bail!(
                InvalidSerde: "truncated {} block: need {} bytes, have {}",
                algorithm,
                end,
                input.len()
            );
        }
        if filled + tgtsz > dst.len() {
            arbor_bail!(
                InvalidSerde: "{} block inflates past the expected {} bytes",
                algorithm,
                dst.len()
            );
        }

        let payload = &input[HEADER_SIZE..end];
        let out = &mut dst[filled..filled + tgtsz];
        decode_block(algorithm, payload, out).map_err(|e| {
            e.with_context(format!("{} block of {} bytes at {}", algorithm, srcsz, src.len() - input.len()))
        })?;

        filled += tgtsz;
        input = &input[end..];
    }
    Ok(())
}

fn decode_block(algorithm: Algorithm, payload: &[u8], out: &mut [u8]) -> ArborResult<()> {
    match algorithm {
        Algorithm::Inherit | Algorithm::Zlib => {
            flate2::read::ZlibDecoder::new(payload).read_exact(out)?;
        }
        Algorithm::Zstd => {
            let inflated = zstd::bulk::decompress(payload, out.len())?;
            if inflated.len() != out.len() {
                arbor_bail!(
                    InvalidSerde: "zstd block inflated to {} bytes, expected {}",
                    inflated.len(),
                    out.len()
                );
            }
            out.copy_from_slice(&inflated);
        }
        Algorithm::Lz4 => {
            if payload.len() < LZ4_CHECKSUM_SIZE {
                arbor_bail!(InvalidSerde: "lz4 block shorter than its checksum");
            }
            let n = lz4_flex::block::decompress_into(&payload[LZ4_CHECKSUM_SIZE..], out)
                .map_err(|e| arbor_err!(InvalidSerde: "lz4: {}", e))?;
            if n != out.len() {
                arbor_bail!(
                    InvalidSerde: "lz4 block inflated to {} bytes, expected {}",
                    n,
                    out.len()
                );
            }
        }
        Algorithm::Lzma | Algorithm::OldCompression => {
            arbor_bail!(NotImplemented: "decompress", algorithm);
        }
    }
    Ok(())
}
