//! Narrow floating point encodings.
//!
//! `Float16` and `Double32` columns hold ordinary `f32`/`f64` values in memory but are stored
//! either quantised over a fixed range or with a truncated mantissa.

use arbor_error::ArborResult;

use crate::{RBuffer, WBuffer};

/// Mantissa bits kept by a `Float16` without an explicit precision.
pub const DEFAULT_FLOAT16_BITS: u32 = 12;

/// How a narrow float is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatEncoding {
    /// A plain `f32`.
    Full,
    /// An 8-bit exponent followed by a 16-bit word holding `nbits` of mantissa and the sign.
    Truncated {
        /// Mantissa bits kept.
        nbits: u32,
    },
    /// A `u32` quantised over `[xmin, xmax]`.
    Ranged {
        /// Lower bound of the range.
        xmin: f64,
        /// Upper bound of the range.
        xmax: f64,
        /// Scale applied to `x - xmin` before rounding.
        factor: f64,
    },
}

impl FloatEncoding {
    /// Default encoding of a `Float16` value.
    pub const FLOAT16: Self = Self::Truncated {
        nbits: DEFAULT_FLOAT16_BITS,
    };

    /// Default encoding of a `Double32` value.
    pub const DOUBLE32: Self = Self::Full;

    /// Derive the encoding from a `[xmin, xmax]` or `[xmin, xmax, nbits]` range annotation at the
    /// end of `title`. `half` selects `Float16` semantics (truncated by default) over `Double32`
    /// semantics (full `f32` by default).
    pub fn from_title(title: &str, half: bool) -> Self {
        let fallback = if half { Self::FLOAT16 } else { Self::DOUBLE32 };
        let Some(range) = parse_range(title) else {
            return fallback;
        };

        let nbits = match range.nbits {
            Some(n) if (2..=32).contains(&n) => n,
            _ => 32,
        };

        if range.xmin < range.xmax {
            let bigint = if nbits < 32 {
                f64::from(1u32 << nbits)
            } else {
                f64::from(u32::MAX)
            };
            return Self::Ranged {
                xmin: range.xmin,
                xmax: range.xmax,
                factor: bigint / (range.xmax - range.xmin),
            };
        }

        if nbits < 15 {
            Self::Truncated { nbits }
        } else {
            fallback
        }
    }
}

struct RangeSpec {
    xmin: f64,
    xmax: f64,
    nbits: Option<u32>,
}

fn parse_range(title: &str) -> Option<RangeSpec> {
    let open = title.rfind('[')?;
    let close = title[open..].find(']')? + open;
    let mut parts = title[open + 1..close].split(',').map(str::trim);
    let xmin = parse_bound(parts.next()?)?;
    let xmax = parse_bound(parts.next()?)?;
    let nbits = match parts.next() {
        Some(n) => Some(n.parse().ok()?),
        None => None,
    };
    Some(RangeSpec { xmin, xmax, nbits })
}

fn parse_bound(s: &str) -> Option<f64> {
    let lower = s.to_ascii_lowercase();
    let (sign, body) = match lower.strip_prefix('-') {
        Some(rest) => (-1.0, rest.to_string()),
        None => (1.0, lower),
    };
    let value = match body.as_str() {
        "pi" => std::f64::consts::PI,
        "2pi" | "2*pi" | "twopi" => std::f64::consts::TAU,
        "pi/2" => std::f64::consts::FRAC_PI_2,
        "pi/4" => std::f64::consts::FRAC_PI_4,
        other => other.parse().ok()?,
    };
    Some(sign * value)
}

fn truncate(v: f32, nbits: u32) -> (u8, u16) {
    let bits = v.to_bits();
    let exp = ((bits >> 23) & 0xff) as u8;
    let mask = (1u32 << (nbits + 1)) - 1;
    let mut man = (bits >> (23 - nbits - 1)) & mask;
    man += 1;
    man >>= 1;
    if man & (1 << nbits) != 0 {
        man = (1 << nbits) - 1;
    }
    if v < 0.0 {
        man |= 1 << (nbits + 1);
    }
    (exp, man as u16)
}

fn untruncate(exp: u8, man: u16, nbits: u32) -> f32 {
    let man = u32::from(man);
    let mask = (1u32 << (nbits + 1)) - 1;
    let bits = (u32::from(exp) << 23) | ((man & mask) << (23 - nbits));
    let v = f32::from_bits(bits);
    if man & (1 << (nbits + 1)) != 0 { -v } else { v }
}

fn quantise(x: f64, xmin: f64, xmax: f64, factor: f64) -> u32 {
    let x = x.clamp(xmin, xmax);
    #[allow(clippy::cast_possible_truncation)]
    let q = (0.5 + factor * (x - xmin)) as u32;
    q
}

impl WBuffer {
    /// Write a `Float16` value.
    pub fn write_f16(&mut self, v: f32, enc: &FloatEncoding) {
        match *enc {
            FloatEncoding::Ranged { xmin, xmax, factor } => {
                self.write_u32(quantise(f64::from(v), xmin, xmax, factor))
            }
            FloatEncoding::Truncated { nbits } => {
                let (exp, man) = truncate(v, nbits);
                self.write_u8(exp);
                self.write_u16(man);
            }
            FloatEncoding::Full => {
                let (exp, man) = truncate(v, DEFAULT_FLOAT16_BITS);
                self.write_u8(exp);
                self.write_u16(man);
            }
        }
    }

    /// Write a `Double32` value.
    pub fn write_d32(&mut self, v: f64, enc: &FloatEncoding) {
        match *enc {
            FloatEncoding::Ranged { xmin, xmax, factor } => {
                self.write_u32(quantise(v, xmin, xmax, factor))
            }
            #[allow(clippy::cast_possible_truncation)]
            FloatEncoding::Truncated { nbits } => {
                let (exp, man) = truncate(v as f32, nbits);
                self.write_u8(exp);
                self.write_u16(man);
            }
            #[allow(clippy::cast_possible_truncation)]
            FloatEncoding::Full => self.write_f32(v as f32),
        }
    }
}

impl RBuffer<'_> {
    /// Read a `Float16` value.
    pub fn read_f16(&mut self, enc: &FloatEncoding) -> ArborResult<f32> {
        Ok(match *enc {
            #[allow(clippy::cast_possible_truncation)]
            FloatEncoding::Ranged { xmin, factor, .. } => {
                (f64::from(self.read_u32()?) / factor + xmin) as f32
            }
            FloatEncoding::Truncated { nbits } => {
                let exp = self.read_u8()?;
                let man = self.read_u16()?;
                untruncate(exp, man, nbits)
            }
            FloatEncoding::Full => {
                let exp = self.read_u8()?;
                let man = self.read_u16()?;
                untruncate(exp, man, DEFAULT_FLOAT16_BITS)
            }
        })
    }

    /// Read a `Double32` value.
    pub fn read_d32(&mut self, enc: &FloatEncoding) -> ArborResult<f64> {
        Ok(match *enc {
            FloatEncoding::Ranged { xmin, factor, .. } => f64::from(self.read_u32()?) / factor + xmin,
            FloatEncoding::Truncated { nbits } => {
                let exp = self.read_u8()?;
                let man = self.read_u16()?;
                f64::from(untruncate(exp, man, nbits))
            }
            FloatEncoding::Full => f64::from(self.read_f32()?),
        })
    }
}
