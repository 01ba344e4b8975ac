//! Drawing attributes carried by trees and branches.
//!
//! They play no part in storage but must survive a decode/encode cycle.

use arbor_buffer::{RBuffer, VersionHeader, WBuffer};
use arbor_error::{ArborResult, arbor_bail};

const ATT_VERSION: i16 = 2;

fn open(r: &mut RBuffer<'_>, class: &str) -> ArborResult<VersionHeader> {
    let hdr = r.read_version()?;
    if hdr.version > ATT_VERSION {
        arbor_bail!(InvalidSerde: "{}: unsupported version {}", class, hdr.version);
    }
    Ok(hdr)
}

/// Line attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttLine {
    /// Line color.
    pub color: i16,
    /// Line style.
    pub style: i16,
    /// Line width.
    pub width: i16,
}

impl Default for AttLine {
    fn default() -> Self {
        Self {
            color: 602,
            style: 1,
            width: 1,
        }
    }
}

impl AttLine {
    /// Decode line attributes.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = open(r, "TAttLine")?;
        let att = Self {
            color: r.read_i16()?,
            style: r.read_i16()?,
            width: r.read_i16()?,
        };
        r.check_byte_count(&hdr, "TAttLine")?;
        Ok(att)
    }

    /// Encode line attributes.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        let beg = w.write_version(ATT_VERSION);
        w.write_i16(self.color);
        w.write_i16(self.style);
        w.write_i16(self.width);
        w.set_byte_count(beg)
    }
}

/// Fill attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttFill {
    /// Fill color.
    pub color: i16,
    /// Fill style.
    pub style: i16,
}

impl Default for AttFill {
    fn default() -> Self {
        Self {
            color: 0,
            style: 1001,
        }
    }
}

impl AttFill {
    /// Decode fill attributes.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = open(r, "TAttFill")?;
        let att = Self {
            color: r.read_i16()?,
            style: r.read_i16()?,
        };
        r.check_byte_count(&hdr, "TAttFill")?;
        Ok(att)
    }

    /// Encode fill attributes.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        let beg = w.write_version(ATT_VERSION);
        w.write_i16(self.color);
        w.write_i16(self.style);
        w.set_byte_count(beg)
    }
}

/// Marker attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttMarker {
    /// Marker color.
    pub color: i16,
    /// Marker style.
    pub style: i16,
    /// Marker size.
    pub size: f32,
}

impl Default for AttMarker {
    fn default() -> Self {
        Self {
            color: 1,
            style: 1,
            size: 1.0,
        }
    }
}

impl AttMarker {
    /// Decode marker attributes.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = open(r, "TAttMarker")?;
        let att = Self {
            color: r.read_i16()?,
            style: r.read_i16()?,
            size: r.read_f32()?,
        };
        r.check_byte_count(&hdr, "TAttMarker")?;
        Ok(att)
    }

    /// Encode marker attributes.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        let beg = w.write_version(ATT_VERSION);
        w.write_i16(self.color);
        w.write_i16(self.style);
        w.write_f32(self.size);
        w.set_byte_count(beg)
    }
}
