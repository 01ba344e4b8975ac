#![deny(missing_docs)]

//! Big-endian record buffers for Arbor.
//!
//! Every persisted record (keys, baskets, branch and tree metadata) is written through a
//! [`WBuffer`] and decoded through an [`RBuffer`]. Both cursors report positions shifted by a
//! logical offset, which lets a decoded payload keep the positions it had when the record key
//! still preceded it on disk.
//!
//! # Versioned records
//!
//! Records open with a header made of a 4-byte byte count (tagged with [`BYTE_COUNT_MASK`]) and a
//! 2-byte class version. Writers reserve the count with [`WBuffer::write_version`] and patch it
//! with [`WBuffer::set_byte_count`]; readers verify it with [`RBuffer::check_byte_count`].

pub use float::*;
pub use primitive::*;
pub use rbuffer::*;
pub use wbuffer::*;

mod float;
mod primitive;
mod rbuffer;
mod wbuffer;

/// Flag set on a record byte count.
pub const BYTE_COUNT_MASK: u32 = 0x4000_0000;
/// Flag set on the high half of a byte count when read back as a version.
pub const BYTE_COUNT_VMASK: u16 = 0x4000;
/// Tag announcing that a class name follows inline.
pub const NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;
/// Flag set on a tag that refers to a previously written class.
pub const CLASS_MASK: u32 = 0x8000_0000;
/// Offset added to positions stored in the reference maps.
pub const MAP_OFFSET: u64 = 2;
/// Object bit marking an object allocated on the heap.
pub const IS_ON_HEAP: u32 = 0x0100_0000;
/// Object bit marking an object that is referenced through a process id.
pub const IS_REFERENCED: u32 = 1 << 4;
/// Longest class name accepted inline in an object reference.
pub const MAX_CLASS_NAME: usize = 80;

/// An opaque handle naming an object that can be referenced more than once in a record.
///
/// Writers hand out identities for the objects they serialize so that a second occurrence is
/// emitted as a back-reference; readers return the identity the decoder assigned to the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// The header of a versioned record as read back by [`RBuffer::read_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHeader {
    /// Class version.
    pub version: i16,
    /// Position of the header itself.
    pub pos: u64,
    /// Byte count of the record, excluding the count field. Zero when the record carries none.
    pub bcnt: u32,
}
