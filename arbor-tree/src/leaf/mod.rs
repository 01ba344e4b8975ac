//! Leaves: the typed facets of a branch.
//!
//! A leaf records the element type of a column, its fixed element count and, for
//! variable-length columns, the counting leaf whose current value gives the number of elements
//! of an entry.

pub use column::*;
pub use kind::*;

mod column;
mod kind;

use std::fmt::{Display, Formatter};

use arbor_buffer::{FloatEncoding, ObjectId, RBuffer, WBuffer};
use arbor_error::{ArborResult, arbor_bail, arbor_err};

use crate::arena::{Arena, BranchId, LeafId};
use crate::wire::Named;

const LEAF_VERSION: i16 = 2;
const LEAF_CLASS_VERSION: i16 = 1;

/// The persisted class of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafClass {
    /// Booleans.
    O,
    /// 8-bit integers.
    B,
    /// 16-bit integers.
    S,
    /// 32-bit integers.
    I,
    /// 64-bit integers.
    L,
    /// 64-bit `long` integers.
    G,
    /// 32-bit floats.
    F,
    /// 64-bit floats.
    D,
    /// Strings.
    C,
    /// Narrow 32-bit floats.
    F16,
    /// Narrow 64-bit floats.
    D32,
    /// A member of a streamed object.
    Element,
}

impl LeafClass {
    /// The class of a leaf holding values of `kind`.
    pub fn for_kind(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Bool => LeafClass::O,
            ElementKind::I8 | ElementKind::U8 => LeafClass::B,
            ElementKind::I16 | ElementKind::U16 => LeafClass::S,
            ElementKind::I32 | ElementKind::U32 => LeafClass::I,
            ElementKind::I64 | ElementKind::U64 => LeafClass::L,
            ElementKind::F32 => LeafClass::F,
            ElementKind::F64 => LeafClass::D,
            ElementKind::Float16 => LeafClass::F16,
            ElementKind::Double32 => LeafClass::D32,
            ElementKind::Str => LeafClass::C,
        }
    }

    /// The in-memory kind of the values, `None` for streamed members.
    pub fn kind(&self, unsigned: bool) -> Option<ElementKind> {
        let pick = |s, u| Some(if unsigned { u } else { s });
        match self {
            LeafClass::O => Some(ElementKind::Bool),
            LeafClass::B => pick(ElementKind::I8, ElementKind::U8),
            LeafClass::S => pick(ElementKind::I16, ElementKind::U16),
            LeafClass::I => pick(ElementKind::I32, ElementKind::U32),
            LeafClass::L | LeafClass::G => pick(ElementKind::I64, ElementKind::U64),
            LeafClass::F => Some(ElementKind::F32),
            LeafClass::D => Some(ElementKind::F64),
            LeafClass::C => Some(ElementKind::Str),
            LeafClass::F16 => Some(ElementKind::Float16),
            LeafClass::D32 => Some(ElementKind::Double32),
            LeafClass::Element => None,
        }
    }

    /// Size in bytes of one element in memory.
    pub fn etype(&self) -> i32 {
        match self {
            LeafClass::O | LeafClass::B | LeafClass::C => 1,
            LeafClass::S => 2,
            LeafClass::I | LeafClass::F | LeafClass::F16 => 4,
            LeafClass::L | LeafClass::G | LeafClass::D | LeafClass::D32 => 8,
            LeafClass::Element => 0,
        }
    }

    /// The one-letter type code used in branch titles.
    pub fn type_code(&self, unsigned: bool) -> char {
        let pick = |s, u| if unsigned { u } else { s };
        match self {
            LeafClass::O => 'O',
            LeafClass::B => pick('B', 'b'),
            LeafClass::S => pick('S', 's'),
            LeafClass::I => pick('I', 'i'),
            LeafClass::L => pick('L', 'l'),
            LeafClass::G => pick('G', 'g'),
            LeafClass::F => 'F',
            LeafClass::D => 'D',
            LeafClass::C => 'C',
            LeafClass::F16 => 'f',
            LeafClass::D32 => 'd',
            LeafClass::Element => '?',
        }
    }

    /// The zero extrema of this class.
    fn extrema(&self) -> Extrema {
        match self {
            LeafClass::O => Extrema::Bool(false, false),
            LeafClass::B => Extrema::I8(0, 0),
            LeafClass::S => Extrema::I16(0, 0),
            LeafClass::I | LeafClass::C => Extrema::I32(0, 0),
            LeafClass::L | LeafClass::G => Extrema::I64(0, 0),
            LeafClass::F | LeafClass::F16 => Extrema::F32(0.0, 0.0),
            LeafClass::D | LeafClass::D32 => Extrema::F64(0.0, 0.0),
            LeafClass::Element => Extrema::None,
        }
    }

    /// The persisted class name.
    pub fn name(&self) -> &'static str {
        crate::wire::Class::Leaf(*self).name()
    }
}

impl Display for LeafClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The smallest and largest values written to a leaf, typed as the leaf class stores them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extrema {
    /// Streamed members carry no extrema.
    None,
    /// Booleans.
    Bool(bool, bool),
    /// 8-bit integers.
    I8(i8, i8),
    /// 16-bit integers.
    I16(i16, i16),
    /// 32-bit integers, also the string lengths of string leaves.
    I32(i32, i32),
    /// 64-bit integers.
    I64(i64, i64),
    /// 32-bit floats.
    F32(f32, f32),
    /// 64-bit floats.
    F64(f64, f64),
}

impl Extrema {
    /// The maximum as a count bound, for integer extrema.
    pub fn max_as_count(&self, unsigned: bool) -> Option<i64> {
        Some(match *self {
            Extrema::I8(_, hi) if unsigned => i64::from(hi as u8),
            Extrema::I8(_, hi) => i64::from(hi),
            Extrema::I16(_, hi) if unsigned => i64::from(hi as u16),
            Extrema::I16(_, hi) => i64::from(hi),
            Extrema::I32(_, hi) if unsigned => i64::from(hi as u32),
            Extrema::I32(_, hi) => i64::from(hi),
            Extrema::I64(_, hi) => hi,
            _ => return None,
        })
    }
}

/// Identity and type of a streamed member leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberInfo {
    /// Serial number of the member in its class description.
    pub id: i32,
    /// Member type.
    pub ltype: i32,
}

/// One typed column facet of a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub(crate) class: LeafClass,
    pub(crate) named: Named,
    pub(crate) len: i32,
    pub(crate) etype: i32,
    pub(crate) offset: i32,
    pub(crate) has_range: bool,
    pub(crate) unsigned: bool,
    pub(crate) count: Option<LeafId>,
    pub(crate) extrema: Extrema,
    pub(crate) observed: bool,
    pub(crate) element: Option<MemberInfo>,
    pub(crate) branch: Option<BranchId>,
}

impl Leaf {
    /// Create a leaf holding `len` elements of `kind` per entry, or `len` times the value of
    /// `count` elements when a counting leaf is given.
    pub fn new(
        name: &str,
        kind: ElementKind,
        len: usize,
        count: Option<(LeafId, &str)>,
    ) -> ArborResult<Self> {
        let class = LeafClass::for_kind(kind);
        let title = match (count, len) {
            (Some((_, count)), _) => format!("{name}[{count}]"),
            (None, 1) => name.to_string(),
            (None, n) => format!("{name}[{n}]"),
        };
        let len = i32::try_from(len)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| arbor_err!(InvalidArgument: "invalid leaf length {} for {}", len, name))?;
        Ok(Self {
            class,
            named: Named::new(name, title),
            len,
            etype: class.etype(),
            offset: 0,
            has_range: false,
            unsigned: kind.is_unsigned(),
            count: count.map(|(id, _)| id),
            extrema: class.extrema(),
            observed: false,
            element: None,
            branch: None,
        })
    }

    /// Name of the leaf.
    pub fn name(&self) -> &str {
        &self.named.name
    }

    /// Title of the leaf, which spells its dimensions.
    pub fn title(&self) -> &str {
        &self.named.title
    }

    /// Persisted class.
    pub fn class(&self) -> LeafClass {
        self.class
    }

    /// In-memory kind of the values, `None` for streamed members.
    pub fn kind(&self) -> Option<ElementKind> {
        self.class.kind(self.unsigned)
    }

    /// Number of elements per entry, or per unit of the counting leaf.
    pub fn len(&self) -> usize {
        usize::try_from(self.len).unwrap_or(1)
    }

    /// Whether the leaf has no element, which never holds for a decoded leaf.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes of one element.
    pub fn etype(&self) -> i32 {
        self.etype
    }

    /// Byte offset of the leaf inside an entry of its branch.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Whether integer values are unsigned.
    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    /// Whether the leaf carries a range annotation.
    pub fn has_range(&self) -> bool {
        self.has_range
    }

    /// Counting leaf of a variable-length leaf.
    pub fn count(&self) -> Option<LeafId> {
        self.count
    }

    /// Branch owning the leaf.
    pub fn branch(&self) -> Option<BranchId> {
        self.branch
    }

    /// Smallest and largest values written.
    pub fn extrema(&self) -> Extrema {
        self.extrema
    }

    /// Member identity of a streamed member leaf.
    pub fn element(&self) -> Option<MemberInfo> {
        self.element
    }

    /// The largest count this leaf may provide to a variable-length leaf. Only meaningful when
    /// positive.
    pub fn imax(&self) -> i64 {
        self.extrema.max_as_count(self.unsigned).unwrap_or(0)
    }

    /// The encoding of narrow float values, from the range annotation of the title.
    pub fn float_encoding(&self) -> Option<FloatEncoding> {
        match self.class {
            LeafClass::F16 => Some(FloatEncoding::from_title(&self.named.title, true)),
            LeafClass::D32 => Some(FloatEncoding::from_title(&self.named.title, false)),
            _ => None,
        }
    }

    /// Number of elements of the current entry, given the current value of the counting leaf.
    ///
    /// The count is clamped to the counting leaf's maximum when one was recorded.
    pub fn entry_len(&self, count: Option<(i64, i64)>) -> usize {
        if self.class == LeafClass::C {
            return 1;
        }
        match count {
            Some((value, imax)) => {
                let n = if imax > 0 { value.min(imax) } else { value };
                self.len() * usize::try_from(n).unwrap_or(0)
            }
            None => self.len(),
        }
    }

    /// Decode a leaf record of `class` whose class tag was already read.
    pub(crate) fn unmarshal(
        class: LeafClass,
        r: &mut RBuffer<'_>,
        arena: &mut Arena,
    ) -> ArborResult<Self> {
        let outer = r.read_version()?;
        if outer.version > LEAF_CLASS_VERSION {
            arbor_bail!(InvalidSerde: "{}: unsupported version {}", class, outer.version);
        }

        let hdr = r.read_version()?;
        if hdr.version > LEAF_VERSION {
            arbor_bail!(InvalidSerde: "TLeaf: unsupported version {}", hdr.version);
        }
        let named = Named::unmarshal(r)?;
        let len = r.read_i32()?;
        let etype = r.read_i32()?;
        let offset = r.read_i32()?;
        let has_range = r.read_bool()?;
        let unsigned = r.read_bool()?;
        let count = r
            .read_object_any(|class, r| arena.decode_object(class, r))?
            .map(|obj| arena.leaf_id(obj))
            .transpose()?;
        r.check_byte_count(&hdr, "TLeaf")?;

        let mut element = None;
        let extrema = match class {
            LeafClass::O => Extrema::Bool(r.read_bool()?, r.read_bool()?),
            LeafClass::B => Extrema::I8(r.read_i8()?, r.read_i8()?),
            LeafClass::S => Extrema::I16(r.read_i16()?, r.read_i16()?),
            LeafClass::I | LeafClass::C => Extrema::I32(r.read_i32()?, r.read_i32()?),
            LeafClass::L | LeafClass::G => Extrema::I64(r.read_i64()?, r.read_i64()?),
            LeafClass::F => Extrema::F32(r.read_f32()?, r.read_f32()?),
            LeafClass::D => Extrema::F64(r.read_f64()?, r.read_f64()?),
            LeafClass::F16 => Extrema::F32(
                r.read_f16(&FloatEncoding::FLOAT16)?,
                r.read_f16(&FloatEncoding::FLOAT16)?,
            ),
            LeafClass::D32 => Extrema::F64(
                r.read_d32(&FloatEncoding::DOUBLE32)?,
                r.read_d32(&FloatEncoding::DOUBLE32)?,
            ),
            LeafClass::Element => {
                element = Some(MemberInfo {
                    id: r.read_i32()?,
                    ltype: r.read_i32()?,
                });
                Extrema::None
            }
        };
        r.check_byte_count(&outer, class.name())?;

        Ok(Self {
            class,
            named,
            len: if len == 0 { 1 } else { len },
            etype,
            offset,
            has_range,
            unsigned,
            count,
            extrema,
            observed: false,
            element,
            branch: None,
        })
    }

    /// Encode the leaf record, without its class tag.
    pub(crate) fn marshal(&self, w: &mut WBuffer, arena: &Arena) -> ArborResult<()> {
        let outer = w.write_version(LEAF_CLASS_VERSION);

        let beg = w.write_version(LEAF_VERSION);
        self.named.marshal(w)?;
        w.write_i32(self.len);
        w.write_i32(self.etype);
        w.write_i32(self.offset);
        w.write_bool(self.has_range);
        w.write_bool(self.unsigned);
        match self.count {
            Some(id) => {
                let count = arena.leaf(id)?;
                w.write_object_any(Some((id.object(), count.class.name())), |w| {
                    count.marshal(w, arena)
                })?
            }
            None => w.write_object_any(None, |_| Ok(()))?,
        }
        w.set_byte_count(beg)?;

        match (self.class, self.extrema) {
            (LeafClass::Element, _) => {
                let info = self.element.unwrap_or_default();
                w.write_i32(info.id);
                w.write_i32(info.ltype);
            }
            (LeafClass::F16, Extrema::F32(lo, hi)) => {
                w.write_f16(lo, &FloatEncoding::FLOAT16);
                w.write_f16(hi, &FloatEncoding::FLOAT16);
            }
            (LeafClass::D32, Extrema::F64(lo, hi)) => {
                w.write_d32(lo, &FloatEncoding::DOUBLE32);
                w.write_d32(hi, &FloatEncoding::DOUBLE32);
            }
            (_, Extrema::Bool(lo, hi)) => {
                w.write_bool(lo);
                w.write_bool(hi);
            }
            (_, Extrema::I8(lo, hi)) => {
                w.write_i8(lo);
                w.write_i8(hi);
            }
            (_, Extrema::I16(lo, hi)) => {
                w.write_i16(lo);
                w.write_i16(hi);
            }
            (_, Extrema::I32(lo, hi)) => {
                w.write_i32(lo);
                w.write_i32(hi);
            }
            (_, Extrema::I64(lo, hi)) => {
                w.write_i64(lo);
                w.write_i64(hi);
            }
            (_, Extrema::F32(lo, hi)) => {
                w.write_f32(lo);
                w.write_f32(hi);
            }
            (_, Extrema::F64(lo, hi)) => {
                w.write_f64(lo);
                w.write_f64(hi);
            }
            (class, Extrema::None) => {
                arbor_bail!(InvalidArgument: "leaf {} of class {} has no extrema", self.name(), class)
            }
        }
        w.set_byte_count(outer)
    }

    pub(crate) fn object(&self, id: LeafId) -> (ObjectId, &'static str) {
        (id.object(), self.class.name())
    }
}
