use std::fmt::{Display, Formatter};

/// The in-memory kind of the values of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// `bool`
    Bool,
    /// `i8`
    I8,
    /// `u8`
    U8,
    /// `i16`
    I16,
    /// `u16`
    U16,
    /// `i32`
    I32,
    /// `u32`
    U32,
    /// `i64`
    I64,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// An `f32` stored with a narrow encoding.
    Float16,
    /// An `f64` stored with a narrow encoding.
    Double32,
    /// A length-prefixed string.
    Str,
}

impl ElementKind {
    /// Whether values of a leaf of kind `self` may be bound to a destination of kind `dest`.
    ///
    /// Besides identical kinds, equal-width signed and unsigned integers reinterpret each other
    /// bit for bit, and the narrow float encodings decode into their full-width counterpart.
    pub fn accepts(self, dest: ElementKind) -> bool {
        use ElementKind::*;

        self == dest
            || matches!(
                (self, dest),
                (I8, U8)
                    | (U8, I8)
                    | (I16, U16)
                    | (U16, I16)
                    | (I32, U32)
                    | (U32, I32)
                    | (I64, U64)
                    | (U64, I64)
                    | (Float16, F32)
                    | (Double32, F64)
            )
    }

    /// Whether this kind is an integer that can size a variable-length leaf.
    pub fn is_integer(self) -> bool {
        use ElementKind::*;

        matches!(self, I8 | U8 | I16 | U16 | I32 | U32 | I64 | U64)
    }

    /// Whether this kind is an unsigned integer.
    pub fn is_unsigned(self) -> bool {
        use ElementKind::*;

        matches!(self, U8 | U16 | U32 | U64)
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementKind::Bool => "bool",
            ElementKind::I8 => "i8",
            ElementKind::U8 => "u8",
            ElementKind::I16 => "i16",
            ElementKind::U16 => "u16",
            ElementKind::I32 => "i32",
            ElementKind::U32 => "u32",
            ElementKind::I64 => "i64",
            ElementKind::U64 => "u64",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::Float16 => "float16",
            ElementKind::Double32 => "double32",
            ElementKind::Str => "string",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ElementKind::{self, *};

    #[rstest]
    #[case(I32, I32, true)]
    #[case(U32, I32, true)]
    #[case(I64, U64, true)]
    #[case(I32, I64, false)]
    #[case(U8, U16, false)]
    #[case(Float16, F32, true)]
    #[case(Double32, F64, true)]
    #[case(F32, Float16, false)]
    #[case(Double32, F32, false)]
    #[case(F64, F32, false)]
    #[case(Bool, U8, false)]
    #[case(Str, U8, false)]
    fn binding_compatibility(
        #[case] leaf: ElementKind,
        #[case] dest: ElementKind,
        #[case] ok: bool,
    ) {
        assert_eq!(leaf.accepts(dest), ok);
    }
}
