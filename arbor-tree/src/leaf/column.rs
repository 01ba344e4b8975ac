use arbor_buffer::{FloatEncoding, RBuffer, WBuffer};
use arbor_error::ArborResult;

use crate::leaf::{ElementKind, Extrema};

/// The values of one leaf for the current entry.
///
/// The variant is chosen once, when a leaf is bound, from the destination kind and the narrow
/// float encoding of the leaf, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// `bool` values.
    Bool(Vec<bool>),
    /// `i8` values.
    I8(Vec<i8>),
    /// `u8` values.
    U8(Vec<u8>),
    /// `i16` values.
    I16(Vec<i16>),
    /// `u16` values.
    U16(Vec<u16>),
    /// `i32` values.
    I32(Vec<i32>),
    /// `u32` values.
    U32(Vec<u32>),
    /// `i64` values.
    I64(Vec<i64>),
    /// `u64` values.
    U64(Vec<u64>),
    /// `f32` values.
    F32(Vec<f32>),
    /// `f64` values.
    F64(Vec<f64>),
    /// `f32` values stored with a narrow encoding.
    Float16(Vec<f32>, FloatEncoding),
    /// `f64` values stored with a narrow encoding.
    Double32(Vec<f64>, FloatEncoding),
    /// Strings.
    Str(Vec<String>),
}

macro_rules! for_each_plain {
    ($self:expr, $v:ident => $body:expr, $other:pat => $fallback:expr) => {
        match $self {
            Column::Bool($v) => $body,
            Column::I8($v) => $body,
            Column::U8($v) => $body,
            Column::I16($v) => $body,
            Column::U16($v) => $body,
            Column::I32($v) => $body,
            Column::U32($v) => $body,
            Column::I64($v) => $body,
            Column::U64($v) => $body,
            Column::F32($v) => $body,
            Column::F64($v) => $body,
            $other => $fallback,
        }
    };
}

impl Column {
    /// An empty column holding values of `dest`, decoded with `encoding` when the leaf stores
    /// narrow floats.
    pub fn new(dest: ElementKind, encoding: Option<FloatEncoding>) -> Self {
        match (dest, encoding) {
            (ElementKind::F32 | ElementKind::Float16, Some(enc)) => Column::Float16(Vec::new(), enc),
            (ElementKind::F64 | ElementKind::Double32, Some(enc)) => {
                Column::Double32(Vec::new(), enc)
            }
            (ElementKind::Bool, _) => Column::Bool(Vec::new()),
            (ElementKind::I8, _) => Column::I8(Vec::new()),
            (ElementKind::U8, _) => Column::U8(Vec::new()),
            (ElementKind::I16, _) => Column::I16(Vec::new()),
            (ElementKind::U16, _) => Column::U16(Vec::new()),
            (ElementKind::I32, _) => Column::I32(Vec::new()),
            (ElementKind::U32, _) => Column::U32(Vec::new()),
            (ElementKind::I64, _) => Column::I64(Vec::new()),
            (ElementKind::U64, _) => Column::U64(Vec::new()),
            (ElementKind::F32, None) => Column::F32(Vec::new()),
            (ElementKind::F64, None) => Column::F64(Vec::new()),
            (ElementKind::Float16, None) => Column::Float16(Vec::new(), FloatEncoding::FLOAT16),
            (ElementKind::Double32, None) => {
                Column::Double32(Vec::new(), FloatEncoding::DOUBLE32)
            }
            (ElementKind::Str, _) => Column::Str(Vec::new()),
        }
    }

    /// Number of values held.
    pub fn len(&self) -> usize {
        for_each_plain!(self, v => v.len(), other => match other {
            Column::Float16(v, _) => v.len(),
            Column::Double32(v, _) => v.len(),
            Column::Str(v) => v.len(),
            _ => 0,
        })
    }

    /// Whether no value is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the held values with `n` values decoded from `r`.
    pub fn read(&mut self, r: &mut RBuffer<'_>, n: usize) -> ArborResult<()> {
        for_each_plain!(self, v => {
            v.resize(n, Default::default());
            r.read_into(v)
        }, other => match other {
            Column::Float16(v, enc) => {
                v.clear();
                for _ in 0..n {
                    v.push(r.read_f16(enc)?);
                }
                Ok(())
            }
            Column::Double32(v, enc) => {
                v.clear();
                for _ in 0..n {
                    v.push(r.read_d32(enc)?);
                }
                Ok(())
            }
            Column::Str(v) => {
                v.clear();
                for _ in 0..n {
                    v.push(r.read_string()?);
                }
                Ok(())
            }
            _ => Ok(()),
        })
    }

    /// Encode the first `n` held values.
    pub fn write(&self, w: &mut WBuffer, n: usize) {
        for_each_plain!(self, v => w.write_fast_array(&v[..n.min(v.len())]), other => match other {
            Column::Float16(v, enc) => v.iter().take(n).for_each(|&x| w.write_f16(x, enc)),
            Column::Double32(v, enc) => v.iter().take(n).for_each(|&x| w.write_d32(x, enc)),
            Column::Str(v) => v.iter().take(n).for_each(|s| w.write_string(s)),
            _ => {}
        })
    }

    /// The first value as a count, for integer columns.
    pub fn first_as_count(&self) -> Option<i64> {
        match self {
            Column::I8(v) => v.first().map(|&x| i64::from(x)),
            Column::U8(v) => v.first().map(|&x| i64::from(x)),
            Column::I16(v) => v.first().map(|&x| i64::from(x)),
            Column::U16(v) => v.first().map(|&x| i64::from(x)),
            Column::I32(v) => v.first().map(|&x| i64::from(x)),
            Column::U32(v) => v.first().map(|&x| i64::from(x)),
            Column::I64(v) => v.first().copied(),
            Column::U64(v) => v.first().map(|&x| i64::try_from(x).unwrap_or(i64::MAX)),
            _ => None,
        }
    }

    /// Fold the first `n` held values into the extrema of their leaf.
    pub(crate) fn observe(&self, n: usize, ext: &mut Extrema, seen: &mut bool) {
        macro_rules! track {
            ($values:expr, $lo:expr, $hi:expr) => {
                track!($values, $lo, $hi, |x| x, |x| x)
            };
            ($values:expr, $lo:expr, $hi:expr, $native:expr, $stored:expr) => {{
                let (native, stored) = ($native, $stored);
                for &v in $values.iter().take(n) {
                    if !*seen || v < native(*$lo) {
                        *$lo = stored(v);
                    }
                    if !*seen || v > native(*$hi) {
                        *$hi = stored(v);
                    }
                    *seen = true;
                }
            }};
        }

        match (self, ext) {
            (Column::Bool(v), Extrema::Bool(lo, hi)) => {
                for &x in v.iter().take(n) {
                    *lo = if *seen { *lo && x } else { x };
                    *hi = if *seen { *hi || x } else { x };
                    *seen = true;
                }
            }
            (Column::I8(v), Extrema::I8(lo, hi)) => track!(v, lo, hi),
            (Column::U8(v), Extrema::I8(lo, hi)) => track!(v, lo, hi, |x: i8| x as u8, |x: u8| x as i8),
            (Column::I16(v), Extrema::I16(lo, hi)) => track!(v, lo, hi),
            (Column::U16(v), Extrema::I16(lo, hi)) => track!(v, lo, hi, |x: i16| x as u16, |x: u16| x as i16),
            (Column::I32(v), Extrema::I32(lo, hi)) => track!(v, lo, hi),
            (Column::U32(v), Extrema::I32(lo, hi)) => track!(v, lo, hi, |x: i32| x as u32, |x: u32| x as i32),
            (Column::I64(v), Extrema::I64(lo, hi)) => track!(v, lo, hi),
            (Column::U64(v), Extrema::I64(lo, hi)) => track!(v, lo, hi, |x: i64| x as u64, |x: u64| x as i64),
            (Column::F32(v) | Column::Float16(v, _), Extrema::F32(lo, hi)) => {
                track!(v, lo, hi)
            }
            (Column::F64(v) | Column::Double32(v, _), Extrema::F64(lo, hi)) => {
                track!(v, lo, hi)
            }
            (Column::Str(v), Extrema::I32(lo, hi)) => {
                let lens = v
                    .iter()
                    .map(|s| i32::try_from(s.len() + 1).unwrap_or(i32::MAX))
                    .collect::<Vec<_>>();
                track!(lens, lo, hi)
            }
            _ => log::debug!("column and leaf extrema kinds differ, extrema left unchanged"),
        }
    }
}

/// A value type that a leaf can be bound to.
///
/// Implemented for the primitive numeric types, `bool` and `String`. Narrow float leaves bind
/// to `f32` and `f64`.
pub trait Element: private::Sealed + Clone + Default + Send + Sync + 'static {
    /// The kind of destination this type provides.
    const KIND: ElementKind;

    /// The values of `column`, if it holds this type.
    fn values(column: &Column) -> Option<&[Self]>;

    /// The mutable values of `column`, if it holds this type.
    fn values_mut(column: &mut Column) -> Option<&mut Vec<Self>>;
}

mod private {
    pub trait Sealed {}
}

macro_rules! impl_element {
    ($T:ty, $kind:ident, $($variant:pat => $v:ident),+) => {
        impl private::Sealed for $T {}

        impl Element for $T {
            const KIND: ElementKind = ElementKind::$kind;

            fn values(column: &Column) -> Option<&[Self]> {
                match column {
                    $($variant => Some($v),)+
                    _ => None,
                }
            }

            fn values_mut(column: &mut Column) -> Option<&mut Vec<Self>> {
                match column {
                    $($variant => Some($v),)+
                    _ => None,
                }
            }
        }
    };
}

impl_element!(bool, Bool, Column::Bool(v) => v);
impl_element!(i8, I8, Column::I8(v) => v);
impl_element!(u8, U8, Column::U8(v) => v);
impl_element!(i16, I16, Column::I16(v) => v);
impl_element!(u16, U16, Column::U16(v) => v);
impl_element!(i32, I32, Column::I32(v) => v);
impl_element!(u32, U32, Column::U32(v) => v);
impl_element!(i64, I64, Column::I64(v) => v);
impl_element!(u64, U64, Column::U64(v) => v);
impl_element!(f32, F32, Column::F32(v) => v, Column::Float16(v, _) => v);
impl_element!(f64, F64, Column::F64(v) => v, Column::Double32(v, _) => v);
impl_element!(String, Str, Column::Str(v) => v);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_resize_to_the_requested_count() {
        let mut w = WBuffer::new(0);
        w.write_fast_array(&[1i32, 2, 3, 4]);
        let bytes = w.into_vec();

        let mut col = Column::new(ElementKind::I32, None);
        col.read(&mut RBuffer::new(&bytes, 0), 3).unwrap();
        assert_eq!(i32::values(&col).unwrap(), &[1, 2, 3]);
        col.read(&mut RBuffer::new(&bytes, 0), 1).unwrap();
        assert_eq!(i32::values(&col).unwrap(), &[1]);
    }

    #[test]
    fn unsigned_columns_reinterpret_bits() {
        let mut w = WBuffer::new(0);
        w.write_i32(-1);
        let bytes = w.into_vec();

        let mut col = Column::new(ElementKind::U32, None);
        col.read(&mut RBuffer::new(&bytes, 0), 1).unwrap();
        assert_eq!(u32::values(&col).unwrap(), &[u32::MAX]);
        assert_eq!(col.first_as_count(), Some(i64::from(u32::MAX)));
    }

    #[test]
    fn narrow_floats_bind_to_full_width_types() {
        let mut col = Column::new(ElementKind::F32, Some(FloatEncoding::FLOAT16));
        f32::values_mut(&mut col).unwrap().extend([1.5, -2.0]);

        let mut w = WBuffer::new(0);
        col.write(&mut w, 2);
        assert_eq!(w.len(), 6);

        let bytes = w.into_vec();
        let mut back = Column::new(ElementKind::F32, Some(FloatEncoding::FLOAT16));
        back.read(&mut RBuffer::new(&bytes, 0), 2).unwrap();
        assert_eq!(f32::values(&back).unwrap(), &[1.5, -2.0]);
        assert!(f64::values(&back).is_none());
    }

    #[test]
    fn strings_round_trip() {
        let mut col = Column::new(ElementKind::Str, None);
        String::values_mut(&mut col)
            .unwrap()
            .push("hello".to_string());
        let mut w = WBuffer::new(0);
        col.write(&mut w, 1);
        let bytes = w.into_vec();

        let mut back = Column::new(ElementKind::Str, None);
        back.read(&mut RBuffer::new(&bytes, 0), 1).unwrap();
        assert_eq!(back, col);
    }

    #[test]
    fn extrema_follow_the_native_order() {
        let col = Column::U32(vec![3, u32::MAX, 7]);
        let mut ext = Extrema::I32(0, 0);
        let mut seen = false;
        col.observe(3, &mut ext, &mut seen);
        assert_eq!(ext, Extrema::I32(3, -1));

        let col = Column::I32(vec![-4, 9]);
        let mut ext = Extrema::I32(0, 0);
        let mut seen = false;
        col.observe(1, &mut ext, &mut seen);
        col.observe(2, &mut ext, &mut seen);
        assert_eq!(ext, Extrema::I32(-4, 9));
    }
}
