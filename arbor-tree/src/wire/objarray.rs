use arbor_buffer::{ObjectId, RBuffer, WBuffer};
use arbor_error::{ArborResult, arbor_bail, arbor_err};

use crate::wire::Object;

const OBJ_ARRAY_VERSION: i16 = 3;

/// A decoded object array: the identities of its elements, `None` for empty slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjArray {
    /// Name of the array.
    pub name: String,
    /// Lower bound of the array indices.
    pub low: i32,
    /// Elements, in order.
    pub elems: Vec<Option<ObjectId>>,
}

impl ObjArray {
    /// Decode an array, handing every element met for the first time to `decode`.
    pub fn unmarshal<'a, F>(r: &mut RBuffer<'a>, mut decode: F) -> ArborResult<Self>
    where
        F: FnMut(&str, &mut RBuffer<'a>) -> ArborResult<Option<ObjectId>>,
    {
        let hdr = r.read_version()?;
        if hdr.version > OBJ_ARRAY_VERSION {
            arbor_bail!(InvalidSerde: "TObjArray: unsupported version {}", hdr.version);
        }
        if hdr.version > 2 {
            Object::unmarshal(r)?;
        }
        let name = if hdr.version > 1 {
            r.read_string()?
        } else {
            String::new()
        };
        let nobjs = r.read_i32()?;
        let nobjs = usize::try_from(nobjs)
            .map_err(|_| arbor_err!(InvalidSerde: "TObjArray: negative length {}", nobjs))?;
        let low = r.read_i32()?;
        let elems = (0..nobjs)
            .map(|_| r.read_object_any(&mut decode))
            .collect::<ArborResult<Vec<_>>>()?;
        r.check_byte_count(&hdr, "TObjArray")?;
        Ok(Self { name, low, elems })
    }

    /// Encode an array of `elems`, each an identity and a class name, or `None` for an empty
    /// slot. `encode` streams the fields of the element at the given index the first time it is
    /// written.
    pub fn marshal<F>(
        w: &mut WBuffer,
        name: &str,
        elems: &[Option<(ObjectId, &str)>],
        mut encode: F,
    ) -> ArborResult<()>
    where
        F: FnMut(usize, &mut WBuffer) -> ArborResult<()>,
    {
        let beg = w.write_version(OBJ_ARRAY_VERSION);
        Object::default().marshal(w);
        w.write_string(name);
        let nobjs = i32::try_from(elems.len())
            .map_err(|_| arbor_err!(InvalidArgument: "too many objects: {}", elems.len()))?;
        w.write_i32(nobjs);
        w.write_i32(0);
        for (i, elem) in elems.iter().enumerate() {
            w.write_object_any(*elem, |w| encode(i, w))?;
        }
        w.set_byte_count(beg)
    }
}
