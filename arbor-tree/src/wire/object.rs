use arbor_buffer::{IS_ON_HEAP, IS_REFERENCED, RBuffer, WBuffer};
use arbor_error::{ArborResult, arbor_bail};

/// Bit marking an object that was not deleted.
const NOT_DELETED: u32 = 0x0200_0000;

/// The base object record: a unique id and a set of status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Object {
    /// Unique id.
    pub id: u32,
    /// Status bits, as stored.
    pub bits: u32,
}

impl Default for Object {
    fn default() -> Self {
        Self {
            id: 0,
            bits: NOT_DELETED | IS_ON_HEAP,
        }
    }
}

impl Object {
    const VERSION: i16 = 1;

    /// Decode a base object.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        r.skip_version()?;
        let id = r.read_u32()?;
        let bits = r.read_u32()?;
        if bits & IS_REFERENCED != 0 {
            // process id of the referenced object
            r.read_u16()?;
        }
        Ok(Self { id, bits })
    }

    /// Encode a base object.
    pub fn marshal(&self, w: &mut WBuffer) {
        w.write_i16(Self::VERSION);
        w.write_u32(self.id);
        w.write_u32(self.bits);
        if self.bits & IS_REFERENCED != 0 {
            w.write_u16(0);
        }
    }
}

/// An object with a name and a title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Named {
    /// Base object.
    pub object: Object,
    /// Name.
    pub name: String,
    /// Title.
    pub title: String,
}

impl Named {
    const VERSION: i16 = 1;

    /// Create a named object.
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            object: Object::default(),
            name: name.into(),
            title: title.into(),
        }
    }

    /// Decode a named object.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = r.read_version()?;
        if hdr.version > Self::VERSION {
            arbor_bail!(InvalidSerde: "TNamed: unsupported version {}", hdr.version);
        }
        let object = Object::unmarshal(r)?;
        let name = r.read_string()?;
        let title = r.read_string()?;
        r.check_byte_count(&hdr, "TNamed")?;
        Ok(Self {
            object,
            name,
            title,
        })
    }

    /// Encode a named object.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        let beg = w.write_version(Self::VERSION);
        self.object.marshal(w);
        w.write_string(&self.name);
        w.write_string(&self.title);
        w.set_byte_count(beg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_objects_carry_a_process_id() {
        let obj = Object {
            id: 7,
            bits: IS_ON_HEAP | IS_REFERENCED,
        };
        let mut w = WBuffer::new(0);
        obj.marshal(&mut w);
        assert_eq!(w.len(), 2 + 4 + 4 + 2);

        let bytes = w.into_vec();
        let mut r = RBuffer::new(&bytes, 0);
        assert_eq!(Object::unmarshal(&mut r).unwrap(), obj);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn named_round_trip() {
        let named = Named::new("px", "px/D");
        let mut w = WBuffer::new(0);
        named.marshal(&mut w).unwrap();
        let bytes = w.into_vec();
        let back = Named::unmarshal(&mut RBuffer::new(&bytes, 0)).unwrap();
        assert_eq!(back, named);
    }

    #[test]
    fn named_rejects_newer_versions() {
        let mut w = WBuffer::new(0);
        let beg = w.write_version(2);
        Object::default().marshal(&mut w);
        w.write_string("a");
        w.write_string("b");
        w.set_byte_count(beg).unwrap();
        let bytes = w.into_vec();
        assert!(Named::unmarshal(&mut RBuffer::new(&bytes, 0)).is_err());
    }
}
