use arbor_buffer::{RBuffer, WBuffer};
use arbor_error::{ArborResult, arbor_bail};

/// Bytes preceding a non-empty feature set.
const FEATURES_MAGIC: [u8; 4] = [0x1a, 0xa1, 0x2f, 0x10];

/// Optional storage features enabled on a tree, branch or basket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IoFeatures(pub u8);

impl IoFeatures {
    const VERSION: i16 = 1;

    /// Decode a feature set.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = r.read_version()?;
        if hdr.version > Self::VERSION {
            arbor_bail!(InvalidSerde: "TIOFeatures: unsupported version {}", hdr.version);
        }
        let features = if r.read_u8()? != 0 {
            r.read_bytes(FEATURES_MAGIC.len() - 1)?;
            Self(r.read_u8()?)
        } else {
            Self(0)
        };
        r.check_byte_count(&hdr, "TIOFeatures")?;
        Ok(features)
    }

    /// Encode a feature set.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        let beg = w.write_version(Self::VERSION);
        if self.0 != 0 {
            w.write_bytes(&FEATURES_MAGIC);
        }
        w.write_u8(self.0);
        w.set_byte_count(beg)
    }
}
