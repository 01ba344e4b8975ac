/// A fixed-width value stored big-endian on disk.
pub trait BigEndian: Copy + Default + Send + Sync + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn decode(bytes: &[u8]) -> Self;

    /// Append the encoded form to `out`.
    fn encode(self, out: &mut Vec<u8>);
}

macro_rules! big_endian {
    ($($T:ty),*) => {
        $(
            impl BigEndian for $T {
                const SIZE: usize = size_of::<$T>();

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; size_of::<$T>()];
                    raw.copy_from_slice(&bytes[..size_of::<$T>()]);
                    <$T>::from_be_bytes(raw)
                }

                #[inline]
                fn encode(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }
            }
        )*
    };
}

big_endian!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl BigEndian for bool {
    const SIZE: usize = 1;

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline]
    fn encode(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }
}
