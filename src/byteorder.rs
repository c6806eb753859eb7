//! Little-endian serialization for RIFF chunks and raw PCM output.

pub trait WriteBytesLe {
    fn write_le(&self, dst: &mut Vec<u8>);

    /// Encoded size in bytes.
    fn le_len(&self) -> usize;

    fn to_le_vec(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(self.le_len());
        self.write_le(&mut dst);
        dst
    }
}

macro_rules! impl_num_le {
    ($($t:ty),+) => { $(
        impl WriteBytesLe for $t {
            #[inline]
            fn write_le(&self, dst: &mut Vec<u8>) {
                dst.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn le_len(&self) -> usize {
                size_of::<$t>()
            }
        }
    )+ }
}

impl_num_le!(u8, u16, i16, u32, u64);

impl<T: WriteBytesLe> WriteBytesLe for [T] {
    #[inline]
    fn write_le(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_le(dst));
    }

    fn le_len(&self) -> usize {
        self.iter().map(WriteBytesLe::le_len).sum()
    }
}

impl<T: WriteBytesLe, const N: usize> WriteBytesLe for [T; N] {
    #[inline]
    fn write_le(&self, dst: &mut Vec<u8>) {
        self.as_slice().write_le(dst);
    }

    fn le_len(&self) -> usize {
        self.as_slice().le_len()
    }
}

#[cfg(test)]
mod tests {
    use crate::byteorder::WriteBytesLe;
    use iamfd_macros::ToBytes;

    #[derive(ToBytes)]
    struct ChunkHeader {
        id: [u8; 4],
        size: u32,
    }

    #[test]
    fn fields_in_declaration_order() {
        let header = ChunkHeader {
            id: *b"data",
            size: 0x0001_2C00,
        };

        assert_eq!(header.le_len(), 8);
        assert_eq!(
            header.to_le_vec(),
            [b'd', b'a', b't', b'a', 0x00, 0x2C, 0x01, 0x00]
        );
    }

    #[test]
    fn samples_are_little_endian() {
        let samples = [1i16, -2, i16::MIN];
        assert_eq!(samples.le_len(), 6);
        assert_eq!(samples.to_le_vec(), [0x01, 0x00, 0xFE, 0xFF, 0x00, 0x80]);
    }
}
