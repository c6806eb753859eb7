//! Bitstream I/O utilities for OBU parsing.
//!
//! Provides MSB-first bit reads, byte-aligned big-endian reads, LEB128
//! varints (unsigned and signed), raw byte copies and null-terminated
//! strings over an immutable slice.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, SignedInteger, UnsignedInteger};

/// Upper bound on the number of bytes a LEB128 value may occupy.
pub const LEB128_MAX_BYTES: usize = 8;

/// Upper bound on the length of a null-terminated string, terminator included.
pub const STRING_MAX_BYTES: usize = 128;

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

fn out_of_bounds(what: &str, n: u64, pos: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{what}({n}): out of bounds bits at {pos}"),
    )
}

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    /// Reads `n <= 32` bits MSB-first without any alignment requirement.
    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        if n > 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("get_n({n}): at most 32 bits per read"),
            ));
        }

        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(out_of_bounds("get_n", n as u64, self.position().unwrap_or(0)))
            }
            Err(e) => Err(e),
        }
    }

    #[inline(always)]
    pub fn get_s<S: SignedInteger>(&mut self, n: u32) -> io::Result<S> {
        if n > 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("get_s({n}): at most 32 bits per read"),
            ));
        }

        match self.bs.read_signed_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(out_of_bounds("get_s", n as u64, self.position().unwrap_or(0)))
            }
            Err(e) => Err(e),
        }
    }

    #[inline(always)]
    pub fn get_u8(&mut self) -> io::Result<u8> {
        self.byte_align();
        self.get_n(8)
    }

    #[inline(always)]
    pub fn get_u16(&mut self) -> io::Result<u16> {
        self.byte_align();
        self.get_n(16)
    }

    #[inline(always)]
    pub fn get_u32(&mut self) -> io::Result<u32> {
        self.byte_align();
        self.get_n(32)
    }

    #[inline(always)]
    pub fn get_i16(&mut self) -> io::Result<i16> {
        self.byte_align();
        self.get_s(16)
    }

    /// Unsigned LEB128: 7 payload bits per byte, little-endian groups,
    /// high bit set on every byte but the last.
    pub fn get_leb128(&mut self) -> io::Result<u64> {
        let mut value = 0u64;

        for i in 0..LEB128_MAX_BYTES {
            let byte: u8 = self.get_n(8)?;
            value |= ((byte & 0x7F) as u64) << (i * 7);

            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(value)
    }

    /// Signed LEB128, sign-extended from the number of bits actually consumed.
    pub fn get_sleb128(&mut self) -> io::Result<i32> {
        let mut value = 0i64;
        let mut bits = 0;

        for _ in 0..LEB128_MAX_BYTES {
            let byte: u8 = self.get_n(8)?;
            value |= ((byte & 0x7F) as i64) << bits;
            bits += 7;

            if byte & 0x80 == 0 {
                break;
            }
        }

        if (value >> (bits - 1)) & 1 != 0 {
            value -= 1 << bits;
        }

        Ok(value as i32)
    }

    pub fn get_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if (n as u64) << 3 > self.available()? {
            return Err(out_of_bounds("get_bytes", n as u64, self.position()?));
        }

        let mut buf = vec![0; n];
        self.bs.read_bytes(&mut buf)?;

        Ok(buf)
    }

    /// Reads a null-terminated string; the terminator is consumed but not
    /// returned. Invalid UTF-8 is replaced rather than rejected.
    pub fn get_string(&mut self) -> io::Result<String> {
        self.byte_align();

        let mut bytes = Vec::new();
        loop {
            let byte: u8 = self.get_n(8)?;
            if byte == 0 {
                break;
            }
            if bytes.len() + 1 >= STRING_MAX_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "get_string: missing terminator",
                ));
            }
            bytes.push(byte);
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    #[inline(always)]
    pub fn byte_align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n as u64 > self.available()? {
            return Err(out_of_bounds("skip_n", n as u64, self.position()?));
        }

        self.bs.skip(n)
    }

    pub fn skip_bytes(&mut self, n: u64) -> io::Result<()> {
        if n << 3 > self.available()? {
            return Err(out_of_bounds("skip_bytes", n, self.position()?));
        }

        self.bs.seek_bits(SeekFrom::Current((n << 3) as i64))?;

        Ok(())
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    /// Current position in bytes, rounded up.
    #[inline(always)]
    pub fn position_bytes(&mut self) -> io::Result<usize> {
        self.position().map(|pos| pos.div_ceil(8) as usize)
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_unaligned_bits() -> io::Result<()> {
        let mut reader = BsIoSliceReader::from_slice(&[0b1011_0011, 0b0100_0000]);

        assert_eq!(reader.get_n::<u8>(3)?, 0b101);
        assert!(reader.get()?);
        assert_eq!(reader.get_n::<u16>(6)?, 0b0011_01);
        assert_eq!(reader.position()?, 10);
        assert_eq!(reader.position_bytes()?, 2);

        Ok(())
    }

    #[test]
    fn leb128_multi_byte() -> io::Result<()> {
        let mut reader = BsIoSliceReader::from_slice(&[0xE5, 0x8E, 0x26, 0x05]);

        assert_eq!(reader.get_leb128()?, 624_485);
        assert_eq!(reader.get_leb128()?, 5);

        Ok(())
    }

    #[test]
    fn sleb128_sign_extends_from_consumed_width() -> io::Result<()> {
        // -123456 encodes as C0 BB 78
        let mut reader = BsIoSliceReader::from_slice(&[0xC0, 0xBB, 0x78, 0x7F, 0x3F]);

        assert_eq!(reader.get_sleb128()?, -123_456);
        assert_eq!(reader.get_sleb128()?, -1);
        assert_eq!(reader.get_sleb128()?, 63);

        Ok(())
    }

    #[test]
    fn aligned_reads_skip_partial_byte() -> io::Result<()> {
        let mut reader = BsIoSliceReader::from_slice(&[0xFF, 0x12, 0x34, 0xFF, 0x85]);

        reader.skip_n(3)?;
        assert_eq!(reader.get_u16()?, 0x1234);
        assert_eq!(reader.get_i16()?, -123);

        Ok(())
    }

    #[test]
    fn string_consumes_terminator() -> io::Result<()> {
        let mut reader = BsIoSliceReader::from_slice(b"en-us\0x\0");

        assert_eq!(reader.get_string()?, "en-us");
        assert_eq!(reader.position_bytes()?, 6);
        assert_eq!(reader.get_string()?, "x");

        Ok(())
    }

    #[test]
    fn reads_past_end_fail() {
        let mut reader = BsIoSliceReader::from_slice(&[0x80]);

        assert!(reader.get_leb128().is_err());
        assert!(BsIoSliceReader::from_slice(&[1, 2]).get_bytes(3).is_err());
        assert!(BsIoSliceReader::from_slice(&[1, 2]).skip_bytes(3).is_err());
    }
}
