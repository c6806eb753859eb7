//! Sequence header carried by the magic-code OBU.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ObjectError;

/// `'iamf'` as a big-endian word.
pub const IA_CODE: u32 = 0x69_61_6D_66;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub version: u8,
    pub profile_version: u8,
}

impl Version {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let ia_code = reader.get_u32()?;
        if ia_code != IA_CODE {
            bail!(ObjectError::InvalidMagicCode(ia_code));
        }

        Ok(Self {
            version: reader.get_u8()?,
            profile_version: reader.get_u8()?,
        })
    }

    /// Primary profile, the upper nibble of `profile_version`.
    pub fn primary_profile(&self) -> u8 {
        self.profile_version >> 4
    }
}
