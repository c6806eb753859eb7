//! Sync OBU: timeline offsets for substreams and parameters.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ObjectError;

/// `obu_data_type` of an entry that refers to an audio substream.
pub const SYNC_DATA_AUDIO: u8 = 0;

/// `obu_data_type` of an entry that refers to a parameter id.
pub const SYNC_DATA_PARAMETER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEntry {
    pub obu_id: u64,
    pub data_type: u8,
    pub reinitialize_decoder: bool,
    pub relative_offset: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncInfo {
    pub global_offset: u64,
    pub entries: Vec<SyncEntry>,
}

impl SyncInfo {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let global_offset = reader.get_leb128()?;

        let num_obu_ids = reader.get_leb128()?;
        // at least three bytes per entry
        if num_obu_ids > reader.available()? / 24 {
            bail!(ObjectError::CountOverrun {
                what: "num_obu_ids",
                count: num_obu_ids,
            });
        }

        let mut entries = Vec::with_capacity(num_obu_ids as usize);
        for _ in 0..num_obu_ids {
            let obu_id = reader.get_leb128()?;
            let data_type = reader.get_n(1)?;
            let reinitialize_decoder = reader.get()?;
            reader.skip_n(6)?;
            let relative_offset = reader.get_sleb128()?;

            entries.push(SyncEntry {
                obu_id,
                data_type,
                reinitialize_decoder,
                relative_offset,
            });
        }

        Ok(Self {
            global_offset,
            entries,
        })
    }
}
