use anyhow::Result;

use crate::structs::obu::{Obu, ObuType};
use crate::utils::bitstream_io::BsIoSliceReader;

/// One substream's coded audio for one frame, borrowed from the input.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub substream_id: u64,
    pub trim_start: u64,
    pub trim_end: u64,
    pub data: &'a [u8],
}

impl<'a> AudioFrame<'a> {
    pub fn from_obu(obu: &Obu<'a>) -> Result<Self> {
        let (substream_id, data) = match obu.obu_type {
            ObuType::AudioFrameId(n) => (n as u64, obu.payload),
            _ => {
                let reader = &mut BsIoSliceReader::from_slice(obu.payload);
                let substream_id = reader.get_leb128()?;
                let offset = reader.position_bytes()?;
                (substream_id, &obu.payload[offset..])
            }
        };

        Ok(Self {
            substream_id,
            trim_start: obu.trim_start,
            trim_end: obu.trim_end,
            data,
        })
    }
}
