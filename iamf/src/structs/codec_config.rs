//! Codec configuration descriptors.
//!
//! A codec config names the core codec by its four-character code and carries
//! the codec-specific decoder config verbatim. Only the sample rate is pulled
//! out of it here; everything else is left to the codec backend.

use std::fmt::Display;

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::CodecError;

/// Output rate of every Opus decoder, regardless of the input rate field.
pub const OPUS_SAMPLE_RATE: u32 = 48000;

/// Largest `num_samples_per_frame` accepted from a codec config.
pub const MAX_FRAME_SIZE: u64 = 1 << 16;

const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Opus,
    Aac,
    Flac,
    Lpcm,
    Unknown(u32),
}

impl CodecId {
    pub fn from_fourcc(fourcc: u32) -> Self {
        match &fourcc.to_be_bytes() {
            b"Opus" => Self::Opus,
            b"mp4a" => Self::Aac,
            b"fLaC" => Self::Flac,
            b"ipcm" => Self::Lpcm,
            _ => Self::Unknown(fourcc),
        }
    }

    pub fn fourcc(self) -> u32 {
        u32::from_be_bytes(match self {
            Self::Opus => *b"Opus",
            Self::Aac => *b"mp4a",
            Self::Flac => *b"fLaC",
            Self::Lpcm => *b"ipcm",
            Self::Unknown(fourcc) => return fourcc,
        })
    }
}

impl Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opus => write!(f, "Opus"),
            Self::Aac => write!(f, "AAC-LC"),
            Self::Flac => write!(f, "FLAC"),
            Self::Lpcm => write!(f, "LPCM"),
            Self::Unknown(fourcc) => {
                write!(f, "unknown ({})", String::from_utf8_lossy(&fourcc.to_be_bytes()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub id: u64,
    pub codec_id: CodecId,
    /// Samples per channel in every audio frame, before trimming.
    pub frame_size: u64,
    pub roll_distance: i16,
    pub decoder_config: Vec<u8>,

    /// Bytes taken by the fixed fields preceding `decoder_config`.
    pub fields_size: usize,
    pub redundant: bool,
}

impl CodecConfig {
    pub fn read(reader: &mut BsIoSliceReader, payload_size: usize) -> Result<Self> {
        let id = reader.get_leb128()?;
        let codec_id = CodecId::from_fourcc(reader.get_u32()?);
        let frame_size = reader.get_leb128()?;
        let roll_distance = reader.get_i16()?;

        let fields_size = reader.position_bytes()?;
        let decoder_config = reader.get_bytes(payload_size.saturating_sub(fields_size))?;

        if frame_size == 0 {
            bail!(CodecError::BadConfig("num_samples_per_frame is zero"));
        }
        if frame_size > MAX_FRAME_SIZE {
            bail!(CodecError::BadConfig("num_samples_per_frame exceeds 65536"));
        }

        Ok(Self {
            id,
            codec_id,
            frame_size,
            roll_distance,
            decoder_config,
            fields_size,
            redundant: false,
        })
    }

    pub fn decoder_config_size(&self) -> usize {
        self.decoder_config.len()
    }

    pub fn sample_rate(&self) -> Result<u32> {
        let reader = &mut BsIoSliceReader::from_slice(&self.decoder_config);

        Ok(match self.codec_id {
            CodecId::Opus => OPUS_SAMPLE_RATE,
            CodecId::Lpcm => LpcmConfig::read(reader)?.sample_rate,
            CodecId::Flac => {
                // METADATA_BLOCK_HEADER, then STREAMINFO block and frame sizes
                reader.skip_bytes(4 + 10)?;
                reader.get_n(20)?
            }
            CodecId::Aac => aac_sample_rate(reader)?,
            CodecId::Unknown(_) => bail!(CodecError::Unsupported(self.codec_id.to_string())),
        })
    }
}

/// Decoder config of the `ipcm` codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpcmConfig {
    pub little_endian: bool,
    pub sample_size: u8,
    pub sample_rate: u32,
}

impl LpcmConfig {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let format_flags = reader.get_u8()?;
        let sample_size = reader.get_u8()?;
        let sample_rate = reader.get_u32()?;

        if !matches!(sample_size, 16 | 24 | 32) {
            bail!(CodecError::BadConfig("LPCM sample size must be 16, 24 or 32"));
        }

        Ok(Self {
            little_endian: format_flags & 1 != 0,
            sample_size,
            sample_rate,
        })
    }
}

/// Expandable descriptor size: 7 bits per byte, at most 4 bytes.
fn descriptor_size(reader: &mut BsIoSliceReader) -> Result<u32> {
    let mut size = 0u32;
    for _ in 0..4 {
        let byte = reader.get_u8()?;
        size = (size << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(size)
}

/// Walks DecoderConfigDescriptor down to the AudioSpecificConfig rate.
fn aac_sample_rate(reader: &mut BsIoSliceReader) -> Result<u32> {
    if reader.get_u8()? != 0x04 {
        bail!(CodecError::BadConfig("missing DecoderConfigDescriptor tag"));
    }
    descriptor_size(reader)?;
    // objectTypeIndication, streamType, bufferSizeDB, maxBitrate, avgBitrate
    reader.skip_bytes(1 + 1 + 3 + 4 + 4)?;

    if reader.get_u8()? != 0x05 {
        bail!(CodecError::BadConfig("missing DecoderSpecificInfo tag"));
    }
    descriptor_size(reader)?;

    let object_type: u8 = reader.get_n(5)?;
    if object_type == 31 {
        reader.skip_n(6)?;
    }

    let index: u8 = reader.get_n(4)?;
    match index {
        0x0F => Ok(reader.get_n(24)?),
        index => match AAC_SAMPLE_RATES.get(index as usize) {
            Some(&rate) => Ok(rate),
            None => bail!(CodecError::BadConfig("reserved AAC sampling frequency index")),
        },
    }
}
