//! OBU framing.
//!
//! Every record in the stream starts with a one-byte header
//! (`type(5) redundant(1) trimming(1) extension(1)`) followed by a LEB128
//! size covering the rest of the record. Trimming and extension fields, when
//! flagged, sit at the front of that sized region.

use std::fmt::Display;
use std::io;

use anyhow::{Result, bail};
use log::trace;

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ObuError;

/// First OBU type that carries an implicit substream id.
pub const AUDIO_FRAME_ID_BASE: u8 = 9;

/// Last OBU type that carries an implicit substream id.
pub const AUDIO_FRAME_ID_LAST: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObuType {
    CodecConfig,
    AudioElement,
    MixPresentation,
    ParameterBlock,
    TemporalDelimiter,
    Sync,
    /// Audio frame whose payload starts with an explicit substream id.
    AudioFrame,
    /// Audio frame for implicit substream `n`.
    AudioFrameId(u8),
    MagicCode,
    Reserved(u8),
}

impl ObuType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::CodecConfig,
            1 => Self::AudioElement,
            2 => Self::MixPresentation,
            3 => Self::ParameterBlock,
            4 => Self::TemporalDelimiter,
            5 => Self::Sync,
            8 => Self::AudioFrame,
            AUDIO_FRAME_ID_BASE..=AUDIO_FRAME_ID_LAST => {
                Self::AudioFrameId(code - AUDIO_FRAME_ID_BASE)
            }
            31 => Self::MagicCode,
            code => Self::Reserved(code),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::CodecConfig => 0,
            Self::AudioElement => 1,
            Self::MixPresentation => 2,
            Self::ParameterBlock => 3,
            Self::TemporalDelimiter => 4,
            Self::Sync => 5,
            Self::AudioFrame => 8,
            Self::AudioFrameId(n) => AUDIO_FRAME_ID_BASE + n,
            Self::MagicCode => 31,
            Self::Reserved(code) => code,
        }
    }

    /// Descriptor OBUs describe the stream and are consumed by `configure`.
    pub fn is_descriptor(self) -> bool {
        matches!(
            self,
            Self::MagicCode | Self::CodecConfig | Self::AudioElement | Self::MixPresentation
        )
    }

    pub fn is_audio_frame(self) -> bool {
        matches!(self, Self::AudioFrame | Self::AudioFrameId(_))
    }
}

impl Display for ObuType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodecConfig => write!(f, "codec config"),
            Self::AudioElement => write!(f, "audio element"),
            Self::MixPresentation => write!(f, "mix presentation"),
            Self::ParameterBlock => write!(f, "parameter block"),
            Self::TemporalDelimiter => write!(f, "temporal delimiter"),
            Self::Sync => write!(f, "sync"),
            Self::AudioFrame => write!(f, "audio frame"),
            Self::AudioFrameId(n) => write!(f, "audio frame (substream {n})"),
            Self::MagicCode => write!(f, "magic code"),
            Self::Reserved(code) => write!(f, "reserved ({code})"),
        }
    }
}

/// One framed record, borrowing its payload from the input buffer.
#[derive(Debug, Clone)]
pub struct Obu<'a> {
    pub obu_type: ObuType,
    pub redundant: bool,
    pub trimming: bool,
    pub extension: bool,

    /// Size declared in the header, counted from after the size field.
    pub payload_size: usize,

    pub trim_start: u64,
    pub trim_end: u64,

    pub extension_size: usize,
    /// Byte offset of the extension header within the record.
    pub extension_offset: usize,

    /// Total bytes the record occupies in the input.
    pub size: usize,

    /// Type-specific payload, after trimming and extension fields.
    pub payload: &'a [u8],
}

impl<'a> Obu<'a> {
    /// Splits the next OBU off the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the whole record; the
    /// caller should retry with more input. Nothing past `buf.len()` is read.
    pub fn split(buf: &'a [u8]) -> Result<Option<Self>> {
        let reader = &mut BsIoSliceReader::from_slice(buf);

        match Self::read_header(reader, buf) {
            Ok(obu) => Ok(obu),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
        .and_then(|obu| match obu {
            Some(mut obu) => {
                obu.read_optional_fields(buf)?;
                trace!(
                    "OBU {}: {} bytes, trim {}/{}",
                    obu.obu_type, obu.size, obu.trim_start, obu.trim_end
                );
                Ok(Some(obu))
            }
            None => Ok(None),
        })
    }

    fn read_header(reader: &mut BsIoSliceReader, buf: &'a [u8]) -> io::Result<Option<Self>> {
        let obu_type = ObuType::from_code(reader.get_n(5)?);
        let redundant = reader.get()?;
        let trimming = reader.get()?;
        let extension = reader.get()?;
        let payload_size = reader.get_leb128()? as usize;
        let header_size = reader.position_bytes()?;

        let Some(size) = header_size.checked_add(payload_size) else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "OBU size overflow"));
        };

        if size > buf.len() {
            return Ok(None);
        }

        Ok(Some(Self {
            obu_type,
            redundant,
            trimming,
            extension,
            payload_size,
            trim_start: 0,
            trim_end: 0,
            extension_size: 0,
            extension_offset: 0,
            size,
            payload: &buf[header_size..size],
        }))
    }

    fn read_optional_fields(&mut self, buf: &'a [u8]) -> Result<()> {
        let record = &buf[..self.size];
        let reader = &mut BsIoSliceReader::from_slice(record);
        let header_size = self.size - self.payload_size;
        reader.skip_bytes(header_size as u64)?;

        let overrun = |needed: usize, size: usize| ObuError::HeaderOverrun { needed, size };

        if self.trimming {
            self.trim_end = reader.get_leb128().map_err(|_| overrun(header_size + 1, self.size))?;
            self.trim_start = reader.get_leb128().map_err(|_| overrun(header_size + 2, self.size))?;
        }

        if self.extension {
            let ext_size = reader.get_leb128().map_err(|_| overrun(header_size + 1, self.size))?;
            self.extension_offset = reader.position_bytes()?;
            let ext_end = self.extension_offset as u64 + ext_size;
            if ext_end > self.size as u64 {
                bail!(overrun(ext_end as usize, self.size));
            }
            self.extension_size = ext_size as usize;
            reader.skip_bytes(ext_size)?;
        }

        let start = reader.position_bytes()?;
        self.payload = &record[start..];

        Ok(())
    }

    /// Bytes of header fields preceding the type-specific payload.
    pub fn header_fields_size(&self) -> usize {
        self.size - self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{obu, obu_with};

    #[test]
    fn splits_header_and_payload() -> Result<()> {
        let mut data = obu_with(ObuType::CodecConfig, true, Some((5, 10)), &[1, 2, 3]);
        data.extend(obu(ObuType::TemporalDelimiter, &[]));

        let first = Obu::split(&data)?.expect("complete OBU");
        assert_eq!(first.obu_type, ObuType::CodecConfig);
        assert!(first.redundant);
        assert_eq!(first.trim_end, 5);
        assert_eq!(first.trim_start, 10);
        assert_eq!(first.payload, &[1, 2, 3]);
        assert_eq!(first.size, 7);

        let second = Obu::split(&data[first.size..])?.expect("complete OBU");
        assert_eq!(second.obu_type, ObuType::TemporalDelimiter);
        assert!(second.payload.is_empty());
        assert_eq!(second.size, 2);

        Ok(())
    }

    #[test]
    fn truncated_obu_consumes_nothing() -> Result<()> {
        let data = obu(ObuType::AudioFrameId(2), &[0u8; 300]);

        for cut in 0..data.len() {
            assert!(Obu::split(&data[..cut])?.is_none(), "cut at {cut}");
        }
        assert!(Obu::split(&data)?.is_some());

        Ok(())
    }

    #[test]
    fn extension_header_is_skipped() -> Result<()> {
        // type 1, extension flag, size 6: ext_size 2, ext bytes, payload 0xAA 0xBB 0xCC
        let data = [0x09, 0x06, 0x02, 0xEE, 0xEE, 0xAA, 0xBB, 0xCC];
        let obu = Obu::split(&data)?.expect("complete OBU");

        assert_eq!(obu.obu_type, ObuType::AudioElement);
        assert_eq!(obu.extension_size, 2);
        assert_eq!(obu.extension_offset, 3);
        assert_eq!(obu.payload, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(obu.header_fields_size(), 5);

        Ok(())
    }

    #[test]
    fn oversized_extension_is_rejected() {
        let data = [0x09, 0x02, 0x05, 0x00];
        assert!(Obu::split(&data).is_err());
    }

    #[test]
    fn implicit_substream_types() {
        assert_eq!(ObuType::from_code(9), ObuType::AudioFrameId(0));
        assert_eq!(ObuType::from_code(30), ObuType::AudioFrameId(21));
        assert_eq!(ObuType::AudioFrameId(21).code(), 30);
        assert_eq!(ObuType::from_code(6), ObuType::Reserved(6));
    }
}
