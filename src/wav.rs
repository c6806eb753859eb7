use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use iamfd_macros::{ToBytes, riff_chunk};

use crate::byteorder::WriteBytesLe;

pub const RIFF_ID: [u8; 4] = *b"RIFF";
pub const WAVE_ID: [u8; 4] = *b"WAVE";
pub const DATA_ID: [u8; 4] = *b"data";

/// Bytes from the start of the file to the first sample.
const HEADER_SIZE: u64 = 44;

pub trait RiffChunk: WriteBytesLe {
    fn chunk_id(&self) -> &[u8; 4];
    fn chunk_data(&self) -> Vec<u8>;
}

#[riff_chunk(b"fmt ")]
#[derive(Debug, Clone, ToBytes)]
pub struct FormatChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

impl FormatChunk {
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let block_align = channels * (bits_per_sample / 8);
        Self {
            format_tag: 1,
            channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample,
        }
    }
}

/// RIFF WAVE writer for interleaved 16-bit PCM.
pub struct WAVWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    data_written: u64,
}

impl<W: Write + Seek> WAVWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            data_written: 0,
        }
    }

    /// Writes the header with zero sizes, patched by [`finish`](Self::finish).
    pub fn write_header(&mut self, sample_rate: u32, channels: u16) -> io::Result<()> {
        if self.data_written > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot change format after writing data",
            ));
        }

        let format = FormatChunk::pcm(sample_rate, channels, 16);
        let fmt_data = format.chunk_data();

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        RIFF_ID.write_le(&mut header);
        0u32.write_le(&mut header);
        WAVE_ID.write_le(&mut header);
        format.chunk_id().write_le(&mut header);
        (format.le_len() as u32).write_le(&mut header);
        header.extend_from_slice(&fmt_data);
        DATA_ID.write_le(&mut header);
        0u32.write_le(&mut header);

        self.writer.write_all(&header)
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> io::Result<()> {
        let bytes = samples.to_le_vec();
        self.writer.write_all(&bytes)?;
        self.data_written += bytes.len() as u64;
        Ok(())
    }

    /// Patches the RIFF and data chunk sizes.
    pub fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let end = self.writer.stream_position()?;

        let riff_size = u32::try_from(end - 8).unwrap_or(u32::MAX);
        let data_size = u32::try_from(self.data_written).unwrap_or(u32::MAX);

        self.writer.seek(SeekFrom::Start(4))?;
        self.writer.write_all(&riff_size.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(HEADER_SIZE - 4))?;
        self.writer.write_all(&data_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    pub fn data_written(&self) -> u64 {
        self.data_written
    }
}
