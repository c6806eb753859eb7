//! Core decoder abstraction.
//!
//! Audio elements are carried in substreams coded by an external codec. Each
//! codec is reached through a [`DecoderFactory`] registered per [`CodecId`]
//! in a [`CodecRegistry`]. A factory opens a [`CoreDecoder`] for one group of
//! substreams; dropping the decoder closes it.
//!
//! Decoded output is planar `f32` in `[-1.0, 1.0)`: coupled substreams come
//! first and contribute two channels each, the remaining substreams one.

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::debug;

use crate::structs::audio_element::{AMBISONICS_SILENT, AmbisonicsConfig};
use crate::structs::codec_config::{CodecId, LpcmConfig};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::CodecError;

/// Everything a backend needs to open a decoder.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    pub codec_id: CodecId,
    /// Codec specific configuration bytes from the codec config OBU.
    pub decoder_config: &'a [u8],
    pub sample_rate: u32,
    /// Nominal samples per channel per frame.
    pub frame_size: usize,
    pub substreams: usize,
    pub coupled_substreams: usize,
}

impl CodecContext<'_> {
    pub fn channels(&self) -> usize {
        self.substreams + self.coupled_substreams
    }
}

/// Decoder for one group of substreams.
pub trait CoreDecoder: Send {
    /// Decodes one packet per substream, in substream order, into planar
    /// channels. All channels have the same length, the decoded sample count.
    fn decode(&mut self, packets: &[&[u8]]) -> Result<Vec<Vec<f32>>>;
}

/// Opens a [`CoreDecoder`] for the given context.
pub type DecoderFactory = fn(&CodecContext) -> Result<Box<dyn CoreDecoder>>;

/// Codec backends by codec id. LPCM is built in.
#[derive(Clone)]
pub struct CodecRegistry {
    factories: HashMap<CodecId, DecoderFactory>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(CodecId::Lpcm, LpcmDecoder::open);
        registry
    }
}

impl CodecRegistry {
    /// Adds or replaces the backend of `codec_id`.
    pub fn register(&mut self, codec_id: CodecId, factory: DecoderFactory) {
        self.factories.insert(codec_id, factory);
    }

    pub fn supports(&self, codec_id: CodecId) -> bool {
        self.factories.contains_key(&codec_id)
    }

    pub fn open(&self, ctx: &CodecContext) -> Result<Box<dyn CoreDecoder>> {
        let Some(factory) = self.factories.get(&ctx.codec_id) else {
            bail!(CodecError::Unsupported(ctx.codec_id.to_string()));
        };

        debug!(
            "Opening {} decoder: {} substreams ({} coupled), {} Hz",
            ctx.codec_id, ctx.substreams, ctx.coupled_substreams, ctx.sample_rate
        );
        factory(ctx)
    }

    /// Opens the decoder of a scene-based element, wrapped to produce
    /// ambisonics channels in ACN order.
    pub fn open_ambisonics(
        &self,
        ctx: &CodecContext,
        config: &AmbisonicsConfig,
    ) -> Result<Box<dyn CoreDecoder>> {
        let inner = self.open(ctx)?;

        Ok(match config {
            AmbisonicsConfig::Mono {
                substream_count,
                channel_mapping,
                ..
            } => Box::new(MonoAmbisonics::new(
                inner,
                *substream_count as usize,
                channel_mapping,
            )?),
            AmbisonicsConfig::Projection { .. } => Box::new(ProjectionDecoder::new(inner, config)?),
        })
    }
}

/// Uncompressed PCM, interleaved within each substream packet.
#[derive(Debug)]
pub struct LpcmDecoder {
    config: LpcmConfig,
    substreams: usize,
    coupled_substreams: usize,
}

impl LpcmDecoder {
    pub fn open(ctx: &CodecContext) -> Result<Box<dyn CoreDecoder>> {
        let config = LpcmConfig::read(&mut BsIoSliceReader::from_slice(ctx.decoder_config))?;
        if ctx.coupled_substreams > ctx.substreams {
            bail!(CodecError::BadConfig(
                "more coupled substreams than substreams"
            ));
        }

        Ok(Box::new(Self {
            config,
            substreams: ctx.substreams,
            coupled_substreams: ctx.coupled_substreams,
        }))
    }

    fn sample(&self, bytes: &[u8]) -> f32 {
        let bits = self.config.sample_size as u32;
        let mut value = 0u32;
        if self.config.little_endian {
            for &b in bytes.iter().rev() {
                value = (value << 8) | b as u32;
            }
        } else {
            for &b in bytes {
                value = (value << 8) | b as u32;
            }
        }

        let shift = 32 - bits;
        let value = ((value << shift) as i32) >> shift;
        value as f32 / (1u64 << (bits - 1)) as f32
    }
}

impl CoreDecoder for LpcmDecoder {
    fn decode(&mut self, packets: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
        if packets.len() != self.substreams {
            bail!(CodecError::SubstreamCount {
                expected: self.substreams,
                got: packets.len(),
            });
        }

        let bytes = self.config.sample_size as usize / 8;
        let mut channels = Vec::with_capacity(self.substreams + self.coupled_substreams);

        for (i, packet) in packets.iter().enumerate() {
            let width = if i < self.coupled_substreams { 2 } else { 1 };
            let frame_bytes = bytes * width;
            if packet.len() % frame_bytes != 0 {
                bail!(CodecError::BadPacket {
                    size: packet.len(),
                    frame_bytes,
                });
            }

            let mut planes = vec![Vec::with_capacity(packet.len() / frame_bytes); width];
            for frame in packet.chunks_exact(frame_bytes) {
                for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(bytes)) {
                    plane.push(self.sample(sample));
                }
            }
            channels.extend(planes);
        }

        // Substreams of unequal length are cut to the shortest
        let samples = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(samples);
        }

        Ok(channels)
    }
}

/// Ambisonics mono mode: each ambisonics channel copies one substream or
/// stays silent.
pub struct MonoAmbisonics {
    inner: Box<dyn CoreDecoder>,
    mapping: Vec<u8>,
}

impl MonoAmbisonics {
    pub fn new(inner: Box<dyn CoreDecoder>, substreams: usize, mapping: &[u8]) -> Result<Self> {
        if mapping
            .iter()
            .any(|&m| m != AMBISONICS_SILENT && m as usize >= substreams)
        {
            bail!(CodecError::BadConfig(
                "ambisonics channel mapping exceeds the substream count"
            ));
        }

        Ok(Self {
            inner,
            mapping: mapping.to_vec(),
        })
    }
}

impl CoreDecoder for MonoAmbisonics {
    fn decode(&mut self, packets: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
        let decoded = self.inner.decode(packets)?;
        let samples = decoded.first().map_or(0, Vec::len);

        Ok(self
            .mapping
            .iter()
            .map(|&m| match decoded.get(m as usize) {
                Some(channel) if m != AMBISONICS_SILENT => channel.clone(),
                _ => vec![0.0; samples],
            })
            .collect())
    }
}

/// Ambisonics projection mode: decoded channels are multiplied by the
/// element's demixing matrix.
pub struct ProjectionDecoder {
    inner: Box<dyn CoreDecoder>,
    /// `[output channel][decoded channel]`
    matrix: Vec<Vec<f32>>,
}

impl ProjectionDecoder {
    pub fn new(inner: Box<dyn CoreDecoder>, config: &AmbisonicsConfig) -> Result<Self> {
        let AmbisonicsConfig::Projection {
            output_channel_count,
            demixing_matrix,
            ..
        } = config
        else {
            bail!(CodecError::BadConfig("not a projection ambisonics config"));
        };

        let outputs = *output_channel_count as usize;
        let (substreams, coupled) = config.substream_counts();
        let inputs = substreams + coupled;
        if demixing_matrix.len() != outputs * inputs {
            bail!(CodecError::BadConfig(
                "demixing matrix size does not match channel counts"
            ));
        }

        let matrix = (0..outputs)
            .map(|r| {
                (0..inputs)
                    .map(|l| demixing_matrix[l * outputs + r] as f32 / 32768.0)
                    .collect()
            })
            .collect();

        Ok(Self { inner, matrix })
    }
}

impl CoreDecoder for ProjectionDecoder {
    fn decode(&mut self, packets: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
        let decoded = self.inner.decode(packets)?;
        let samples = decoded.first().map_or(0, Vec::len);

        let mut out = vec![vec![0.0; samples]; self.matrix.len()];
        for (row, channel) in self.matrix.iter().zip(out.iter_mut()) {
            for (&m, input) in row.iter().zip(&decoded) {
                if m == 0.0 {
                    continue;
                }
                for (o, &x) in channel.iter_mut().zip(input) {
                    *o += m * x;
                }
            }
        }

        Ok(out)
    }
}
