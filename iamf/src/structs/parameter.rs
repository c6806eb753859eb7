//! Parameter blocks: time-varying mix gain, demixing mode and recon gain.

use anyhow::{Result, bail};

use crate::structs::param_definition::{ParamDefinition, ParameterType, Timing};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ParameterError;

/// Channels addressable by a recon-gain flag word.
pub const RECON_GAIN_CHANNELS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixGainCurve {
    Step {
        start: i16,
    },
    Linear {
        start: i16,
        end: i16,
    },
    Bezier {
        start: i16,
        end: i16,
        control: i16,
        /// Q0.8 fraction of the subblock.
        control_relative_time: u8,
    },
}

impl MixGainCurve {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let animation_type = reader.get_leb128()?;

        Ok(match animation_type {
            0 => Self::Step {
                start: reader.get_i16()?,
            },
            1 => Self::Linear {
                start: reader.get_i16()?,
                end: reader.get_i16()?,
            },
            2 => Self::Bezier {
                start: reader.get_i16()?,
                end: reader.get_i16()?,
                control: reader.get_i16()?,
                control_relative_time: reader.get_u8()?,
            },
            other => bail!(ParameterError::UnknownAnimation(other)),
        })
    }
}

/// Recon gains of one channel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconGain {
    pub layer: usize,
    pub flags: u32,
    /// Q0.8 gain per channel bit, 255 where the flag is clear.
    pub gains: [u8; RECON_GAIN_CHANNELS],
}

impl ReconGain {
    fn read(reader: &mut BsIoSliceReader, layer: usize) -> Result<Self> {
        let flags = reader.get_leb128()? as u32;
        let mut gains = [255u8; RECON_GAIN_CHANNELS];

        for (bit, gain) in gains.iter_mut().enumerate() {
            if flags & (1 << bit) != 0 {
                *gain = reader.get_u8()?;
            }
        }

        Ok(Self {
            layer,
            flags,
            gains,
        })
    }

    /// Linear gain for the channel at `bit`.
    pub fn gain(&self, bit: usize) -> f32 {
        match self.gains.get(bit) {
            Some(&g) if self.flags & (1 << bit) != 0 => g as f32 / 255.0,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubblockData {
    MixGain(MixGainCurve),
    Demixing { mode: u8 },
    ReconGain(Vec<ReconGain>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subblock {
    pub duration: u64,
    pub data: SubblockData,
}

/// What a parameter block needs to know about its definition.
#[derive(Debug, Clone, Copy)]
pub struct ParameterContext<'a> {
    pub kind: ParameterType,
    pub definition: &'a ParamDefinition,
    /// One bit per channel layer that carries recon gain.
    pub recon_gain_flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlock {
    pub id: u64,
    pub kind: ParameterType,
    pub duration: u64,
    pub subblocks: Vec<Subblock>,
}

impl ParameterBlock {
    /// Reads the block after `parameter_id`, which the caller has already
    /// consumed to find `ctx`.
    pub fn read(reader: &mut BsIoSliceReader, id: u64, ctx: &ParameterContext) -> Result<Self> {
        let timing = match &ctx.definition.timing {
            Some(timing) => timing.clone(),
            None => Timing::read(reader, id)?,
        };

        let mut subblocks = Vec::with_capacity(timing.num_subblocks());
        for &duration in &timing.intervals {
            let data = match ctx.kind {
                ParameterType::MixGain => SubblockData::MixGain(MixGainCurve::read(reader)?),
                ParameterType::Demixing => {
                    let mode = reader.get_n(3)?;
                    reader.skip_n(5)?;
                    SubblockData::Demixing { mode }
                }
                ParameterType::ReconGain => {
                    let gains = (0..8)
                        .filter(|&layer| ctx.recon_gain_flags & (1 << layer) != 0)
                        .map(|layer| ReconGain::read(reader, layer))
                        .collect::<Result<Vec<_>>>()?;
                    SubblockData::ReconGain(gains)
                }
            };

            subblocks.push(Subblock { duration, data });
        }

        Ok(Self {
            id,
            kind: ctx.kind,
            duration: timing.duration,
            subblocks,
        })
    }

    /// Subblock covering `offset` samples into this block, or `None` past its end.
    pub fn segment(&self, offset: i64) -> Option<(i64, &Subblock)> {
        if offset < 0 || offset as u64 >= self.duration {
            return None;
        }

        let mut start = 0i64;
        for subblock in &self.subblocks {
            let end = start + subblock.duration as i64;
            if end > offset {
                return Some((start, subblock));
            }
            start = end;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::PayloadWriter;

    fn definition(duration: Option<u64>) -> ParamDefinition {
        ParamDefinition {
            parameter_id: 1,
            parameter_rate: 48000,
            mode: duration.is_none(),
            timing: duration.map(|d| Timing {
                duration: d,
                constant_subblock_duration: d,
                intervals: vec![d],
            }),
        }
    }

    #[test]
    fn mix_gain_block_with_own_timing() -> Result<()> {
        let def = definition(None);
        let ctx = ParameterContext {
            kind: ParameterType::MixGain,
            definition: &def,
            recon_gain_flags: 0,
        };
        let payload = PayloadWriter::new()
            .leb(960)
            .leb(0)
            .leb(2)
            .leb(480)
            .leb(480)
            .leb(0)
            .i16(-768)
            .leb(1)
            .i16(0)
            .i16(-256)
            .finish();

        let block = ParameterBlock::read(&mut BsIoSliceReader::from_slice(&payload), 1, &ctx)?;
        assert_eq!(block.subblocks.len(), 2);
        assert_eq!(
            block.subblocks[0].data,
            SubblockData::MixGain(MixGainCurve::Step { start: -768 })
        );

        let (start, second) = block.segment(500).expect("inside block");
        assert_eq!(start, 480);
        assert_eq!(
            second.data,
            SubblockData::MixGain(MixGainCurve::Linear { start: 0, end: -256 })
        );
        assert!(block.segment(960).is_none());
        assert!(block.segment(-1).is_none());

        Ok(())
    }

    #[test]
    fn recon_gain_per_flagged_layer() -> Result<()> {
        let def = definition(Some(960));
        let ctx = ParameterContext {
            kind: ParameterType::ReconGain,
            definition: &def,
            recon_gain_flags: 0b110,
        };
        let payload = PayloadWriter::new()
            .leb(0b101)
            .u8(200)
            .u8(100)
            .leb(0)
            .finish();

        let block = ParameterBlock::read(&mut BsIoSliceReader::from_slice(&payload), 1, &ctx)?;
        let SubblockData::ReconGain(gains) = &block.subblocks[0].data else {
            panic!("expected recon gain");
        };
        assert_eq!(gains.len(), 2);
        assert_eq!(gains[0].layer, 1);
        assert_eq!(gains[0].gains[0], 200);
        assert_eq!(gains[0].gains[2], 100);
        assert_eq!(gains[0].gain(1), 1.0);
        assert_eq!(gains[1].layer, 2);
        assert_eq!(gains[1].flags, 0);

        Ok(())
    }

    #[test]
    fn unknown_animation_type() {
        let def = definition(Some(10));
        let ctx = ParameterContext {
            kind: ParameterType::MixGain,
            definition: &def,
            recon_gain_flags: 0,
        };
        let payload = PayloadWriter::new().leb(3).finish();
        assert!(ParameterBlock::read(&mut BsIoSliceReader::from_slice(&payload), 1, &ctx).is_err());
    }
}
