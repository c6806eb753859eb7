//! Parameter definitions and subblock timing.

use std::fmt::Display;

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{ObjectError, ParameterError};

/// Upper bound on subblocks in one parameter block.
pub const MAX_SUBBLOCKS: usize = 1 << 16;

/// Upper bound on the ticks one parameter period may span. Mix-gain curves
/// are expanded to one value per tick.
pub const MAX_DURATION: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    MixGain,
    Demixing,
    ReconGain,
}

impl ParameterType {
    /// `param_definition_type` as carried by audio element descriptors.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::MixGain),
            1 => Some(Self::Demixing),
            2 => Some(Self::ReconGain),
            _ => None,
        }
    }
}

impl Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MixGain => write!(f, "mix gain"),
            Self::Demixing => write!(f, "demixing"),
            Self::ReconGain => write!(f, "recon gain"),
        }
    }
}

/// Timing of the subblocks making up one parameter period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timing {
    pub duration: u64,
    pub constant_subblock_duration: u64,
    /// One entry per subblock, always summing to `duration`.
    pub intervals: Vec<u64>,
}

impl Timing {
    pub fn read(reader: &mut BsIoSliceReader, parameter_id: u64) -> Result<Self> {
        let duration = reader.get_leb128()?;
        let constant_subblock_duration = reader.get_leb128()?;

        if duration == 0 {
            bail!(ParameterError::ZeroDuration(parameter_id));
        }
        if duration > MAX_DURATION {
            bail!(ParameterError::DurationTooLong {
                id: parameter_id,
                duration,
                max: MAX_DURATION,
            });
        }

        let intervals = if constant_subblock_duration != 0 {
            let count = duration.div_ceil(constant_subblock_duration);
            if count > MAX_SUBBLOCKS as u64 {
                bail!(ParameterError::TooManySubblocks {
                    id: parameter_id,
                    count,
                    max: MAX_SUBBLOCKS,
                });
            }

            let mut intervals = vec![constant_subblock_duration; count as usize];
            let remainder = duration - constant_subblock_duration * (count - 1);
            if let Some(last) = intervals.last_mut() {
                *last = remainder;
            }
            intervals
        } else {
            let count = reader.get_leb128()?;
            // every explicit duration takes at least one byte
            if count > reader.available()? / 8 {
                bail!(ObjectError::CountOverrun {
                    what: "num_subblocks",
                    count,
                });
            }

            let intervals = (0..count)
                .map(|_| reader.get_leb128())
                .collect::<std::io::Result<Vec<_>>>()?;

            let sum = intervals.iter().fold(0u64, |acc, &d| acc.saturating_add(d));
            if sum != duration {
                bail!(ParameterError::DurationMismatch {
                    id: parameter_id,
                    sum,
                    duration,
                });
            }
            intervals
        };

        Ok(Self {
            duration,
            constant_subblock_duration,
            intervals,
        })
    }

    pub fn num_subblocks(&self) -> usize {
        self.intervals.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDefinition {
    pub parameter_id: u64,
    pub parameter_rate: u64,
    /// `param_definition_mode`: when set, each parameter block carries its
    /// own timing instead of inheriting `timing`.
    pub mode: bool,
    pub timing: Option<Timing>,
}

impl ParamDefinition {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let parameter_id = reader.get_leb128()?;
        let parameter_rate = reader.get_leb128()?;
        let mode = reader.get()?;
        reader.skip_n(7)?;

        let timing = if mode {
            None
        } else {
            Some(Timing::read(reader, parameter_id)?)
        };

        Ok(Self {
            parameter_id,
            parameter_rate,
            mode,
            timing,
        })
    }
}

/// Extra fields of a demixing parameter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemixingInfo {
    pub dmixp_mode: u8,
    pub default_w: u8,
}

impl DemixingInfo {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let dmixp_mode = reader.get_n(3)?;
        reader.skip_n(5)?;
        let default_w = reader.get_n(4)?;
        reader.skip_n(4)?;

        Ok(Self {
            dmixp_mode,
            default_w,
        })
    }
}
