//! Audio element descriptors.
//!
//! An audio element is either a scalable channel layout (a stack of layers,
//! each adding channels to the one below) or an ambisonics scene. Both are
//! carried in one or more substreams of a single codec config.

use anyhow::{Result, bail};
use log::debug;

use crate::structs::layout::LoudspeakerLayout;
use crate::structs::param_definition::{DemixingInfo, ParamDefinition, ParameterType};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ObjectError;

/// Maximum layers of a scalable channel layout.
pub const MAX_CHANNEL_LAYERS: usize = 6;

/// Channel mapping entry for an ambisonics channel with no substream.
pub const AMBISONICS_SILENT: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioElementType {
    ChannelBased,
    SceneBased,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayer {
    pub layout: LoudspeakerLayout,
    pub output_gain_present: bool,
    pub recon_gain_present: bool,
    pub substream_count: u8,
    pub coupled_substream_count: u8,
    /// Six flags, MSB first: L, R, Ls, Rs, Ltf, Rtf.
    pub output_gain_flags: u8,
    /// Q7.8 dB.
    pub output_gain: i16,
}

impl ChannelLayer {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let layout = LoudspeakerLayout::from_code(reader.get_n(4)?)?;
        let output_gain_present = reader.get()?;
        let recon_gain_present = reader.get()?;
        reader.skip_n(2)?;

        let mut layer = Self {
            layout,
            output_gain_present,
            recon_gain_present,
            substream_count: reader.get_u8()?,
            coupled_substream_count: reader.get_u8()?,
            output_gain_flags: 0,
            output_gain: 0,
        };

        if output_gain_present {
            layer.output_gain_flags = reader.get_n(6)?;
            reader.skip_n(2)?;
            layer.output_gain = reader.get_i16()?;
        }

        Ok(layer)
    }

    /// Channels produced by decoding this layer's substreams alone.
    pub fn channels(&self) -> usize {
        self.substream_count as usize + self.coupled_substream_count as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbisonicsConfig {
    Mono {
        output_channel_count: u8,
        substream_count: u8,
        /// Substream index per ambisonics channel, [`AMBISONICS_SILENT`] if none.
        channel_mapping: Vec<u8>,
    },
    Projection {
        output_channel_count: u8,
        substream_count: u8,
        coupled_substream_count: u8,
        /// Q0.15, column-major: `output_channel_count` rows per decoded channel.
        demixing_matrix: Vec<i16>,
    },
}

impl AmbisonicsConfig {
    fn read(reader: &mut BsIoSliceReader, element_id: u64) -> Result<Self> {
        let mode = reader.get_leb128()?;

        match mode {
            0 => {
                let output_channel_count = reader.get_u8()?;
                let substream_count = reader.get_u8()?;
                let channel_mapping = reader.get_bytes(output_channel_count as usize)?;

                Ok(Self::Mono {
                    output_channel_count,
                    substream_count,
                    channel_mapping,
                })
            }
            1 => {
                let output_channel_count = reader.get_u8()?;
                let substream_count = reader.get_u8()?;
                let coupled_substream_count = reader.get_u8()?;

                let size = output_channel_count as usize
                    * (substream_count as usize + coupled_substream_count as usize);
                if (size as u64) * 16 > reader.available()? {
                    bail!(ObjectError::TruncatedDemixingMatrix(element_id));
                }

                let demixing_matrix = (0..size)
                    .map(|_| reader.get_i16())
                    .collect::<std::io::Result<Vec<_>>>()?;

                Ok(Self::Projection {
                    output_channel_count,
                    substream_count,
                    coupled_substream_count,
                    demixing_matrix,
                })
            }
            value => bail!(ObjectError::Reserved {
                what: "ambisonics_mode",
                value,
            }),
        }
    }

    pub fn output_channel_count(&self) -> usize {
        match self {
            Self::Mono {
                output_channel_count,
                ..
            }
            | Self::Projection {
                output_channel_count,
                ..
            } => *output_channel_count as usize,
        }
    }

    /// `(substreams, coupled substreams)` the codec has to decode.
    pub fn substream_counts(&self) -> (usize, usize) {
        match self {
            Self::Mono {
                substream_count, ..
            } => (*substream_count as usize, 0),
            Self::Projection {
                substream_count,
                coupled_substream_count,
                ..
            } => (
                *substream_count as usize,
                *coupled_substream_count as usize,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementConfig {
    ChannelBased(Vec<ChannelLayer>),
    SceneBased(AmbisonicsConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemixingParameter {
    pub definition: ParamDefinition,
    pub info: DemixingInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioElement {
    pub id: u64,
    pub codec_config_id: u64,
    pub substream_ids: Vec<u64>,
    pub demixing: Option<DemixingParameter>,
    pub recon_gain: Option<ParamDefinition>,
    pub config: ElementConfig,
    pub redundant: bool,
}

impl AudioElement {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let id = reader.get_leb128()?;
        let element_type = match reader.get_n::<u8>(3)? {
            0 => AudioElementType::ChannelBased,
            1 => AudioElementType::SceneBased,
            value => bail!(ObjectError::ReservedElementType { id, value }),
        };
        reader.skip_n(5)?;

        let codec_config_id = reader.get_leb128()?;

        let num_substreams = reader.get_leb128()?;
        if num_substreams > reader.available()? / 8 {
            bail!(ObjectError::CountOverrun {
                what: "num_substreams",
                count: num_substreams,
            });
        }
        let substream_ids = (0..num_substreams)
            .map(|_| reader.get_leb128())
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut demixing = None;
        let mut recon_gain = None;

        let num_parameters = reader.get_leb128()?;
        if num_parameters > reader.available()? / 8 {
            bail!(ObjectError::CountOverrun {
                what: "num_parameters",
                count: num_parameters,
            });
        }

        for _ in 0..num_parameters {
            let code = reader.get_leb128()?;
            match ParameterType::from_code(code) {
                Some(ParameterType::Demixing) => {
                    let definition = ParamDefinition::read(reader)?;
                    let info = DemixingInfo::read(reader)?;
                    demixing = Some(DemixingParameter { definition, info });
                }
                Some(ParameterType::ReconGain) => {
                    recon_gain = Some(ParamDefinition::read(reader)?);
                }
                _ => {
                    let size = reader.get_leb128()?;
                    debug!("Element {id}: skipping parameter definition type {code} ({size} bytes)");
                    reader.skip_bytes(size)?;
                }
            }
        }

        let config = match element_type {
            AudioElementType::ChannelBased => {
                let num_layers: u8 = reader.get_n(3)?;
                reader.skip_n(5)?;

                if num_layers as usize > MAX_CHANNEL_LAYERS || num_layers == 0 {
                    bail!(ObjectError::TooManyLayers {
                        id,
                        count: num_layers,
                        max: MAX_CHANNEL_LAYERS,
                    });
                }

                let layers = (0..num_layers)
                    .map(|_| ChannelLayer::read(reader))
                    .collect::<Result<Vec<_>>>()?;
                ElementConfig::ChannelBased(layers)
            }
            AudioElementType::SceneBased => {
                ElementConfig::SceneBased(AmbisonicsConfig::read(reader, id)?)
            }
        };

        Ok(Self {
            id,
            codec_config_id,
            substream_ids,
            demixing,
            recon_gain,
            config,
            redundant: false,
        })
    }

    pub fn element_type(&self) -> AudioElementType {
        match self.config {
            ElementConfig::ChannelBased(_) => AudioElementType::ChannelBased,
            ElementConfig::SceneBased(_) => AudioElementType::SceneBased,
        }
    }

    pub fn layers(&self) -> &[ChannelLayer] {
        match &self.config {
            ElementConfig::ChannelBased(layers) => layers,
            ElementConfig::SceneBased(_) => &[],
        }
    }

    /// One bit per channel layer, set when that layer carries recon gain.
    pub fn recon_gain_flags(&self) -> u8 {
        self.layers()
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.recon_gain_present)
            .fold(0, |flags, (i, _)| flags | (1 << i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::obu::Obu;
    use crate::utils::testing::{PayloadWriter, channel_element};

    fn read(obu: &[u8]) -> Result<AudioElement> {
        let obu = Obu::split(obu)?.expect("complete OBU");
        AudioElement::read(&mut BsIoSliceReader::from_slice(obu.payload))
    }

    #[test]
    fn scalable_channel_layout() -> Result<()> {
        let data = channel_element(
            10,
            1,
            &[0, 1, 2, 3],
            &[(1, 1, 1, false), (2, 3, 1, true)],
            Some(50),
            Some(51),
        );
        let element = read(&data)?;

        assert_eq!(element.element_type(), AudioElementType::ChannelBased);
        assert_eq!(element.substream_ids, vec![0, 1, 2, 3]);
        assert_eq!(element.layers().len(), 2);
        assert_eq!(element.layers()[1].layout, LoudspeakerLayout::S5_1);
        assert_eq!(element.layers()[1].channels(), 4);
        assert_eq!(element.recon_gain_flags(), 0b10);
        assert_eq!(
            element.demixing.as_ref().map(|d| d.definition.parameter_id),
            Some(50)
        );
        assert_eq!(element.recon_gain.as_ref().map(|d| d.parameter_id), Some(51));

        Ok(())
    }

    #[test]
    fn ambisonics_projection_matrix() -> Result<()> {
        let mut w = PayloadWriter::new()
            .leb(3)
            .bits(3, 1)
            .bits(5, 0)
            .leb(1)
            .leb(2)
            .leb(0)
            .leb(1)
            .leb(0)
            .leb(1)
            .u8(4)
            .u8(2)
            .u8(2);
        for v in 0..16 {
            w = w.i16(v);
        }
        let buf = w.finish();
        let reader = &mut BsIoSliceReader::from_slice(&buf[..]);
        let element = AudioElement::read(reader)?;

        let ElementConfig::SceneBased(AmbisonicsConfig::Projection {
            demixing_matrix, ..
        }) = &element.config
        else {
            panic!("expected projection config");
        };
        assert_eq!(demixing_matrix.len(), 16);
        assert_eq!(demixing_matrix[15], 15);

        Ok(())
    }

    #[test]
    fn truncated_projection_matrix() {
        let payload = PayloadWriter::new()
            .leb(3)
            .bits(3, 1)
            .bits(5, 0)
            .leb(1)
            .leb(1)
            .leb(0)
            .leb(0)
            .leb(1)
            .u8(4)
            .u8(0)
            .u8(2)
            .i16(1)
            .finish();
        let err = AudioElement::read(&mut BsIoSliceReader::from_slice(&payload)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ObjectError>(),
            Some(ObjectError::TruncatedDemixingMatrix(3))
        ));
    }

    #[test]
    fn unknown_parameter_definition_is_skipped() -> Result<()> {
        let payload = PayloadWriter::new()
            .leb(4)
            .bits(3, 1)
            .bits(5, 0)
            .leb(1)
            .leb(1)
            .leb(0)
            .leb(1)
            .leb(7)
            .leb(3)
            .bytes(&[1, 2, 3])
            .leb(0)
            .u8(1)
            .u8(1)
            .u8(0)
            .finish();
        let element = AudioElement::read(&mut BsIoSliceReader::from_slice(&payload))?;
        assert_eq!(element.element_type(), AudioElementType::SceneBased);
        assert!(element.demixing.is_none());

        Ok(())
    }
}
