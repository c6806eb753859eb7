//! Mix presentation descriptors.

use anyhow::{Result, bail};
use log::debug;

use crate::structs::layout::{OutputLayout, SoundSystem};
use crate::structs::param_definition::ParamDefinition;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ObjectError;

/// A mix-gain parameter definition with the gain used when no block applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixGain {
    pub definition: ParamDefinition,
    /// Q7.8 dB.
    pub default_mix_gain: i16,
}

impl MixGain {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let definition = ParamDefinition::read(reader)?;
        let default_mix_gain = reader.get_i16()?;

        Ok(Self {
            definition,
            default_mix_gain,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixElement {
    pub element_id: u64,
    pub annotations: Vec<String>,
    pub headphones_rendering_mode: u8,
    pub mix_gain: MixGain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetLayout {
    /// Explicit loudspeaker labels.
    SpLabel(Vec<u8>),
    SoundSystem(SoundSystem),
    Binaural,
    Reserved,
}

impl TargetLayout {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let layout_type: u8 = reader.get_n(2)?;

        Ok(match layout_type {
            1 => {
                let count = reader.get_n::<u8>(6)?;
                let labels = reader.get_bytes(count as usize)?;
                Self::SpLabel(labels)
            }
            2 => {
                let sound_system = SoundSystem::from_code(reader.get_n(4)?)?;
                reader.skip_n(2)?;
                Self::SoundSystem(sound_system)
            }
            3 => {
                reader.skip_n(6)?;
                Self::Binaural
            }
            _ => {
                reader.skip_n(6)?;
                Self::Reserved
            }
        })
    }

    pub fn output_layout(&self) -> Option<OutputLayout> {
        match self {
            Self::SoundSystem(ss) => Some(OutputLayout::SoundSystem(*ss)),
            Self::Binaural => Some(OutputLayout::Binaural),
            Self::SpLabel(_) | Self::Reserved => None,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::SpLabel(labels) => labels.len(),
            Self::SoundSystem(ss) => ss.channels(),
            Self::Binaural => 2,
            Self::Reserved => 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loudness {
    pub info_type: u8,
    /// Q7.8 LKFS.
    pub integrated_loudness: i16,
    /// Q7.8 dBFS.
    pub digital_peak: i16,
    pub true_peak: Option<i16>,
    /// `(anchor_element, anchored_loudness)`.
    pub anchored: Vec<(u8, i16)>,
}

impl Loudness {
    fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let info_type = reader.get_u8()?;
        let mut loudness = Self {
            info_type,
            integrated_loudness: reader.get_i16()?,
            digital_peak: reader.get_i16()?,
            ..Default::default()
        };

        if info_type & 1 != 0 {
            loudness.true_peak = Some(reader.get_i16()?);
        }

        if info_type & 2 != 0 {
            let num_anchored = reader.get_u8()?;
            for _ in 0..num_anchored {
                let anchor_element = reader.get_u8()?;
                loudness.anchored.push((anchor_element, reader.get_i16()?));
            }
        }

        Ok(loudness)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutLoudness {
    pub layout: TargetLayout,
    pub loudness: Loudness,
}

fn read_labels(reader: &mut BsIoSliceReader, count: u64) -> Result<Vec<String>> {
    Ok((0..count)
        .map(|_| reader.get_string())
        .collect::<std::io::Result<Vec<_>>>()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixPresentation {
    pub id: u64,
    pub language_labels: Vec<String>,
    pub friendly_labels: Vec<String>,
    /// Elements of the single sub-mix, in declaration order.
    pub elements: Vec<MixElement>,
    pub output_mix_gain: MixGain,
    pub layouts: Vec<LayoutLoudness>,
    pub redundant: bool,
}

impl MixPresentation {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let id = reader.get_leb128()?;

        let count_label = reader.get_leb128()?;
        if count_label > reader.available()? / 8 {
            bail!(ObjectError::CountOverrun {
                what: "count_label",
                count: count_label,
            });
        }
        let language_labels = read_labels(reader, count_label)?;
        let friendly_labels = read_labels(reader, count_label)?;

        let num_sub_mixes = reader.get_leb128()?;
        if num_sub_mixes != 1 {
            bail!(ObjectError::SubMixCount {
                id,
                count: num_sub_mixes,
            });
        }

        let num_elements = reader.get_leb128()?;
        if num_elements > reader.available()? / 8 {
            bail!(ObjectError::CountOverrun {
                what: "num_audio_elements",
                count: num_elements,
            });
        }

        let mut elements = Vec::with_capacity(num_elements as usize);
        for _ in 0..num_elements {
            let element_id = reader.get_leb128()?;
            let annotations = read_labels(reader, count_label)?;

            let headphones_rendering_mode = reader.get_n(2)?;
            reader.skip_n(6)?;
            let extension_size = reader.get_leb128()?;
            reader.skip_bytes(extension_size)?;

            elements.push(MixElement {
                element_id,
                annotations,
                headphones_rendering_mode,
                mix_gain: MixGain::read(reader)?,
            });
        }

        let output_mix_gain = MixGain::read(reader)?;

        let num_layouts = reader.get_leb128()?;
        if num_layouts > reader.available()? / 8 {
            bail!(ObjectError::CountOverrun {
                what: "num_layouts",
                count: num_layouts,
            });
        }

        let mut layouts = Vec::with_capacity(num_layouts as usize);
        for _ in 0..num_layouts {
            let layout = TargetLayout::read(reader)?;
            let loudness = Loudness::read(reader)?;
            layouts.push(LayoutLoudness { layout, loudness });
        }

        debug!(
            "Mix presentation {id}: {} elements, {} layouts, labels {:?}",
            elements.len(),
            layouts.len(),
            friendly_labels
        );

        Ok(Self {
            id,
            language_labels,
            friendly_labels,
            elements,
            output_mix_gain,
            layouts,
            redundant: false,
        })
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.friendly_labels.iter().any(|l| l == label)
    }

    pub fn element(&self, element_id: u64) -> Option<&MixElement> {
        self.elements.iter().find(|e| e.element_id == element_id)
    }

    /// Loudness info of the layout matching `target`, if the mix declares one.
    pub fn loudness_for(&self, target: OutputLayout) -> Option<&Loudness> {
        self.layouts
            .iter()
            .find(|l| l.layout.output_layout() == Some(target))
            .map(|l| &l.loudness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::obu::Obu;
    use crate::utils::testing::{PayloadWriter, mix_presentation, param_definition};

    #[test]
    fn single_sub_mix() -> Result<()> {
        let data = mix_presentation(20, "Main", &[(10, 100), (11, 101)], &[0, 1]);
        let obu = Obu::split(&data)?.expect("complete OBU");
        let mix = MixPresentation::read(&mut BsIoSliceReader::from_slice(obu.payload))?;

        assert_eq!(mix.id, 20);
        assert!(mix.has_label("Main"));
        assert_eq!(mix.language_labels, vec!["en-us".to_string()]);
        assert_eq!(mix.elements.len(), 2);
        assert_eq!(mix.elements[1].mix_gain.definition.parameter_id, 101);
        assert_eq!(mix.output_mix_gain.definition.parameter_id, 999);
        assert_eq!(
            mix.layouts[1].layout,
            TargetLayout::SoundSystem(SoundSystem::B)
        );
        assert_eq!(mix.layouts[1].layout.channels(), 6);
        assert_eq!(
            mix.loudness_for(OutputLayout::SoundSystem(SoundSystem::A))
                .map(|l| l.integrated_loudness),
            Some(-24 * 256)
        );

        Ok(())
    }

    #[test]
    fn multiple_sub_mixes_are_rejected() {
        let payload = PayloadWriter::new()
            .leb(1)
            .leb(0)
            .leb(2)
            .finish();
        let err = MixPresentation::read(&mut BsIoSliceReader::from_slice(&payload)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ObjectError>(),
            Some(ObjectError::SubMixCount { id: 1, count: 2 })
        ));
    }

    #[test]
    fn loudness_extensions() -> Result<()> {
        let w = PayloadWriter::new().leb(2).leb(0).leb(1).leb(0);
        let w = param_definition(w, 5, 48000, None).i16(0);
        let payload = w
            .leb(1)
            .bits(2, 3)
            .bits(6, 0)
            .u8(3)
            .i16(-20 * 256)
            .i16(-1)
            .i16(-2)
            .u8(1)
            .u8(0)
            .i16(-22 * 256)
            .finish();

        let mix = MixPresentation::read(&mut BsIoSliceReader::from_slice(&payload))?;
        let loudness = mix
            .loudness_for(OutputLayout::Binaural)
            .expect("binaural loudness");
        assert_eq!(loudness.true_peak, Some(-2));
        assert_eq!(loudness.anchored, vec![(0, -22 * 256)]);

        Ok(())
    }
}
