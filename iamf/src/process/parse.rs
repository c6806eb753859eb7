use anyhow::{Result, anyhow};
use log::Level::{Info, Warn};
use log::trace;

use crate::log_or_err;
use crate::process::database::Database;
use crate::structs::Descriptor;
use crate::structs::audio_element::AudioElement;
use crate::structs::codec_config::CodecConfig;
use crate::structs::frame::AudioFrame;
use crate::structs::mix_presentation::MixPresentation;
use crate::structs::obu::{Obu, ObuType};
use crate::structs::parameter::ParameterBlock;
use crate::structs::sync::SyncInfo;
use crate::structs::version::Version;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{ObjectError, ObuError};

/// What one OBU turned into.
#[derive(Debug, Clone)]
pub enum Object<'a> {
    Descriptor(Descriptor),
    Frame(AudioFrame<'a>),
    TemporalDelimiter,
}

/// Parses framed OBUs into typed objects.
///
/// Parameter blocks can only be read against their definition, so parsing
/// consults the [`Database`] the resulting descriptors will be added to.
#[derive(Debug, Default)]
pub struct Parser {
    state: ParserState,
}

impl Parser {
    /// Parses one OBU. Returns `None` for OBUs that carry nothing to act on.
    pub fn parse<'a>(&mut self, obu: &Obu<'a>, db: &Database) -> Result<Option<Object<'a>>> {
        let reader = &mut BsIoSliceReader::from_slice(obu.payload);

        let descriptor = match obu.obu_type {
            ObuType::MagicCode => Descriptor::Version(Version::read(reader)?),
            ObuType::CodecConfig => {
                let mut config = CodecConfig::read(reader, obu.payload.len())?;
                config.redundant = obu.redundant;
                Descriptor::CodecConfig(config)
            }
            ObuType::AudioElement => {
                let mut element = AudioElement::read(reader)?;
                element.redundant = obu.redundant;
                Descriptor::AudioElement(element)
            }
            ObuType::MixPresentation => {
                let mut mix = MixPresentation::read(reader)?;
                mix.redundant = obu.redundant;
                self.check_mix_elements(&mix, db)?;
                Descriptor::MixPresentation(mix)
            }
            ObuType::ParameterBlock => {
                let id = reader.get_leb128()?;
                match db.parameter_context(id) {
                    Some(ctx) => Descriptor::Parameter(ParameterBlock::read(reader, id, &ctx)?),
                    None => Descriptor::OrphanedParameter {
                        id,
                        payload: obu.payload.to_vec(),
                    },
                }
            }
            ObuType::Sync => Descriptor::Sync(SyncInfo::read(reader)?),
            ObuType::TemporalDelimiter => return Ok(Some(Object::TemporalDelimiter)),
            ObuType::AudioFrame | ObuType::AudioFrameId(_) => {
                return Ok(Some(Object::Frame(AudioFrame::from_obu(obu)?)));
            }
            ObuType::Reserved(code) => {
                log_or_err!(self.state, Info, anyhow!(ObuError::ReservedType(code)));
                return Ok(None);
            }
        };

        trace!("Parsed {} OBU into {:?}", obu.obu_type, descriptor_kind(&descriptor));

        Ok(Some(Object::Descriptor(descriptor)))
    }

    /// Sets the failure level for validation errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }

    fn check_mix_elements(&self, mix: &MixPresentation, db: &Database) -> Result<()> {
        for element in &mix.elements {
            if db.element(element.element_id).is_none() {
                log_or_err!(
                    self.state,
                    Warn,
                    anyhow!(ObjectError::UnknownElement {
                        mix: mix.id,
                        element: element.element_id,
                    })
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ParserState {
    pub fail_level: log::Level,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
        }
    }
}

fn descriptor_kind(descriptor: &Descriptor) -> &'static str {
    match descriptor {
        Descriptor::Version(_) => "version",
        Descriptor::CodecConfig(_) => "codec config",
        Descriptor::AudioElement(_) => "audio element",
        Descriptor::MixPresentation(_) => "mix presentation",
        Descriptor::Parameter(_) => "parameter block",
        Descriptor::OrphanedParameter { .. } => "orphaned parameter block",
        Descriptor::Sync(_) => "sync",
    }
}
