//! Data structures representing OBUs and the descriptors built from them.
//!
//! [`obu`] frames the byte stream; the remaining modules turn OBU payloads
//! into typed descriptors (codec configs, audio elements, mix presentations),
//! time-varying parameter blocks, sync offsets and audio frames.

pub mod audio_element;
pub mod codec_config;
pub mod frame;
pub mod layout;
pub mod mix_presentation;
pub mod obu;
pub mod param_definition;
pub mod parameter;
pub mod sync;
pub mod version;

use crate::structs::audio_element::AudioElement;
use crate::structs::codec_config::CodecConfig;
use crate::structs::mix_presentation::MixPresentation;
use crate::structs::parameter::ParameterBlock;
use crate::structs::sync::SyncInfo;
use crate::structs::version::Version;

/// A parsed descriptor or parameter OBU, ready to be installed in the database.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Version(Version),
    CodecConfig(CodecConfig),
    AudioElement(AudioElement),
    MixPresentation(MixPresentation),
    Parameter(ParameterBlock),
    /// Parameter block whose id no descriptor has defined; kept unparsed.
    OrphanedParameter { id: u64, payload: Vec<u8> },
    Sync(SyncInfo),
}
