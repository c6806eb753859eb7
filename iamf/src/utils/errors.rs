#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Integer status codes of the public decoder surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    BadArg = -1,
    BufferTooSmall = -2,
    Internal = -3,
    InvalidPacket = -4,
    InvalidState = -5,
    Unimplemented = -6,
    AllocFail = -7,
    NeedMoreData = -8,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps an error raised anywhere in the crate to its status code.
    ///
    /// Truncated input surfacing as an I/O `UnexpectedEof` is reported as
    /// [`ErrorCode::InvalidPacket`]: the framer only hands complete OBUs to
    /// the object parsers, so a short read inside one means the OBU lied
    /// about its contents.
    pub fn of(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<DecoderError>() {
            return match e {
                DecoderError::InvalidState => ErrorCode::InvalidState,
                DecoderError::BufferTooSmall { .. } => ErrorCode::BufferTooSmall,
                DecoderError::BadArgument(_) => ErrorCode::BadArg,
                DecoderError::NoMixPresentation => ErrorCode::InvalidPacket,
            };
        }

        if let Some(e) = err.downcast_ref::<CodecError>() {
            return match e {
                CodecError::Unsupported(_) => ErrorCode::Unimplemented,
                CodecError::BadPacket { .. } | CodecError::SubstreamCount { .. } => {
                    ErrorCode::InvalidPacket
                }
                CodecError::BadConfig(_) => ErrorCode::InvalidPacket,
            };
        }

        if let Some(e) = err.downcast_ref::<StreamError>() {
            return match e {
                StreamError::UnknownCodecConfig(_) | StreamError::UnknownElement(_) => {
                    ErrorCode::InvalidPacket
                }
                StreamError::LayerChannelMismatch { .. }
                | StreamError::SubstreamMismatch { .. }
                | StreamError::EmptyElement(_) => ErrorCode::InvalidPacket,
            };
        }

        if err.downcast_ref::<ObuError>().is_some()
            || err.downcast_ref::<FrameError>().is_some()
            || err.downcast_ref::<ObjectError>().is_some()
            || err.downcast_ref::<ParameterError>().is_some()
            || err.downcast_ref::<DatabaseError>().is_some()
        {
            return ErrorCode::InvalidPacket;
        }

        if let Some(e) = err.downcast_ref::<std::io::Error>() {
            return match e.kind() {
                std::io::ErrorKind::OutOfMemory => ErrorCode::AllocFail,
                _ => ErrorCode::InvalidPacket,
            };
        }

        ErrorCode::Internal
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ObuError {
    #[error("OBU fields overrun the declared payload: header needs {needed} bytes, OBU is {size}")]
    HeaderOverrun { needed: usize, size: usize },

    #[error("Reserved OBU type {0} skipped")]
    ReservedType(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum ObjectError {
    #[error("Invalid ia_code {0:#010X}, expected 'iamf'")]
    InvalidMagicCode(u32),

    #[error("Mix presentation {id} declares {count} sub-mixes, exactly one is supported")]
    SubMixCount { id: u64, count: u64 },

    #[error("Audio element {id} declares {count} channel layers, at most {max} are allowed")]
    TooManyLayers { id: u64, count: u8, max: usize },

    #[error("Audio element {id} has reserved element type {value}")]
    ReservedElementType { id: u64, value: u8 },

    #[error("Ambisonics projection matrix for element {0} is not fully present")]
    TruncatedDemixingMatrix(u64),

    #[error("Declared count {count} for {what} exceeds the remaining payload")]
    CountOverrun { what: &'static str, count: u64 },

    #[error("Mix presentation {mix} references unknown audio element {element}")]
    UnknownElement { mix: u64, element: u64 },

    #[error("Reserved value {value} for {what}")]
    Reserved { what: &'static str, value: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum ParameterError {
    #[error("Parameter block {0} has no definition in any descriptor")]
    Orphaned(u64),

    #[error("Subblock durations of parameter {id} sum to {sum}, declared duration is {duration}")]
    DurationMismatch { id: u64, sum: u64, duration: u64 },

    #[error("Parameter {0} declares a zero duration")]
    ZeroDuration(u64),

    #[error("Parameter {id} spans {duration} ticks, at most {max} are allowed")]
    DurationTooLong { id: u64, duration: u64, max: u64 },

    #[error("Unknown mix-gain animation type {0}")]
    UnknownAnimation(u64),

    #[error("Parameter {id} with {count} subblocks exceeds the limit of {max}")]
    TooManySubblocks { id: u64, count: u64, max: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("Audio element {element} references unknown codec config {codec_config}")]
    MissingCodecConfig { element: u64, codec_config: u64 },

    #[error("Sequence header is missing, descriptors received before magic code")]
    MissingMagicCode,
}

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Codec config {0} is not present in the database")]
    UnknownCodecConfig(u64),

    #[error("Audio element {0} is not present in the database")]
    UnknownElement(u64),

    #[error("Audio element {0} has no substreams")]
    EmptyElement(u64),

    #[error(
        "Layer {layer} of element {element} carries {channels} channels but its substreams provide {provided}"
    )]
    LayerChannelMismatch {
        element: u64,
        layer: usize,
        channels: usize,
        provided: usize,
    },

    #[error("Element {element} declares {declared} substreams but its layers use {used}")]
    SubstreamMismatch {
        element: u64,
        declared: usize,
        used: usize,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("No decoder backend registered for codec {0}")]
    Unsupported(String),

    #[error("Invalid decoder config: {0}")]
    BadConfig(&'static str),

    #[error("Packet of {size} bytes is not a whole number of {frame_bytes}-byte sample frames")]
    BadPacket { size: usize, frame_bytes: usize },

    #[error("Decoder was opened for {expected} substreams, got {got} packets")]
    SubstreamCount { expected: usize, got: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("Decoder is not configured")]
    InvalidState,

    #[error("Output buffer holds {available} samples, frame needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Invalid argument: {0}")]
    BadArgument(&'static str),

    #[error("No mix presentation available")]
    NoMixPresentation,
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Substream {substream} of element {element} arrived twice before parameters resolved")]
    ParametersMissing { element: u64, substream: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn codes_match_public_values() {
        assert_eq!(ErrorCode::Ok.code(), 0);
        assert_eq!(ErrorCode::InvalidState.code(), -5);
        assert_eq!(ErrorCode::NeedMoreData.code(), -8);
    }

    #[test]
    fn typed_errors_map_to_codes() {
        let err = anyhow!(DecoderError::InvalidState);
        assert_eq!(ErrorCode::of(&err), ErrorCode::InvalidState);

        let err = anyhow!(ObjectError::SubMixCount { id: 1, count: 2 });
        assert_eq!(ErrorCode::of(&err), ErrorCode::InvalidPacket);

        let err = anyhow!(CodecError::Unsupported("Opus".into()));
        assert_eq!(ErrorCode::of(&err), ErrorCode::Unimplemented);

        let err = anyhow!("something else");
        assert_eq!(ErrorCode::of(&err), ErrorCode::Internal);
    }
}
