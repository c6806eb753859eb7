/// OBU parsing into typed objects.
///
/// Provides the [`Parser`](parse::Parser) for turning framed
/// [`Obu`](crate::structs::obu::Obu)s into descriptors, parameter blocks and
/// audio frames.
pub mod parse;

/// Descriptor storage and the element, parameter and sync indices.
pub mod database;

/// Mix-gain animation curves.
pub mod gain;

/// Core decoder abstraction and the built-in LPCM backend.
pub mod codec;

/// Reconstruction of scalable channel layouts.
pub mod demix;

/// Rendering matrices and the renderer.
pub mod render;

/// Per-element packet assembly and decoding.
pub mod stream;

pub mod mixer;

/// Resampler and limiter seams, PCM conversion.
pub mod post;

/// Mix presentation selection and the per-presentation decode graph.
pub mod presentation;

/// Public decoder surface.
///
/// Provides the [`Decoder`](decode::Decoder) for converting IAMF OBU streams
/// into interleaved 16-bit PCM with [`FrameMetadata`](decode::FrameMetadata).
pub mod decode;
