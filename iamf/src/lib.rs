//! Parser and decoding pipeline for IAMF (Immersive Audio Model and Formats)
//! OBU bitstreams.
//!
//! ## Technical Overview
//!
//! ### Bitstream Organization
//!
//! **Descriptors**: a sequence header (magic code) followed by codec configs,
//! audio elements and mix presentations.
//! **Temporal units**: parameter blocks and audio frames, one frame per
//! substream, optionally introduced by a temporal delimiter.
//!
//! ### Audio Elements
//!
//! - Channel based: scalable layers from mono up to 7.1.4, each adding
//!   channels to the one below it
//! - Scene based: first order and higher ambisonics, mono or projection coded
//!
//! A mix presentation gains, renders and sums its elements for one or more
//! target loudspeaker layouts or binaural playback.
//!
//! ## Quick Start
//!
//! 1. Install descriptors and select a mix presentation with
//!    [`process::decode::Decoder::configure`]
//! 2. Decode temporal units to PCM with [`process::decode::Decoder::decode`]
//!
//! ```rust,no_run
//! use iamf::process::decode::{Decoder, channel_count};
//! use iamf::structs::layout::{OutputLayout, SoundSystem};
//!
//! # fn run(stream: &[u8]) -> anyhow::Result<()> {
//! let layout = OutputLayout::SoundSystem(SoundSystem::B);
//! let mut decoder = Decoder::default();
//! decoder.set_output_layout(layout);
//!
//! let mut offset = decoder.configure(stream)?.consumed;
//! let mut pcm = vec![0i16; 4096 * channel_count(layout)];
//!
//! loop {
//!     match decoder.decode(&stream[offset..], &mut pcm) {
//!         Ok(decoded) if decoded.consumed == 0 => break,
//!         Ok(decoded) => offset += decoded.consumed,
//!         Err(err) => {
//!             // Frame errors are recoverable, the stream continues
//!             eprintln!("Frame skipped: {err}");
//!             offset += decoder.consumed();
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Processing of IAMF bitstreams.
///
/// 1. **Parsing** ([`process::parse`]): OBUs into typed objects.
///
/// 2. **Database** ([`process::database`]): descriptor storage and timelines.
///
/// 3. **Presentation** ([`process::presentation`], [`process::stream`],
///    [`process::mixer`]): per-element decode, demix, render and mix.
///
/// 4. **Decoding** ([`process::decode`]): the public decoder.
pub mod process;

/// Data structures representing IAMF OBUs.
///
/// - **OBU framing** ([`structs::obu`]): headers, trimming and extensions
/// - **Descriptors** ([`structs::codec_config`], [`structs::audio_element`],
///   [`structs::mix_presentation`])
/// - **Parameters** ([`structs::param_definition`], [`structs::parameter`])
/// - **Layouts** ([`structs::layout`]): channel labels and sound systems
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **Error Handling** ([`utils::errors`]): Error types and status codes
pub mod utils;
