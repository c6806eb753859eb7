use anyhow::{Result, bail};
use log::{debug, info, trace};

use crate::process::codec::{CodecRegistry, DecoderFactory};
use crate::process::database::Database;
use crate::process::parse::{Object, Parser};
use crate::process::post::{Limiter, Resampler, interleave};
use crate::process::presentation::Presentation;
use crate::process::render::{DefaultMatrices, MatrixSource};
use crate::structs::codec_config::CodecId;
use crate::structs::layout::OutputLayout;
use crate::structs::mix_presentation::Loudness;
use crate::structs::obu::{Obu, ObuType};
use crate::utils::errors::DecoderError;

/// Number of output channels produced for `layout`.
pub fn channel_count(layout: OutputLayout) -> usize {
    layout.channels()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureStatus {
    /// Descriptors are complete and a mix presentation is selected.
    Ready,
    /// The buffer ended inside the descriptor OBUs.
    NeedMoreData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureOutcome {
    pub consumed: usize,
    pub status: ConfigureStatus,
}

/// Result of one [`Decoder::decode`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes of input consumed.
    pub consumed: usize,
    /// Samples per channel written to the output buffer.
    pub samples: usize,
}

/// Metadata of the last decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub layout: OutputLayout,
    /// Loudness of every layout the selected mix presentation declares.
    pub loudness: Vec<Loudness>,
    pub demixing_mode: Option<u8>,
    pub samples: usize,
    /// Presentation timestamp of the first sample, in `time_base` units.
    pub pts: i64,
}

/// Decodes IAMF OBU streams to interleaved 16-bit PCM.
///
/// [`configure`](Decoder::configure) consumes the descriptor OBUs and selects
/// a mix presentation; [`decode`](Decoder::decode) then consumes temporal
/// units and yields one mixed frame per call.
///
/// ```rust,no_run
/// use iamf::process::decode::{ConfigureStatus, Decoder};
///
/// # fn run(stream: &[u8]) -> anyhow::Result<()> {
/// let mut decoder = Decoder::default();
/// let outcome = decoder.configure(stream)?;
/// assert_eq!(outcome.status, ConfigureStatus::Ready);
///
/// let mut pcm = vec![0i16; 48000 * 2];
/// let mut rest = &stream[outcome.consumed..];
/// while !rest.is_empty() {
///     let decoded = decoder.decode(rest, &mut pcm)?;
///     if decoded.consumed == 0 {
///         break;
///     }
///     rest = &rest[decoded.consumed..];
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Decoder {
    state: DecoderState,
}

impl Decoder {
    /// Parses descriptor OBUs from the start of `data`.
    ///
    /// Stops before the first OBU that is not a descriptor, then builds the
    /// decode graph for the configured output layout. When no mix
    /// presentation is available yet the error is returned and the next call
    /// continues from the descriptors already installed.
    pub fn configure(&mut self, data: &[u8]) -> Result<ConfigureOutcome> {
        self.state.configure(data)
    }

    /// Decodes OBUs from `data` until one mixed frame is written to `out`
    /// or the buffer is exhausted.
    ///
    /// On error, [`consumed`](Decoder::consumed) reports how far the input
    /// was processed. A frame rejected with `BufferTooSmall` is kept and
    /// written by the next call before any further input is consumed.
    pub fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<Decoded> {
        self.state.decode(data, out)
    }

    /// Bytes consumed by the last `configure` or `decode` call.
    pub fn consumed(&self) -> usize {
        self.state.consumed
    }

    pub fn is_configured(&self) -> bool {
        self.state.configured
    }

    pub fn set_output_layout(&mut self, layout: OutputLayout) {
        if self.state.layout != layout {
            self.state.layout = layout;
            self.state.rebuild = true;
        }
    }

    pub fn output_layout(&self) -> OutputLayout {
        self.state.layout
    }

    /// Pins the mix presentation whose friendly label equals `label`.
    pub fn set_mix_presentation_label(&mut self, label: Option<String>) {
        self.state.label = label;
        self.state.rebuild = true;
    }

    /// Sets the timestamp of the first output sample and the number of
    /// timestamp units per second.
    pub fn set_pts(&mut self, base: i64, time_base: u32) -> Result<()> {
        if time_base == 0 {
            bail!(DecoderError::BadArgument("time base must be non-zero"));
        }
        self.state.base_pts = base;
        self.state.time_base = time_base;
        self.state.samples_emitted = 0;
        Ok(())
    }

    /// Sets the failure level for validation errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
        self.state.parser.set_fail_level(level);
        self.state.db.fail_level = level;
        if let Some(presentation) = &mut self.state.presentation {
            presentation.fail_level = level;
        }
    }

    /// Adds or replaces the backend used for `codec_id`.
    pub fn register_codec(&mut self, codec_id: CodecId, factory: DecoderFactory) {
        self.state.registry.register(codec_id, factory);
    }

    pub fn set_resampler(&mut self, resampler: Option<Box<dyn Resampler>>) {
        self.state.resampler = resampler;
    }

    pub fn set_limiter(&mut self, limiter: Option<Box<dyn Limiter>>) {
        self.state.limiter = limiter;
    }

    pub fn set_matrix_source(&mut self, matrices: Box<dyn MatrixSource>) {
        self.state.matrices = matrices;
        self.state.rebuild = true;
    }

    pub fn last_metadata(&self) -> Option<&FrameMetadata> {
        self.state.metadata.as_ref()
    }

    /// Descriptors installed so far.
    pub fn database(&self) -> &Database {
        &self.state.db
    }

    pub fn presentation(&self) -> Option<&Presentation> {
        self.state.presentation.as_ref()
    }

    /// Output sample rate of the configured presentation.
    pub fn sample_rate(&self) -> Option<u32> {
        let presentation = self.state.presentation.as_ref()?;
        Some(
            self.state
                .resampler
                .as_ref()
                .map_or(presentation.sample_rate(), |r| r.output_rate()),
        )
    }
}

struct DecoderState {
    fail_level: log::Level,
    parser: Parser,
    db: Database,
    presentation: Option<Presentation>,

    layout: OutputLayout,
    label: Option<String>,
    registry: CodecRegistry,
    matrices: Box<dyn MatrixSource>,
    resampler: Option<Box<dyn Resampler>>,
    limiter: Option<Box<dyn Limiter>>,

    /// A configure call completed; stays set across reconfiguration.
    configured: bool,
    /// Descriptors changed since the presentation was built.
    rebuild: bool,
    consumed: usize,

    base_pts: i64,
    time_base: u32,
    samples_emitted: u64,
    metadata: Option<FrameMetadata>,
    /// Post-processed frame still waiting for an output buffer.
    pending: Option<PendingFrame>,
}

struct PendingFrame {
    channels: Vec<Vec<f32>>,
    rate: u32,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
            parser: Parser::default(),
            db: Database::default(),
            presentation: None,
            layout: OutputLayout::default(),
            label: None,
            registry: CodecRegistry::default(),
            matrices: Box::new(DefaultMatrices),
            resampler: None,
            limiter: None,
            configured: false,
            rebuild: false,
            consumed: 0,
            base_pts: 0,
            time_base: 0,
            samples_emitted: 0,
            metadata: None,
            pending: None,
        }
    }
}

impl DecoderState {
    fn configure(&mut self, data: &[u8]) -> Result<ConfigureOutcome> {
        self.consumed = 0;

        while let Some(obu) = Obu::split(&data[self.consumed..])? {
            if !obu.obu_type.is_descriptor() && self.db.version().is_some() {
                self.build()?;
                self.configured = true;
                return Ok(ConfigureOutcome {
                    consumed: self.consumed,
                    status: ConfigureStatus::Ready,
                });
            }

            if obu.obu_type.is_descriptor() {
                self.descriptor(&obu)?;
            } else {
                trace!("Skipping {} OBU before the sequence header", obu.obu_type);
            }
            self.consumed += obu.size;
        }

        Ok(ConfigureOutcome {
            consumed: self.consumed,
            status: ConfigureStatus::NeedMoreData,
        })
    }

    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<Decoded> {
        self.consumed = 0;
        if !self.configured {
            bail!(DecoderError::InvalidState);
        }

        if self.pending.is_some() {
            let samples = self.flush(out)?;
            return Ok(Decoded {
                consumed: 0,
                samples,
            });
        }

        while let Some(obu) = Obu::split(&data[self.consumed..])? {
            if obu.obu_type.is_descriptor() {
                self.descriptor(&obu)?;
                self.consumed += obu.size;
                continue;
            }

            if self.rebuild {
                self.build()?;
            }

            let mixed = self.temporal(&obu);
            self.consumed += obu.size;

            if let Some(channels) = mixed? {
                self.post_process(channels)?;
                let samples = self.flush(out)?;
                return Ok(Decoded {
                    consumed: self.consumed,
                    samples,
                });
            }
        }

        Ok(Decoded {
            consumed: self.consumed,
            samples: 0,
        })
    }

    /// Installs a descriptor OBU, resetting on a new sequence header.
    fn descriptor(&mut self, obu: &Obu) -> Result<()> {
        if obu.obu_type == ObuType::MagicCode && !obu.redundant && self.db.version().is_some() {
            info!("New sequence header, reconfiguring");
            self.reset();
        }

        if let Some(Object::Descriptor(descriptor)) = self.parser.parse(obu, &self.db)? {
            if self.db.add_object(descriptor)?.is_some() {
                debug!("{} OBU replaced its previous copy", obu.obu_type);
            }
            self.rebuild = true;
        }

        Ok(())
    }

    /// Handles a parameter block, sync, temporal delimiter or audio frame.
    fn temporal(&mut self, obu: &Obu) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(presentation) = &mut self.presentation else {
            bail!(DecoderError::InvalidState);
        };

        match self.parser.parse(obu, &self.db)? {
            Some(Object::Frame(frame)) => presentation.on_frame(&frame, &mut self.db),
            Some(Object::Descriptor(descriptor)) => {
                self.db.add_object(descriptor)?;
                presentation.refresh(&mut self.db)
            }
            Some(Object::TemporalDelimiter) | None => Ok(None),
        }
    }

    fn build(&mut self) -> Result<()> {
        let previous = self.presentation.take();
        let built = Presentation::build(
            &mut self.db,
            &self.registry,
            self.matrices.as_ref(),
            self.layout,
            self.label.as_deref(),
            previous,
        );

        match built {
            Ok(mut presentation) => {
                presentation.fail_level = self.fail_level;
                self.presentation = Some(presentation);
                self.rebuild = false;
                Ok(())
            }
            Err(err) => {
                // Stays flagged so the next call retries with more descriptors
                self.rebuild = true;
                Err(err)
            }
        }
    }

    fn reset(&mut self) {
        self.db = Database::default();
        self.db.fail_level = self.fail_level;
        self.presentation = None;
        self.metadata = None;
        self.pending = None;
    }

    /// Resamples and limits a mixed frame into the pending slot.
    fn post_process(&mut self, mut channels: Vec<Vec<f32>>) -> Result<()> {
        let Some(presentation) = &self.presentation else {
            bail!(DecoderError::InvalidState);
        };

        let mut rate = presentation.sample_rate();
        if let Some(resampler) = &mut self.resampler {
            channels = resampler.process(rate, channels)?;
            rate = resampler.output_rate();
        }
        if let Some(limiter) = &mut self.limiter {
            limiter.process(rate, &mut channels);
        }

        self.pending = Some(PendingFrame { channels, rate });
        Ok(())
    }

    /// Writes the pending frame to `out`, keeping it when `out` is too short.
    fn flush(&mut self, out: &mut [i16]) -> Result<usize> {
        let (Some(presentation), Some(frame)) = (&self.presentation, &self.pending) else {
            bail!(DecoderError::InvalidState);
        };

        let samples = frame.channels.first().map_or(0, Vec::len);
        let needed = samples * frame.channels.len();
        if out.len() < needed {
            bail!(DecoderError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        interleave(&frame.channels, out);
        let rate = frame.rate;
        self.pending = None;

        let pts = self.base_pts
            + (self.samples_emitted * self.time_base as u64 / rate.max(1) as u64) as i64;
        self.metadata = Some(FrameMetadata {
            layout: presentation.layout(),
            loudness: presentation
                .mix()
                .layouts
                .iter()
                .map(|l| l.loudness.clone())
                .collect(),
            demixing_mode: presentation.demixing_mode(),
            samples,
            pts,
        });
        self.samples_emitted += samples as u64;

        Ok(samples)
    }
}
