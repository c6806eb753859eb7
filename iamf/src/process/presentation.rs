//! Mix presentation selection and the per-presentation decode graph.
//!
//! A [`Presentation`] is built from the database for one output layout: it
//! picks a mix presentation, selects a layer for every referenced channel
//! based element, opens a [`StreamDecoder`] per element and feeds their
//! frames to a [`Mixer`].

use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::{debug, info, trace};

use crate::log_or_err;
use crate::process::codec::CodecRegistry;
use crate::process::database::Database;
use crate::process::mixer::{ElementFrame, Mixer};
use crate::process::render::MatrixSource;
use crate::process::stream::{Accepted, PacketState, Stream, StreamDecoder};
use crate::structs::audio_element::ChannelLayer;
use crate::structs::frame::AudioFrame;
use crate::structs::layout::{LoudspeakerLayout, OutputLayout};
use crate::structs::mix_presentation::{MixPresentation, TargetLayout};
use crate::utils::errors::{DecoderError, FrameError, StreamError};

/// How well a sub-mix target layout fits the requested output.
///
/// 100 for the same layout, binaural included; otherwise 50 less the
/// difference in channel count, never below zero.
pub fn layout_score(target: &TargetLayout, requested: OutputLayout) -> u32 {
    if target.output_layout() == Some(requested) {
        return 100;
    }

    let diff = target.channels().abs_diff(requested.channels());
    50u32.saturating_sub(diff as u32)
}

/// Index of the mix presentation to decode.
///
/// A pinned `label` wins (first mix when nothing carries it), then a lone
/// mix, then the best [`layout_score`], earliest on ties.
pub fn select_mix(
    mixes: &[MixPresentation],
    label: Option<&str>,
    requested: OutputLayout,
) -> Option<usize> {
    if mixes.is_empty() {
        return None;
    }

    if let Some(label) = label {
        return Some(mixes.iter().position(|m| m.has_label(label)).unwrap_or(0));
    }

    if mixes.len() == 1 {
        return Some(0);
    }

    let mut best = (0, 0);
    for (i, mix) in mixes.iter().enumerate() {
        let score = mix
            .layouts
            .iter()
            .map(|l| layout_score(&l.layout, requested))
            .max()
            .unwrap_or(0);
        if score > best.1 {
            best = (i, score);
        }
    }

    Some(best.0)
}

/// Layer of a scalable channel layout to decode for `requested`.
///
/// The highest layer with exactly the requested layout, else the smallest
/// layer with more channels than requested, else the top layer.
pub fn select_layer(layers: &[ChannelLayer], requested: OutputLayout) -> usize {
    let exact = layers.iter().rposition(|l| match requested {
        OutputLayout::SoundSystem(ss) => l.layout.sound_system() == Some(ss),
        OutputLayout::Binaural => l.layout == LoudspeakerLayout::Binaural,
    });
    if let Some(index) = exact {
        return index;
    }

    let channels = requested.channels();
    layers
        .iter()
        .position(|l| l.layout.channels() > channels)
        .unwrap_or(layers.len().saturating_sub(1))
}

/// The decode graph of the selected mix presentation.
pub struct Presentation {
    pub fail_level: log::Level,

    mix: MixPresentation,
    layout: OutputLayout,
    streams: Vec<StreamDecoder>,
    mixer: Mixer,
    frame_size: u64,
    sample_rate: u32,
    /// Timestamp of the first element's frame in the current tick.
    tick_timestamp: i64,
}

impl Presentation {
    /// Builds the graph for `layout`, moving redundant streams over from
    /// `previous`.
    pub fn build(
        db: &mut Database,
        registry: &CodecRegistry,
        matrices: &dyn MatrixSource,
        layout: OutputLayout,
        label: Option<&str>,
        previous: Option<Presentation>,
    ) -> Result<Self> {
        let Some(index) = select_mix(db.mix_presentations(), label, layout) else {
            bail!(DecoderError::NoMixPresentation);
        };
        let mix = db.mix_presentations()[index].clone();

        info!(
            "Mix presentation {} ({}) selected for {layout}",
            mix.id,
            mix.friendly_labels.first().map_or("unnamed", String::as_str)
        );

        let mut reusable = previous.map(|p| p.streams).unwrap_or_default();
        let mut streams = Vec::with_capacity(mix.elements.len());

        for mix_element in &mix.elements {
            let id = mix_element.element_id;
            let element = db
                .element(id)
                .ok_or(StreamError::UnknownElement(id))?
                .clone();
            let config = db
                .codec_config(element.codec_config_id)
                .ok_or(StreamError::UnknownCodecConfig(element.codec_config_id))?
                .clone();

            let selected = select_layer(element.layers(), layout);
            let stream = Stream::new(&element, &config, selected, Some(&mix_element.mix_gain))?;

            db.link_mix_gain(id, mix_element.mix_gain.definition.parameter_id);

            if stream.redundant {
                let found = reusable.iter().position(|d| {
                    d.layout() == layout
                        && d.element_id() == id
                        && d.stream().substream_ids == stream.substream_ids
                });
                if let Some(pos) = found {
                    debug!("Reusing stream of redundant element {id}");
                    streams.push(reusable.swap_remove(pos));
                    continue;
                }
            }

            streams.push(StreamDecoder::new(
                stream, &element, &config, registry, matrices, layout,
            )?);
        }

        let Some(first) = streams.first() else {
            bail!(DecoderError::NoMixPresentation);
        };
        let frame_size = first.stream().frame_size;
        let sample_rate = first.stream().sample_rate;
        let element_ids: Vec<u64> = streams.iter().map(StreamDecoder::element_id).collect();

        Ok(Self {
            fail_level: log::Level::Error,
            mixer: Mixer::new(frame_size as usize, layout.channels(), &element_ids),
            mix,
            layout,
            streams,
            frame_size,
            sample_rate,
            tick_timestamp: 0,
        })
    }

    pub fn mix(&self) -> &MixPresentation {
        &self.mix
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    pub fn streams(&self) -> &[StreamDecoder] {
        &self.streams
    }

    pub fn frame_size(&self) -> u64 {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Demixing mode of the first element that demixes.
    pub fn demixing_mode(&self) -> Option<u8> {
        self.streams.iter().find_map(StreamDecoder::demixing_mode)
    }

    /// Hands an audio frame to the stream owning its substream. Returns the
    /// mixed output when this completes a tick.
    pub fn on_frame(
        &mut self,
        frame: &AudioFrame,
        db: &mut Database,
    ) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(index) = self.streams.iter().position(|s| s.owns(frame.substream_id)) else {
            trace!("Substream {} is not decoded for this layout", frame.substream_id);
            return Ok(None);
        };

        match self.streams[index].accept(frame, db) {
            Accepted::Stored => return self.poll(db),
            Accepted::Foreign => return Ok(None),
            Accepted::Duplicate => {}
        }

        // A second packet for the same substream: the previous frame stalled
        if let Err(err) = self.report_stall(index, frame.substream_id) {
            self.drop_stalled(index, db);
            self.streams[index].accept(frame, db);
            return Err(err);
        }

        self.streams[index].force_prepared();
        let mixed = self.poll(db)?;
        self.streams[index].discard();
        self.streams[index].accept(frame, db);

        match mixed {
            Some(mixed) => Ok(Some(mixed)),
            None => self.poll(db),
        }
    }

    /// Re-evaluates parameters after a parameter block arrived.
    pub fn refresh(&mut self, db: &mut Database) -> Result<Option<Vec<Vec<f32>>>> {
        for stream in &mut self.streams {
            stream.refresh(db);
        }
        self.poll(db)
    }

    /// Discards buffered packets and any partial tick.
    pub fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.discard();
        }
        self.mixer.clear();
    }

    fn report_stall(&self, index: usize, substream: u64) -> Result<()> {
        log_or_err!(
            self,
            Warn,
            anyhow!(FrameError::ParametersMissing {
                element: self.streams[index].element_id(),
                substream,
            })
        );
        Ok(())
    }

    /// Skips the buffered frame of a stream like a failed decode: the
    /// element contributes silence and its timeline still advances.
    fn drop_stalled(&mut self, index: usize, db: &mut Database) {
        let id = self.streams[index].element_id();
        self.streams[index].discard();
        db.advance_element(id, self.frame_size);
        self.mixer.add(id, self.silence());
        if self.mixer.mix().is_some() {
            trace!("Tick completed by the stalled frame of element {id} dropped");
        }
    }

    fn silence(&self) -> ElementFrame {
        ElementFrame {
            channels: vec![vec![0.0; self.frame_size as usize]; self.layout.channels()],
            ..Default::default()
        }
    }

    fn poll(&mut self, db: &mut Database) -> Result<Option<Vec<Vec<f32>>>> {
        let mut failure = None;
        let silence = self.silence();

        for (i, stream) in self.streams.iter_mut().enumerate() {
            if stream.state() != PacketState::Prepared {
                continue;
            }

            let id = stream.element_id();
            if i == 0 {
                self.tick_timestamp = db.element_viewer.get(id).map_or(0, |e| e.timestamp);
            }

            match stream.decode(db) {
                Ok(frame) => {
                    let samples = frame.channels.first().map_or(0, Vec::len);
                    db.advance_element(id, samples as u64);
                    self.mixer.add(id, frame);
                }
                Err(err) => {
                    db.advance_element(id, self.frame_size);
                    self.mixer.add(id, silence.clone());
                    failure = Some(err.context(format!("Frame of element {id} skipped")));
                }
            }
        }

        let mixed = self.mixer.mix().map(|(channels, start)| self.apply_output_gain(db, channels, start));

        match failure {
            Some(err) => Err(err),
            None => Ok(mixed),
        }
    }

    fn apply_output_gain(&self, db: &Database, mut channels: Vec<Vec<f32>>, start: usize) -> Vec<Vec<f32>> {
        let id = self.mix.output_mix_gain.definition.parameter_id;

        match db.mix_gains(id, self.tick_timestamp, self.frame_size as usize) {
            Some(gains) => {
                for channel in &mut channels {
                    for (x, g) in channel.iter_mut().zip(&gains[start.min(gains.len())..]) {
                        *x *= g;
                    }
                }
            }
            None => {
                if let Some(g) = db.default_mix_gain(id) {
                    channels.iter_mut().flatten().for_each(|x| *x *= g);
                }
            }
        }

        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::render::DefaultMatrices;
    use crate::structs::layout::SoundSystem;
    use crate::structs::obu::{Obu, ObuType};
    use crate::utils::testing::*;

    const STEREO: OutputLayout = OutputLayout::SoundSystem(SoundSystem::A);
    const FIVE_ONE: OutputLayout = OutputLayout::SoundSystem(SoundSystem::B);

    fn layer(layout: LoudspeakerLayout) -> ChannelLayer {
        ChannelLayer {
            layout,
            output_gain_present: false,
            recon_gain_present: false,
            substream_count: 1,
            coupled_substream_count: 0,
            output_gain_flags: 0,
            output_gain: 0,
        }
    }

    fn frame(data: &[u8]) -> Result<AudioFrame<'_>> {
        AudioFrame::from_obu(&Obu::split(data)?.expect("complete OBU"))
    }

    fn build(db: &mut Database, previous: Option<Presentation>) -> Result<Presentation> {
        Presentation::build(
            db,
            &CodecRegistry::default(),
            &DefaultMatrices,
            STEREO,
            None,
            previous,
        )
    }

    #[test]
    fn scores() {
        let binaural = OutputLayout::Binaural;
        assert_eq!(layout_score(&TargetLayout::Binaural, binaural), 100);
        assert_eq!(layout_score(&TargetLayout::SoundSystem(SoundSystem::B), FIVE_ONE), 100);
        assert_eq!(layout_score(&TargetLayout::SoundSystem(SoundSystem::A), FIVE_ONE), 46);
        assert_eq!(layout_score(&TargetLayout::SoundSystem(SoundSystem::H), STEREO), 28);
        assert_eq!(layout_score(&TargetLayout::Reserved, STEREO), 48);
    }

    #[test]
    fn layer_selection() {
        use LoudspeakerLayout::*;
        let layers = [layer(Stereo), layer(S5_1), layer(S7_1_4)];

        assert_eq!(select_layer(&layers, STEREO), 0);
        assert_eq!(select_layer(&layers, FIVE_ONE), 1);
        // 7.1.2 is not carried: the smallest layer above 10 channels
        assert_eq!(select_layer(&layers, OutputLayout::SoundSystem(SoundSystem::Ext712)), 2);
        assert_eq!(select_layer(&layers, OutputLayout::SoundSystem(SoundSystem::H)), 2);
        assert_eq!(select_layer(&layers, OutputLayout::SoundSystem(SoundSystem::Mono)), 0);
    }

    #[test]
    fn mix_selection() -> Result<()> {
        let mut db = Database::default();
        install(
            &mut db,
            &[
                magic_code(),
                lpcm_codec_config(1, 4, 48000),
                channel_element(10, 1, &[0], &[(1, 1, 1, false)], None, None),
                mix_presentation(20, "Stereo", &[(10, 100)], &[0]),
                mix_presentation(21, "Surround", &[(10, 101)], &[1]),
            ]
            .concat(),
        )?;
        let mixes = db.mix_presentations();

        assert_eq!(select_mix(mixes, None, STEREO), Some(0));
        assert_eq!(select_mix(mixes, None, FIVE_ONE), Some(1));
        assert_eq!(select_mix(mixes, Some("Surround"), STEREO), Some(1));
        assert_eq!(select_mix(mixes, Some("Missing"), FIVE_ONE), Some(0));
        assert_eq!(select_mix(&[], None, STEREO), None);

        Ok(())
    }

    #[test]
    fn frames_of_two_elements_are_mixed() -> Result<()> {
        let mut db = Database::default();
        install(
            &mut db,
            &[
                magic_code(),
                lpcm_codec_config(1, 4, 48000),
                channel_element(10, 1, &[0], &[(1, 1, 1, false)], None, None),
                channel_element(11, 1, &[1], &[(1, 1, 1, false)], None, None),
                mix_presentation(20, "Main", &[(10, 100), (11, 101)], &[0]),
            ]
            .concat(),
        )?;
        let mut presentation = build(&mut db, None)?;

        let a = audio_frame(0, Some((0, 1)), &[1000, -1000, 2000, -2000, 3000, -3000, 4000, -4000]);
        let b = audio_frame(1, None, &[8, 16, 8, 16, 8, 16, 8, 16]);

        assert!(presentation.on_frame(&frame(&a)?, &mut db)?.is_none());
        let mixed = presentation
            .on_frame(&frame(&b)?, &mut db)?
            .expect("tick complete");

        assert_eq!(mixed.len(), 2);
        assert_eq!(mixed[0].len(), 3);
        assert_eq!(mixed[0][0], (2000.0 + 8.0) / 32768.0);
        assert_eq!(mixed[1][2], (-4000.0 + 16.0) / 32768.0);
        assert_eq!(db.element_viewer.get(10).map(|e| e.timestamp), Some(4));

        Ok(())
    }

    #[test]
    fn frames_for_undecoded_layers_are_ignored() -> Result<()> {
        let mut db = Database::default();
        install(
            &mut db,
            &[
                magic_code(),
                lpcm_codec_config(1, 2, 48000),
                channel_element(10, 1, &[0, 1, 2, 3], &[(1, 1, 1, false), (2, 3, 1, false)], None, None),
                mix_presentation(20, "Main", &[(10, 100)], &[0]),
            ]
            .concat(),
        )?;
        let mut presentation = build(&mut db, None)?;
        assert_eq!(presentation.streams()[0].stream().substream_ids, vec![0]);

        let upper = audio_frame(1, None, &[0; 8]);
        assert!(presentation.on_frame(&frame(&upper)?, &mut db)?.is_none());

        Ok(())
    }

    /// Mono base plus stereo layer waiting on demixing parameter 50.
    fn demixed_element(db: &mut Database) -> Result<()> {
        install(
            db,
            &[
                magic_code(),
                lpcm_codec_config(1, 2, 48000),
                channel_element(10, 1, &[0, 1], &[(0, 1, 0, false), (1, 1, 0, false)], Some(50), None),
                mix_presentation(20, "Main", &[(10, 100)], &[0]),
            ]
            .concat(),
        )
    }

    /// Stereo element 10 with mix gain 100, and output mix gain 999.
    fn stereo_mix(db: &mut Database, element_default: i16, output_default: i16) -> Result<()> {
        install(
            db,
            &[
                magic_code(),
                lpcm_codec_config(1, 2, 48000),
                channel_element(10, 1, &[0], &[(1, 1, 1, false)], None, None),
                mix_presentation_with_defaults(20, "Main", &[(10, 100)], &[0], element_default, output_default),
            ]
            .concat(),
        )
    }

    fn mix_half_scale(presentation: &mut Presentation, db: &mut Database) -> Result<Vec<Vec<f32>>> {
        let half = audio_frame(0, None, &[16384; 4]);
        Ok(presentation.on_frame(&frame(&half)?, db)?.expect("tick complete"))
    }

    #[test]
    fn strict_stall_releases_the_stream() -> Result<()> {
        let mut db = Database::default();
        demixed_element(&mut db)?;
        let mut presentation = build(&mut db, None)?;
        presentation.fail_level = log::Level::Warn;

        let base = audio_frame(0, None, &[100, 200]);
        let upper = audio_frame(1, None, &[300, 400]);
        assert!(presentation.on_frame(&frame(&base)?, &mut db)?.is_none());
        assert!(presentation.on_frame(&frame(&upper)?, &mut db)?.is_none());

        let err = presentation.on_frame(&frame(&base)?, &mut db).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::ParametersMissing { element: 10, substream: 0 })
        ));
        assert_eq!(db.element_viewer.get(10).map(|e| e.timestamp), Some(2));

        install(
            &mut db,
            &obu(
                ObuType::ParameterBlock,
                &PayloadWriter::new().leb(50).bits(3, 0).bits(5, 0).finish(),
            ),
        )?;
        let mixed = presentation
            .on_frame(&frame(&upper)?, &mut db)?
            .expect("retained packet completes the frame");
        assert_eq!(mixed[0].len(), 2);
        assert_eq!(db.element_viewer.get(10).map(|e| e.timestamp), Some(4));

        Ok(())
    }

    #[test]
    fn element_mix_gain_block_scales_the_element() -> Result<()> {
        let mut db = Database::default();
        stereo_mix(&mut db, 0, 0)?;
        let mut presentation = build(&mut db, None)?;
        install(&mut db, &mix_gain_step(100, 2, -768))?;

        let mixed = mix_half_scale(&mut presentation, &mut db)?;
        for channel in &mixed {
            for &sample in channel {
                assert!((sample - 0.35397).abs() < 1e-4, "{sample}");
            }
        }

        Ok(())
    }

    #[test]
    fn output_mix_gain_block_scales_the_mix() -> Result<()> {
        let mut db = Database::default();
        stereo_mix(&mut db, 0, 0)?;
        let mut presentation = build(&mut db, None)?;
        install(&mut db, &mix_gain_step(999, 2, -768))?;

        let mixed = mix_half_scale(&mut presentation, &mut db)?;
        assert!((mixed[0][0] - 0.35397).abs() < 1e-4);
        assert!((mixed[1][1] - 0.35397).abs() < 1e-4);

        Ok(())
    }

    #[test]
    fn output_gain_passes_through_at_unity() -> Result<()> {
        let mut db = Database::default();
        stereo_mix(&mut db, 0, 0)?;
        let presentation = build(&mut db, None)?;

        let channels = vec![vec![0.25, -0.25], vec![0.5, -0.5]];
        assert_eq!(presentation.apply_output_gain(&db, channels.clone(), 0), channels);

        Ok(())
    }

    #[test]
    fn default_mix_gains_apply_without_blocks() -> Result<()> {
        let mut db = Database::default();
        stereo_mix(&mut db, -768, 256 * 6)?;
        let mut presentation = build(&mut db, None)?;

        // -3 dB on the element, +6 dB on the output
        let expected = 0.5 * 10f32.powf(3.0 / 20.0);
        let mixed = mix_half_scale(&mut presentation, &mut db)?;
        assert!((mixed[0][0] - expected).abs() < 1e-4, "{}", mixed[0][0]);
        assert!((mixed[1][1] - expected).abs() < 1e-4);

        Ok(())
    }

    #[test]
    fn redundant_descriptors_keep_the_stream() -> Result<()> {
        let mut db = Database::default();
        let descriptors = [
            magic_code(),
            lpcm_codec_config(1, 2, 48000),
            channel_element(10, 1, &[0, 1], &[(0, 1, 0, false), (1, 1, 0, false)], None, None),
            mix_presentation(20, "Main", &[(10, 100)], &[0]),
        ]
        .concat();
        install(&mut db, &descriptors)?;
        let mut presentation = build(&mut db, None)?;

        let first = audio_frame(0, None, &[100, 200]);
        assert!(presentation.on_frame(&frame(&first)?, &mut db)?.is_none());

        let mut config = lpcm_codec_config(1, 2, 48000);
        let mut element =
            channel_element(10, 1, &[0, 1], &[(0, 1, 0, false), (1, 1, 0, false)], None, None);
        config[0] |= 0x04;
        element[0] |= 0x04;
        install(&mut db, &[config, element].concat())?;

        let mut presentation = build(&mut db, Some(presentation))?;
        let second = audio_frame(1, None, &[100, 200]);
        let mixed = presentation
            .on_frame(&frame(&second)?, &mut db)?
            .expect("first packet survived the rebuild");
        assert_eq!(mixed[0], vec![100.0 / 32768.0, 200.0 / 32768.0]);

        Ok(())
    }

    #[test]
    fn no_mix_presentation() -> Result<()> {
        let mut db = Database::default();
        install(&mut db, &[magic_code(), lpcm_codec_config(1, 2, 48000)].concat())?;

        let err = build(&mut db, None).err().expect("nothing to present");
        assert!(matches!(
            err.downcast_ref::<DecoderError>(),
            Some(DecoderError::NoMixPresentation)
        ));

        Ok(())
    }
}
