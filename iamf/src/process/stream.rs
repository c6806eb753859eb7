//! Per-element decoding.
//!
//! A [`Stream`] describes how one audio element of the selected mix
//! presentation is decoded: which substreams, which layers, which
//! parameters. A [`StreamDecoder`] owns the codec instances, demixer and
//! renderer for it and runs the packet state machine:
//!
//! ```text
//! Collecting --(all substreams + all required parameters)--> Prepared
//! Prepared   --(decode)--> Collecting
//! ```
//!
//! The required parameters form `pmask`; the parameters resolved at the
//! element's current timestamp form `uflags`.

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::process::codec::{CodecContext, CodecRegistry, CoreDecoder};
use crate::process::database::Database;
use crate::process::demix::{Demixer, LayerDemixer};
use crate::process::mixer::ElementFrame;
use crate::process::render::{MatrixSource, Renderer, SourceLayout};
use crate::structs::audio_element::{AudioElement, ChannelLayer, ElementConfig};
use crate::structs::codec_config::CodecConfig;
use crate::structs::frame::AudioFrame;
use crate::structs::layout::{OutputLayout, layer_delta};
use crate::structs::mix_presentation::MixGain;
use crate::structs::parameter::SubblockData;
use crate::utils::errors::StreamError;

/// `pmask`/`uflags` bit of the demixing mode parameter.
pub const PARAM_DEMIXING: u8 = 1 << 0;
/// `pmask`/`uflags` bit of the recon gain parameter.
pub const PARAM_RECON_GAIN: u8 = 1 << 1;
/// `pmask`/`uflags` bit of the element's mix gain parameter.
pub const PARAM_MIX_GAIN: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    Collecting,
    Prepared,
}

/// Result of handing a substream packet to a [`StreamDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Stored,
    /// The substream already has a packet in the current frame.
    Duplicate,
    /// The substream is not decoded by this stream.
    Foreign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamKind {
    Channels {
        /// Layers up to and including the selected one.
        layers: Vec<ChannelLayer>,
    },
    Ambisonics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub element_id: u64,
    pub codec_config_id: u64,
    pub frame_size: u64,
    pub sample_rate: u32,
    /// Substreams decoded for this element, in decode order.
    pub substream_ids: Vec<u64>,
    pub kind: StreamKind,
    pub demixing: Option<u64>,
    pub recon_gain: Option<u64>,
    pub mix_gain: Option<u64>,
    pub pmask: u8,
    /// Element and codec config were both redundant copies.
    pub redundant: bool,
}

impl Stream {
    /// Describes `element` decoded up to layer `selected` (channel-based only).
    pub fn new(
        element: &AudioElement,
        config: &CodecConfig,
        selected: usize,
        mix_gain: Option<&MixGain>,
    ) -> Result<Self> {
        if element.substream_ids.is_empty() {
            bail!(StreamError::EmptyElement(element.id));
        }

        let mut pmask = 0;
        if mix_gain.is_some_and(|g| !g.definition.mode) {
            pmask |= PARAM_MIX_GAIN;
        }

        let (kind, substream_ids) = match &element.config {
            ElementConfig::ChannelBased(layers) => {
                let mut used = 0;
                let mut prev = None;
                for (i, layer) in layers.iter().enumerate() {
                    let carried = layer_delta(prev, layer.layout).len();
                    if carried != layer.channels() {
                        bail!(StreamError::LayerChannelMismatch {
                            element: element.id,
                            layer: i,
                            channels: carried,
                            provided: layer.channels(),
                        });
                    }
                    used += layer.substream_count as usize;
                    prev = Some(layer.layout);
                }
                if used != element.substream_ids.len() {
                    bail!(StreamError::SubstreamMismatch {
                        element: element.id,
                        declared: element.substream_ids.len(),
                        used,
                    });
                }

                let selected = selected.min(layers.len().saturating_sub(1));
                let active = layers[..=selected].to_vec();
                let decoded: usize = active.iter().map(|l| l.substream_count as usize).sum();

                if selected > 0 && element.demixing.is_some() {
                    pmask |= PARAM_DEMIXING;
                }
                if element.recon_gain.is_some() && active[1..].iter().any(|l| l.recon_gain_present) {
                    pmask |= PARAM_RECON_GAIN;
                }

                (
                    StreamKind::Channels { layers: active },
                    element.substream_ids[..decoded].to_vec(),
                )
            }
            ElementConfig::SceneBased(ambisonics) => {
                let (substreams, _) = ambisonics.substream_counts();
                if substreams != element.substream_ids.len() {
                    bail!(StreamError::SubstreamMismatch {
                        element: element.id,
                        declared: element.substream_ids.len(),
                        used: substreams,
                    });
                }
                (StreamKind::Ambisonics, element.substream_ids.clone())
            }
        };

        Ok(Self {
            element_id: element.id,
            codec_config_id: config.id,
            frame_size: config.frame_size,
            sample_rate: config.sample_rate()?,
            substream_ids,
            kind,
            demixing: element.demixing.as_ref().map(|d| d.definition.parameter_id),
            recon_gain: element.recon_gain.as_ref().map(|d| d.parameter_id),
            mix_gain: mix_gain.map(|g| g.definition.parameter_id),
            pmask,
            redundant: element.redundant && config.redundant,
        })
    }

    /// Index of the selected layer, `None` for scene-based elements.
    pub fn selected_layer(&self) -> Option<usize> {
        match &self.kind {
            StreamKind::Channels { layers } => Some(layers.len() - 1),
            StreamKind::Ambisonics => None,
        }
    }
}

/// A codec instance and the number of substreams it consumes.
struct LayerDecoder {
    substreams: usize,
    decoder: Box<dyn CoreDecoder>,
}

pub struct StreamDecoder {
    stream: Stream,
    layout: OutputLayout,
    decoders: Vec<LayerDecoder>,
    demixer: Option<Box<dyn Demixer>>,
    renderer: Renderer,

    packets: Vec<Option<Vec<u8>>>,
    trim_start: u64,
    trim_end: u64,
    uflags: u8,
    forced: bool,
    state: PacketState,
}

impl StreamDecoder {
    pub fn new(
        stream: Stream,
        element: &AudioElement,
        config: &CodecConfig,
        registry: &CodecRegistry,
        matrices: &dyn MatrixSource,
        layout: OutputLayout,
    ) -> Result<Self> {
        let context = |substreams: usize, coupled_substreams: usize| CodecContext {
            codec_id: config.codec_id,
            decoder_config: &config.decoder_config,
            sample_rate: stream.sample_rate,
            frame_size: stream.frame_size as usize,
            substreams,
            coupled_substreams,
        };

        let (decoders, demixer, source) = match (&stream.kind, &element.config) {
            (StreamKind::Channels { layers }, _) => {
                let mut decoders = Vec::with_capacity(layers.len());
                for layer in layers {
                    let substreams = layer.substream_count as usize;
                    let ctx = context(substreams, layer.coupled_substream_count as usize);
                    decoders.push(LayerDecoder {
                        substreams,
                        decoder: registry.open(&ctx)?,
                    });
                }

                let demixer = LayerDemixer::new(layers, element.demixing.as_ref().map(|d| d.info));
                let source = SourceLayout::Loudspeakers(demixer.target());
                let demixer: Box<dyn Demixer> = Box::new(demixer);
                (decoders, Some(demixer), source)
            }
            (StreamKind::Ambisonics, ElementConfig::SceneBased(ambisonics)) => {
                let (substreams, coupled) = ambisonics.substream_counts();
                let decoder = registry.open_ambisonics(&context(substreams, coupled), ambisonics)?;
                let source = SourceLayout::Ambisonics {
                    channels: ambisonics.output_channel_count(),
                };
                (
                    vec![LayerDecoder {
                        substreams,
                        decoder,
                    }],
                    None,
                    source,
                )
            }
            (StreamKind::Ambisonics, ElementConfig::ChannelBased(_)) => {
                bail!(StreamError::UnknownElement(element.id))
            }
        };

        let renderer = Renderer::new(matrices, &source, layout, stream.sample_rate)?;

        debug!(
            "Stream for element {}: {} substreams, {:?} to {layout}, pmask {:#05b}",
            stream.element_id,
            stream.substream_ids.len(),
            source,
            stream.pmask
        );

        Ok(Self {
            packets: vec![None; stream.substream_ids.len()],
            stream,
            layout,
            decoders,
            demixer,
            renderer,
            trim_start: 0,
            trim_end: 0,
            uflags: 0,
            forced: false,
            state: PacketState::Collecting,
        })
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn element_id(&self) -> u64 {
        self.stream.element_id
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    pub fn state(&self) -> PacketState {
        self.state
    }

    pub fn owns(&self, substream_id: u64) -> bool {
        self.stream.substream_ids.contains(&substream_id)
    }

    /// Demixing mode of the last decoded frame, if this stream demixes.
    pub fn demixing_mode(&self) -> Option<u8> {
        if self.stream.pmask & PARAM_DEMIXING == 0 {
            return None;
        }
        self.demixer.as_ref().map(|d| d.mode())
    }

    /// Stores a substream packet. The trim of the first substream becomes
    /// the trim of the frame.
    pub fn accept(&mut self, frame: &AudioFrame, db: &Database) -> Accepted {
        let Some(index) = self
            .stream
            .substream_ids
            .iter()
            .position(|&id| id == frame.substream_id)
        else {
            return Accepted::Foreign;
        };

        if self.packets[index].is_some() {
            return Accepted::Duplicate;
        }

        self.packets[index] = Some(frame.data.to_vec());
        if index == 0 {
            self.trim_start = frame.trim_start;
            self.trim_end = frame.trim_end;
        }

        self.refresh(db);
        Accepted::Stored
    }

    pub fn has_all_packets(&self) -> bool {
        self.packets.iter().all(Option::is_some)
    }

    /// Re-evaluates which required parameters resolve at the element's
    /// current timestamp, and the packet state.
    pub fn refresh(&mut self, db: &Database) {
        let timestamp = self.timestamp(db);
        let params = [
            (PARAM_DEMIXING, self.stream.demixing),
            (PARAM_RECON_GAIN, self.stream.recon_gain),
            (PARAM_MIX_GAIN, self.stream.mix_gain),
        ];

        self.uflags = 0;
        for (flag, id) in params {
            let Some(id) = id else { continue };
            if self.stream.pmask & flag == 0 {
                continue;
            }

            if db.get_segment(id, timestamp).is_some() {
                self.uflags |= flag;
            }
        }

        self.state = if self.has_all_packets() && (self.uflags == self.stream.pmask || self.forced) {
            PacketState::Prepared
        } else {
            PacketState::Collecting
        };

        trace!(
            "Element {} at {timestamp}: uflags {:#05b} of {:#05b}, {:?}",
            self.stream.element_id, self.uflags, self.stream.pmask, self.state
        );
    }

    /// Prepares the frame even though required parameters are missing.
    pub fn force_prepared(&mut self) {
        if self.has_all_packets() {
            self.forced = true;
            self.state = PacketState::Prepared;
        }
    }

    /// Drops buffered packets and returns to collecting.
    pub fn discard(&mut self) {
        self.packets.iter_mut().for_each(|p| *p = None);
        self.uflags = 0;
        self.forced = false;
        self.state = PacketState::Collecting;
    }

    fn timestamp(&self, db: &Database) -> i64 {
        db.element_viewer
            .get(self.stream.element_id)
            .map_or(0, |item| item.timestamp)
    }

    /// Decodes, renders and gains the prepared frame.
    pub fn decode(&mut self, db: &Database) -> Result<ElementFrame> {
        let packets: Vec<Vec<u8>> = self.packets.iter_mut().filter_map(Option::take).collect();
        let (trim_start, trim_end) = (self.trim_start, self.trim_end);
        self.discard();

        if packets.len() != self.stream.substream_ids.len() {
            bail!(StreamError::SubstreamMismatch {
                element: self.stream.element_id,
                declared: self.stream.substream_ids.len(),
                used: packets.len(),
            });
        }

        let timestamp = self.timestamp(db);
        let slices: Vec<&[u8]> = packets.iter().map(Vec::as_slice).collect();

        let mut channels = Vec::new();
        let mut offset = 0;
        for layer in &mut self.decoders {
            let decoded = layer.decoder.decode(&slices[offset..offset + layer.substreams])?;
            channels.extend(decoded);
            offset += layer.substreams;
        }

        if let Some(demixer) = &mut self.demixer {
            let mode = self
                .stream
                .demixing
                .and_then(|id| db.get_segment(id, timestamp))
                .and_then(|segment| match segment.data {
                    SubblockData::Demixing { mode } => Some(mode),
                    _ => None,
                });

            let selected = self.stream.selected_layer();
            let recon_gain = self
                .stream
                .recon_gain
                .and_then(|id| db.get_segment(id, timestamp))
                .and_then(|segment| match &segment.data {
                    SubblockData::ReconGain(gains) => {
                        gains.iter().find(|g| Some(g.layer) == selected)
                    }
                    _ => None,
                });

            channels = demixer.demix(channels, mode, recon_gain)?;
        }

        let mut channels = self.renderer.render(&channels);
        let samples = channels.first().map_or(0, Vec::len);

        let gains = self
            .stream
            .mix_gain
            .and_then(|id| db.mix_gains(id, timestamp, samples));
        match gains {
            Some(gains) => {
                for channel in &mut channels {
                    for (x, g) in channel.iter_mut().zip(&gains) {
                        *x *= g;
                    }
                }
            }
            None => {
                if let Some(g) = self.stream.mix_gain.and_then(|id| db.default_mix_gain(id)) {
                    channels.iter_mut().flatten().for_each(|x| *x *= g);
                }
            }
        }

        Ok(ElementFrame {
            channels,
            trim_start,
            trim_end,
        })
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

    fn demixing_block(mode: u32) -> Vec<u8> {
        obu(
            ObuType::ParameterBlock,
            &PayloadWriter::new().leb(50).bits(3, mode).bits(5, 0).finish(),
        )
    }

    /// Mono base layer plus stereo layer, one substream each.
    fn setup() -> Result<(Database, StreamDecoder)> {
        let mut db = Database::default();
        install(
            &mut db,
            &[
                magic_code(),
                lpcm_codec_config(1, 4, 48000),
                channel_element(10, 1, &[0, 1], &[(0, 1, 0, false), (1, 1, 0, false)], Some(50), None),
            ]
            .concat(),
        )?;

        let element = db.element(10).expect("element").clone();
        let config = db.codec_config(1).expect("codec config").clone();
        let stream = Stream::new(&element, &config, 1, None)?;
        let decoder = StreamDecoder::new(
            stream,
            &element,
            &config,
            &CodecRegistry::default(),
            &DefaultMatrices,
            STEREO,
        )?;

        Ok((db, decoder))
    }

    fn packet(substream_id: u64, samples: &[i16]) -> Vec<u8> {
        audio_frame(substream_id, None, samples)
    }

    fn push(decoder: &mut StreamDecoder, db: &Database, data: &[u8]) -> Result<Accepted> {
        let obu = Obu::split(data)?.expect("complete OBU");
        let frame = AudioFrame::from_obu(&obu)?;
        Ok(decoder.accept(&frame, db))
    }

    #[test]
    fn waits_for_demixing_parameter() -> Result<()> {
        let (mut db, mut decoder) = setup()?;
        assert_eq!(decoder.stream().pmask, PARAM_DEMIXING);

        // First block covers [0, 960); move past it
        install(&mut db, &demixing_block(0))?;
        db.advance_element(10, 960);

        push(&mut decoder, &db, &packet(0, &[0; 4]))?;
        push(&mut decoder, &db, &packet(1, &[0; 4]))?;
        assert!(decoder.has_all_packets());
        assert_eq!(decoder.state(), PacketState::Collecting);

        install(&mut db, &demixing_block(1))?;
        decoder.refresh(&db);
        assert_eq!(decoder.state(), PacketState::Prepared);

        Ok(())
    }

    #[test]
    fn fresh_stream_waits_for_first_demixing_block() -> Result<()> {
        let (mut db, mut decoder) = setup()?;

        push(&mut decoder, &db, &packet(0, &[0; 4]))?;
        push(&mut decoder, &db, &packet(1, &[0; 4]))?;
        assert!(decoder.has_all_packets());
        assert_eq!(decoder.state(), PacketState::Collecting);

        install(&mut db, &demixing_block(0))?;
        decoder.refresh(&db);
        assert_eq!(decoder.state(), PacketState::Prepared);

        Ok(())
    }

    #[test]
    fn decodes_and_demixes_prepared_frame() -> Result<()> {
        let (mut db, mut decoder) = setup()?;
        install(&mut db, &demixing_block(0))?;

        push(&mut decoder, &db, &packet(0, &[16384, 0, 0, 0]))?;
        assert_eq!(decoder.state(), PacketState::Collecting);
        push(&mut decoder, &db, &packet(1, &[8192, 0, 0, 0]))?;
        assert_eq!(decoder.state(), PacketState::Prepared);

        let frame = decoder.decode(&db)?;
        assert_eq!(frame.channels.len(), 2);
        assert_eq!(frame.channels[0][0], 0.25);
        assert_eq!(frame.channels[1][0], 0.75);
        assert_eq!(decoder.state(), PacketState::Collecting);
        assert!(!decoder.has_all_packets());

        Ok(())
    }

    #[test]
    fn duplicate_packet_is_reported() -> Result<()> {
        let (mut db, mut decoder) = setup()?;
        install(&mut db, &demixing_block(0))?;
        db.advance_element(10, 960);

        assert_eq!(push(&mut decoder, &db, &packet(0, &[0; 4]))?, Accepted::Stored);
        push(&mut decoder, &db, &packet(1, &[0; 4]))?;
        assert_eq!(push(&mut decoder, &db, &packet(0, &[0; 4]))?, Accepted::Duplicate);
        assert_eq!(push(&mut decoder, &db, &packet(7, &[0; 4]))?, Accepted::Foreign);

        decoder.force_prepared();
        assert_eq!(decoder.state(), PacketState::Prepared);

        Ok(())
    }

    #[test]
    fn layer_channel_mismatch_is_rejected() -> Result<()> {
        let mut db = Database::default();
        install(
            &mut db,
            &[
                magic_code(),
                lpcm_codec_config(1, 4, 48000),
                // 5.1 base layer claiming only two channels
                channel_element(10, 1, &[0], &[(2, 1, 1, false)], None, None),
            ]
            .concat(),
        )?;

        let element = db.element(10).expect("element");
        let config = db.codec_config(1).expect("codec config");
        let err = Stream::new(element, config, 0, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::LayerChannelMismatch { .. })
        ));

        Ok(())
    }
}
