//! Descriptor database and its id-indexed viewers.
//!
//! The database owns every descriptor seen since the last magic code. Three
//! viewers index it for the frame pipeline:
//!
//! - [`ElementViewer`]: one [`ElementItem`] per audio element, carrying the
//!   element's running timestamp and the ids of its parameters.
//! - [`ParameterViewer`]: one [`ParameterItem`] per parameter id, holding the
//!   definition, the latest block and, for mix gain, its expanded curves.
//! - [`SyncViewer`]: start offsets from the latest sync OBU.

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::gain::{self, GainUnit};
use crate::structs::Descriptor;
use crate::structs::audio_element::AudioElement;
use crate::structs::codec_config::CodecConfig;
use crate::structs::mix_presentation::{MixGain, MixPresentation};
use crate::structs::param_definition::{DemixingInfo, ParamDefinition, ParameterType};
use crate::structs::parameter::{ParameterBlock, ParameterContext, Subblock};
use crate::structs::sync::{SYNC_DATA_AUDIO, SyncInfo};
use crate::structs::version::Version;
use crate::utils::errors::{DatabaseError, ParameterError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementItem {
    pub id: u64,
    pub codec_config_id: u64,
    /// One bit per channel layer that carries recon gain.
    pub recon_gain_flags: u8,
    /// Samples decoded so far, rebased by sync OBUs.
    pub timestamp: i64,
    /// Substream id whose sync entry rebases this element.
    pub sync_id: Option<u64>,
    pub demixing: Option<u64>,
    pub recon_gain: Option<u64>,
    pub mix_gain: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ParameterItem {
    pub id: u64,
    pub kind: ParameterType,
    pub parent: u64,
    /// Parent element timestamp when the latest block arrived.
    pub timestamp: i64,
    pub definition: ParamDefinition,
    pub demixing: Option<DemixingInfo>,
    pub default_mix_gain: i16,
    pub block: Option<ParameterBlock>,
    /// Expanded curves of `block`, one per subblock. Mix gain only.
    pub gains: Vec<GainUnit>,
}

impl ParameterItem {
    fn new(kind: ParameterType, parent: u64, definition: &ParamDefinition) -> Self {
        Self {
            id: definition.parameter_id,
            kind,
            parent,
            timestamp: 0,
            definition: definition.clone(),
            demixing: None,
            default_mix_gain: 0,
            block: None,
            gains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncItem {
    pub id: u64,
    pub data_type: u8,
    pub start: i64,
}

#[derive(Debug, Default)]
pub struct ElementViewer {
    items: HashMap<u64, ElementItem>,
}

impl ElementViewer {
    pub fn get(&self, id: u64) -> Option<&ElementItem> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ElementItem> {
        self.items.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ParameterViewer {
    items: HashMap<u64, ParameterItem>,
}

impl ParameterViewer {
    pub fn get(&self, id: u64) -> Option<&ParameterItem> {
        self.items.get(&id)
    }

    /// Registers a definition, keeping the block and timestamp of an item
    /// already registered under the same id.
    fn register(&mut self, item: ParameterItem) {
        match self.items.get_mut(&item.id) {
            Some(existing) => {
                existing.kind = item.kind;
                existing.parent = item.parent;
                existing.definition = item.definition;
                existing.demixing = item.demixing;
                existing.default_mix_gain = item.default_mix_gain;
            }
            None => {
                self.items.insert(item.id, item);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncViewer {
    items: Vec<SyncItem>,
}

impl SyncViewer {
    pub fn start_of(&self, id: u64) -> Option<i64> {
        self.items.iter().find(|item| item.id == id).map(|item| item.start)
    }

    /// Latest start among audio entries, the base for the next sync.
    fn audio_base(&self) -> i64 {
        self.items
            .iter()
            .filter(|item| item.data_type == SYNC_DATA_AUDIO)
            .map(|item| item.start)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Database {
    pub fail_level: log::Level,

    version: Option<Version>,
    sync: Option<SyncInfo>,
    codec_configs: HashMap<u64, CodecConfig>,
    elements: HashMap<u64, AudioElement>,
    mix_presentations: Vec<MixPresentation>,
    orphans: HashMap<u64, Vec<u8>>,

    pub element_viewer: ElementViewer,
    pub parameter_viewer: ParameterViewer,
    pub sync_viewer: SyncViewer,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
            version: None,
            sync: None,
            codec_configs: HashMap::new(),
            elements: HashMap::new(),
            mix_presentations: Vec::new(),
            orphans: HashMap::new(),
            element_viewer: ElementViewer::default(),
            parameter_viewer: ParameterViewer::default(),
            sync_viewer: SyncViewer::default(),
        }
    }
}

impl Database {
    /// Installs a descriptor. Returns the descriptor it replaced, if any.
    pub fn add_object(&mut self, object: Descriptor) -> Result<Option<Descriptor>> {
        Ok(match object {
            Descriptor::Version(version) => self.version.replace(version).map(Descriptor::Version),
            Descriptor::CodecConfig(config) => {
                self.require_version()?;
                debug!("Codec config {}: {}", config.id, config.codec_id);
                self.codec_configs
                    .insert(config.id, config)
                    .map(Descriptor::CodecConfig)
            }
            Descriptor::AudioElement(element) => {
                self.require_version()?;
                self.add_element(element)?.map(Descriptor::AudioElement)
            }
            Descriptor::MixPresentation(mix) => {
                self.require_version()?;
                self.add_mix_presentation(mix).map(Descriptor::MixPresentation)
            }
            Descriptor::Parameter(block) => self.add_parameter(block).map(Descriptor::Parameter),
            Descriptor::OrphanedParameter { id, payload } => {
                log_or_err!(self, Warn, anyhow::anyhow!(ParameterError::Orphaned(id)));
                self.orphans
                    .insert(id, payload)
                    .map(|payload| Descriptor::OrphanedParameter { id, payload })
            }
            Descriptor::Sync(sync) => {
                self.apply_sync(&sync);
                self.sync.replace(sync).map(Descriptor::Sync)
            }
        })
    }

    fn require_version(&self) -> Result<()> {
        if self.version.is_none() {
            log_or_err!(self, Warn, anyhow::anyhow!(DatabaseError::MissingMagicCode));
        }
        Ok(())
    }

    fn add_element(&mut self, element: AudioElement) -> Result<Option<AudioElement>> {
        if !self.codec_configs.contains_key(&element.codec_config_id) {
            bail!(DatabaseError::MissingCodecConfig {
                element: element.id,
                codec_config: element.codec_config_id,
            });
        }

        let timestamp = self
            .element_viewer
            .get(element.id)
            .map_or(0, |item| item.timestamp);
        let mix_gain = self.element_viewer.get(element.id).and_then(|item| item.mix_gain);

        let item = ElementItem {
            id: element.id,
            codec_config_id: element.codec_config_id,
            recon_gain_flags: element.recon_gain_flags(),
            timestamp,
            sync_id: element.substream_ids.first().copied(),
            demixing: element.demixing.as_ref().map(|d| d.definition.parameter_id),
            recon_gain: element.recon_gain.as_ref().map(|d| d.parameter_id),
            mix_gain,
        };

        if let Some(demixing) = &element.demixing {
            let mut param =
                ParameterItem::new(ParameterType::Demixing, element.id, &demixing.definition);
            param.demixing = Some(demixing.info);
            self.parameter_viewer.register(param);
        }
        if let Some(recon_gain) = &element.recon_gain {
            self.parameter_viewer.register(ParameterItem::new(
                ParameterType::ReconGain,
                element.id,
                recon_gain,
            ));
        }

        debug!(
            "Audio element {}: {} substreams, recon gain flags {:#04b}",
            element.id,
            element.substream_ids.len(),
            item.recon_gain_flags
        );

        self.element_viewer.items.insert(element.id, item);
        Ok(self.elements.insert(element.id, element))
    }

    fn add_mix_presentation(&mut self, mix: MixPresentation) -> Option<MixPresentation> {
        let register = |viewer: &mut ParameterViewer, parent: u64, gain: &MixGain| {
            let mut item = ParameterItem::new(ParameterType::MixGain, parent, &gain.definition);
            item.default_mix_gain = gain.default_mix_gain;
            viewer.register(item);
        };

        for element in &mix.elements {
            register(&mut self.parameter_viewer, element.element_id, &element.mix_gain);
        }
        if let Some(first) = mix.elements.first() {
            register(
                &mut self.parameter_viewer,
                first.element_id,
                &mix.output_mix_gain,
            );
        }

        match self.mix_presentations.iter_mut().find(|m| m.id == mix.id) {
            Some(existing) => Some(std::mem::replace(existing, mix)),
            None => {
                self.mix_presentations.push(mix);
                None
            }
        }
    }

    fn add_parameter(&mut self, block: ParameterBlock) -> Option<ParameterBlock> {
        let item = self.parameter_viewer.items.get_mut(&block.id)?;

        if let Some(parent) = self.element_viewer.get(item.parent) {
            item.timestamp = parent.timestamp;
        }
        if item.kind == ParameterType::MixGain {
            item.gains = gain::precompute(&block);
        }

        trace!(
            "Parameter {} ({}): {} subblocks at {}",
            block.id,
            item.kind,
            block.subblocks.len(),
            item.timestamp
        );

        item.block.replace(block)
    }

    fn apply_sync(&mut self, sync: &SyncInfo) {
        let base = self.sync_viewer.audio_base();

        self.sync_viewer.items = sync
            .entries
            .iter()
            .map(|entry| SyncItem {
                id: entry.obu_id,
                data_type: entry.data_type,
                start: base + entry.relative_offset as i64 + sync.global_offset as i64,
            })
            .collect();

        for item in self.element_viewer.items.values_mut() {
            if let Some(start) = item.sync_id.and_then(|id| self.sync_viewer.start_of(id)) {
                item.timestamp = start;
            }
        }
        for item in self.parameter_viewer.items.values_mut() {
            if let Some(start) = self.sync_viewer.start_of(item.id) {
                item.timestamp = start;
            }
        }

        debug!("Sync: {} entries rebased from {base}", sync.entries.len());
    }

    /// Context needed to parse a block of parameter `id`.
    pub fn parameter_context(&self, id: u64) -> Option<ParameterContext<'_>> {
        let item = self.parameter_viewer.get(id)?;
        let recon_gain_flags = match item.kind {
            ParameterType::ReconGain => self
                .element_viewer
                .get(item.parent)
                .map_or(0, |element| element.recon_gain_flags),
            _ => 0,
        };

        Some(ParameterContext {
            kind: item.kind,
            definition: &item.definition,
            recon_gain_flags,
        })
    }

    /// Subblock of parameter `id` active at `timestamp` on its parent's timeline.
    pub fn get_segment(&self, id: u64, timestamp: i64) -> Option<&Subblock> {
        let item = self.parameter_viewer.get(id)?;
        let block = item.block.as_ref()?;
        block
            .segment(timestamp - item.timestamp)
            .map(|(_, subblock)| subblock)
    }

    /// Per-sample mix gains of parameter `id` for `count` samples at `timestamp`.
    pub fn mix_gains(&self, id: u64, timestamp: i64, count: usize) -> Option<Vec<f32>> {
        let item = self.parameter_viewer.get(id)?;
        match &item.block {
            Some(block) => gain::frame_gains(block, &item.gains, timestamp - item.timestamp, count),
            None => None,
        }
    }

    /// Mix-gain default of parameter `id`, if it is not unity.
    pub fn default_mix_gain(&self, id: u64) -> Option<f32> {
        let item = self.parameter_viewer.get(id)?;
        (item.default_mix_gain != 0).then(|| gain::q8_to_linear(item.default_mix_gain))
    }

    pub fn advance_element(&mut self, id: u64, samples: u64) {
        if let Some(item) = self.element_viewer.get_mut(id) {
            item.timestamp += samples as i64;
        }
    }

    pub fn link_mix_gain(&mut self, element_id: u64, parameter_id: u64) {
        if let Some(item) = self.element_viewer.get_mut(element_id) {
            item.mix_gain = Some(parameter_id);
        }
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn codec_config(&self, id: u64) -> Option<&CodecConfig> {
        self.codec_configs.get(&id)
    }

    pub fn codec_configs(&self) -> impl Iterator<Item = &CodecConfig> {
        self.codec_configs.values()
    }

    pub fn element(&self, id: u64) -> Option<&AudioElement> {
        self.elements.get(&id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &AudioElement> {
        self.elements.values()
    }

    pub fn mix_presentations(&self) -> &[MixPresentation] {
        &self.mix_presentations
    }

    pub fn orphaned_parameters(&self) -> usize {
        self.orphans.len()
    }
}
