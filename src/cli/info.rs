use std::collections::BTreeMap;

use anyhow::{Result, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs};
use crate::input::InputReader;
use crate::timestamp::time_str;
use iamf::process::database::Database;
use iamf::process::parse::{Object, Parser};
use iamf::structs::Descriptor;
use iamf::structs::audio_element::{AmbisonicsConfig, AudioElement, ElementConfig};
use iamf::structs::codec_config::CodecConfig;
use iamf::structs::mix_presentation::{LayoutLoudness, MixPresentation, TargetLayout};
use iamf::structs::obu::Obu;

/// Q7.8 fixed point to dB.
fn q7_8(value: i16) -> f32 {
    value as f32 / 256.0
}

#[derive(Debug, Serialize)]
struct StreamSummary {
    version: Option<VersionSummary>,
    codec_configs: Vec<CodecConfigSummary>,
    audio_elements: Vec<ElementSummary>,
    mix_presentations: Vec<MixSummary>,
    temporal_units: u64,
    parameter_blocks: u64,
    frames_per_substream: BTreeMap<u64, u64>,
    duration: Option<String>,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct VersionSummary {
    version: u8,
    primary_profile: u8,
    additional_profile: u8,
}

#[derive(Debug, Serialize)]
struct CodecConfigSummary {
    id: u64,
    codec: String,
    frame_size: u64,
    sample_rate: Option<u32>,
    roll_distance: i16,
}

impl From<&CodecConfig> for CodecConfigSummary {
    fn from(config: &CodecConfig) -> Self {
        Self {
            id: config.id,
            codec: config.codec_id.to_string(),
            frame_size: config.frame_size,
            sample_rate: config.sample_rate().ok(),
            roll_distance: config.roll_distance,
        }
    }
}

#[derive(Debug, Serialize)]
struct LayerSummary {
    layout: String,
    substreams: u8,
    coupled_substreams: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_gain_db: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AmbisonicsSummary {
    mode: &'static str,
    output_channels: usize,
    substreams: usize,
    coupled_substreams: usize,
}

#[derive(Debug, Serialize)]
struct ElementSummary {
    id: u64,
    kind: &'static str,
    codec_config_id: u64,
    substreams: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    layers: Vec<LayerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ambisonics: Option<AmbisonicsSummary>,
    demixing: bool,
    recon_gain: bool,
}

impl From<&AudioElement> for ElementSummary {
    fn from(element: &AudioElement) -> Self {
        let (kind, layers, ambisonics) = match &element.config {
            ElementConfig::ChannelBased(layers) => (
                "channel-based",
                layers
                    .iter()
                    .map(|layer| LayerSummary {
                        layout: format!("{:?}", layer.layout),
                        substreams: layer.substream_count,
                        coupled_substreams: layer.coupled_substream_count,
                        output_gain_db: layer
                            .output_gain_present
                            .then(|| q7_8(layer.output_gain)),
                    })
                    .collect(),
                None,
            ),
            ElementConfig::SceneBased(config) => {
                let (substreams, coupled_substreams) = config.substream_counts();
                let mode = match config {
                    AmbisonicsConfig::Mono { .. } => "mono",
                    AmbisonicsConfig::Projection { .. } => "projection",
                };
                (
                    "scene-based",
                    Vec::new(),
                    Some(AmbisonicsSummary {
                        mode,
                        output_channels: config.output_channel_count(),
                        substreams,
                        coupled_substreams,
                    }),
                )
            }
        };

        Self {
            id: element.id,
            kind,
            codec_config_id: element.codec_config_id,
            substreams: element.substream_ids.clone(),
            layers,
            ambisonics,
            demixing: element.demixing.is_some(),
            recon_gain: element.recon_gain.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MixElementSummary {
    element_id: u64,
    default_mix_gain_db: f32,
    headphones_rendering_mode: u8,
}

#[derive(Debug, Serialize)]
struct LayoutSummary {
    layout: String,
    integrated_loudness_db: f32,
    digital_peak_db: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    true_peak_db: Option<f32>,
}

impl From<&LayoutLoudness> for LayoutSummary {
    fn from(entry: &LayoutLoudness) -> Self {
        let layout = match &entry.layout {
            TargetLayout::SpLabel(labels) => format!("{} loudspeaker labels", labels.len()),
            TargetLayout::SoundSystem(ss) => format!("sound system {ss}"),
            TargetLayout::Binaural => "binaural".to_string(),
            TargetLayout::Reserved => "reserved".to_string(),
        };

        Self {
            layout,
            integrated_loudness_db: q7_8(entry.loudness.integrated_loudness),
            digital_peak_db: q7_8(entry.loudness.digital_peak),
            true_peak_db: entry.loudness.true_peak.map(q7_8),
        }
    }
}

#[derive(Debug, Serialize)]
struct MixSummary {
    id: u64,
    labels: Vec<String>,
    languages: Vec<String>,
    elements: Vec<MixElementSummary>,
    output_mix_gain_db: f32,
    layouts: Vec<LayoutSummary>,
}

impl From<&MixPresentation> for MixSummary {
    fn from(mix: &MixPresentation) -> Self {
        Self {
            id: mix.id,
            labels: mix.friendly_labels.clone(),
            languages: mix.language_labels.clone(),
            elements: mix
                .elements
                .iter()
                .map(|element| MixElementSummary {
                    element_id: element.element_id,
                    default_mix_gain_db: q7_8(element.mix_gain.default_mix_gain),
                    headphones_rendering_mode: element.headphones_rendering_mode,
                })
                .collect(),
            output_mix_gain_db: q7_8(mix.output_mix_gain.default_mix_gain),
            layouts: mix.layouts.iter().map(LayoutSummary::from).collect(),
        }
    }
}

/// Counters gathered while walking the OBU stream.
#[derive(Default)]
struct ScanContext {
    temporal_units: u64,
    parameter_blocks: u64,
    frames: BTreeMap<u64, u64>,
    bytes: u64,
}

impl ScanContext {
    fn process_obu(
        &mut self,
        obu: &Obu,
        parser: &mut Parser,
        db: &mut Database,
        cli: &Cli,
    ) -> Result<()> {
        let object = match parser.parse(obu, db) {
            Ok(object) => object,
            Err(err) => {
                if cli.strict {
                    return Err(err);
                }
                log::warn!("Skipping {} OBU: {err:#}", obu.obu_type);
                return Ok(());
            }
        };

        match object {
            Some(Object::TemporalDelimiter) => self.temporal_units += 1,
            Some(Object::Frame(frame)) => *self.frames.entry(frame.substream_id).or_default() += 1,
            Some(Object::Descriptor(
                Descriptor::Parameter(_) | Descriptor::OrphanedParameter { .. },
            )) => self.parameter_blocks += 1,
            Some(Object::Descriptor(descriptor)) => {
                if let Err(err) = db.add_object(descriptor) {
                    if cli.strict {
                        return Err(err);
                    }
                    log::warn!("{err:#}");
                }
            }
            None => {}
        }

        Ok(())
    }

    fn summarize(self, db: &Database) -> StreamSummary {
        let mut codec_configs: Vec<_> = db.codec_configs().map(CodecConfigSummary::from).collect();
        codec_configs.sort_by_key(|config| config.id);
        let mut audio_elements: Vec<_> = db.elements().map(ElementSummary::from).collect();
        audio_elements.sort_by_key(|element| element.id);

        // Streams without temporal delimiters carry one frame per substream per unit.
        let units = if self.temporal_units > 0 {
            self.temporal_units
        } else {
            self.frames.values().copied().max().unwrap_or(0)
        };

        let duration = db.codec_configs().next().and_then(|config| {
            let rate = config.sample_rate().ok()?;
            Some(time_str(units * config.frame_size, rate))
        });

        StreamSummary {
            version: db.version().map(|version| VersionSummary {
                version: version.version,
                primary_profile: version.primary_profile(),
                additional_profile: version.profile_version & 0x0f,
            }),
            codec_configs,
            audio_elements,
            mix_presentations: db.mix_presentations().iter().map(MixSummary::from).collect(),
            temporal_units: self.temporal_units,
            parameter_blocks: self.parameter_blocks,
            frames_per_substream: self.frames,
            duration,
            bytes: self.bytes,
        }
    }
}

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing IAMF stream: {}", args.input.display());

    let mut input = InputReader::new(&args.input)?;
    let mut parser = Parser::default();
    let mut db = Database::default();
    parser.set_fail_level(cli.fail_level());
    db.fail_level = cli.fail_level();

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Scanning OBUs...");
            Some(pb)
        }
        None => None,
    };

    let mut context = ScanContext::default();

    'scan: loop {
        loop {
            let size = match Obu::split(input.pending()) {
                Ok(Some(obu)) => {
                    context.process_obu(&obu, &mut parser, &mut db, cli)?;
                    obu.size
                }
                Ok(None) => break,
                Err(err) => {
                    if cli.strict {
                        return Err(err);
                    }
                    log::warn!("Stopping at malformed OBU after {} bytes: {err:#}", context.bytes);
                    break 'scan;
                }
            };
            input.consume(size);
            context.bytes += size as u64;
        }

        if let Some(ref pb) = pb {
            pb.set_message(format!(
                "Scanning OBUs...          {} temporal units",
                context.temporal_units
            ));
        }

        if !input.fill()? {
            break;
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if db.version().is_none() {
        bail!("No IA sequence header found; this doesn't appear to be an IAMF stream");
    }

    let summary = context.summarize(&db);
    if args.yaml {
        print!("{}", serde_yaml_ng::to_string(&summary)?);
    } else {
        display_summary(&summary);
    }

    Ok(())
}

fn display_summary(summary: &StreamSummary) {
    println!();
    println!("IAMF Stream Information");
    println!("=======================");
    println!();

    if let Some(version) = &summary.version {
        println!("Sequence Header");
        println!("  Version                   {}", version.version);
        println!("  Primary profile           {}", version.primary_profile);
        println!("  Additional profile        {}", version.additional_profile);
        println!();
    }

    println!("Codec Configs");
    for config in &summary.codec_configs {
        println!("  Codec config {}", config.id);
        println!("    Codec                   {}", config.codec);
        println!("    Frame size              {} samples", config.frame_size);
        match config.sample_rate {
            Some(rate) => println!("    Sampling rate           {rate} Hz"),
            None => println!("    Sampling rate           unknown"),
        }
        println!("    Roll distance           {}", config.roll_distance);
    }
    println!();

    println!("Audio Elements");
    for element in &summary.audio_elements {
        println!("  Audio element {} ({})", element.id, element.kind);
        println!("    Codec config            {}", element.codec_config_id);
        println!("    Substreams              {:?}", element.substreams);
        for (index, layer) in element.layers.iter().enumerate() {
            print!(
                "    Layer {index}                 {} ({} substreams, {} coupled)",
                layer.layout, layer.substreams, layer.coupled_substreams
            );
            match layer.output_gain_db {
                Some(gain) => println!(", output gain {gain:.2} dB"),
                None => println!(),
            }
        }
        if let Some(ambisonics) = &element.ambisonics {
            println!("    Ambisonics mode         {}", ambisonics.mode);
            println!("    Output channels         {}", ambisonics.output_channels);
        }
        println!("    Demixing                {}", element.demixing);
        println!("    Recon gain              {}", element.recon_gain);
    }
    println!();

    println!("Mix Presentations");
    for mix in &summary.mix_presentations {
        println!("  Mix presentation {}", mix.id);
        if !mix.labels.is_empty() {
            println!("    Labels                  {}", mix.labels.join(", "));
        }
        for element in &mix.elements {
            println!(
                "    Element {:<4}            mix gain {:.2} dB",
                element.element_id, element.default_mix_gain_db
            );
        }
        println!("    Output mix gain         {:.2} dB", mix.output_mix_gain_db);
        for layout in &mix.layouts {
            println!(
                "    {:<24}{:.2} LKFS, peak {:.2} dBFS",
                layout.layout, layout.integrated_loudness_db, layout.digital_peak_db
            );
        }
    }
    println!();

    println!("Analysis Summary");
    println!("  Temporal units            {}", summary.temporal_units);
    println!("  Parameter blocks          {}", summary.parameter_blocks);
    for (substream, frames) in &summary.frames_per_substream {
        println!("  Substream {substream:<6}          {frames} frames");
    }
    let size_mb = summary.bytes as f64 / 1_000_000.0;
    println!("  Size                      {size_mb:.2} MB ({} bytes)", summary.bytes);
    if let Some(duration) = &summary.duration {
        println!("  Duration                  {duration}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamf::structs::layout::SoundSystem;
    use iamf::structs::mix_presentation::Loudness;

    #[test]
    fn loudness_is_reported_in_db() {
        let entry = LayoutLoudness {
            layout: TargetLayout::SoundSystem(SoundSystem::B),
            loudness: Loudness {
                integrated_loudness: -24 * 256,
                digital_peak: -256,
                true_peak: Some(-128),
                ..Default::default()
            },
        };

        let summary = LayoutSummary::from(&entry);
        assert_eq!(summary.layout, "sound system B (0+5+0)");
        assert_eq!(summary.integrated_loudness_db, -24.0);
        assert_eq!(summary.digital_peak_db, -1.0);
        assert_eq!(summary.true_peak_db, Some(-0.5));
    }

    #[test]
    fn yaml_skips_absent_fields() -> Result<()> {
        let layer = LayerSummary {
            layout: "Stereo".to_string(),
            substreams: 1,
            coupled_substreams: 1,
            output_gain_db: None,
        };

        let yaml = serde_yaml_ng::to_string(&layer)?;
        assert!(yaml.contains("layout: Stereo"));
        assert!(!yaml.contains("output_gain_db"));

        Ok(())
    }
}
