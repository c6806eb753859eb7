use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{AudioFormat, Cli, DecodeArgs};
use crate::byteorder::WriteBytesLe;
use crate::input::InputReader;
use crate::timestamp::time_str;
use crate::wav::WAVWriter;
use iamf::process::decode::{ConfigureStatus, Decoder, channel_count};
use iamf::structs::layout::OutputLayout;
use iamf::utils::errors::{DecoderError, ErrorCode};

fn create_path_with_extension(base_path: &Path, expected_ext: &str) -> PathBuf {
    match base_path.extension() {
        Some(ext) if ext == expected_ext => base_path.to_path_buf(),
        Some(_) => {
            let mut name = base_path.as_os_str().to_owned();
            name.push(".");
            name.push(expected_ext);
            PathBuf::from(name)
        }
        None => base_path.with_extension(expected_ext),
    }
}

fn create_progress_bar(multi: &MultiProgress, total_bytes: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_bytes {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
        )?);
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} {bytes}\n{msg} | elapsed: {elapsed_precise}",
        )?);
        pb
    };

    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("reading descriptors");
    Ok(pb)
}

enum AudioWriter {
    Pcm(BufWriter<File>),
    Wav(WAVWriter<File>),
}

impl AudioWriter {
    fn create(path: &Path, format: AudioFormat, sample_rate: u32, channels: u16) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;

        Ok(match format {
            AudioFormat::Pcm => AudioWriter::Pcm(BufWriter::new(file)),
            AudioFormat::Wav => {
                let mut writer = WAVWriter::new(file);
                writer.write_header(sample_rate, channels)?;
                AudioWriter::Wav(writer)
            }
        })
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        match self {
            AudioWriter::Pcm(writer) => {
                writer.write_all(&samples.to_le_vec())?;
            }
            AudioWriter::Wav(writer) => writer.write_samples(samples)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            AudioWriter::Pcm(writer) => writer.flush()?,
            AudioWriter::Wav(writer) => writer.finish()?,
        }
        Ok(())
    }
}

/// Feeds descriptors until the decoder is ready.
fn configure(decoder: &mut Decoder, input: &mut InputReader) -> Result<()> {
    loop {
        let outcome = match decoder.configure(input.pending()) {
            Ok(outcome) => outcome,
            Err(err) => {
                if matches!(
                    err.downcast_ref::<DecoderError>(),
                    Some(DecoderError::NoMixPresentation)
                ) {
                    return Err(err.context("Descriptors contain no usable mix presentation"));
                }
                return Err(err);
            }
        };

        input.consume(outcome.consumed);
        if outcome.status == ConfigureStatus::Ready {
            return Ok(());
        }

        if !input.fill()? {
            bail!("Stream ended before the descriptors were complete");
        }
    }
}

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    macro_rules! pb_update {
        ($pb:expr, $method:ident($($args:expr),*)) => {
            if let Some(ref pb) = $pb {
                pb.$method($($args),*);
            }
        };
    }

    let layout = OutputLayout::from(args.layout);
    log::info!(
        "Decoding IAMF stream: {} (strict mode: {}, layout: {layout})",
        args.input.display(),
        cli.strict,
    );

    let mut input = InputReader::new(&args.input)?;
    let pb = multi
        .map(|multi| create_progress_bar(multi, input.total_size()))
        .transpose()?;

    let mut decoder = Decoder::default();
    decoder.set_fail_level(cli.fail_level());
    decoder.set_output_layout(layout);
    decoder.set_mix_presentation_label(args.label.clone());

    configure(&mut decoder, &mut input)?;

    let channels = channel_count(layout);
    let sample_rate = decoder.sample_rate().unwrap_or(48000);
    if let Some(presentation) = decoder.presentation() {
        log::info!(
            "Mix presentation {} with {} elements, {} Hz, {channels} channels",
            presentation.mix().id,
            presentation.streams().len(),
            sample_rate
        );
    }

    let base_path = match (&args.output_path, input.is_pipe()) {
        (Some(path), _) => path.clone(),
        (None, false) => args.input.clone(),
        (None, true) => PathBuf::from("output"),
    };
    let audio_path = create_path_with_extension(&base_path, args.format.extension());
    let mut writer = AudioWriter::create(&audio_path, args.format, sample_rate, channels as u16)?;
    log::info!("Writing {}", audio_path.display());

    let mut pcm = Vec::new();
    let mut bytes_done = 0u64;
    let mut samples_written = 0u64;
    let mut frames = 0u64;
    let mut skipped = 0u64;

    loop {
        let frame_size = decoder.presentation().map_or(0, |p| p.frame_size() as usize);
        pcm.resize((frame_size * channels).max(pcm.len()), 0);

        match decoder.decode(input.pending(), &mut pcm) {
            Ok(decoded) => {
                input.consume(decoded.consumed);
                bytes_done += decoded.consumed as u64;

                if decoded.samples > 0 {
                    writer.write(&pcm[..decoded.samples * channels])?;
                    samples_written += decoded.samples as u64;
                    frames += 1;

                    pb_update!(pb, set_position(bytes_done));
                    pb_update!(
                        pb,
                        set_message(format!(
                            "{frames} frames, {}",
                            time_str(samples_written, sample_rate)
                        ))
                    );
                } else if !input.fill()? {
                    break;
                }
            }
            Err(err) => {
                let consumed = decoder.consumed();
                if cli.strict || consumed == 0 {
                    return Err(err.context(format!("Decoding failed after {frames} frames")));
                }

                if ErrorCode::of(&err) == ErrorCode::BufferTooSmall {
                    log::error!("{err:#}");
                } else {
                    log::warn!("{err:#}");
                }
                input.consume(consumed);
                bytes_done += consumed as u64;
                skipped += 1;
            }
        }
    }

    writer.finish()?;

    if !input.pending().is_empty() {
        log::warn!("{} trailing bytes do not form a complete OBU", input.pending().len());
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    log::info!(
        "Decoded {frames} frames ({}), {skipped} skipped",
        time_str(samples_written, sample_rate)
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_extension() {
        assert_eq!(
            create_path_with_extension(Path::new("out.wav"), "wav"),
            PathBuf::from("out.wav")
        );
        assert_eq!(
            create_path_with_extension(Path::new("stream.iamf"), "wav"),
            PathBuf::from("stream.iamf.wav")
        );
        assert_eq!(
            create_path_with_extension(Path::new("stream"), "pcm"),
            PathBuf::from("stream.pcm")
        );
    }
}
