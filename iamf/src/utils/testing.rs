//! Byte-stream builders for unit tests.

use anyhow::Result;
use bitstream_io::{BigEndian, BitWrite, BitWriter};

use crate::process::database::Database;
use crate::process::parse::{Object, Parser};
use crate::structs::obu::{Obu, ObuType};

pub(crate) struct PayloadWriter {
    bw: BitWriter<Vec<u8>, BigEndian>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self {
            bw: BitWriter::endian(Vec::new(), BigEndian),
        }
    }

    pub fn bits(mut self, n: u32, value: u32) -> Self {
        self.bw.write_unsigned_var(n, value).unwrap();
        self
    }

    pub fn flag(self, value: bool) -> Self {
        self.bits(1, value as u32)
    }

    pub fn u8(self, value: u8) -> Self {
        self.bits(8, value as u32)
    }

    pub fn u16(self, value: u16) -> Self {
        self.bits(16, value as u32)
    }

    pub fn u32(self, value: u32) -> Self {
        self.bits(32, value)
    }

    pub fn i16(mut self, value: i16) -> Self {
        self.bw.write_signed_var(16, value).unwrap();
        self
    }

    pub fn leb(self, value: u64) -> Self {
        let bytes = leb128(value);
        self.bytes(&bytes)
    }

    pub fn sleb(self, value: i64) -> Self {
        let bytes = sleb128(value);
        self.bytes(&bytes)
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.bw.write_bytes(bytes).unwrap();
        self
    }

    pub fn string(self, value: &str) -> Self {
        self.bytes(value.as_bytes()).u8(0)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bw.byte_align().unwrap();
        self.bw.into_writer()
    }
}

pub(crate) fn leb128(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn sleb128(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Frames `payload` as an OBU. `trim` is `(end, start)`, in wire order.
pub(crate) fn obu_with(
    obu_type: ObuType,
    redundant: bool,
    trim: Option<(u64, u64)>,
    payload: &[u8],
) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((end, start)) = trim {
        body.extend(leb128(end));
        body.extend(leb128(start));
    }
    body.extend_from_slice(payload);

    let mut out = vec![(obu_type.code() << 3) | ((redundant as u8) << 2) | ((trim.is_some() as u8) << 1)];
    out.extend(leb128(body.len() as u64));
    out.extend(body);
    out
}

pub(crate) fn obu(obu_type: ObuType, payload: &[u8]) -> Vec<u8> {
    obu_with(obu_type, false, None, payload)
}

pub(crate) fn magic_code() -> Vec<u8> {
    obu(
        ObuType::MagicCode,
        &PayloadWriter::new().bytes(b"iamf").u8(0).u8(0).finish(),
    )
}

/// 16-bit little-endian LPCM codec config.
pub(crate) fn lpcm_codec_config(id: u64, frame_size: u64, sample_rate: u32) -> Vec<u8> {
    obu(
        ObuType::CodecConfig,
        &PayloadWriter::new()
            .leb(id)
            .bytes(b"ipcm")
            .leb(frame_size)
            .i16(0)
            .u8(1)
            .u8(16)
            .u32(sample_rate)
            .finish(),
    )
}

/// `(layout, substreams, coupled, recon_gain_present)` per layer.
pub(crate) fn channel_element(
    id: u64,
    codec_config_id: u64,
    substream_ids: &[u64],
    layers: &[(u8, u8, u8, bool)],
    demixing_parameter: Option<u64>,
    recon_gain_parameter: Option<u64>,
) -> Vec<u8> {
    let mut w = PayloadWriter::new()
        .leb(id)
        .bits(3, 0)
        .bits(5, 0)
        .leb(codec_config_id)
        .leb(substream_ids.len() as u64);
    for &substream in substream_ids {
        w = w.leb(substream);
    }

    let params = demixing_parameter.is_some() as u64 + recon_gain_parameter.is_some() as u64;
    w = w.leb(params);
    if let Some(parameter_id) = demixing_parameter {
        w = w.leb(1);
        w = param_definition(w, parameter_id, 48000, Some(960));
        w = w.bits(3, 0).bits(5, 0).bits(4, 0).bits(4, 0);
    }
    if let Some(parameter_id) = recon_gain_parameter {
        w = w.leb(2);
        w = param_definition(w, parameter_id, 48000, Some(960));
    }

    w = w.bits(3, layers.len() as u32).bits(5, 0);
    for &(layout, substreams, coupled, recon) in layers {
        w = w
            .bits(4, layout as u32)
            .flag(false)
            .flag(recon)
            .bits(2, 0)
            .u8(substreams)
            .u8(coupled);
    }

    obu(ObuType::AudioElement, &w.finish())
}

/// Writes a ParamDefinition; `duration` selects mode 0 with one constant subblock.
pub(crate) fn param_definition(
    w: PayloadWriter,
    parameter_id: u64,
    rate: u64,
    duration: Option<u64>,
) -> PayloadWriter {
    let w = w.leb(parameter_id).leb(rate);
    match duration {
        Some(duration) => w.flag(false).bits(7, 0).leb(duration).leb(duration),
        None => w.flag(true).bits(7, 0),
    }
}

/// Single sub-mix presentation listing `elements` with mix-gain params in mode 1.
pub(crate) fn mix_presentation(
    id: u64,
    label: &str,
    elements: &[(u64, u64)],
    sound_systems: &[u8],
) -> Vec<u8> {
    mix_presentation_with_defaults(id, label, elements, sound_systems, 0, 0)
}

/// Like [`mix_presentation`], with Q7.8 default gains for the elements and the output.
pub(crate) fn mix_presentation_with_defaults(
    id: u64,
    label: &str,
    elements: &[(u64, u64)],
    sound_systems: &[u8],
    element_default: i16,
    output_default: i16,
) -> Vec<u8> {
    let mut w = PayloadWriter::new()
        .leb(id)
        .leb(1)
        .string("en-us")
        .string(label)
        .leb(1)
        .leb(elements.len() as u64);

    for &(element_id, mix_gain_id) in elements {
        w = w.leb(element_id).string("element").bits(2, 0).bits(6, 0).leb(0);
        w = param_definition(w, mix_gain_id, 48000, None).i16(element_default);
    }

    w = param_definition(w, 999, 48000, None).i16(output_default);
    w = w.leb(sound_systems.len() as u64);
    for &sound_system in sound_systems {
        w = w
            .bits(2, 2)
            .bits(4, sound_system as u32)
            .bits(2, 0)
            .u8(0)
            .i16(-24 * 256)
            .i16(-256);
    }

    obu(ObuType::MixPresentation, &w.finish())
}

/// Mode-1 mix-gain block holding one step subblock of `duration` ticks.
pub(crate) fn mix_gain_step(parameter_id: u64, duration: u64, gain: i16) -> Vec<u8> {
    obu(
        ObuType::ParameterBlock,
        &PayloadWriter::new()
            .leb(parameter_id)
            .leb(duration)
            .leb(duration)
            .leb(0)
            .i16(gain)
            .finish(),
    )
}

/// Audio frame with an explicit substream id.
pub(crate) fn audio_frame(substream_id: u64, trim: Option<(u64, u64)>, samples: &[i16]) -> Vec<u8> {
    let mut payload = leb128(substream_id);
    for sample in samples {
        payload.extend(sample.to_le_bytes());
    }
    obu_with(ObuType::AudioFrame, false, trim, &payload)
}

/// Parses every descriptor and parameter OBU of `stream` into `db`.
pub(crate) fn install(db: &mut Database, stream: &[u8]) -> Result<()> {
    let mut parser = Parser::default();
    let mut rest = stream;
    while let Some(obu) = Obu::split(rest)? {
        rest = &rest[obu.size..];
        if let Some(Object::Descriptor(d)) = parser.parse(&obu, db)? {
            db.add_object(d)?;
        }
    }
    Ok(())
}
