//! Loudspeaker layouts, sound systems and channel labels.
//!
//! Two vocabularies meet here. [`ChannelLabel`] names a channel as it is
//! carried or reconstructed inside a scalable channel layout, where `L2`,
//! `L3`, `L5` and `L7` are different signals. [`Speaker`] names a physical
//! playback position and is what output layouts are made of.

use std::fmt::Display;

use anyhow::{Result, bail};

use crate::utils::errors::ObjectError;

/// Physical loudspeaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    L,
    R,
    C,
    Lfe,
    Ls,
    Rs,
    Lss,
    Rss,
    Lrs,
    Rrs,
    Ltf,
    Rtf,
    Ltb,
    Rtb,
    Ctf,
    Tc,
    Ctb,
    Lts,
    Rts,
    Cbf,
    Lbf,
    Rbf,
    Lsc,
    Rsc,
    Cb,
    Lfe2,
}

impl Speaker {
    pub fn is_lfe(self) -> bool {
        matches!(self, Speaker::Lfe | Speaker::Lfe2)
    }

    /// Azimuth and elevation in degrees, positive azimuth to the left.
    pub fn direction(self) -> (f32, f32) {
        use Speaker::*;
        match self {
            L => (30.0, 0.0),
            R => (-30.0, 0.0),
            C | Lfe | Lfe2 => (0.0, 0.0),
            Ls => (110.0, 0.0),
            Rs => (-110.0, 0.0),
            Lss => (90.0, 0.0),
            Rss => (-90.0, 0.0),
            Lrs => (135.0, 0.0),
            Rrs => (-135.0, 0.0),
            Ltf => (45.0, 30.0),
            Rtf => (-45.0, 30.0),
            Ltb => (135.0, 30.0),
            Rtb => (-135.0, 30.0),
            Ctf => (0.0, 30.0),
            Tc => (0.0, 90.0),
            Ctb => (180.0, 30.0),
            Lts => (90.0, 30.0),
            Rts => (-90.0, 30.0),
            Cbf => (0.0, -30.0),
            Lbf => (45.0, -30.0),
            Rbf => (-45.0, -30.0),
            Lsc => (15.0, 0.0),
            Rsc => (-15.0, 0.0),
            Cb => (180.0, 0.0),
        }
    }
}

/// Channel identity inside a scalable channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLabel {
    Mono,
    L2,
    R2,
    C,
    Lfe,
    L3,
    R3,
    Ltf3,
    Rtf3,
    L5,
    R5,
    Ls5,
    Rs5,
    Ltf2,
    Rtf2,
    Ltf4,
    Rtf4,
    Ltb4,
    Rtb4,
    L7,
    R7,
    Lss7,
    Rss7,
    Lrs7,
    Rrs7,
}

impl ChannelLabel {
    pub fn speaker(self) -> Speaker {
        use ChannelLabel::*;
        match self {
            Mono | C => Speaker::C,
            L2 | L3 | L5 | L7 => Speaker::L,
            R2 | R3 | R5 | R7 => Speaker::R,
            Lfe => Speaker::Lfe,
            Ls5 => Speaker::Ls,
            Rs5 => Speaker::Rs,
            Lss7 => Speaker::Lss,
            Rss7 => Speaker::Rss,
            Lrs7 => Speaker::Lrs,
            Rrs7 => Speaker::Rrs,
            Ltf2 | Ltf3 | Ltf4 => Speaker::Ltf,
            Rtf2 | Rtf3 | Rtf4 => Speaker::Rtf,
            Ltb4 => Speaker::Ltb,
            Rtb4 => Speaker::Rtb,
        }
    }

    /// Bit position of this channel in a recon-gain flag word.
    pub fn recon_gain_bit(self) -> usize {
        match self.speaker() {
            Speaker::L => 0,
            Speaker::C => 1,
            Speaker::R => 2,
            Speaker::Ls | Speaker::Lss => 3,
            Speaker::Rs | Speaker::Rss => 4,
            Speaker::Ltf => 5,
            Speaker::Rtf => 6,
            Speaker::Lrs => 7,
            Speaker::Rrs => 8,
            Speaker::Ltb => 9,
            Speaker::Rtb => 10,
            _ => 11,
        }
    }

    /// Bit in a layer's 6-bit `output_gain_flags`, MSB first.
    pub fn output_gain_bit(self) -> Option<u8> {
        match self.speaker() {
            Speaker::L => Some(5),
            Speaker::R => Some(4),
            Speaker::Ls | Speaker::Lss => Some(3),
            Speaker::Rs | Speaker::Rss => Some(2),
            Speaker::Ltf => Some(1),
            Speaker::Rtf => Some(0),
            _ => None,
        }
    }
}

use ChannelLabel::*;

/// Coupled pairs in transmission order.
const PAIR_ORDER: [(ChannelLabel, ChannelLabel); 11] = [
    (L2, R2),
    (L3, R3),
    (L5, R5),
    (L7, R7),
    (Ls5, Rs5),
    (Lss7, Rss7),
    (Lrs7, Rrs7),
    (Ltf2, Rtf2),
    (Ltf3, Rtf3),
    (Ltf4, Rtf4),
    (Ltb4, Rtb4),
];

/// Single channels in transmission order, after all pairs.
const SINGLE_ORDER: [ChannelLabel; 4] = [Mono, L2, C, Lfe];

/// Loudspeaker layout of one layer of a scalable channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoudspeakerLayout {
    Mono,
    Stereo,
    S5_1,
    S5_1_2,
    S5_1_4,
    S7_1,
    S7_1_2,
    S7_1_4,
    S3_1_2,
    Binaural,
}

impl LoudspeakerLayout {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Mono,
            1 => Self::Stereo,
            2 => Self::S5_1,
            3 => Self::S5_1_2,
            4 => Self::S5_1_4,
            5 => Self::S7_1,
            6 => Self::S7_1_2,
            7 => Self::S7_1_4,
            8 => Self::S3_1_2,
            9 => Self::Binaural,
            value => bail!(ObjectError::Reserved {
                what: "loudspeaker_layout",
                value: value as u64,
            }),
        })
    }

    /// Channels of the fully reconstructed layer, in output order.
    pub fn labels(self) -> &'static [ChannelLabel] {
        match self {
            Self::Mono => &[Mono],
            Self::Stereo | Self::Binaural => &[L2, R2],
            Self::S5_1 => &[L5, R5, C, Lfe, Ls5, Rs5],
            Self::S5_1_2 => &[L5, R5, C, Lfe, Ls5, Rs5, Ltf2, Rtf2],
            Self::S5_1_4 => &[L5, R5, C, Lfe, Ls5, Rs5, Ltf4, Rtf4, Ltb4, Rtb4],
            Self::S7_1 => &[L7, R7, C, Lfe, Lss7, Rss7, Lrs7, Rrs7],
            Self::S7_1_2 => &[L7, R7, C, Lfe, Lss7, Rss7, Lrs7, Rrs7, Ltf2, Rtf2],
            Self::S7_1_4 => &[
                L7, R7, C, Lfe, Lss7, Rss7, Lrs7, Rrs7, Ltf4, Rtf4, Ltb4, Rtb4,
            ],
            Self::S3_1_2 => &[L3, R3, C, Lfe, Ltf3, Rtf3],
        }
    }

    pub fn channels(self) -> usize {
        self.labels().len()
    }

    /// `(surround, height)` channel counts, LFE excluded.
    fn counts(self) -> (u8, u8) {
        match self {
            Self::Mono => (1, 0),
            Self::Stereo | Self::Binaural => (2, 0),
            Self::S3_1_2 => (3, 2),
            Self::S5_1 => (5, 0),
            Self::S5_1_2 => (5, 2),
            Self::S5_1_4 => (5, 4),
            Self::S7_1 => (7, 0),
            Self::S7_1_2 => (7, 2),
            Self::S7_1_4 => (7, 4),
        }
    }

    pub fn sound_system(self) -> Option<SoundSystem> {
        Some(match self {
            Self::Mono => SoundSystem::Mono,
            Self::Stereo => SoundSystem::A,
            Self::S5_1 => SoundSystem::B,
            Self::S5_1_2 => SoundSystem::C,
            Self::S5_1_4 => SoundSystem::D,
            Self::S7_1 => SoundSystem::I,
            Self::S7_1_2 => SoundSystem::Ext712,
            Self::S7_1_4 => SoundSystem::J,
            Self::S3_1_2 => SoundSystem::Ext312,
            Self::Binaural => return None,
        })
    }
}

/// Orders a channel set the way substreams carry it: coupled pairs first,
/// then single channels.
pub fn transmission_order(labels: &[ChannelLabel]) -> Vec<ChannelLabel> {
    let mut ordered = Vec::with_capacity(labels.len());

    for (left, right) in PAIR_ORDER {
        if labels.contains(&left) && labels.contains(&right) {
            ordered.push(left);
            ordered.push(right);
        }
    }

    for single in SINGLE_ORDER {
        if labels.contains(&single) && !ordered.contains(&single) {
            ordered.push(single);
        }
    }

    ordered
}

/// Channels newly carried by layer `cur` on top of layer `prev`, in
/// transmission order. Channels that the demixer reconstructs are excluded.
pub fn layer_delta(prev: Option<LoudspeakerLayout>, cur: LoudspeakerLayout) -> Vec<ChannelLabel> {
    let Some(prev) = prev else {
        return transmission_order(cur.labels());
    };

    let (s0, t0) = prev.counts();
    let (s1, t1) = cur.counts();
    let mut carried = Vec::new();

    if s1 > s0 {
        match s1 {
            2 => carried.push(L2),
            3 => carried.extend([C, Lfe]),
            5 => {
                carried.extend([L5, R5]);
                if s0 < 3 {
                    carried.extend([C, Lfe]);
                }
            }
            7 => {
                if s0 < 5 {
                    carried.extend([L7, R7]);
                }
                carried.extend([Lss7, Rss7]);
                if s0 < 3 {
                    carried.extend([C, Lfe]);
                }
            }
            _ => {}
        }
    }

    if t1 > t0 {
        match (t0, t1) {
            (0, 2) if cur == LoudspeakerLayout::S3_1_2 => carried.extend([Ltf3, Rtf3]),
            (0, 2) => carried.extend([Ltf2, Rtf2]),
            (0, 4) => carried.extend([Ltf4, Rtf4, Ltb4, Rtb4]),
            (2, 4) => carried.extend([Ltf4, Rtf4]),
            _ => {}
        }
    }

    transmission_order(&carried)
}

/// Standard loudspeaker arrangements usable as output layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundSystem {
    /// 0+2+0
    A,
    /// 0+5+0
    B,
    /// 2+5+0
    C,
    /// 4+5+0
    D,
    /// 4+5+1
    E,
    /// 3+7+0
    F,
    /// 4+9+0
    G,
    /// 9+10+3
    H,
    /// 0+7+0
    I,
    /// 4+7+0
    J,
    /// 7.1.2
    Ext712,
    /// 3.1.2
    Ext312,
    Mono,
}

impl SoundSystem {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            3 => Self::D,
            4 => Self::E,
            5 => Self::F,
            6 => Self::G,
            7 => Self::H,
            8 => Self::I,
            9 => Self::J,
            10 => Self::Ext712,
            11 => Self::Ext312,
            12 => Self::Mono,
            value => bail!(ObjectError::Reserved {
                what: "sound_system",
                value: value as u64,
            }),
        })
    }

    pub fn speakers(self) -> &'static [Speaker] {
        use Speaker::*;
        match self {
            Self::A => &[L, R],
            Self::B => &[L, R, C, Lfe, Ls, Rs],
            Self::C => &[L, R, C, Lfe, Ls, Rs, Ltf, Rtf],
            Self::D => &[L, R, C, Lfe, Ls, Rs, Ltf, Rtf, Ltb, Rtb],
            Self::E => &[L, R, C, Lfe, Ls, Rs, Ltf, Rtf, Ltb, Rtb, Cbf],
            Self::F => &[L, R, C, Lfe, Lss, Rss, Lrs, Rrs, Ltf, Rtf, Ctb, Lfe2],
            Self::G => &[L, R, C, Lfe, Lss, Rss, Lrs, Rrs, Ltf, Rtf, Ltb, Rtb, Lsc, Rsc],
            Self::H => &[
                L, R, C, Lfe, Lrs, Rrs, Lsc, Rsc, Cb, Lfe2, Lss, Rss, Ltf, Rtf, Ctf, Tc, Ltb, Rtb,
                Lts, Rts, Ctb, Cbf, Lbf, Rbf,
            ],
            Self::I => &[L, R, C, Lfe, Lss, Rss, Lrs, Rrs],
            Self::J => &[L, R, C, Lfe, Lss, Rss, Lrs, Rrs, Ltf, Rtf, Ltb, Rtb],
            Self::Ext712 => &[L, R, C, Lfe, Lss, Rss, Lrs, Rrs, Ltf, Rtf],
            Self::Ext312 => &[L, R, C, Lfe, Ltf, Rtf],
            Self::Mono => &[C],
        }
    }

    pub fn channels(self) -> usize {
        self.speakers().len()
    }
}

impl Display for SoundSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::A => "A (0+2+0)",
            Self::B => "B (0+5+0)",
            Self::C => "C (2+5+0)",
            Self::D => "D (4+5+0)",
            Self::E => "E (4+5+1)",
            Self::F => "F (3+7+0)",
            Self::G => "G (4+9+0)",
            Self::H => "H (9+10+3)",
            Self::I => "I (0+7+0)",
            Self::J => "J (4+7+0)",
            Self::Ext712 => "7.1.2",
            Self::Ext312 => "3.1.2",
            Self::Mono => "mono",
        };
        write!(f, "{name}")
    }
}

/// Requested playback layout of the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    SoundSystem(SoundSystem),
    Binaural,
}

impl OutputLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::SoundSystem(ss) => ss.channels(),
            Self::Binaural => 2,
        }
    }

    /// Speaker feeds produced for this layout. Binaural output is rendered
    /// as a stereo pair by the built-in matrices.
    pub fn speakers(self) -> &'static [Speaker] {
        match self {
            Self::SoundSystem(ss) => ss.speakers(),
            Self::Binaural => SoundSystem::A.speakers(),
        }
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::SoundSystem(SoundSystem::A)
    }
}

impl Display for OutputLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SoundSystem(ss) => write!(f, "sound system {ss}"),
            Self::Binaural => write!(f, "binaural"),
        }
    }
}
