//! Rendering decoded elements to the output layout.
//!
//! Rendering is a matrix multiply from the element's channels to the output
//! speakers. Matrices come from a [`MatrixSource`]; [`DefaultMatrices`]
//! builds them from speaker positions:
//!
//! - loudspeaker to loudspeaker (M2M): matching speakers are copied, the rest
//!   fold down along a fallback chain at -3 dB.
//! - ambisonics to loudspeaker (H2M): a first-order basic sampling decoder.
//!   LFE outputs are fed by a 120 Hz low-pass of the omni channel instead.
//!
//! Binaural output renders to a stereo pair.

use std::f32::consts::PI;

use anyhow::Result;

use crate::structs::layout::{ChannelLabel, LoudspeakerLayout, OutputLayout, Speaker};

/// Layout of the channels handed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLayout {
    /// Channels of a reconstructed loudspeaker layout, in label order.
    Loudspeakers(LoudspeakerLayout),
    /// Ambisonics channels in ACN order with SN3D normalization.
    Ambisonics { channels: usize },
}

impl SourceLayout {
    pub fn channels(&self) -> usize {
        match self {
            Self::Loudspeakers(layout) => layout.channels(),
            Self::Ambisonics { channels } => *channels,
        }
    }
}

/// `[output channel][input channel]` gains.
pub type Matrix = Vec<Vec<f32>>;

/// Supplies rendering matrices.
pub trait MatrixSource: Send {
    fn matrix(&self, source: &SourceLayout, target: OutputLayout) -> Result<Matrix>;
}

const FOLD_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Rendering matrices derived from speaker positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMatrices;

impl DefaultMatrices {
    fn loudspeakers(labels: &[ChannelLabel], targets: &[Speaker]) -> Matrix {
        let mut matrix = vec![vec![0.0; labels.len()]; targets.len()];

        for (col, label) in labels.iter().enumerate() {
            let speaker = label.speaker();

            if let Some(row) = targets.iter().position(|&t| t == speaker) {
                matrix[row][col] = 1.0;
                continue;
            }

            // Centre into a pair with no centre speaker
            if speaker == Speaker::C {
                for side in [Speaker::L, Speaker::R] {
                    if let Some(row) = targets.iter().position(|&t| t == side) {
                        matrix[row][col] = FOLD_GAIN;
                    }
                }
                continue;
            }

            if let Some(row) = fallback(speaker)
                .iter()
                .find_map(|s| targets.iter().position(|t| t == s))
            {
                matrix[row][col] = FOLD_GAIN;
            }
        }

        matrix
    }

    fn ambisonics(channels: usize, targets: &[Speaker]) -> Matrix {
        let speakers = targets.iter().filter(|s| !s.is_lfe()).count().max(1) as f32;

        targets
            .iter()
            .map(|speaker| {
                let mut row = vec![0.0; channels];
                if speaker.is_lfe() {
                    return row;
                }

                let (azimuth, elevation) = speaker.direction();
                let (phi, theta) = (azimuth * PI / 180.0, elevation * PI / 180.0);
                // ACN order: W, Y, Z, X
                let basis = [
                    1.0,
                    3.0 * phi.sin() * theta.cos(),
                    3.0 * theta.sin(),
                    3.0 * phi.cos() * theta.cos(),
                ];
                for (gain, b) in row.iter_mut().zip(basis) {
                    *gain = b / speakers;
                }
                row
            })
            .collect()
    }
}

impl MatrixSource for DefaultMatrices {
    fn matrix(&self, source: &SourceLayout, target: OutputLayout) -> Result<Matrix> {
        Ok(match source {
            SourceLayout::Loudspeakers(layout) => {
                Self::loudspeakers(layout.labels(), target.speakers())
            }
            SourceLayout::Ambisonics { channels } => {
                Self::ambisonics(*channels, target.speakers())
            }
        })
    }
}

/// Where a speaker missing from the output folds to, nearest first.
fn fallback(speaker: Speaker) -> &'static [Speaker] {
    use Speaker::*;
    match speaker {
        L | R => &[C],
        Ls | Lss | Lrs => &[Ls, Lss, Lrs, L, C],
        Rs | Rss | Rrs => &[Rs, Rss, Rrs, R, C],
        Ltf | Ltb | Lts => &[Ltf, Lts, Ltb, L, C],
        Rtf | Rtb | Rts => &[Rtf, Rts, Rtb, R, C],
        Lsc | Lbf => &[L, C],
        Rsc | Rbf => &[R, C],
        Ctf | Tc | Ctb | Cb | Cbf => &[C],
        C | Lfe | Lfe2 => &[],
    }
}

/// Second order low-pass section, direct form I.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPass {
    b: [f32; 3],
    a: [f32; 2],
    x: [f32; 2],
    y: [f32; 2],
}

impl LowPass {
    pub const LFE_CUTOFF: f32 = 120.0;

    /// Butterworth response at `cutoff` Hz.
    pub fn new(cutoff: f32, sample_rate: u32) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate.max(1) as f32;
        let alpha = w0.sin() / (2.0 * std::f32::consts::FRAC_1_SQRT_2);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;

        Self {
            b: [
                (1.0 - cos) / 2.0 / a0,
                (1.0 - cos) / a0,
                (1.0 - cos) / 2.0 / a0,
            ],
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
            x: [0.0; 2],
            y: [0.0; 2],
        }
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + self.b[1] * self.x[0] + self.b[2] * self.x[1]
                    - self.a[0] * self.y[0]
                    - self.a[1] * self.y[1];
                self.x = [x, self.x[0]];
                self.y = [y, self.y[0]];
                y
            })
            .collect()
    }
}

/// Renders one element's frames to the output layout.
#[derive(Debug, Clone)]
pub struct Renderer {
    matrix: Matrix,
    /// LFE output rows fed from the omni channel.
    lfe: Vec<(usize, LowPass)>,
}

impl Renderer {
    pub fn new(
        matrices: &dyn MatrixSource,
        source: &SourceLayout,
        target: OutputLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let matrix = matrices.matrix(source, target)?;

        let lfe = match source {
            SourceLayout::Ambisonics { .. } => target
                .speakers()
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_lfe())
                .map(|(row, _)| (row, LowPass::new(LowPass::LFE_CUTOFF, sample_rate)))
                .collect(),
            SourceLayout::Loudspeakers(_) => Vec::new(),
        };

        Ok(Self { matrix, lfe })
    }

    pub fn channels(&self) -> usize {
        self.matrix.len()
    }

    pub fn render(&mut self, input: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let samples = input.first().map_or(0, Vec::len);
        let mut out = vec![vec![0.0; samples]; self.matrix.len()];

        for (row, channel) in self.matrix.iter().zip(out.iter_mut()) {
            for (&gain, source) in row.iter().zip(input) {
                if gain == 0.0 {
                    continue;
                }
                for (o, &x) in channel.iter_mut().zip(source) {
                    *o += gain * x;
                }
            }
        }

        if let Some(omni) = input.first() {
            for (row, filter) in &mut self.lfe {
                out[*row] = filter.process(omni);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::layout::SoundSystem;

    const STEREO: OutputLayout = OutputLayout::SoundSystem(SoundSystem::A);
    const FIVE_ONE: OutputLayout = OutputLayout::SoundSystem(SoundSystem::B);

    #[test]
    fn matching_layout_is_identity() -> Result<()> {
        let m = DefaultMatrices.matrix(&SourceLayout::Loudspeakers(LoudspeakerLayout::S5_1), FIVE_ONE)?;
        for (r, row) in m.iter().enumerate() {
            for (c, &g) in row.iter().enumerate() {
                assert_eq!(g, if r == c { 1.0 } else { 0.0 });
            }
        }
        Ok(())
    }

    #[test]
    fn five_one_folds_to_stereo() -> Result<()> {
        let m = DefaultMatrices.matrix(&SourceLayout::Loudspeakers(LoudspeakerLayout::S5_1), STEREO)?;

        // L5 R5 C LFE Ls5 Rs5
        assert_eq!(m[0], vec![1.0, 0.0, FOLD_GAIN, 0.0, FOLD_GAIN, 0.0]);
        assert_eq!(m[1], vec![0.0, 1.0, FOLD_GAIN, 0.0, 0.0, FOLD_GAIN]);
        Ok(())
    }

    #[test]
    fn seven_one_sides_fold_into_surrounds() -> Result<()> {
        let m = DefaultMatrices.matrix(&SourceLayout::Loudspeakers(LoudspeakerLayout::S7_1), FIVE_ONE)?;

        // L7 R7 C LFE Lss7 Rss7 Lrs7 Rrs7 into L R C LFE Ls Rs
        assert_eq!(m[4], vec![0.0, 0.0, 0.0, 0.0, FOLD_GAIN, 0.0, FOLD_GAIN, 0.0]);
        assert_eq!(m[3][3], 1.0);
        Ok(())
    }

    #[test]
    fn ambisonics_omni_reaches_every_speaker() -> Result<()> {
        let mut renderer = Renderer::new(
            &DefaultMatrices,
            &SourceLayout::Ambisonics { channels: 4 },
            FIVE_ONE,
            48000,
        )?;

        let input = vec![vec![1.0; 4], vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]];
        let out = renderer.render(&input);

        assert_eq!(out.len(), 6);
        for (row, channel) in out.iter().enumerate() {
            if row == 3 {
                // LFE is low-passed, starting from rest
                assert!(channel[0] > 0.0 && channel[0] < 0.01);
            } else {
                assert!((channel[0] - 0.2).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn first_order_steers_left() -> Result<()> {
        let m = DefaultMatrices.matrix(&SourceLayout::Ambisonics { channels: 4 }, STEREO)?;
        // Y is positive to the left
        assert!(m[0][1] > 0.0);
        assert!(m[1][1] < 0.0);
        assert!((m[0][3] - m[1][3]).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn low_pass_passes_dc() {
        let mut filter = LowPass::new(LowPass::LFE_CUTOFF, 48000);
        let out = filter.process(&vec![1.0; 48000]);
        assert!((out[47999] - 1.0).abs() < 1e-3);
    }
}
