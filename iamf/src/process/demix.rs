//! Scalable channel layout reconstruction.
//!
//! A channel-based element decodes to the channels carried by its active
//! layers. The demixer rebuilds the channels of the highest active layer that
//! were not carried, using the layer equations:
//!
//! ```text
//! R2   = 2 * Mono - L2
//! L3   = L2 - 0.707 * C
//! Ls5  = (L3 - L5) / delta
//! Lrs7 = (Ls5 - alpha * Lss7) / beta
//! Ltf2 = Ltf3 - w * delta * Ls5
//! Ltb4 = (Ltf2 - Ltf4) / gamma
//! ```
//!
//! and their right-hand counterparts. `L7` is `L5`.

use std::collections::HashMap;

use anyhow::Result;
use log::{trace, warn};

use crate::process::gain::q8_to_linear;
use crate::structs::audio_element::ChannelLayer;
use crate::structs::layout::{ChannelLabel, LoudspeakerLayout, layer_delta};
use crate::structs::param_definition::DemixingInfo;
use crate::structs::parameter::ReconGain;

use ChannelLabel::*;

/// Reconstructs a target layout from decoded layer channels.
pub trait Demixer: Send {
    /// `channels` are in the order of [`Demixer::carried`]. Returns the
    /// target layout's channels in [`LoudspeakerLayout::labels`] order.
    fn demix(
        &mut self,
        channels: Vec<Vec<f32>>,
        mode: Option<u8>,
        recon_gain: Option<&ReconGain>,
    ) -> Result<Vec<Vec<f32>>>;

    /// Channels the decoder delivers, in order.
    fn carried(&self) -> &[ChannelLabel];

    /// Demixing mode applied to the last frame.
    fn mode(&self) -> u8;
}

/// `w` per `w_idx`.
pub const W_TABLE: [f32; 11] = [
    0.0, 0.0179, 0.0391, 0.0658, 0.1038, 0.25, 0.3962, 0.4342, 0.4609, 0.4821, 0.5,
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    alpha: f32,
    beta: f32,
    gamma: f32,
    delta: f32,
    w_step: i32,
}

impl Coefficients {
    fn of(mode: u8) -> Option<Self> {
        let (alpha, beta, gamma, delta, w_step) = match mode {
            0 => (1.0, 1.0, 0.707, 0.707, -1),
            1 => (0.707, 0.707, 0.707, 0.707, -1),
            2 => (1.0, 0.866, 0.866, 0.866, -1),
            4 => (1.0, 1.0, 0.707, 0.707, 1),
            5 => (0.707, 0.707, 0.707, 0.707, 1),
            6 => (1.0, 0.866, 0.866, 0.866, 1),
            _ => return None,
        };

        Some(Self {
            alpha,
            beta,
            gamma,
            delta,
            w_step,
        })
    }
}

/// The built-in [`Demixer`].
#[derive(Debug, Clone)]
pub struct LayerDemixer {
    carried: Vec<ChannelLabel>,
    target: LoudspeakerLayout,
    mode: u8,
    w_idx: i32,
    /// `(output_gain_flags, linear gain)` of the target layer.
    output_gain: Option<(u8, f32)>,
}

impl LayerDemixer {
    /// `layers` are the active layers, lowest first.
    pub fn new(layers: &[ChannelLayer], demixing: Option<DemixingInfo>) -> Self {
        let mut carried = Vec::new();
        let mut prev = None;
        for layer in layers {
            carried.extend(layer_delta(prev, layer.layout));
            prev = Some(layer.layout);
        }

        let target = prev.unwrap_or(LoudspeakerLayout::Mono);
        let output_gain = layers
            .last()
            .filter(|layer| layer.output_gain_present)
            .map(|layer| (layer.output_gain_flags, q8_to_linear(layer.output_gain)));

        let info = demixing.unwrap_or(DemixingInfo {
            dmixp_mode: 0,
            default_w: 0,
        });

        Self {
            carried,
            target,
            mode: info.dmixp_mode,
            w_idx: (info.default_w as i32).min(W_TABLE.len() as i32 - 1),
            output_gain,
        }
    }

    pub fn target(&self) -> LoudspeakerLayout {
        self.target
    }

    fn update_mode(&mut self, mode: Option<u8>) -> Coefficients {
        if let Some(mode) = mode {
            if Coefficients::of(mode).is_some() {
                self.mode = mode;
            } else {
                warn!("Reserved demixing mode {mode}, keeping mode {}", self.mode);
            }
        }

        let coefficients = Coefficients::of(self.mode).unwrap_or(Coefficients {
            alpha: 1.0,
            beta: 1.0,
            gamma: 0.707,
            delta: 0.707,
            w_step: -1,
        });
        self.w_idx = (self.w_idx + coefficients.w_step).clamp(0, W_TABLE.len() as i32 - 1);
        coefficients
    }
}

/// Channel set under reconstruction.
struct Channels {
    map: HashMap<ChannelLabel, Vec<f32>>,
    samples: usize,
}

impl Channels {
    fn has(&self, label: ChannelLabel) -> bool {
        self.map.contains_key(&label)
    }

    /// Inserts `f(a, b)` under `label` unless present or an input is missing.
    fn derive(
        &mut self,
        label: ChannelLabel,
        a: ChannelLabel,
        b: ChannelLabel,
        f: impl Fn(f32, f32) -> f32,
    ) -> bool {
        if self.has(label) {
            return false;
        }
        let (Some(x), Some(y)) = (self.map.get(&a), self.map.get(&b)) else {
            return false;
        };

        let derived = x.iter().zip(y).map(|(&x, &y)| f(x, y)).collect();
        self.map.insert(label, derived);
        true
    }

    fn take(&mut self, label: ChannelLabel) -> Vec<f32> {
        let source = match label {
            L7 if !self.has(L7) => L5,
            R7 if !self.has(R7) => R5,
            _ => label,
        };

        match self.map.get(&source) {
            Some(channel) => channel.clone(),
            None => {
                trace!("No source for {label:?}, output is silent");
                vec![0.0; self.samples]
            }
        }
    }
}

impl Demixer for LayerDemixer {
    fn demix(
        &mut self,
        channels: Vec<Vec<f32>>,
        mode: Option<u8>,
        recon_gain: Option<&ReconGain>,
    ) -> Result<Vec<Vec<f32>>> {
        let k = self.update_mode(mode);
        let w = W_TABLE[self.w_idx as usize];

        let samples = channels.first().map_or(0, Vec::len);
        let mut set = Channels {
            map: self.carried.iter().copied().zip(channels).collect(),
            samples,
        };
        let mut reconstructed = Vec::new();

        let steps: [(ChannelLabel, ChannelLabel, ChannelLabel, &dyn Fn(f32, f32) -> f32); 11] = [
            (R2, Mono, L2, &|m: f32, l: f32| 2.0 * m - l),
            (L3, L2, C, &|l: f32, c: f32| l - 0.707 * c),
            (R3, R2, C, &|r: f32, c: f32| r - 0.707 * c),
            (Ls5, L3, L5, &|l3: f32, l5: f32| (l3 - l5) / k.delta),
            (Rs5, R3, R5, &|r3: f32, r5: f32| (r3 - r5) / k.delta),
            (Lrs7, Ls5, Lss7, &|ls: f32, lss: f32| (ls - k.alpha * lss) / k.beta),
            (Rrs7, Rs5, Rss7, &|rs: f32, rss: f32| (rs - k.alpha * rss) / k.beta),
            (Ltf2, Ltf3, Ls5, &|tf: f32, ls: f32| tf - w * k.delta * ls),
            (Rtf2, Rtf3, Rs5, &|tf: f32, rs: f32| tf - w * k.delta * rs),
            (Ltb4, Ltf2, Ltf4, &|tf2: f32, tf4: f32| (tf2 - tf4) / k.gamma),
            (Rtb4, Rtf2, Rtf4, &|tf2: f32, tf4: f32| (tf2 - tf4) / k.gamma),
        ];

        for (label, a, b, f) in steps {
            if set.derive(label, a, b, f) {
                reconstructed.push(label);
            }
        }

        let mut out = Vec::with_capacity(self.target.channels());
        for &label in self.target.labels() {
            let mut channel = set.take(label);

            if let Some(recon) = recon_gain {
                if reconstructed.contains(&label) {
                    let g = recon.gain(label.recon_gain_bit());
                    channel.iter_mut().for_each(|x| *x *= g);
                }
            }

            if let Some((flags, g)) = self.output_gain {
                if label.output_gain_bit().is_some_and(|bit| flags & (1 << bit) != 0) {
                    channel.iter_mut().for_each(|x| *x *= g);
                }
            }

            out.push(channel);
        }

        Ok(out)
    }

    fn carried(&self) -> &[ChannelLabel] {
        &self.carried
    }

    fn mode(&self) -> u8 {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::parameter::RECON_GAIN_CHANNELS;

    fn layer(layout: LoudspeakerLayout, substreams: u8, coupled: u8) -> ChannelLayer {
        ChannelLayer {
            layout,
            output_gain_present: false,
            recon_gain_present: false,
            substream_count: substreams,
            coupled_substream_count: coupled,
            output_gain_flags: 0,
            output_gain: 0,
        }
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-4, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn mono_to_stereo() -> Result<()> {
        let layers = [
            layer(LoudspeakerLayout::Mono, 1, 0),
            layer(LoudspeakerLayout::Stereo, 1, 0),
        ];
        let mut demixer = LayerDemixer::new(&layers, None);
        assert_eq!(demixer.carried(), &[Mono, L2]);

        let out = demixer.demix(vec![vec![0.5, 0.0], vec![0.75, 0.25]], None, None)?;
        assert_close(&out[0], &[0.75, 0.25]);
        assert_close(&out[1], &[0.25, -0.25]);

        Ok(())
    }

    #[test]
    fn stereo_to_5_1_with_recon_gain() -> Result<()> {
        let layers = [
            layer(LoudspeakerLayout::Stereo, 1, 1),
            layer(LoudspeakerLayout::S5_1, 3, 1),
        ];
        let mut demixer = LayerDemixer::new(&layers, None);
        assert_eq!(demixer.carried(), &[L2, R2, L5, R5, C, Lfe]);

        let mut gains = [255u8; RECON_GAIN_CHANNELS];
        gains[Ls5.recon_gain_bit()] = 51;
        let recon = ReconGain {
            layer: 1,
            flags: 1 << Ls5.recon_gain_bit(),
            gains,
        };

        let c = 0.2;
        let (l2, l5) = (0.5, 0.1);
        let input = vec![
            vec![l2],
            vec![0.0],
            vec![l5],
            vec![0.0],
            vec![c],
            vec![0.05],
        ];
        let out = demixer.demix(input, Some(1), Some(&recon))?;

        // L5 R5 C LFE Ls5 Rs5
        let ls5 = (l2 - 0.707 * c - l5) / 0.707 * 0.2;
        let rs5 = (0.0 - 0.707 * c) / 0.707;
        assert_close(&out[0], &[l5]);
        assert_close(&out[3], &[0.05]);
        assert_close(&out[4], &[ls5]);
        assert_close(&out[5], &[rs5]);
        assert_eq!(demixer.mode(), 1);

        Ok(())
    }

    #[test]
    fn seven_one_aliases_five_one_fronts() -> Result<()> {
        let layers = [
            layer(LoudspeakerLayout::S5_1, 4, 2),
            layer(LoudspeakerLayout::S7_1, 1, 1),
        ];
        let mut demixer = LayerDemixer::new(&layers, None);
        assert_eq!(demixer.carried(), &[L5, R5, Ls5, Rs5, C, Lfe, Lss7, Rss7]);

        let input = (1..=8).map(|i| vec![i as f32 / 10.0]).collect();
        let out = demixer.demix(input, Some(0), None)?;

        // L7 R7 C LFE Lss7 Rss7 Lrs7 Rrs7
        assert_close(&out[0], &[0.1]);
        assert_close(&out[4], &[0.7]);
        assert_close(&out[6], &[0.3 - 0.7]);
        assert_close(&out[7], &[0.4 - 0.8]);

        Ok(())
    }

    #[test]
    fn w_index_steps_and_clamps() {
        let layers = [layer(LoudspeakerLayout::S5_1_2, 5, 3)];
        let mut demixer = LayerDemixer::new(
            &layers,
            Some(DemixingInfo {
                dmixp_mode: 4,
                default_w: 9,
            }),
        );

        demixer.update_mode(None);
        assert_eq!(demixer.w_idx, 10);
        demixer.update_mode(None);
        assert_eq!(demixer.w_idx, 10);

        demixer.update_mode(Some(3));
        assert_eq!(demixer.mode(), 4);

        demixer.update_mode(Some(0));
        assert_eq!(demixer.w_idx, 9);
    }

    #[test]
    fn output_gain_follows_flags() -> Result<()> {
        let mut stereo = layer(LoudspeakerLayout::Stereo, 1, 1);
        stereo.output_gain_present = true;
        stereo.output_gain_flags = 1 << 5;
        stereo.output_gain = -1541;

        let mut demixer = LayerDemixer::new(&[stereo], None);
        let out = demixer.demix(vec![vec![1.0], vec![1.0]], None, None)?;

        assert!((out[0][0] - 0.5).abs() < 1e-3);
        assert_eq!(out[1][0], 1.0);

        Ok(())
    }
}
