//! Mix-gain curve expansion.
//!
//! Each subblock of a mix-gain parameter block is expanded once, when the
//! block arrives, into a [`GainUnit`]: a single constant for step curves, or
//! one linear gain per sample for linear and bezier curves.

use crate::structs::parameter::{MixGainCurve, ParameterBlock, SubblockData};

/// Linear gain of a Q7.8 dB value.
pub fn q8_to_linear(q: i16) -> f32 {
    10f32.powf(q as f32 / 256.0 / 20.0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum GainUnit {
    Constant(f32),
    Curve(Vec<f32>),
}

impl GainUnit {
    pub fn expand(curve: &MixGainCurve, count: usize) -> Self {
        match *curve {
            MixGainCurve::Step { start } => Self::Constant(q8_to_linear(start)),
            MixGainCurve::Linear { start, end } => {
                let (start, end) = (q8_to_linear(start), q8_to_linear(end));
                if count < 2 {
                    return Self::Curve(vec![start; count]);
                }

                let span = (count - 1) as f32;
                Self::Curve(
                    (0..count)
                        .map(|i| {
                            let a = i as f32 / span;
                            (1.0 - a) * start + a * end
                        })
                        .collect(),
                )
            }
            MixGainCurve::Bezier {
                start,
                end,
                control,
                control_relative_time,
            } => {
                let (p0, p1, p2) = (
                    q8_to_linear(start),
                    q8_to_linear(control),
                    q8_to_linear(end),
                );

                // Not clamped: a control time rounding to zero gives ct = -1.
                let frac = control_relative_time as f64 / 256.0;
                let ct = (frac * count as f64).round() as i64 - 1;
                let alpha = (count as i64 - 1 - 2 * ct) as f64;
                let beta = (2 * ct) as f64;

                Self::Curve(
                    (0..count)
                        .map(|i| {
                            let i = i as f64;
                            let t = if alpha == 0.0 {
                                if beta == 0.0 { 0.0 } else { i / beta }
                            } else {
                                let disc = (beta * beta + 4.0 * alpha * i).max(0.0);
                                (disc.sqrt() - beta) / (2.0 * alpha)
                            };
                            let t = t as f32;

                            (1.0 - t) * (1.0 - t) * p0 + 2.0 * (1.0 - t) * t * p1 + t * t * p2
                        })
                        .collect(),
                )
            }
        }
    }

    /// Gain at sample `i` of the subblock, holding the last value past its end.
    pub fn at(&self, i: usize) -> f32 {
        match self {
            Self::Constant(g) => *g,
            Self::Curve(gains) => gains
                .get(i)
                .or_else(|| gains.last())
                .copied()
                .unwrap_or(1.0),
        }
    }
}

/// Expands every mix-gain subblock of `block`; other block kinds yield nothing.
pub fn precompute(block: &ParameterBlock) -> Vec<GainUnit> {
    block
        .subblocks
        .iter()
        .filter_map(|subblock| match &subblock.data {
            SubblockData::MixGain(curve) => {
                Some(GainUnit::expand(curve, subblock.duration as usize))
            }
            _ => None,
        })
        .collect()
}

/// Per-sample gains for `count` samples starting `offset` samples into
/// `block`. Returns `None` when `offset` lies outside the block.
pub fn frame_gains(
    block: &ParameterBlock,
    units: &[GainUnit],
    offset: i64,
    count: usize,
) -> Option<Vec<f32>> {
    block.segment(offset)?;

    let mut gains = Vec::with_capacity(count);
    let mut start = 0i64;
    let mut last = 1.0;

    for (subblock, unit) in block.subblocks.iter().zip(units) {
        let end = start + subblock.duration as i64;
        let from = offset + gains.len() as i64;

        if end > from {
            let pos = (from - start) as usize;
            let take = ((end - from) as usize).min(count - gains.len());
            gains.extend((pos..pos + take).map(|i| unit.at(i)));
        }
        if let Some(&g) = gains.last() {
            last = g;
        }
        if gains.len() == count {
            break;
        }

        start = end;
    }

    gains.resize(count, last);
    Some(gains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::param_definition::ParameterType;
    use crate::structs::parameter::Subblock;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
        }
    }

    fn curve(unit: GainUnit) -> Vec<f32> {
        match unit {
            GainUnit::Curve(gains) => gains,
            GainUnit::Constant(g) => panic!("expected curve, got constant {g}"),
        }
    }

    #[test]
    fn step_is_constant() {
        let unit = GainUnit::expand(&MixGainCurve::Step { start: -768 }, 960);
        assert_eq!(unit, GainUnit::Constant(q8_to_linear(-768)));
        assert!((unit.at(500) - 0.70795).abs() < 1e-5);
    }

    #[test]
    fn linear_interpolates_linear_gains() {
        // 0 dB to -6.0206 dB, i.e. 1.0 to 0.5
        let end = (20.0 * 0.5f32.log10() * 256.0).round() as i16;
        let unit = GainUnit::expand(&MixGainCurve::Linear { start: 0, end }, 4);
        assert_close(&curve(unit), &[1.0, 0.8333, 0.6667, 0.5]);
    }

    #[test]
    fn linear_single_sample_uses_start() {
        let unit = GainUnit::expand(&MixGainCurve::Linear { start: 0, end: -768 }, 1);
        assert_close(&curve(unit), &[1.0]);
    }

    #[test]
    fn bezier_hits_both_ends() {
        let bezier = MixGainCurve::Bezier {
            start: 0,
            end: -768,
            control: -256,
            control_relative_time: 128,
        };
        let gains = curve(GainUnit::expand(&bezier, 5));

        assert!((gains[0] - 1.0).abs() < 1e-5);
        assert!((gains[4] - q8_to_linear(-768)).abs() < 1e-5);
        assert!(gains.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn bezier_control_time_zero_is_not_clamped() {
        let bezier = MixGainCurve::Bezier {
            start: 0,
            end: -768,
            control: 0,
            control_relative_time: 0,
        };
        let gains = curve(GainUnit::expand(&bezier, 3));

        // ct = -1 gives t = 0.5 at the first sample
        let expected = 0.25 + 0.5 + 0.25 * q8_to_linear(-768);
        assert!((gains[0] - expected).abs() < 1e-5);
        assert!((gains[2] - q8_to_linear(-768)).abs() < 1e-5);
    }

    #[test]
    fn frame_gains_span_subblocks() {
        let block = ParameterBlock {
            id: 1,
            kind: ParameterType::MixGain,
            duration: 6,
            subblocks: vec![
                Subblock {
                    duration: 2,
                    data: SubblockData::MixGain(MixGainCurve::Step { start: 0 }),
                },
                Subblock {
                    duration: 4,
                    data: SubblockData::MixGain(MixGainCurve::Step { start: -768 }),
                },
            ],
        };
        let units = precompute(&block);
        let g = q8_to_linear(-768);

        assert_close(
            &frame_gains(&block, &units, 1, 4).expect("inside block"),
            &[1.0, g, g, g],
        );
        assert_close(
            &frame_gains(&block, &units, 4, 4).expect("inside block"),
            &[g, g, g, g],
        );
        assert!(frame_gains(&block, &units, 6, 4).is_none());
    }
}
