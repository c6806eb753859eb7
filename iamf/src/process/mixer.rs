//! Sums the rendered frames of all elements of a presentation.
//!
//! Each element contributes once per tick, together with the trim of its
//! frame. When every element has contributed, the common output window is
//! `frame_size - max(trim_start) - max(trim_end)` samples and every element
//! is summed into it starting at its own `trim_start`.

use log::trace;

/// A rendered, gained frame of one element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementFrame {
    pub channels: Vec<Vec<f32>>,
    pub trim_start: u64,
    pub trim_end: u64,
}

#[derive(Debug, Clone)]
pub struct Mixer {
    frame_size: usize,
    channels: usize,
    slots: Vec<(u64, Option<ElementFrame>)>,
}

impl Mixer {
    pub fn new(frame_size: usize, channels: usize, elements: &[u64]) -> Self {
        Self {
            frame_size,
            channels,
            slots: elements.iter().map(|&id| (id, None)).collect(),
        }
    }

    /// Stores the frame of `element_id`, replacing one already stored for
    /// this tick.
    pub fn add(&mut self, element_id: u64, frame: ElementFrame) {
        if let Some((_, slot)) = self.slots.iter_mut().find(|(id, _)| *id == element_id) {
            if slot.is_some() {
                trace!("Element {element_id} contributed twice in one tick");
            }
            *slot = Some(frame);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|(_, slot)| slot.is_some())
    }

    pub fn clear(&mut self) {
        for (_, slot) in &mut self.slots {
            *slot = None;
        }
    }

    /// Mixes and clears the slots once every element has contributed.
    /// Returns the output channels and the common `trim_start`.
    pub fn mix(&mut self) -> Option<(Vec<Vec<f32>>, usize)> {
        if !self.is_complete() {
            return None;
        }

        let frames: Vec<ElementFrame> = self
            .slots
            .iter_mut()
            .filter_map(|(_, slot)| slot.take())
            .collect();

        let start = frames.iter().map(|f| f.trim_start).max().unwrap_or(0) as usize;
        let end = frames.iter().map(|f| f.trim_end).max().unwrap_or(0) as usize;
        let samples = self.frame_size.saturating_sub(start + end);

        let mut out = vec![vec![0.0f32; samples]; self.channels];
        for frame in &frames {
            let from = frame.trim_start as usize;
            let to = self.frame_size.saturating_sub(frame.trim_end as usize);

            for (o, channel) in out.iter_mut().zip(&frame.channels) {
                let source = channel.get(from..to.min(channel.len())).unwrap_or(&[]);
                for (o, &x) in o.iter_mut().zip(source) {
                    *o += x;
                }
            }
        }

        Some((out, start))
    }
}
