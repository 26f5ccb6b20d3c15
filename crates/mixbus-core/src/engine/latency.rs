//! Path latency compensation
//!
//! Effects such as the convolution reverb delay their output. When buses
//! with different chain latencies feed the same destination, the faster
//! paths are delayed so every contribution stays sample-aligned.
//!
//! Latency is tracked per bus as an *arrival* time: the bus's own chain
//! latency plus the latest arrival among the buses feeding it.

use crate::buffer::AudioBuffer;
use crate::types::{Sample, MAX_LATENCY_FRAMES};

/// Multi-channel ring buffer delay
pub struct DelayLine {
    /// Interleaved ring, `frames × channels`
    buffer: Vec<Sample>,
    channels: usize,
    frames: usize,
    write_pos: usize,
    delay: usize,
}

impl DelayLine {
    /// Create a delay line holding up to `max_delay` frames
    pub fn new(channels: usize, max_delay: usize) -> Self {
        let frames = max_delay + 1;
        Self {
            buffer: vec![0.0; frames * channels.max(1)],
            channels: channels.max(1),
            frames,
            write_pos: 0,
            delay: 0,
        }
    }

    /// Delay line sized for [`MAX_LATENCY_FRAMES`]
    pub fn for_compensation(channels: usize) -> Self {
        Self::new(channels, MAX_LATENCY_FRAMES)
    }

    /// Set the delay amount in frames; returns false if it had to be clamped
    ///
    /// Changing the delay clears the line. Real-time safe.
    pub fn set_delay(&mut self, frames: usize) -> bool {
        let clamped = frames.min(self.frames - 1);
        if clamped != self.delay {
            self.delay = clamped;
            self.clear();
        }
        clamped == frames
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Delay every channel of `buffer` in place
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.delay == 0 {
            return;
        }
        let channels = buffer.channels().min(self.channels);
        for frame in 0..buffer.frames() {
            // Read position is behind write position by `delay` frames
            let read_pos = (self.write_pos + self.frames - self.delay) % self.frames;
            for ch in 0..channels {
                self.buffer[self.write_pos * self.channels + ch] = buffer.get(frame, ch);
                buffer.set(frame, ch, self.buffer[read_pos * self.channels + ch]);
            }
            self.write_pos = (self.write_pos + 1) % self.frames;
        }
    }

    /// Clear the delay line (fill with silence)
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Compute compensation delays for a bus tree
///
/// - `order`: bus indices, every bus listed after all buses feeding it
/// - `parents[i]`: destination of bus `i` (`None` = master)
/// - `own[i]`: chain latency of bus `i`
///
/// Fills `arrival`, `incoming` (one extra trailing slot for master) and
/// `compensation`, and returns the latest arrival at the master bus. Uses
/// only the provided slices, so it is safe to call on the audio thread.
pub fn plan_compensation(
    order: &[usize],
    parents: &[Option<usize>],
    own: &[usize],
    arrival: &mut [usize],
    incoming: &mut [usize],
    compensation: &mut [usize],
) -> usize {
    let master = parents.len();
    incoming[..=master].fill(0);

    for &bus in order {
        arrival[bus] = own[bus] + incoming[bus];
        let dest = parents[bus].unwrap_or(master);
        incoming[dest] = incoming[dest].max(arrival[bus]);
    }
    for &bus in order {
        let dest = parents[bus].unwrap_or(master);
        compensation[bus] = incoming[dest] - arrival[bus];
    }
    incoming[master]
}
