//! Sample-rate conversion
//!
//! Linear interpolation with a streaming phase carry. Output positions are
//! computed from absolute frame counters, so the output of consecutive
//! blocks is identical to resampling their concatenation, and the block
//! sizes track `round(total_in × to / from)` exactly.

use crate::error::{EngineError, EngineResult};
use crate::types::Sample;

use super::AudioBuffer;

/// Streaming linear resampler
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Input frames per output frame
    step: f64,
    /// Streaming mode reads one input frame behind so every interpolation
    /// has both neighbours available
    lag: f64,
    frames_in: u64,
    frames_out: u64,
    /// Last `history_len` input frames per channel, oldest first (planar)
    history: Vec<Sample>,
    history_len: usize,
}

impl Resampler {
    /// Streaming resampler for block-by-block use (one input frame of latency)
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> EngineResult<Self> {
        Self::build(from_rate, to_rate, channels, 1.0)
    }

    /// Resampler for a single whole-signal conversion (no latency; the last
    /// input frame is held past the end)
    fn one_shot(from_rate: u32, to_rate: u32, channels: usize) -> EngineResult<Self> {
        Self::build(from_rate, to_rate, channels, 0.0)
    }

    fn build(from_rate: u32, to_rate: u32, channels: usize, lag: f64) -> EngineResult<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(EngineError::InvalidFormat("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(EngineError::InvalidFormat("channel count must be positive"));
        }
        let step = from_rate as f64 / to_rate as f64;
        let history_len = (step * 0.5).ceil() as usize + 3;
        Ok(Self {
            from_rate,
            to_rate,
            channels,
            step,
            lag,
            frames_in: 0,
            frames_out: 0,
            history: vec![0.0; history_len * channels],
            history_len,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Latency in output frames
    pub fn latency_frames(&self) -> usize {
        (self.lag / self.step).round() as usize
    }

    /// Output frames the next `process` call will produce for `input_frames`
    pub fn output_frames(&self, input_frames: usize) -> usize {
        (rounded_ratio(self.frames_in + input_frames as u64, self.to_rate, self.from_rate) - self.frames_out)
            as usize
    }

    /// Convert one block
    ///
    /// `output` is re-shaped (within its capacity) to the produced frame
    /// count. Both buffers must carry the resampler's channel count.
    pub fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> EngineResult<()> {
        if input.channels() != self.channels || output.channels() != self.channels {
            return Err(EngineError::mismatch(
                (self.channels, input.frames()),
                (input.channels().max(output.channels()), input.frames()),
            ));
        }
        let n_in = input.frames();
        let n_out = self.output_frames(n_in);
        output.set_frames(n_out)?;
        output.desc.sample_rate = self.to_rate;

        let base = self.frames_in as f64;
        for j in 0..n_out {
            let pos = (self.frames_out + j as u64) as f64 * self.step - self.lag - base;
            let left = pos.floor();
            let frac = (pos - left) as Sample;
            let left = left as i64;
            for ch in 0..self.channels {
                let a = self.fetch(input, left, ch);
                let b = self.fetch(input, left + 1, ch);
                output.set(j, ch, a + (b - a) * frac);
            }
        }

        self.push_history(input);
        self.frames_in += n_in as u64;
        self.frames_out += n_out as u64;
        Ok(())
    }

    /// Forget all carried state
    pub fn reset(&mut self) {
        self.frames_in = 0;
        self.frames_out = 0;
        self.history.fill(0.0);
    }

    #[inline]
    fn fetch(&self, input: &AudioBuffer, index: i64, ch: usize) -> Sample {
        let n = input.frames() as i64;
        if index < 0 {
            let back = (-index) as usize;
            if back > self.history_len {
                return self.history[ch * self.history_len];
            }
            self.history[ch * self.history_len + self.history_len - back]
        } else if index < n {
            input.get(index as usize, ch)
        } else if n > 0 {
            input.get((n - 1) as usize, ch)
        } else {
            self.history[ch * self.history_len + self.history_len - 1]
        }
    }

    fn push_history(&mut self, input: &AudioBuffer) {
        let n = input.frames();
        let len = self.history_len;
        for ch in 0..self.channels {
            let hist = &mut self.history[ch * len..(ch + 1) * len];
            if n >= len {
                for (i, h) in hist.iter_mut().enumerate() {
                    *h = input.get(n - len + i, ch);
                }
            } else {
                hist.copy_within(n.., 0);
                for i in 0..n {
                    hist[len - n + i] = input.get(i, ch);
                }
            }
        }
    }
}

/// `round(frames × num / den)` in integer arithmetic
fn rounded_ratio(frames: u64, num: u32, den: u32) -> u64 {
    let num = num as u128;
    let den = den as u128;
    ((frames as u128 * num * 2 + den) / (den * 2)) as u64
}

impl AudioBuffer {
    /// Resample the whole buffer to `new_rate`
    ///
    /// The frame count becomes `round(frames × new_rate / old_rate)`.
    /// Allocates; not for the audio thread.
    pub fn resample_to(&mut self, new_rate: u32) -> EngineResult<()> {
        if new_rate == 0 {
            return Err(EngineError::InvalidFormat("sample rate must be positive"));
        }
        if new_rate == self.desc.sample_rate {
            return Ok(());
        }
        let mut resampler = Resampler::one_shot(self.desc.sample_rate, new_rate, self.desc.channels)?;
        let frames = resampler.output_frames(self.desc.frames);
        let desc = self.desc;
        let mut output = AudioBuffer::allocate(desc.with_frames(frames))?;
        resampler.process(self, &mut output)?;
        *self = output;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBufferDesc;

    fn sine(rate: u32, frames: usize, freq: f32) -> AudioBuffer {
        let samples: Vec<f32> = (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect();
        AudioBuffer::from_interleaved(rate, 1, &samples).unwrap()
    }

    #[test]
    fn test_resample_to_frame_count() {
        let mut buffer = sine(44100, 44100, 440.0);
        buffer.resample_to(48000).unwrap();
        assert_eq!(buffer.frames(), 48000);
        assert_eq!(buffer.sample_rate(), 48000);

        let mut odd = sine(48000, 1001, 440.0);
        odd.resample_to(44100).unwrap();
        // 1001 * 44100 / 48000 = 919.66
        assert_eq!(odd.frames(), 920);
    }

    #[test]
    fn test_resample_rejects_zero_rate() {
        let mut buffer = sine(48000, 16, 440.0);
        assert!(buffer.resample_to(0).is_err());
    }

    #[test]
    fn test_streaming_matches_whole_signal() {
        let signal = sine(44100, 4096, 1000.0);
        let mut whole = Resampler::new(44100, 48000, 1).unwrap();
        let mut whole_out = AudioBuffer::with_capacity(AudioBufferDesc::new(48000, 1, 0), 8192).unwrap();
        whole.process(&signal, &mut whole_out).unwrap();

        let mut streaming = Resampler::new(44100, 48000, 1).unwrap();
        let mut collected = Vec::new();
        let mut block_out = AudioBuffer::with_capacity(AudioBufferDesc::new(48000, 1, 0), 1024).unwrap();
        for chunk in signal.samples().chunks(300) {
            let block = AudioBuffer::from_interleaved(44100, 1, chunk).unwrap();
            streaming.process(&block, &mut block_out).unwrap();
            collected.extend_from_slice(block_out.samples());
        }

        assert_eq!(collected.len(), whole_out.frames());
        for (a, b) in collected.iter().zip(whole_out.samples()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_interpolation_preserves_sine_shape() {
        let mut buffer = sine(48000, 4800, 100.0);
        buffer.resample_to(96000).unwrap();
        let expected = sine(96000, 9600, 100.0);
        for (a, b) in buffer.samples().iter().zip(expected.samples()).take(9000) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
