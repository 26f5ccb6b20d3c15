//! Uniformly-partitioned FFT convolution
//!
//! # Algorithm
//!
//! The impulse response is cut into partitions of `B` frames; each partition
//! is zero-padded to `2B` and transformed once, at load time. At run time
//! input is gathered into blocks of `B` frames. Every full block is
//! transformed together with the previous block (overlap-save), pushed into
//! a frequency-domain delay line, and multiplied against the partitions:
//!
//! ```text
//! Y = Σ_p  X[k − p] · H[p]
//! ```
//!
//! The second half of the inverse transform is the next `B` frames of
//! output, so the convolver adds exactly `B` frames of latency.
//!
//! All buffers are sized at construction; `process` never allocates.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::buffer::AudioBuffer;
use crate::error::{EngineError, EngineResult};
use crate::types::Sample;

/// Partition size in frames (and the latency it adds)
pub const PARTITION_FRAMES: usize = 128;

/// Longest impulse response accepted; longer ones are truncated
pub const MAX_IR_SECONDS: f32 = 10.0;

/// Streaming state for one processed channel
struct ChannelState {
    /// Input gathered for the block being filled
    input: Vec<Sample>,
    /// Previous complete input block
    previous: Vec<Sample>,
    /// Output of the last computed block, played while the next fills
    output: Vec<Sample>,
    /// Frequency-domain delay line, `partitions × (B + 1)` bins
    spectra: Vec<Complex<Sample>>,
    /// Slot of the most recent spectrum in `spectra`
    newest: usize,
}

impl ChannelState {
    fn new(partitions: usize) -> Self {
        Self {
            input: vec![0.0; PARTITION_FRAMES],
            previous: vec![0.0; PARTITION_FRAMES],
            output: vec![0.0; PARTITION_FRAMES],
            spectra: vec![Complex::new(0.0, 0.0); partitions * (PARTITION_FRAMES + 1)],
            newest: 0,
        }
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        self.previous.fill(0.0);
        self.output.fill(0.0);
        self.spectra.fill(Complex::new(0.0, 0.0));
        self.newest = 0;
    }
}

/// Multi-channel partitioned convolver
///
/// Channel `c` of the processed signal is convolved with channel
/// `c % ir_channels` of the impulse response.
pub struct Convolver {
    fft: Arc<dyn RealToComplex<Sample>>,
    ifft: Arc<dyn ComplexToReal<Sample>>,
    /// Transformed partitions per IR channel, `partitions × (B + 1)` bins each
    filters: Vec<Vec<Complex<Sample>>>,
    partitions: usize,
    states: Vec<ChannelState>,
    /// Position inside the current block
    position: usize,

    // Shared scratch
    time: Vec<Sample>,
    accum: Vec<Complex<Sample>>,
    forward_scratch: Vec<Complex<Sample>>,
    inverse_scratch: Vec<Complex<Sample>>,

    /// Impulse response as loaded (before resampling), for re-preparing
    source: AudioBuffer,
    sample_rate: u32,
}

impl Convolver {
    /// Prepare a convolver for `channels` channels at `sample_rate`
    ///
    /// The impulse response is resampled to `sample_rate` when needed.
    /// Allocates; call off the audio thread.
    pub fn new(impulse: &AudioBuffer, sample_rate: u32, channels: usize) -> EngineResult<Self> {
        if impulse.frames() == 0 {
            return Err(EngineError::InvalidFormat("impulse response is empty"));
        }
        if channels == 0 {
            return Err(EngineError::InvalidFormat("channel count must be positive"));
        }

        let mut ir = impulse.clone();
        ir.resample_to(sample_rate)?;
        let max_frames = (MAX_IR_SECONDS * sample_rate as f32) as usize;
        if ir.frames() > max_frames {
            log::warn!(
                "Impulse response of {} frames truncated to {} ({}s)",
                ir.frames(),
                max_frames,
                MAX_IR_SECONDS
            );
        }
        let ir_frames = ir.frames().min(max_frames);

        let block = PARTITION_FRAMES;
        let partitions = ir_frames.div_ceil(block);
        let bins = block + 1;

        let mut planner = RealFftPlanner::<Sample>::new();
        let fft = planner.plan_fft_forward(2 * block);
        let ifft = planner.plan_fft_inverse(2 * block);

        // realfft is unnormalised: fold 1/N into the filter
        let norm = 1.0 / (2 * block) as Sample;
        let mut forward_scratch = fft.make_scratch_vec();
        let mut time = fft.make_input_vec();
        let mut filters = Vec::with_capacity(ir.channels());
        for ch in 0..ir.channels() {
            let mut spectra = vec![Complex::new(0.0, 0.0); partitions * bins];
            for p in 0..partitions {
                time.fill(0.0);
                let start = p * block;
                let end = (start + block).min(ir_frames);
                for (i, frame) in (start..end).enumerate() {
                    time[i] = ir.get(frame, ch) * norm;
                }
                fft.process_with_scratch(&mut time, &mut spectra[p * bins..(p + 1) * bins], &mut forward_scratch)
                    .map_err(|_| EngineError::InvalidFormat("impulse response transform failed"))?;
            }
            filters.push(spectra);
        }

        log::debug!(
            "Convolver ready: {} IR channel(s), {} frames, {} partitions of {}",
            ir.channels(),
            ir_frames,
            partitions,
            block
        );

        Ok(Self {
            inverse_scratch: ifft.make_scratch_vec(),
            accum: ifft.make_input_vec(),
            fft,
            ifft,
            filters,
            partitions,
            states: (0..channels).map(|_| ChannelState::new(partitions)).collect(),
            position: 0,
            time,
            forward_scratch,
            source: impulse.clone(),
            sample_rate,
        })
    }

    /// Same impulse response, prepared for another format
    pub fn rebuild(&self, sample_rate: u32, channels: usize) -> EngineResult<Self> {
        Self::new(&self.source, sample_rate, channels)
    }

    pub fn latency_frames(&self) -> usize {
        PARTITION_FRAMES
    }

    pub fn channels(&self) -> usize {
        self.states.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Impulse response length in partitions
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Replace the buffer's content with its convolution (delayed by one partition)
    ///
    /// Channels beyond those the convolver was built for are left untouched.
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        let channels = buffer.channels().min(self.states.len());
        for frame in 0..buffer.frames() {
            let pos = self.position;
            for ch in 0..channels {
                let state = &mut self.states[ch];
                state.input[pos] = buffer.get(frame, ch);
                buffer.set(frame, ch, state.output[pos]);
            }
            self.position += 1;
            if self.position == PARTITION_FRAMES {
                self.position = 0;
                for ch in 0..channels {
                    self.compute_block(ch);
                }
            }
        }
    }

    fn compute_block(&mut self, ch: usize) {
        let block = PARTITION_FRAMES;
        let bins = block + 1;
        let partitions = self.partitions;
        let state = &mut self.states[ch];
        let filter = &self.filters[ch % self.filters.len()];

        self.time[..block].copy_from_slice(&state.previous);
        self.time[block..].copy_from_slice(&state.input);
        state.previous.copy_from_slice(&state.input);

        state.newest = (state.newest + 1) % partitions;
        let slot = state.newest * bins;
        let transformed = self
            .fft
            .process_with_scratch(&mut self.time, &mut state.spectra[slot..slot + bins], &mut self.forward_scratch)
            .is_ok();
        if !transformed {
            state.output.fill(0.0);
            return;
        }

        self.accum.fill(Complex::new(0.0, 0.0));
        for p in 0..partitions {
            let x_slot = (state.newest + partitions - p) % partitions;
            let x = &state.spectra[x_slot * bins..(x_slot + 1) * bins];
            let h = &filter[p * bins..(p + 1) * bins];
            for ((acc, xv), hv) in self.accum.iter_mut().zip(x).zip(h) {
                *acc += xv * hv;
            }
        }
        // DC and Nyquist bins of a real signal are real
        self.accum[0].im = 0.0;
        self.accum[block].im = 0.0;

        let inverted = self
            .ifft
            .process_with_scratch(&mut self.accum, &mut self.time, &mut self.inverse_scratch)
            .is_ok();
        if inverted {
            state.output.copy_from_slice(&self.time[block..]);
        } else {
            state.output.fill(0.0);
        }
    }

    /// Clear all streaming state (the impulse response is kept)
    pub fn reset(&mut self) {
        self.position = 0;
        self.states.iter_mut().for_each(ChannelState::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(signal: &[f32], ir: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; signal.len()];
        for n in 0..signal.len() {
            for (k, h) in ir.iter().enumerate() {
                if k <= n {
                    out[n] += h * signal[n - k];
                }
            }
        }
        out
    }

    #[test]
    fn test_matches_direct_convolution() {
        let ir: Vec<f32> = (0..300).map(|i| ((i as f32) * 0.37).sin() * (-(i as f32) / 80.0).exp()).collect();
        let signal: Vec<f32> = (0..1000).map(|i| ((i as f32) * 0.05).sin() + if i % 97 == 0 { 0.5 } else { 0.0 }).collect();
        let expected = direct_convolution(&signal, &ir);

        let ir_buffer = AudioBuffer::from_interleaved(48000, 1, &ir).unwrap();
        let mut conv = Convolver::new(&ir_buffer, 48000, 1).unwrap();
        assert_eq!(conv.partitions(), 3);

        // odd block size to exercise the internal block gathering
        let mut produced = Vec::new();
        for chunk in signal.chunks(77) {
            let mut block = AudioBuffer::from_interleaved(48000, 1, chunk).unwrap();
            conv.process(&mut block);
            produced.extend_from_slice(block.samples());
        }

        let latency = conv.latency_frames();
        for n in 0..signal.len() - latency {
            assert!(
                (produced[n + latency] - expected[n]).abs() < 1e-4,
                "frame {n}: {} vs {}",
                produced[n + latency],
                expected[n]
            );
        }
    }

    #[test]
    fn test_unit_impulse_is_pure_delay() {
        let ir = AudioBuffer::from_interleaved(48000, 1, &[1.0]).unwrap();
        let mut conv = Convolver::new(&ir, 48000, 2).unwrap();
        let samples: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).cos()).collect();
        let mut buffer = AudioBuffer::from_interleaved(48000, 2, &samples).unwrap();
        let original = buffer.clone();
        conv.process(&mut buffer);
        for frame in PARTITION_FRAMES..512 {
            for ch in 0..2 {
                let want = original.get(frame - PARTITION_FRAMES, ch);
                assert!((buffer.get(frame, ch) - want).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_reset_silences_tail() {
        let ir = AudioBuffer::constant(crate::buffer::AudioBufferDesc::new(48000, 1, 512), 0.1).unwrap();
        let mut conv = Convolver::new(&ir, 48000, 1).unwrap();
        let mut loud = AudioBuffer::constant(crate::buffer::AudioBufferDesc::new(48000, 1, 1024), 1.0).unwrap();
        conv.process(&mut loud);
        conv.reset();
        let mut silent = AudioBuffer::allocate(crate::buffer::AudioBufferDesc::new(48000, 1, 1024)).unwrap();
        conv.process(&mut silent);
        assert_eq!(silent.peak(), 0.0);
    }

    #[test]
    fn test_empty_ir_rejected() {
        let ir = AudioBuffer::allocate(crate::buffer::AudioBufferDesc::new(48000, 1, 0)).unwrap();
        assert!(Convolver::new(&ir, 48000, 2).is_err());
    }

    #[test]
    fn test_ir_resampled_to_engine_rate() {
        let ir = AudioBuffer::constant(crate::buffer::AudioBufferDesc::new(44100, 1, 441), 0.01).unwrap();
        let conv = Convolver::new(&ir, 48000, 1).unwrap();
        assert_eq!(conv.sample_rate(), 48000);
        // 441 frames at 44.1k → 480 at 48k → 4 partitions
        assert_eq!(conv.partitions(), 4);
    }
}
