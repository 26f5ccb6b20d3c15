//! Reverb effect - algorithmic (Freeverb) or convolution
//!
//! Algorithmic mode:
//! - Parallel comb filters with a damping low-pass in the feedback path
//! - Series all-pass filters for diffusion
//! - Per-channel delay spread for decorrelation
//!
//! Convolution mode runs the input through a loaded impulse response
//! (see [`Convolver`]).

use basedrop::Owned;

use crate::buffer::AudioBuffer;
use crate::effect::convolver::Convolver;
use crate::effect::{Effect, EffectBase, EffectInfo, EffectKind, ParamInfo};
use crate::engine::gc_handle;
use crate::error::EngineResult;

/// Comb filter delay line lengths (in samples at 44.1kHz)
/// These are prime-ish numbers to avoid resonances
const COMB_LENGTHS: [usize; 8] = [1557, 1617, 1491, 1422, 1277, 1356, 1188, 1116];

/// Allpass filter delay line lengths
const ALLPASS_LENGTHS: [usize; 4] = [225, 556, 441, 341];

/// Extra delay per channel (in samples at 44.1kHz)
const STEREO_SPREAD: usize = 23;

/// Allpass feedback coefficient
const ALLPASS_FEEDBACK: f32 = 0.5;

/// Gain compensation for comb filter summing
const COMB_GAIN: f32 = 0.2;

const PARAM_MODE: usize = 0;
const PARAM_ROOM_SIZE: usize = 1;
const PARAM_DAMPING: usize = 2;
const PARAM_WIDTH: usize = 3;
const PARAM_WET: usize = 4;
const PARAM_DRY: usize = 5;

/// Reverb mode as stored in the `mode` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbMode {
    Algorithmic,
    Convolution,
}

/// Comb filter for reverb
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
}

impl CombFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];

        // One-pole lowpass filter for damping high frequencies
        self.filter_state = output * (1.0 - damp) + self.filter_state * damp;

        self.buffer[self.pos] = input + self.filter_state * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();

        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
    }
}

/// Allpass filter for diffusion
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        let output = -input + buffered;
        self.buffer[self.pos] = input + buffered * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Comb and allpass bank feeding one output channel
struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f32 / 44100.0;
        let scaled = |len: usize| ((len + spread) as f32 * scale) as usize;
        Self {
            combs: COMB_LENGTHS.iter().map(|&len| CombFilter::new(scaled(len))).collect(),
            allpasses: ALLPASS_LENGTHS.iter().map(|&len| AllpassFilter::new(scaled(len))).collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out = 0.0f32;
        for comb in &mut self.combs {
            out += comb.process(input, feedback, damp);
        }
        out *= COMB_GAIN;
        for ap in &mut self.allpasses {
            out = ap.process(out, ALLPASS_FEEDBACK);
        }
        out
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::reset);
        self.allpasses.iter_mut().for_each(AllpassFilter::reset);
    }
}

/// Reverb with algorithmic and convolution modes
///
/// Parameters:
/// - `mode`: 0 = algorithmic, 1 = convolution
/// - `room_size`: decay time (0.0-1.0)
/// - `damping`: high frequency damping (0.0 = bright, 1.0 = dark)
/// - `width`: stereo width of the wet signal (0.0 = mono, 1.0 = full)
/// - `wet_level`, `dry_level`: output blend (0.0-1.0)
///
/// The algorithmic mode is based on the Freeverb algorithm by Jezar at
/// Dreampoint. In convolution mode without an impulse response the wet
/// signal is silent.
pub struct ReverbEffect {
    base: EffectBase,
    /// One tank per channel, each with its own delay spread
    tanks: Vec<Tank>,
    convolver: Option<Owned<Convolver>>,
    /// Per-frame wet samples, reused every block
    wet: Vec<f32>,
    /// Wet scratch for convolution mode
    wet_buffer: AudioBuffer,
}

impl ReverbEffect {
    pub fn describe() -> EffectInfo {
        EffectInfo::new("Reverb", EffectKind::Reverb)
            .with_param(ParamInfo::new("mode", 0.0).with_range(0.0, 1.0).stepped())
            .with_param(ParamInfo::new("room_size", 0.5).with_range(0.0, 1.0))
            .with_param(ParamInfo::new("damping", 0.5).with_range(0.0, 1.0))
            .with_param(ParamInfo::new("width", 1.0).with_range(0.0, 1.0))
            .with_param(ParamInfo::new("wet_level", 0.3).with_range(0.0, 1.0))
            .with_param(ParamInfo::new("dry_level", 0.7).with_range(0.0, 1.0))
    }

    /// Create a new reverb effect
    pub fn new() -> Self {
        let mut effect = Self {
            base: EffectBase::new(Self::describe()),
            tanks: Vec::new(),
            convolver: None,
            wet: Vec::new(),
            wet_buffer: AudioBuffer::default(),
        };
        let (sample_rate, channels) = (effect.base.sample_rate(), effect.base.channels());
        effect.prepare(sample_rate, channels);
        effect
    }

    pub fn mode(&self) -> ReverbMode {
        if self.base.flag(PARAM_MODE) {
            ReverbMode::Convolution
        } else {
            ReverbMode::Algorithmic
        }
    }

    /// Comb feedback (0.7-0.98)
    fn feedback(&self) -> f32 {
        0.7 + self.base.param(PARAM_ROOM_SIZE) * 0.28
    }

    /// Damping low-pass coefficient
    fn damp(&self) -> f32 {
        self.base.param(PARAM_DAMPING) * 0.4
    }

    /// Build a convolver for `impulse` and install it
    ///
    /// Allocates; call off the audio thread. Convolution state starts silent.
    pub fn load_impulse_response(&mut self, impulse: &AudioBuffer) -> EngineResult<()> {
        let convolver = Convolver::new(impulse, self.base.sample_rate(), self.base.channels())?;
        self.install_convolver(Owned::new(&gc_handle(), convolver));
        Ok(())
    }

    /// Swap in a prepared convolver; the previous one is released by the collector
    ///
    /// Real-time safe.
    pub fn install_convolver(&mut self, mut convolver: Owned<Convolver>) {
        convolver.reset();
        self.convolver = Some(convolver);
    }

    pub fn has_impulse_response(&self) -> bool {
        self.convolver.is_some()
    }

    fn process_algorithmic(&mut self, buffer: &mut AudioBuffer) {
        let feedback = self.feedback();
        let damp = self.damp();
        let width = self.base.param(PARAM_WIDTH);
        let wet = self.base.param(PARAM_WET);
        let dry = self.base.param(PARAM_DRY);
        let channels = buffer.channels();

        // Width processing
        let wet1 = wet * (width / 2.0 + 0.5);
        let wet2 = wet * ((1.0 - width) / 2.0);

        for frame in 0..buffer.frames() {
            let mut input = 0.0;
            for ch in 0..channels {
                input += buffer.get(frame, ch);
            }
            input /= channels as f32;

            for ch in 0..channels {
                self.wet[ch] = self.tanks[ch].process(input, feedback, damp);
            }
            for ch in 0..channels {
                let partner = if ch ^ 1 < channels { self.wet[ch ^ 1] } else { self.wet[ch] };
                let out = self.wet[ch] * wet1 + partner * wet2 + buffer.get(frame, ch) * dry;
                buffer.set(frame, ch, out);
            }
        }
    }

    fn process_convolution(&mut self, buffer: &mut AudioBuffer) -> EngineResult<()> {
        let wet = self.base.param(PARAM_WET);
        let dry = self.base.param(PARAM_DRY);
        let width = self.base.param(PARAM_WIDTH);

        let Some(convolver) = self.convolver.as_mut() else {
            buffer.scale(dry);
            return Ok(());
        };

        let wet_buffer = &mut self.wet_buffer;
        wet_buffer.set_frames(buffer.frames())?;
        wet_buffer.copy_from(buffer)?;
        convolver.process(wet_buffer);

        // narrow the wet image toward its mid signal as width falls
        let channels = buffer.channels();
        for frame in 0..buffer.frames() {
            let mut mid = 0.0;
            for ch in 0..channels {
                mid += wet_buffer.get(frame, ch);
            }
            mid /= channels as f32;
            for ch in 0..channels {
                let w = mid + (wet_buffer.get(frame, ch) - mid) * width;
                let out = buffer.get(frame, ch) * dry + w * wet;
                buffer.set(frame, ch, out);
            }
        }
        Ok(())
    }
}

impl Default for ReverbEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for ReverbEffect {
    fn process(&mut self, buffer: &mut AudioBuffer, _time: f64) -> EngineResult<()> {
        if !self.base.is_enabled() {
            return Ok(());
        }
        self.base.check_buffer(buffer)?;
        match self.mode() {
            ReverbMode::Algorithmic => {
                self.process_algorithmic(buffer);
                Ok(())
            }
            ReverbMode::Convolution => self.process_convolution(buffer),
        }
    }

    fn latency_frames(&self) -> usize {
        match (self.mode(), &self.convolver) {
            (ReverbMode::Convolution, Some(convolver)) => convolver.latency_frames(),
            // The decay tail is intentional, not latency
            _ => 0,
        }
    }

    fn info(&self) -> &EffectInfo {
        self.base.info()
    }

    fn params(&self) -> &[f32] {
        self.base.params()
    }

    fn set_param(&mut self, index: usize, value: f32) -> EngineResult<()> {
        self.base.set_param(index, value)
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn reset(&mut self) {
        self.tanks.iter_mut().for_each(Tank::reset);
        if let Some(convolver) = self.convolver.as_mut() {
            convolver.reset();
        }
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.base.set_format(sample_rate, channels);
        self.tanks = (0..channels).map(|ch| Tank::new(sample_rate, ch * STEREO_SPREAD)).collect();
        self.wet = vec![0.0; channels];
        let scratch = crate::buffer::AudioBufferDesc::new(sample_rate, channels, 0);
        self.wet_buffer = AudioBuffer::with_capacity(scratch, crate::types::MAX_BLOCK_FRAMES).unwrap_or_default();

        if let Some(current) = self.convolver.take() {
            match current.rebuild(sample_rate, channels) {
                Ok(rebuilt) => self.convolver = Some(Owned::new(&gc_handle(), rebuilt)),
                Err(e) => log::warn!("Dropping impulse response on re-prepare: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBufferDesc;

    fn impulse(channels: usize, frames: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::allocate(AudioBufferDesc::new(48000, channels, frames)).unwrap();
        for ch in 0..channels {
            buffer.set(0, ch, 1.0);
        }
        buffer
    }

    #[test]
    fn test_reverb_creation() {
        let effect = ReverbEffect::new();
        assert_eq!(effect.info().name, "Reverb");
        assert_eq!(effect.info().kind, EffectKind::Reverb);
        assert_eq!(effect.info().param_count(), 6);
        assert_eq!(effect.mode(), ReverbMode::Algorithmic);
    }

    #[test]
    fn test_reverb_dry() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("wet_level", 0.0).unwrap();
        effect.set_parameter("dry_level", 1.0).unwrap();

        let mut buffer = impulse(2, 64);
        effect.process(&mut buffer, 0.0).unwrap();

        // With full dry mix, output should equal input
        assert!((buffer.get(0, 0) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_reverb_tail() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("wet_level", 1.0).unwrap();
        effect.set_parameter("dry_level", 0.0).unwrap();

        let mut buffer = impulse(2, 8192);
        effect.process(&mut buffer, 0.0).unwrap();

        // Nothing before the shortest comb (1116 samples at 44.1k, ~1215 at 48k)
        let early: f32 = buffer.channel(0).take(1200).map(|s| s.abs()).sum();
        let tail: f32 = buffer.channel(0).skip(1500).map(|s| s.abs()).sum();
        assert_eq!(early, 0.0);
        assert!(tail > 0.0, "Should have reverb energy: tail={}", tail);
    }

    #[test]
    fn test_reverb_stereo_decorrelation() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("width", 1.0).unwrap();
        effect.set_parameter("wet_level", 1.0).unwrap();

        let mut buffer = impulse(2, 8192);
        effect.process(&mut buffer, 0.0).unwrap();

        let diff_count = (1500..8192)
            .filter(|&f| (buffer.get(f, 0) - buffer.get(f, 1)).abs() > 1e-4)
            .count();
        assert!(diff_count > 100, "channels should differ: {}", diff_count);
    }

    #[test]
    fn test_zero_width_is_mono() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("width", 0.0).unwrap();
        effect.set_parameter("wet_level", 1.0).unwrap();
        effect.set_parameter("dry_level", 0.0).unwrap();

        let mut buffer = impulse(2, 4096);
        effect.process(&mut buffer, 0.0).unwrap();
        for f in 0..4096 {
            assert!((buffer.get(f, 0) - buffer.get(f, 1)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reverb_reset() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("wet_level", 1.0).unwrap();

        let mut buffer = AudioBuffer::constant(AudioBufferDesc::new(48000, 2, 4096), 1.0).unwrap();
        effect.process(&mut buffer, 0.0).unwrap();
        effect.reset();

        let mut buffer = AudioBuffer::allocate(AudioBufferDesc::new(48000, 2, 64)).unwrap();
        effect.process(&mut buffer, 0.0).unwrap();
        assert_eq!(buffer.peak(), 0.0, "Energy should be gone after reset");
    }

    #[test]
    fn test_mono_channel() {
        let mut effect = ReverbEffect::new();
        effect.prepare(48000, 1);
        effect.set_parameter("wet_level", 1.0).unwrap();
        let mut buffer = impulse(1, 4096);
        effect.process(&mut buffer, 0.0).unwrap();
        assert!(buffer.channel(0).skip(1300).any(|s| *s != 0.0));
    }

    #[test]
    fn test_convolution_without_ir_is_dry() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("mode", 1.0).unwrap();
        effect.set_parameter("dry_level", 0.5).unwrap();
        assert!(!effect.has_impulse_response());

        let mut buffer = impulse(2, 16);
        effect.process(&mut buffer, 0.0).unwrap();
        assert_eq!(buffer.get(0, 0), 0.5);
        assert_eq!(effect.latency_frames(), 0);
    }

    #[test]
    fn test_convolution_mode_uses_impulse_response() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("mode", 1.0).unwrap();
        effect.set_parameter("wet_level", 1.0).unwrap();
        effect.set_parameter("dry_level", 0.0).unwrap();

        // IR: a single tap of 0.5 at frame 10
        let mut ir = AudioBuffer::allocate(AudioBufferDesc::new(48000, 1, 11)).unwrap();
        ir.set(10, 0, 0.5);
        effect.load_impulse_response(&ir).unwrap();
        assert_eq!(effect.latency_frames(), 128);

        let mut buffer = impulse(2, 512);
        effect.process(&mut buffer, 0.0).unwrap();
        assert!((buffer.get(128 + 10, 0) - 0.5).abs() < 1e-4);
        assert!((buffer.get(128 + 10, 1) - 0.5).abs() < 1e-4);
        assert!(buffer.get(128 + 9, 0).abs() < 1e-4);
    }

    #[test]
    fn test_load_resets_convolution_state() {
        let mut effect = ReverbEffect::new();
        effect.set_parameter("mode", 1.0).unwrap();
        effect.set_parameter("dry_level", 0.0).unwrap();
        effect.set_parameter("wet_level", 1.0).unwrap();

        let ir = AudioBuffer::constant(AudioBufferDesc::new(48000, 1, 256), 0.1).unwrap();
        effect.load_impulse_response(&ir).unwrap();
        let mut loud = AudioBuffer::constant(AudioBufferDesc::new(48000, 2, 256), 1.0).unwrap();
        effect.process(&mut loud, 0.0).unwrap();

        effect.load_impulse_response(&ir).unwrap();
        let mut silent = AudioBuffer::allocate(AudioBufferDesc::new(48000, 2, 512)).unwrap();
        effect.process(&mut silent, 0.0).unwrap();
        assert_eq!(silent.peak(), 0.0);
    }
}
