//! Compressor / limiter - feed-forward soft-knee dynamics
//!
//! # Algorithm
//!
//! For every sample, per channel:
//!
//! 1. The instantaneous level `|x|` is converted to dB.
//! 2. The static curve gives a target gain reduction: none below
//!    `threshold − knee/2`, full ratio above `threshold + knee/2`, and a
//!    quadratic blend in between.
//! 3. An envelope follower smooths the applied reduction toward the target.
//!    Rising reduction uses the attack coefficient, falling reduction the
//!    release coefficient: `coeff = exp(−1 / (sample_rate × time))`.
//! 4. The sample is scaled by `10^((makeup − reduction) / 20)`.
//!
//! With a very high ratio and short attack this behaves as a limiter.
//! No heap allocation occurs during processing.

use crate::buffer::AudioBuffer;
use crate::effect::{Effect, EffectBase, EffectInfo, EffectKind, ParamInfo};
use crate::error::EngineResult;
use crate::types::{db_to_linear, linear_to_db};

// Parameter indices

const PARAM_THRESHOLD: usize = 0;
const PARAM_RATIO: usize = 1;
const PARAM_ATTACK: usize = 2;
const PARAM_RELEASE: usize = 3;
const PARAM_MAKEUP: usize = 4;
const PARAM_KNEE: usize = 5;

/// Static gain-reduction curve, in dB (positive = attenuation)
#[inline]
pub fn static_reduction_db(level_db: f32, threshold_db: f32, ratio: f32, knee_db: f32) -> f32 {
    let slope = 1.0 - 1.0 / ratio;
    let over = level_db - threshold_db;
    if 2.0 * over < -knee_db {
        0.0
    } else if knee_db > 0.0 && 2.0 * over.abs() <= knee_db {
        let x = over + knee_db / 2.0;
        slope * x * x / (2.0 * knee_db)
    } else {
        slope * over
    }
}

#[inline]
fn smoothing_coeff(sample_rate: u32, time_ms: f32) -> f32 {
    (-1.0 / (sample_rate as f32 * time_ms * 0.001)).exp()
}

/// Feed-forward soft-knee compressor
///
/// Parameters:
/// - `threshold_db`: -60..0 dB, default -20
/// - `ratio`: 1..∞, default 4
/// - `attack_ms`: 0.01..1000 ms, default 10
/// - `release_ms`: 1..5000 ms, default 100
/// - `makeup_db`: -24..+24 dB, default 0
/// - `knee_db`: 0..48 dB, default 2
pub struct CompressorEffect {
    base: EffectBase,

    // Derived from parameters
    attack_coeff: f32,
    release_coeff: f32,
    makeup: f32,

    // Envelope follower
    /// Smoothed gain reduction in dB, one per channel
    envelope: Vec<f32>,
}

impl CompressorEffect {
    pub fn describe() -> EffectInfo {
        EffectInfo::new("Compressor", EffectKind::Compressor)
            .with_param(ParamInfo::new("threshold_db", -20.0).with_range(-60.0, 0.0).with_unit("dB"))
            .with_param(ParamInfo::new("ratio", 4.0).with_range(1.0, f32::INFINITY).with_unit(":1"))
            .with_param(ParamInfo::new("attack_ms", 10.0).with_range(0.01, 1000.0).with_unit("ms"))
            .with_param(ParamInfo::new("release_ms", 100.0).with_range(1.0, 5000.0).with_unit("ms"))
            .with_param(ParamInfo::new("makeup_db", 0.0).with_range(-24.0, 24.0).with_unit("dB"))
            .with_param(ParamInfo::new("knee_db", 2.0).with_range(0.0, 48.0).with_unit("dB"))
    }

    pub fn new() -> Self {
        let mut effect = Self {
            base: EffectBase::new(Self::describe()),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            makeup: 1.0,
            envelope: Vec::new(),
        };
        let (sample_rate, channels) = (effect.base.sample_rate(), effect.base.channels());
        effect.prepare(sample_rate, channels);
        effect
    }

    /// A brick-wall style limiter: ratio ∞, 1 ms attack, hard knee
    pub fn limiter(threshold_db: f32) -> EngineResult<Self> {
        let mut effect = Self::new();
        effect.set_param(PARAM_THRESHOLD, threshold_db)?;
        effect.set_param(PARAM_RATIO, f32::INFINITY)?;
        effect.set_param(PARAM_ATTACK, 1.0)?;
        effect.set_param(PARAM_KNEE, 0.0)?;
        Ok(effect)
    }

    fn update_coefficients(&mut self) {
        let sample_rate = self.base.sample_rate();
        self.attack_coeff = smoothing_coeff(sample_rate, self.base.param(PARAM_ATTACK));
        self.release_coeff = smoothing_coeff(sample_rate, self.base.param(PARAM_RELEASE));
        self.makeup = db_to_linear(self.base.param(PARAM_MAKEUP));
    }

    /// Current gain reduction in dB (largest across channels)
    pub fn gain_reduction_db(&self) -> f32 {
        self.envelope.iter().fold(0.0, |acc, &e| acc.max(e))
    }
}

impl Default for CompressorEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for CompressorEffect {
    fn process(&mut self, buffer: &mut AudioBuffer, _time: f64) -> EngineResult<()> {
        if !self.base.is_enabled() {
            return Ok(());
        }
        self.base.check_buffer(buffer)?;

        let threshold = self.base.param(PARAM_THRESHOLD);
        let ratio = self.base.param(PARAM_RATIO);
        let knee = self.base.param(PARAM_KNEE);
        let (attack, release, makeup) = (self.attack_coeff, self.release_coeff, self.makeup);

        for ch in 0..buffer.channels() {
            let mut reduction = self.envelope[ch];
            for sample in buffer.channel_mut(ch) {
                let target = static_reduction_db(linear_to_db(*sample), threshold, ratio, knee);
                let coeff = if target > reduction { attack } else { release };
                reduction = coeff * reduction + (1.0 - coeff) * target;
                *sample *= makeup * db_to_linear(-reduction);
            }
            self.envelope[ch] = reduction;
        }
        Ok(())
    }

    fn info(&self) -> &EffectInfo {
        self.base.info()
    }

    fn params(&self) -> &[f32] {
        self.base.params()
    }

    fn set_param(&mut self, index: usize, value: f32) -> EngineResult<()> {
        self.base.set_param(index, value)?;
        self.update_coefficients();
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn reset(&mut self) {
        self.envelope.fill(0.0);
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.base.set_format(sample_rate, channels);
        self.envelope = vec![0.0; channels];
        self.update_coefficients();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBufferDesc;

    const SR: u32 = 48000;

    fn sine_block(amplitude: f32, start: usize, frames: usize) -> AudioBuffer {
        let samples: Vec<f32> = (start..start + frames)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR as f32).sin())
            .collect();
        AudioBuffer::from_interleaved(SR, 1, &samples).unwrap()
    }

    /// Feed `seconds` of a 1 kHz sine and return the settled reduction
    fn settle(comp: &mut CompressorEffect, amplitude: f32, seconds: f32) -> f32 {
        let block = 480;
        let blocks = (seconds * SR as f32) as usize / block;
        for b in 0..blocks {
            let mut buffer = sine_block(amplitude, b * block, block);
            comp.process(&mut buffer, 0.0).unwrap();
        }
        comp.gain_reduction_db()
    }

    fn mono_compressor() -> CompressorEffect {
        let mut comp = CompressorEffect::new();
        comp.prepare(SR, 1);
        comp
    }

    #[test]
    fn test_static_curve() {
        // below the knee
        assert_eq!(static_reduction_db(-40.0, -20.0, 4.0, 2.0), 0.0);
        // full ratio above the knee
        assert!((static_reduction_db(0.0, -20.0, 4.0, 2.0) - 15.0).abs() < 1e-5);
        // knee midpoint
        assert!((static_reduction_db(-20.0, -20.0, 4.0, 2.0) - 0.1875).abs() < 1e-5);
        // hard knee
        assert_eq!(static_reduction_db(-20.0, -20.0, 4.0, 0.0), 0.0);
        // limiter
        assert!((static_reduction_db(-10.0, -20.0, f32::INFINITY, 0.0) - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_tone_at_threshold_barely_touched() {
        let mut comp = mono_compressor();
        let reduction = settle(&mut comp, db_to_linear(-20.0), 1.0);
        assert!(reduction <= 0.5, "reduction at threshold was {reduction} dB");
    }

    #[test]
    fn test_tone_above_threshold_approaches_full_ratio() {
        let mut comp = mono_compressor();
        // 0 dBFS peak is 20 dB over the -20 dB threshold; 4:1 → 15 dB
        let reduction = settle(&mut comp, 1.0, 1.0);
        assert!(
            (13.0..=15.2).contains(&reduction),
            "expected reduction approaching 15 dB, got {reduction}"
        );
    }

    #[test]
    fn test_constant_level_reaches_full_ratio() {
        let mut comp = mono_compressor();
        let desc = AudioBufferDesc::new(SR, 1, 480);
        for _ in 0..100 {
            let mut buffer = AudioBuffer::constant(desc, 1.0).unwrap();
            comp.process(&mut buffer, 0.0).unwrap();
        }
        assert!((comp.gain_reduction_db() - 15.0).abs() < 0.05);
    }

    #[test]
    fn test_attack_faster_than_release() {
        let mut comp = mono_compressor();
        let after_attack = settle(&mut comp, 1.0, 0.03);
        assert!(after_attack > 10.0, "attack too slow: {after_attack}");
        let after_release = settle(&mut comp, 0.0, 0.03);
        assert!(after_release > 3.0, "release too fast: {after_release}");
    }

    #[test]
    fn test_envelope_is_per_channel() {
        let mut comp = CompressorEffect::new();
        comp.prepare(SR, 2);
        let mut samples = vec![0.0; 960];
        for frame in 0..480 {
            samples[frame * 2] = 1.0;
        }
        let mut buffer = AudioBuffer::from_interleaved(SR, 2, &samples).unwrap();
        comp.process(&mut buffer, 0.0).unwrap();
        assert!(comp.envelope[0] > 1.0);
        assert_eq!(comp.envelope[1], 0.0);
    }

    #[test]
    fn test_reset_clears_envelope_keeps_params() {
        let mut comp = mono_compressor();
        comp.set_parameter("threshold_db", -30.0).unwrap();
        settle(&mut comp, 1.0, 0.1);
        comp.reset();
        assert_eq!(comp.gain_reduction_db(), 0.0);
        assert_eq!(comp.get_parameter("threshold_db").unwrap(), -30.0);
    }

    #[test]
    fn test_ratio_below_one_rejected() {
        let mut comp = CompressorEffect::new();
        assert!(comp.set_parameter("ratio", 0.5).is_err());
        assert_eq!(comp.get_parameter("ratio").unwrap(), 4.0);
    }

    #[test]
    fn test_limiter_holds_ceiling() {
        let mut limiter = CompressorEffect::limiter(-6.0).unwrap();
        limiter.prepare(SR, 1);
        let reduction = settle(&mut limiter, 1.0, 0.5);
        assert!(reduction > 5.0);
    }
}
