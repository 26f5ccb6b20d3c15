//! Parametric equalizer - a cascade of biquad bands

use crate::buffer::AudioBuffer;
use crate::effect::biquad::{BandType, BiquadCoeffs, BiquadState};
use crate::effect::{Effect, EffectBase, EffectInfo, EffectKind, ParamInfo};
use crate::error::EngineResult;

/// Band count of a default equalizer
pub const DEFAULT_BANDS: usize = 10;

/// Parameters per band: type, freq, gain_db, q, enabled
const PARAMS_PER_BAND: usize = 5;
const BAND_TYPE: usize = 0;
const BAND_FREQ: usize = 1;
const BAND_GAIN: usize = 2;
const BAND_Q: usize = 3;
const BAND_ENABLED: usize = 4;

/// ISO octave centres used for the default layout
const OCTAVE_CENTRES: [f32; 10] = [
    31.25, 62.5, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

struct Band {
    coeffs: BiquadCoeffs,
    /// One history per channel
    state: Vec<BiquadState>,
}

/// N-band parametric equalizer
///
/// Band `i` (1-based) exposes `band{i}_type` (0 peak, 1 low shelf,
/// 2 high shelf), `band{i}_freq` (20..20000 Hz), `band{i}_gain_db`
/// (-24..+24 dB), `band{i}_q` (0.1..10) and `band{i}_enabled`.
/// The first band defaults to a low shelf and the last to a high shelf.
pub struct EqualizerEffect {
    base: EffectBase,
    bands: Vec<Band>,
}

impl EqualizerEffect {
    pub fn describe(bands: usize) -> EffectInfo {
        let mut info = EffectInfo::new("Equalizer", EffectKind::Equalizer);
        for i in 0..bands {
            let kind = if i == 0 && bands > 1 {
                BandType::LowShelf
            } else if i + 1 == bands && bands > 1 {
                BandType::HighShelf
            } else {
                BandType::Peak
            };
            let freq = default_frequency(i, bands);
            let n = i + 1;
            info = info
                .with_param(ParamInfo::new(format!("band{n}_type"), kind.as_param()).with_range(0.0, 2.0).stepped())
                .with_param(ParamInfo::new(format!("band{n}_freq"), freq).with_range(20.0, 20000.0).with_unit("Hz"))
                .with_param(ParamInfo::new(format!("band{n}_gain_db"), 0.0).with_range(-24.0, 24.0).with_unit("dB"))
                .with_param(ParamInfo::new(format!("band{n}_q"), 0.707).with_range(0.1, 10.0))
                .with_param(ParamInfo::switch(format!("band{n}_enabled"), true));
        }
        info
    }

    /// Equalizer with the default ten octave bands
    pub fn new() -> Self {
        Self::with_bands(DEFAULT_BANDS)
    }

    /// Equalizer with `bands` bands spread log-evenly over the audio range
    pub fn with_bands(bands: usize) -> Self {
        let bands = bands.max(1);
        let mut effect = Self {
            base: EffectBase::new(Self::describe(bands)),
            bands: Vec::new(),
        };
        let (sample_rate, channels) = (effect.base.sample_rate(), effect.base.channels());
        effect.prepare(sample_rate, channels);
        effect
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band_param(&self, band: usize, which: usize) -> f32 {
        self.base.param(band * PARAMS_PER_BAND + which)
    }

    fn band_enabled(&self, band: usize) -> bool {
        self.base.flag(band * PARAMS_PER_BAND + BAND_ENABLED)
    }

    fn update_band(&mut self, band: usize) {
        let coeffs = BiquadCoeffs::design(
            BandType::from_param(self.band_param(band, BAND_TYPE)),
            self.band_param(band, BAND_FREQ),
            self.band_param(band, BAND_GAIN),
            self.band_param(band, BAND_Q),
            self.base.sample_rate(),
        );
        self.bands[band].coeffs = coeffs;
    }

    /// Combined response of the enabled bands at `freq`, in dB
    pub fn response_db(&self, freq: f32) -> f32 {
        (0..self.bands.len())
            .filter(|&b| self.band_enabled(b))
            .map(|b| self.bands[b].coeffs.magnitude_db(freq, self.base.sample_rate()))
            .sum()
    }
}

/// Log-spaced default centre for band `i` of `bands`
fn default_frequency(i: usize, bands: usize) -> f32 {
    if bands == DEFAULT_BANDS {
        return OCTAVE_CENTRES[i];
    }
    if bands == 1 {
        return 1000.0;
    }
    let t = i as f32 / (bands - 1) as f32;
    31.25 * (16000.0_f32 / 31.25).powf(t)
}

impl Default for EqualizerEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for EqualizerEffect {
    fn process(&mut self, buffer: &mut AudioBuffer, _time: f64) -> EngineResult<()> {
        if !self.base.is_enabled() {
            return Ok(());
        }
        self.base.check_buffer(buffer)?;

        for band in 0..self.bands.len() {
            if !self.band_enabled(band) {
                continue;
            }
            let Band { coeffs, state } = &mut self.bands[band];
            for (ch, history) in state.iter_mut().enumerate().take(buffer.channels()) {
                for sample in buffer.channel_mut(ch) {
                    *sample = history.process(*sample as f64, coeffs) as f32;
                }
            }
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
        let band = index / PARAMS_PER_BAND;
        if index % PARAMS_PER_BAND != BAND_ENABLED {
            self.update_band(band);
        }
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.state.iter_mut().for_each(BiquadState::reset);
        }
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.base.set_format(sample_rate, channels);
        let count = self.base.info().param_count() / PARAMS_PER_BAND;
        self.bands = (0..count)
            .map(|_| Band {
                coeffs: BiquadCoeffs::identity(),
                state: vec![BiquadState::default(); channels],
            })
            .collect();
        for band in 0..count {
            self.update_band(band);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::linear_to_db;

    fn noise(frames: usize, channels: usize) -> AudioBuffer {
        // deterministic LCG noise
        let mut seed: u32 = 0x1234_5678;
        let samples: Vec<f32> = (0..frames * channels)
            .map(|_| {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (seed >> 8) as f32 / (1u32 << 24) as f32 * 1.6 - 0.8
            })
            .collect();
        AudioBuffer::from_interleaved(48000, channels, &samples).unwrap()
    }

    fn sine(freq: f32, frames: usize) -> AudioBuffer {
        let samples: Vec<f32> = (0..frames)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin())
            .collect();
        AudioBuffer::from_interleaved(48000, 1, &samples).unwrap()
    }

    #[test]
    fn test_default_layout() {
        let eq = EqualizerEffect::new();
        assert_eq!(eq.band_count(), 10);
        assert_eq!(eq.get_parameter("band1_type").unwrap(), 1.0);
        assert_eq!(eq.get_parameter("band10_type").unwrap(), 2.0);
        assert_eq!(eq.get_parameter("band6_freq").unwrap(), 1000.0);
        assert_eq!(eq.info().param_count(), 50);
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = EqualizerEffect::new();
        eq.prepare(48000, 2);
        let original = noise(4096, 2);
        let mut buffer = original.clone();
        eq.process(&mut buffer, 0.0).unwrap();

        let error = original
            .samples()
            .iter()
            .zip(buffer.samples())
            .fold(0.0_f32, |acc, (a, b)| acc.max((a - b).abs()));
        assert!(linear_to_db(error) < -80.0, "flat EQ error {} dB", linear_to_db(error));
    }

    #[test]
    fn test_boost_raises_band_level() {
        let mut eq = EqualizerEffect::new();
        eq.prepare(48000, 1);
        eq.set_parameter("band6_gain_db", 12.0).unwrap();
        eq.set_parameter("band6_q", 1.0).unwrap();
        assert!((eq.response_db(1000.0) - 12.0).abs() < 0.5);

        let mut buffer = sine(1000.0, 48000);
        eq.process(&mut buffer, 0.0).unwrap();
        let tail_peak = buffer.samples()[24000..].iter().fold(0.0_f32, |a, s| a.max(s.abs()));
        let gain = linear_to_db(tail_peak / 0.5);
        assert!((gain - 12.0).abs() < 1.0, "measured {gain} dB");
    }

    #[test]
    fn test_disabled_band_is_skipped() {
        let mut eq = EqualizerEffect::new();
        eq.prepare(48000, 1);
        eq.set_parameter("band6_gain_db", 12.0).unwrap();
        eq.set_parameter("band6_enabled", 0.0).unwrap();
        assert!(eq.response_db(1000.0).abs() < 1e-3);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut eq = EqualizerEffect::new();
        assert!(eq.set_parameter("band3_freq", 5.0).is_err());
        assert!(eq.set_parameter("band3_q", 0.0).is_err());
        assert!(eq.set_parameter("band3_gain_db", 40.0).is_err());
        assert!(eq.set_parameter("band3_type", 1.4).is_err(), "band type must be 0, 1 or 2");
        assert_eq!(eq.get_parameter("band3_freq").unwrap(), 125.0);
        assert_eq!(eq.get_parameter("band3_type").unwrap(), BandType::Peak.as_param());
    }

    #[test]
    fn test_custom_band_count() {
        let eq = EqualizerEffect::with_bands(3);
        assert_eq!(eq.band_count(), 3);
        assert!(eq.get_parameter("band3_freq").is_ok());
        assert!(eq.get_parameter("band4_freq").is_err());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut eq = EqualizerEffect::new();
        eq.prepare(48000, 1);
        eq.set_parameter("band2_gain_db", 6.0).unwrap();
        let mut buffer = sine(62.5, 1024);
        eq.process(&mut buffer, 0.0).unwrap();
        eq.reset();

        let mut first = sine(62.5, 256);
        let mut second = first.clone();
        eq.process(&mut first, 0.0).unwrap();
        eq.reset();
        eq.process(&mut second, 0.0).unwrap();
        assert_eq!(first, second);
    }
}
