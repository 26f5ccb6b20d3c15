//! Biquad filters (Audio-EQ-cookbook designs)
//!
//! Coefficients and history are kept in `f64`; a flat band is then exact
//! to well below the `f32` noise floor.

use std::f64::consts::PI;

/// Filter shape of one EQ band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandType {
    Peak,
    LowShelf,
    HighShelf,
}

impl BandType {
    /// Decode the numeric `bandN_type` parameter
    pub fn from_param(value: f32) -> Self {
        match value.round() as i32 {
            1 => BandType::LowShelf,
            2 => BandType::HighShelf,
            _ => BandType::Peak,
        }
    }

    pub fn as_param(&self) -> f32 {
        match self {
            BandType::Peak => 0.0,
            BandType::LowShelf => 1.0,
            BandType::HighShelf => 2.0,
        }
    }
}

/// Normalised biquad coefficients (a0 == 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Pass-through
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Design a band. `freq` is clamped below Nyquist.
    pub fn design(kind: BandType, freq: f32, gain_db: f32, q: f32, sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f64;
        let freq = (freq as f64).clamp(1.0, sample_rate * 0.49);
        let q = (q as f64).max(1e-3);
        let gain_db = gain_db as f64;
        match kind {
            BandType::Peak => Self::peaking(freq, gain_db, q, sample_rate),
            BandType::LowShelf => Self::low_shelf(freq, gain_db, q, sample_rate),
            BandType::HighShelf => Self::high_shelf(freq, gain_db, q, sample_rate),
        }
    }

    /// Create peaking EQ filter coefficients
    fn peaking(freq: f64, gain_db: f64, q: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// Create low shelf filter coefficients
    fn low_shelf(freq: f64, gain_db: f64, q: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha) / a0,
        }
    }

    /// Create high shelf filter coefficients
    fn high_shelf(freq: f64, gain_db: f64, q: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha) / a0,
        }
    }

    /// Magnitude response in dB at `freq`
    pub fn magnitude_db(&self, freq: f32, sample_rate: u32) -> f32 {
        let w = 2.0 * PI * freq as f64 / sample_rate as f64;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        let mag = ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt();
        (20.0 * mag.max(1e-12).log10()) as f32
    }
}

/// Direct form I history for one channel
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = out;
        out
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
