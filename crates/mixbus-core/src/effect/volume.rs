//! Volume effect - gain in dB with a non-destructive mute

use crate::buffer::AudioBuffer;
use crate::effect::{Effect, EffectBase, EffectInfo, EffectKind, ParamInfo};
use crate::error::EngineResult;
use crate::types::db_to_linear;

const PARAM_GAIN_DB: usize = 0;
const PARAM_MUTE: usize = 1;

/// A simple gain (volume) effect
///
/// Parameters:
/// - `gain_db`: -96..+24 dB, default 0
/// - `mute`: 0/1; forces silence without touching `gain_db`
///
/// This effect has zero latency.
pub struct VolumeEffect {
    base: EffectBase,
    /// Cached linear gain, recomputed on parameter change
    linear: f32,
}

impl VolumeEffect {
    pub fn describe() -> EffectInfo {
        EffectInfo::new("Volume", EffectKind::Volume)
            .with_param(ParamInfo::new("gain_db", 0.0).with_range(-96.0, 24.0).with_unit("dB"))
            .with_param(ParamInfo::switch("mute", false))
    }

    /// Create a new volume effect at unity gain
    pub fn new() -> Self {
        let mut effect = Self {
            base: EffectBase::new(Self::describe()),
            linear: 1.0,
        };
        effect.update_gain();
        effect
    }

    fn update_gain(&mut self) {
        self.linear = if self.base.flag(PARAM_MUTE) {
            0.0
        } else {
            db_to_linear(self.base.param(PARAM_GAIN_DB))
        };
    }

    /// Linear factor currently applied
    pub fn linear_gain(&self) -> f32 {
        self.linear
    }
}

impl Default for VolumeEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for VolumeEffect {
    fn process(&mut self, buffer: &mut AudioBuffer, _time: f64) -> EngineResult<()> {
        if !self.base.is_enabled() {
            return Ok(());
        }
        self.base.check_buffer(buffer)?;
        if self.linear != 1.0 {
            buffer.scale(self.linear);
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
        self.update_gain();
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn reset(&mut self) {
        // No state to reset
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.base.set_format(sample_rate, channels);
    }
}
