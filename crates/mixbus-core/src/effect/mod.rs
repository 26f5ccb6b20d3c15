//! Effect system - trait, parameter descriptions, built-in effects and chains
//!
//! Every effect implements [`Effect`]. The closed set of built-in effects is
//! wrapped in [`BuiltinEffect`] so a chain can hold them without dynamic
//! dispatch, and so the control thread can build, configure and prepare an
//! effect before it is handed to the audio thread.

pub mod biquad;
pub mod chain;
pub mod compressor;
pub mod convolver;
pub mod equalizer;
pub mod reverb;
pub mod volume;

pub use chain::{EffectChain, MAX_EFFECTS_PER_CHAIN};
pub use compressor::CompressorEffect;
pub use convolver::Convolver;
pub use equalizer::EqualizerEffect;
pub use reverb::ReverbEffect;
pub use volume::VolumeEffect;

use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::error::{EngineError, EngineResult};

/// Information about an effect parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    /// Parameter name, used for lookup
    pub name: String,
    /// Default value
    pub default: f32,
    /// Minimum accepted value
    pub min: f32,
    /// Maximum accepted value (may be infinite)
    pub max: f32,
    /// Unit label (e.g., "ms", "dB", "Hz")
    pub unit: String,
    /// Only whole numbers are accepted (switches, modes, band types)
    pub stepped: bool,
}

impl Default for ParamInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            default: 0.0,
            min: 0.0,
            max: 1.0,
            unit: String::new(),
            stepped: false,
        }
    }
}

impl ParamInfo {
    /// Create a new parameter info with name and default value
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            ..Default::default()
        }
    }

    /// Set the value range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the unit label
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Accept only whole numbers in the range
    pub fn stepped(mut self) -> Self {
        self.stepped = true;
        self
    }

    /// A 0/1 switch
    pub fn switch(name: impl Into<String>, on: bool) -> Self {
        Self::new(name, if on { 1.0 } else { 0.0 }).stepped()
    }

    /// Accept `value` or report it as out of range for parameter `index`
    ///
    /// Stepped parameters also reject fractional values.
    pub fn check(&self, index: usize, value: f32) -> EngineResult<f32> {
        let on_step = !self.stepped || value.fract() == 0.0;
        if value >= self.min && value <= self.max && on_step {
            Ok(value)
        } else {
            Err(EngineError::ParameterOutOfRange {
                index,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Information about an effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInfo {
    /// Effect name for display
    pub name: String,
    /// Which built-in effect this describes
    pub kind: EffectKind,
    /// Parameter descriptions, addressed by index or name
    pub params: Vec<ParamInfo>,
}

impl EffectInfo {
    /// Create a new effect info
    pub fn new(name: impl Into<String>, kind: EffectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: Vec::new(),
        }
    }

    /// Add a parameter to this effect
    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    /// Get the number of parameters
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Index of the parameter called `name`
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Validate `value` for the parameter at `index`
    pub fn check(&self, index: usize, value: f32) -> EngineResult<f32> {
        match self.params.get(index) {
            Some(param) => param.check(index, value),
            None => Err(EngineError::not_found(format!("{} parameter #{}", self.name, index))),
        }
    }

    /// Resolve a parameter name, reporting the effect in the error
    pub fn require_param(&self, name: &str) -> EngineResult<usize> {
        self.param_index(name)
            .ok_or_else(|| EngineError::not_found(format!("{} parameter '{}'", self.name, name)))
    }
}

/// The core effect trait - implemented by all audio effects
///
/// `process` runs on the audio thread: it must not allocate, lock or log.
/// `prepare` and construction happen on the control thread before the
/// effect is handed over.
pub trait Effect: Send {
    /// Process a buffer in place
    ///
    /// `time` is an opaque, monotonically increasing timestamp in seconds.
    /// Fails with `FormatMismatch` if the buffer has more channels than the
    /// effect was prepared for.
    fn process(&mut self, buffer: &mut AudioBuffer, time: f64) -> EngineResult<()>;

    /// Get the latency of this effect in frames
    fn latency_frames(&self) -> usize {
        0
    }

    /// Get information about this effect (name, kind, parameters)
    fn info(&self) -> &EffectInfo;

    /// Current parameter values, in [`EffectInfo::params`] order
    fn params(&self) -> &[f32];

    /// Set a parameter by index
    ///
    /// Fails with `ParameterOutOfRange` (leaving the value unchanged) when
    /// the value is outside the parameter's range.
    fn set_param(&mut self, index: usize, value: f32) -> EngineResult<()>;

    /// Enable or disable; a disabled effect passes audio through untouched
    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Clear internal state (filter history, envelopes, tails) but keep parameters
    fn reset(&mut self);

    /// Size per-channel state for a sample rate and channel count
    ///
    /// Allocates; only called off the audio thread.
    fn prepare(&mut self, sample_rate: u32, channels: usize);

    /// Set a parameter by name
    fn set_parameter(&mut self, name: &str, value: f32) -> EngineResult<()> {
        let index = self.info().require_param(name)?;
        self.set_param(index, value)
    }

    /// Read a parameter by name
    fn get_parameter(&self, name: &str) -> EngineResult<f32> {
        let index = self.info().require_param(name)?;
        Ok(self.params()[index])
    }
}

/// Base implementation helper for effects
///
/// Holds the parameter values, the enabled flag and the prepared format.
#[derive(Debug, Clone)]
pub struct EffectBase {
    info: EffectInfo,
    params: Vec<f32>,
    enabled: bool,
    sample_rate: u32,
    channels: usize,
}

impl EffectBase {
    /// Create a new effect base from effect info, with default values
    pub fn new(info: EffectInfo) -> Self {
        let params = info.params.iter().map(|p| p.default).collect();
        Self {
            info,
            params,
            enabled: true,
            sample_rate: crate::types::DEFAULT_SAMPLE_RATE,
            channels: 2,
        }
    }

    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Range-checked parameter update
    pub fn set_param(&mut self, index: usize, value: f32) -> EngineResult<()> {
        let value = self.info.check(index, value)?;
        self.params[index] = value;
        Ok(())
    }

    /// Current value of a parameter (0.0 for an unknown index)
    #[inline]
    pub fn param(&self, index: usize) -> f32 {
        self.params.get(index).copied().unwrap_or(0.0)
    }

    /// Switch parameters read as on above one half
    #[inline]
    pub fn flag(&self, index: usize) -> bool {
        self.param(index) >= 0.5
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_format(&mut self, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate;
        self.channels = channels;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Reject buffers wider than the prepared channel count
    #[inline]
    pub fn check_buffer(&self, buffer: &AudioBuffer) -> EngineResult<()> {
        if buffer.channels() > self.channels {
            Err(EngineError::mismatch(
                (self.channels, buffer.frames()),
                (buffer.channels(), buffer.frames()),
            ))
        } else {
            Ok(())
        }
    }
}

/// The built-in effect types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    Volume,
    Equalizer,
    Compressor,
    Reverb,
}

impl EffectKind {
    pub const ALL: [EffectKind; 4] = [
        EffectKind::Volume,
        EffectKind::Equalizer,
        EffectKind::Compressor,
        EffectKind::Reverb,
    ];

    /// Parameter layout of a default-constructed effect of this kind
    pub fn describe(&self) -> EffectInfo {
        match self {
            EffectKind::Volume => VolumeEffect::describe(),
            EffectKind::Equalizer => EqualizerEffect::describe(equalizer::DEFAULT_BANDS),
            EffectKind::Compressor => CompressorEffect::describe(),
            EffectKind::Reverb => ReverbEffect::describe(),
        }
    }
}

/// One of the built-in effects
pub enum BuiltinEffect {
    Volume(VolumeEffect),
    Equalizer(EqualizerEffect),
    Compressor(CompressorEffect),
    Reverb(ReverbEffect),
}

macro_rules! dispatch {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            BuiltinEffect::Volume($e) => $body,
            BuiltinEffect::Equalizer($e) => $body,
            BuiltinEffect::Compressor($e) => $body,
            BuiltinEffect::Reverb($e) => $body,
        }
    };
}

impl BuiltinEffect {
    /// Default-configured effect of `kind`, prepared for the given format
    pub fn new(kind: EffectKind, sample_rate: u32, channels: usize) -> Self {
        let mut effect = match kind {
            EffectKind::Volume => BuiltinEffect::Volume(VolumeEffect::new()),
            EffectKind::Equalizer => BuiltinEffect::Equalizer(EqualizerEffect::new()),
            EffectKind::Compressor => BuiltinEffect::Compressor(CompressorEffect::new()),
            EffectKind::Reverb => BuiltinEffect::Reverb(ReverbEffect::new()),
        };
        effect.prepare(sample_rate, channels);
        effect
    }

    pub fn kind(&self) -> EffectKind {
        self.info().kind
    }

    /// The reverb, if this is one
    pub fn as_reverb_mut(&mut self) -> Option<&mut ReverbEffect> {
        match self {
            BuiltinEffect::Reverb(reverb) => Some(reverb),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BuiltinEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinEffect")
            .field("kind", &self.kind())
            .field("enabled", &self.is_enabled())
            .field("params", &self.params())
            .finish()
    }
}

impl Effect for BuiltinEffect {
    fn process(&mut self, buffer: &mut AudioBuffer, time: f64) -> EngineResult<()> {
        dispatch!(self, e => e.process(buffer, time))
    }

    fn latency_frames(&self) -> usize {
        dispatch!(self, e => e.latency_frames())
    }

    fn info(&self) -> &EffectInfo {
        dispatch!(self, e => e.info())
    }

    fn params(&self) -> &[f32] {
        dispatch!(self, e => e.params())
    }

    fn set_param(&mut self, index: usize, value: f32) -> EngineResult<()> {
        dispatch!(self, e => e.set_param(index, value))
    }

    fn set_enabled(&mut self, enabled: bool) {
        dispatch!(self, e => e.set_enabled(enabled))
    }

    fn is_enabled(&self) -> bool {
        dispatch!(self, e => e.is_enabled())
    }

    fn reset(&mut self) {
        dispatch!(self, e => e.reset())
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        dispatch!(self, e => e.prepare(sample_rate, channels))
    }
}
