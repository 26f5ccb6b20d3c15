//! Session snapshots
//!
//! A flat, serialisable description of the whole mix: every channel with
//! its gain, pan, mute/solo, input and output bus, and its ordered effect
//! list with parameter values. It is enough to rebuild the engine state
//! from scratch. Impulse-response audio is not included; reverbs in
//! convolution mode need their responses loaded again after a restore.
//!
//! ```yaml
//! master_gain_db: -1.0
//! channels:
//!   - name: vocals
//!     gain_db: -3.0
//!     output_bus: vox-bus
//!     effects:
//!       - kind: Compressor
//!         params: { threshold_db: -18.0, ratio: 3.0 }
//!   - name: vox-bus
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::effect::{BuiltinEffect, Effect, EffectInfo, EffectKind, EqualizerEffect};
use crate::engine::ChannelSpec;
use crate::error::{EngineError, EngineResult};

fn default_true() -> bool {
    true
}

/// One effect in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSnapshot {
    pub kind: EffectKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Parameter values by name; missing parameters keep their defaults
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
}

impl EffectSnapshot {
    /// Default-configured effect of `kind`
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            enabled: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Capture the current state of an effect
    pub fn capture(effect: &BuiltinEffect) -> Self {
        Self::from_values(effect.info(), effect.params(), effect.is_enabled())
    }

    /// Build from a parameter layout and values in layout order
    pub fn from_values(info: &EffectInfo, values: &[f32], enabled: bool) -> Self {
        Self {
            kind: info.kind,
            enabled,
            params: info
                .params
                .iter()
                .zip(values)
                .map(|(p, &v)| (p.name.clone(), v))
                .collect(),
        }
    }

    /// Equalizer band count implied by the parameter names
    ///
    /// Bands are numbered from 1. The highest `band{n}_*` index wins; never
    /// fewer than the default ten. `band0_*` names don't count and fail in
    /// `build` like any other unknown parameter.
    pub fn band_count(&self) -> usize {
        self.params
            .keys()
            .filter_map(|name| {
                let rest = name.strip_prefix("band")?;
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<usize>().ok()
            })
            .max()
            .unwrap_or(0)
            .max(crate::effect::equalizer::DEFAULT_BANDS)
    }

    /// Instantiate and configure the effect for a bus format
    ///
    /// Fails with `NotFound` for an unknown parameter name and with
    /// `ParameterOutOfRange` for an invalid value.
    pub fn build(&self, sample_rate: u32, channels: usize) -> EngineResult<BuiltinEffect> {
        let mut effect = match self.kind {
            EffectKind::Equalizer => {
                let mut eq = BuiltinEffect::Equalizer(EqualizerEffect::with_bands(self.band_count()));
                eq.prepare(sample_rate, channels);
                eq
            }
            kind => BuiltinEffect::new(kind, sample_rate, channels),
        };
        for (name, &value) in &self.params {
            effect.set_parameter(name, value)?;
        }
        effect.set_enabled(self.enabled);
        Ok(effect)
    }

    /// Parameter layout this snapshot builds
    pub fn info(&self) -> EffectInfo {
        match self.kind {
            EffectKind::Equalizer => EqualizerEffect::describe(self.band_count()),
            kind => kind.describe(),
        }
    }
}

/// One channel of the mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub name: String,
    /// Channel count; `None` follows the output format
    #[serde(default)]
    pub channels: Option<usize>,
    #[serde(default)]
    pub gain_db: f32,
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
    /// Input tag; `None` reads inputs tagged with the channel name
    #[serde(default)]
    pub input_bus: Option<String>,
    /// Destination bus; `None` feeds master
    #[serde(default)]
    pub output_bus: Option<String>,
    #[serde(default)]
    pub effects: Vec<EffectSnapshot>,
}

impl ChannelSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: None,
            gain_db: 0.0,
            pan: 0.0,
            mute: false,
            solo: false,
            input_bus: None,
            output_bus: None,
            effects: Vec::new(),
        }
    }

    /// Creation spec with the route left at master
    ///
    /// Restores create every channel first and route afterwards, so buses
    /// may be listed after the channels that feed them.
    pub fn spec(&self) -> ChannelSpec {
        ChannelSpec {
            name: self.name.clone(),
            channels: self.channels,
            gain_db: self.gain_db,
            pan: self.pan,
            mute: self.mute,
            solo: self.solo,
            input_bus: self.input_bus.clone(),
            output_bus: None,
        }
    }
}

/// The whole mix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub master_gain_db: f32,
    #[serde(default)]
    pub master_effects: Vec<EffectSnapshot>,
    #[serde(default)]
    pub channels: Vec<ChannelSnapshot>,
}

impl SessionSnapshot {
    pub fn channel(&self, name: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Check names and bus references before touching an engine
    pub fn validate(&self) -> EngineResult<()> {
        for (i, channel) in self.channels.iter().enumerate() {
            if channel.name == crate::types::MASTER_BUS_NAME
                || self.channels[..i].iter().any(|c| c.name == channel.name)
            {
                return Err(EngineError::DuplicateName(channel.name.clone()));
            }
        }
        for channel in &self.channels {
            if let Some(bus) = &channel.output_bus {
                if bus != crate::types::MASTER_BUS_NAME && self.channel(bus).is_none() {
                    return Err(EngineError::not_found(format!("output bus '{}'", bus)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let yaml = "
master_gain_db: -1.5
channels:
  - name: voice
  - name: music
    gain_db: -12.0
    effects:
      - kind: Volume
        params: { gain_db: 3.0 }
";
        let session: SessionSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(session.channels.len(), 2);
        let music = session.channel("music").unwrap();
        assert_eq!(music.gain_db, -12.0);
        assert!(music.effects[0].enabled);
        assert!(session.channel("voice").unwrap().output_bus.is_none());
        assert!(session.master_effects.is_empty());
    }

    #[test]
    fn test_build_applies_params() {
        let snapshot = EffectSnapshot::new(EffectKind::Compressor)
            .with_param("threshold_db", -30.0)
            .with_param("ratio", 8.0);
        let effect = snapshot.build(48000, 2).unwrap();
        assert_eq!(effect.get_parameter("threshold_db").unwrap(), -30.0);
        assert_eq!(effect.get_parameter("ratio").unwrap(), 8.0);

        let captured = EffectSnapshot::capture(&effect);
        assert_eq!(captured.params["ratio"], 8.0);
        assert_eq!(captured.kind, EffectKind::Compressor);
    }

    #[test]
    fn test_build_rejects_bad_params() {
        let unknown = EffectSnapshot::new(EffectKind::Volume).with_param("nope", 1.0);
        assert!(matches!(unknown.build(48000, 2), Err(EngineError::NotFound(_))));

        let out_of_range = EffectSnapshot::new(EffectKind::Volume).with_param("gain_db", 100.0);
        assert!(matches!(
            out_of_range.build(48000, 2),
            Err(EngineError::ParameterOutOfRange { .. })
        ));
    }

    #[test]
    fn test_equalizer_band_count_inferred() {
        let snapshot = EffectSnapshot::new(EffectKind::Equalizer).with_param("band12_gain_db", 3.0);
        assert_eq!(snapshot.band_count(), 12);
        let effect = snapshot.build(48000, 2).unwrap();
        assert_eq!(effect.get_parameter("band12_gain_db").unwrap(), 3.0);
        assert_eq!(EffectSnapshot::new(EffectKind::Equalizer).band_count(), 10);
    }

    #[test]
    fn test_equalizer_bands_start_at_one() {
        let zero = EffectSnapshot::new(EffectKind::Equalizer).with_param("band0_gain_db", 3.0);
        assert_eq!(zero.band_count(), 10);
        assert!(matches!(zero.build(48000, 2), Err(EngineError::NotFound(_))));

        let first = EffectSnapshot::new(EffectKind::Equalizer).with_param("band1_gain_db", 3.0);
        assert_eq!(first.build(48000, 2).unwrap().get_parameter("band1_gain_db").unwrap(), 3.0);
    }

    #[test]
    fn test_validate_names_and_routes() {
        let mut session = SessionSnapshot::default();
        session.channels.push(ChannelSnapshot::new("a"));
        session.channels.push(ChannelSnapshot::new("a"));
        assert!(matches!(session.validate(), Err(EngineError::DuplicateName(_))));

        session.channels[1].name = "b".into();
        session.channels[1].output_bus = Some("missing".into());
        assert!(matches!(session.validate(), Err(EngineError::NotFound(_))));

        session.channels[1].output_bus = Some("a".into());
        assert!(session.validate().is_ok());
    }
}
