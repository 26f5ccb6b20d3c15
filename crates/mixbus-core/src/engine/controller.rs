//! Engine controller - the control-thread handle
//!
//! Owns the producer side of the command queue plus a mirror of the mix.
//! Every request is validated against the mirror first, so routing cycles,
//! bad parameters, unknown names and capacity limits come back to the
//! caller immediately. Only valid changes are queued, and the mirror is
//! updated only once the command is in the queue.
//!
//! Channels, effects and convolvers are built and prepared here, off the
//! audio thread, and handed over as `basedrop::Owned` values.

use std::sync::Arc;

use basedrop::Owned;
use rtrb::Producer;

use super::channel::{validate_gain_db, validate_pan, Channel, ChannelSpec};
use super::command::EngineCommand;
use super::gc::gc_handle;
use super::meter::{MeterAtomics, MeterSnapshot};
use super::routing::{would_create_cycle, RoutingGraph};
use crate::buffer::{AudioBuffer, AudioBufferDesc};
use crate::config::EngineConfig;
use crate::effect::{BuiltinEffect, Convolver, Effect, EffectInfo, EffectKind, MAX_EFFECTS_PER_CHAIN};
use crate::error::{EngineError, EngineResult};
use crate::session::{ChannelSnapshot, EffectSnapshot, SessionSnapshot};
use crate::types::{BusTarget, ChannelId, MASTER_BUS_NAME};

/// What the controller knows about one effect slot
#[derive(Debug, Clone)]
struct EffectState {
    info: EffectInfo,
    values: Vec<f32>,
    enabled: bool,
}

impl EffectState {
    fn of(effect: &BuiltinEffect) -> Self {
        Self {
            info: effect.info().clone(),
            values: effect.params().to_vec(),
            enabled: effect.is_enabled(),
        }
    }

    fn snapshot(&self) -> EffectSnapshot {
        EffectSnapshot::from_values(&self.info, &self.values, self.enabled)
    }
}

/// What the controller knows about one channel
#[derive(Debug, Clone)]
struct ChannelState {
    id: ChannelId,
    name: String,
    width: usize,
    gain_db: f32,
    pan: f32,
    mute: bool,
    solo: bool,
    input_bus: String,
    output: BusTarget,
    effects: Vec<EffectState>,
}

/// Control-thread handle returned by [`AudioProcessor::initialize`](super::AudioProcessor::initialize)
pub struct EngineController {
    commands: Producer<EngineCommand>,
    meters: Arc<MeterAtomics>,
    format: AudioBufferDesc,
    max_channels: usize,
    max_frames: usize,
    channels: Vec<ChannelState>,
    master_effects: Vec<EffectState>,
    master_gain_db: f32,
    bypass: bool,
}

impl EngineController {
    pub(crate) fn new(
        commands: Producer<EngineCommand>,
        meters: Arc<MeterAtomics>,
        format: AudioBufferDesc,
        config: &EngineConfig,
    ) -> Self {
        Self {
            commands,
            meters,
            format,
            max_channels: config.max_channels,
            max_frames: config.max_block_frames,
            channels: Vec::with_capacity(config.max_channels),
            master_effects: Vec::new(),
            master_gain_db: 0.0,
            bypass: false,
        }
    }

    /// Output format the engine was initialized with
    pub fn format(&self) -> AudioBufferDesc {
        self.format
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.index_of(name).map(|i| self.channels[i].id)
    }

    pub fn master_gain_db(&self) -> f32 {
        self.master_gain_db
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    fn send(&mut self, command: EngineCommand) -> EngineResult<()> {
        // A rejected command is dropped here; Owned payloads go to the collector
        self.commands.push(command).map_err(|_| EngineError::QueueFull)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    fn index_of_id(&self, id: ChannelId) -> Option<usize> {
        self.channels.iter().position(|c| c.id == id)
    }

    fn require(&self, name: &str) -> EngineResult<usize> {
        self.index_of(name)
            .ok_or_else(|| EngineError::not_found(format!("channel '{}'", name)))
    }

    fn resolve_bus(&self, bus: &str) -> EngineResult<BusTarget> {
        if bus == MASTER_BUS_NAME {
            return Ok(BusTarget::Master);
        }
        self.require(bus).map(|i| BusTarget::Channel(self.channels[i].id))
    }

    fn bus_width(&self, target: BusTarget) -> usize {
        match target {
            BusTarget::Master => self.format.channels,
            BusTarget::Channel(id) => self
                .index_of_id(id)
                .map_or(self.format.channels, |i| self.channels[i].width),
        }
    }

    fn effects(&self, target: BusTarget) -> &[EffectState] {
        match target {
            BusTarget::Master => &self.master_effects,
            BusTarget::Channel(id) => match self.index_of_id(id) {
                Some(i) => &self.channels[i].effects,
                None => &[],
            },
        }
    }

    fn effects_mut(&mut self, target: BusTarget) -> Option<&mut Vec<EffectState>> {
        match target {
            BusTarget::Master => Some(&mut self.master_effects),
            BusTarget::Channel(id) => {
                let index = self.index_of_id(id)?;
                Some(&mut self.channels[index].effects)
            }
        }
    }

    /// Resolve a bus and an existing effect slot on it
    fn require_effect(&self, bus: &str, index: usize) -> EngineResult<(BusTarget, &EffectState)> {
        let target = self.resolve_bus(bus)?;
        self.effects(target)
            .get(index)
            .map(|effect| (target, effect))
            .ok_or_else(|| EngineError::not_found(format!("effect #{} on '{}'", index, bus)))
    }

    fn effect_state_mut(&mut self, target: BusTarget, index: usize) -> Option<&mut EffectState> {
        self.effects_mut(target).and_then(|effects| effects.get_mut(index))
    }

    // Channels

    /// Build a channel and queue it for the audio thread
    pub fn create_channel(&mut self, spec: ChannelSpec) -> EngineResult<ChannelId> {
        if spec.name == MASTER_BUS_NAME || self.index_of(&spec.name).is_some() {
            return Err(EngineError::DuplicateName(spec.name));
        }
        if self.channels.len() >= self.max_channels {
            return Err(EngineError::ChannelCapacityExceeded { max: self.max_channels });
        }
        spec.validate()?;
        let output = match &spec.output_bus {
            Some(bus) => self.resolve_bus(bus)?,
            None => BusTarget::Master,
        };
        let width = spec.channels.unwrap_or(self.format.channels);
        let id = ChannelId::next();
        let channel = Channel::new(id, &spec, width, output, self.format.sample_rate, self.max_frames)?;
        self.send(EngineCommand::CreateChannel(Owned::new(&gc_handle(), channel)))?;

        log::info!(
            "Created channel '{}' {} ({}ch) -> {}",
            spec.name,
            id,
            width,
            spec.output_bus.as_deref().unwrap_or(MASTER_BUS_NAME)
        );
        self.channels.push(ChannelState {
            id,
            input_bus: spec.input_tag().to_string(),
            name: spec.name,
            width,
            gain_db: spec.gain_db,
            pan: spec.pan,
            mute: spec.mute,
            solo: spec.solo,
            output,
            effects: Vec::new(),
        });
        Ok(id)
    }

    /// Remove a channel; channels routed into it fall back to master
    pub fn remove_channel(&mut self, name: &str) -> EngineResult<()> {
        let index = self.require(name)?;
        let id = self.channels[index].id;
        self.send(EngineCommand::RemoveChannel(id))?;

        for channel in self.channels.iter_mut() {
            if channel.output == BusTarget::Channel(id) {
                channel.output = BusTarget::Master;
            }
        }
        self.channels.remove(index);
        log::info!("Removed channel '{}'", name);
        Ok(())
    }

    /// Remove every channel and master effect
    pub fn clear(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Clear)?;
        self.channels.clear();
        self.master_effects.clear();
        Ok(())
    }

    pub fn set_gain_db(&mut self, name: &str, gain_db: f32) -> EngineResult<()> {
        let gain_db = validate_gain_db(gain_db)?;
        let index = self.require(name)?;
        let id = self.channels[index].id;
        self.send(EngineCommand::SetChannelGain { id, gain_db })?;
        self.channels[index].gain_db = gain_db;
        Ok(())
    }

    pub fn set_pan(&mut self, name: &str, pan: f32) -> EngineResult<()> {
        let pan = validate_pan(pan)?;
        let index = self.require(name)?;
        let id = self.channels[index].id;
        self.send(EngineCommand::SetChannelPan { id, pan })?;
        self.channels[index].pan = pan;
        Ok(())
    }

    pub fn set_mute(&mut self, name: &str, mute: bool) -> EngineResult<()> {
        let index = self.require(name)?;
        let id = self.channels[index].id;
        self.send(EngineCommand::SetChannelMute { id, mute })?;
        self.channels[index].mute = mute;
        Ok(())
    }

    pub fn set_solo(&mut self, name: &str, solo: bool) -> EngineResult<()> {
        let index = self.require(name)?;
        let id = self.channels[index].id;
        self.send(EngineCommand::SetChannelSolo { id, solo })?;
        self.channels[index].solo = solo;
        Ok(())
    }

    /// Route a channel into `bus` (`"master"` or another channel)
    ///
    /// Fails with `RoutingCycle` if `bus` already feeds this channel;
    /// nothing is queued and routing stays as it was.
    pub fn set_output_bus(&mut self, name: &str, bus: &str) -> EngineResult<()> {
        let index = self.require(name)?;
        let target = self.resolve_bus(bus)?;
        let id = self.channels[index].id;
        if let BusTarget::Channel(to) = target {
            if would_create_cycle(&*self, id, target) {
                log::warn!("Rejected routing '{}' -> '{}': cycle", name, bus);
                return Err(EngineError::RoutingCycle { from: id, to });
            }
        }
        self.send(EngineCommand::SetOutputBus { id, bus: target })?;
        self.channels[index].output = target;
        log::info!("Routed '{}' -> '{}'", name, bus);
        Ok(())
    }

    /// Read inputs tagged `tag`
    pub fn set_input_bus(&mut self, name: &str, tag: &str) -> EngineResult<()> {
        let index = self.require(name)?;
        let id = self.channels[index].id;
        let owned = Owned::new(&gc_handle(), tag.to_string());
        self.send(EngineCommand::SetInputBus { id, tag: owned })?;
        self.channels[index].input_bus = tag.to_string();
        Ok(())
    }

    pub fn set_master_gain_db(&mut self, gain_db: f32) -> EngineResult<()> {
        let gain_db = validate_gain_db(gain_db)?;
        self.send(EngineCommand::SetMasterGain(gain_db))?;
        self.master_gain_db = gain_db;
        Ok(())
    }

    pub fn set_bypass(&mut self, bypass: bool) -> EngineResult<()> {
        self.send(EngineCommand::SetBypass(bypass))?;
        self.bypass = bypass;
        Ok(())
    }

    /// Reset effect state and compensation delay of a bus
    pub fn reset_channel(&mut self, bus: &str) -> EngineResult<()> {
        let target = self.resolve_bus(bus)?;
        self.send(EngineCommand::ResetChannel(target))
    }

    // Effect chains

    /// Number of effects on a bus
    pub fn effect_count(&self, bus: &str) -> EngineResult<usize> {
        let target = self.resolve_bus(bus)?;
        Ok(self.effects(target).len())
    }

    /// Parameter layout of the effect at `index`
    pub fn effect_info(&self, bus: &str, index: usize) -> EngineResult<&EffectInfo> {
        self.require_effect(bus, index).map(|(_, effect)| &effect.info)
    }

    /// Append a default-configured effect; returns its index
    pub fn add_effect(&mut self, bus: &str, kind: EffectKind) -> EngineResult<usize> {
        let target = self.resolve_bus(bus)?;
        let effect = BuiltinEffect::new(kind, self.format.sample_rate, self.bus_width(target));
        self.insert_effect(bus, usize::MAX, effect)
    }

    /// Insert an effect at `index` (clamped to the chain end); returns its index
    pub fn insert_effect(&mut self, bus: &str, index: usize, mut effect: BuiltinEffect) -> EngineResult<usize> {
        let target = self.resolve_bus(bus)?;
        let len = self.effects(target).len();
        if len >= MAX_EFFECTS_PER_CHAIN {
            return Err(EngineError::ChainCapacityExceeded {
                max: MAX_EFFECTS_PER_CHAIN,
            });
        }
        effect.prepare(self.format.sample_rate, self.bus_width(target));
        let position = index.min(len);
        let state = EffectState::of(&effect);
        let kind = effect.kind();

        self.send(EngineCommand::InsertEffect {
            target,
            index: position,
            effect: Owned::new(&gc_handle(), effect),
        })?;
        if let Some(effects) = self.effects_mut(target) {
            effects.insert(position, state);
        }
        log::info!("Added {:?} to '{}' at #{}", kind, bus, position);
        Ok(position)
    }

    pub fn remove_effect(&mut self, bus: &str, index: usize) -> EngineResult<()> {
        let (target, effect) = self.require_effect(bus, index)?;
        let kind = effect.info.kind;
        self.send(EngineCommand::RemoveEffect { target, index })?;
        if let Some(effects) = self.effects_mut(target) {
            effects.remove(index);
        }
        log::info!("Removed {:?} #{} from '{}'", kind, index, bus);
        Ok(())
    }

    /// Reorder: the effect at `from` ends up at `to`
    pub fn move_effect(&mut self, bus: &str, from: usize, to: usize) -> EngineResult<()> {
        let target = self.resolve_bus(bus)?;
        let len = self.effects(target).len();
        if from >= len || to >= len {
            return Err(EngineError::not_found(format!("effect #{} or #{} on '{}'", from, to, bus)));
        }
        self.send(EngineCommand::MoveEffect { target, from, to })?;
        if let Some(effects) = self.effects_mut(target) {
            let effect = effects.remove(from);
            effects.insert(to, effect);
        }
        Ok(())
    }

    pub fn set_effect_enabled(&mut self, bus: &str, index: usize, enabled: bool) -> EngineResult<()> {
        let (target, _) = self.require_effect(bus, index)?;
        self.send(EngineCommand::SetEffectEnabled { target, index, enabled })?;
        if let Some(effect) = self.effect_state_mut(target, index) {
            effect.enabled = enabled;
        }
        Ok(())
    }

    /// Set a parameter by name
    ///
    /// Fails with `NotFound` for an unknown name and `ParameterOutOfRange`
    /// for a value outside the parameter's range.
    pub fn set_effect_parameter(&mut self, bus: &str, index: usize, name: &str, value: f32) -> EngineResult<()> {
        let (target, effect) = self.require_effect(bus, index)?;
        let param = effect.info.require_param(name)?;
        let value = effect.info.check(param, value)?;
        self.send(EngineCommand::SetEffectParameter {
            target,
            index,
            param,
            value,
        })?;
        if let Some(effect) = self.effect_state_mut(target, index) {
            effect.values[param] = value;
        }
        Ok(())
    }

    /// Last value set for a parameter
    pub fn effect_parameter(&self, bus: &str, index: usize, name: &str) -> EngineResult<f32> {
        let (_, effect) = self.require_effect(bus, index)?;
        let param = effect.info.require_param(name)?;
        Ok(effect.values[param])
    }

    pub fn reset_effect(&mut self, bus: &str, index: usize) -> EngineResult<()> {
        let (target, _) = self.require_effect(bus, index)?;
        self.send(EngineCommand::ResetEffect { target, index })
    }

    /// Build a convolver from `impulse` and hand it to the reverb at `index`
    ///
    /// The FFT partitions are computed here; the audio thread only swaps
    /// the prepared convolver in.
    pub fn load_impulse_response(&mut self, bus: &str, index: usize, impulse: &AudioBuffer) -> EngineResult<()> {
        let (target, effect) = self.require_effect(bus, index)?;
        if effect.info.kind != EffectKind::Reverb {
            return Err(EngineError::not_found(format!("reverb #{} on '{}'", index, bus)));
        }
        let convolver = Convolver::new(impulse, self.format.sample_rate, self.bus_width(target))?;
        let partitions = convolver.partitions();
        self.send(EngineCommand::LoadImpulseResponse {
            target,
            index,
            convolver: Owned::new(&gc_handle(), convolver),
        })?;
        log::info!(
            "Queued {}-frame impulse response ({} partitions) for '{}' #{}",
            impulse.frames(),
            partitions,
            bus,
            index
        );
        Ok(())
    }

    // Metering

    pub fn meters(&self) -> MeterSnapshot {
        self.meters.snapshot()
    }

    /// Clear peaks and sticky flags at the start of the next block
    pub fn reset_meters(&self) {
        self.meters.request_reset();
    }

    /// Commands the audio thread could not apply
    pub fn rejected_commands(&self) -> u64 {
        self.meters.rejected_commands()
    }

    /// Output latency as of the last processed block
    pub fn latency_frames(&self) -> usize {
        self.meters.latency_frames()
    }

    // Snapshots

    /// The mix as the controller has configured it
    pub fn snapshot(&self) -> SessionSnapshot {
        let channels = self
            .channels
            .iter()
            .map(|c| ChannelSnapshot {
                name: c.name.clone(),
                channels: Some(c.width),
                gain_db: c.gain_db,
                pan: c.pan,
                mute: c.mute,
                solo: c.solo,
                input_bus: (c.input_bus != c.name).then(|| c.input_bus.clone()),
                output_bus: match c.output {
                    BusTarget::Master => None,
                    BusTarget::Channel(id) => self.index_of_id(id).map(|i| self.channels[i].name.clone()),
                },
                effects: c.effects.iter().map(EffectState::snapshot).collect(),
            })
            .collect();
        SessionSnapshot {
            master_gain_db: self.master_gain_db,
            master_effects: self.master_effects.iter().map(EffectState::snapshot).collect(),
            channels,
        }
    }

    /// Replace the whole mix with `session`
    ///
    /// The session is checked and the queue space reserved before anything
    /// is sent, so a session that fails validation or does not fit in the
    /// queue leaves the engine untouched. Errors found later (an invalid
    /// parameter value, a routing cycle) leave a partial restore.
    pub fn restore(&mut self, session: &SessionSnapshot) -> EngineResult<()> {
        session.validate()?;
        if session.channels.len() > self.max_channels {
            return Err(EngineError::ChannelCapacityExceeded { max: self.max_channels });
        }
        let needed = 2
            + session.master_effects.len()
            + session
                .channels
                .iter()
                .map(|c| 1 + usize::from(c.output_bus.is_some()) + c.effects.len())
                .sum::<usize>();
        if self.commands.slots() < needed {
            return Err(EngineError::QueueFull);
        }

        self.clear()?;
        self.set_master_gain_db(session.master_gain_db)?;
        for effect in &session.master_effects {
            let effect = effect.build(self.format.sample_rate, self.format.channels)?;
            self.insert_effect(MASTER_BUS_NAME, usize::MAX, effect)?;
        }
        for channel in &session.channels {
            self.create_channel(channel.spec())?;
        }
        for channel in &session.channels {
            if let Some(bus) = &channel.output_bus {
                self.set_output_bus(&channel.name, bus)?;
            }
        }
        for channel in &session.channels {
            let width = channel.channels.unwrap_or(self.format.channels);
            for effect in &channel.effects {
                let effect = effect.build(self.format.sample_rate, width)?;
                self.insert_effect(&channel.name, usize::MAX, effect)?;
            }
        }
        log::info!(
            "Queued session restore: {} channel(s), {} command(s)",
            session.channels.len(),
            needed
        );
        Ok(())
    }
}

impl RoutingGraph for EngineController {
    fn parent_of(&self, id: ChannelId) -> Option<ChannelId> {
        let index = self.index_of_id(id)?;
        match self.channels[index].output {
            BusTarget::Master => None,
            BusTarget::Channel(parent) => Some(parent),
        }
    }

    fn node_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mixer::ChannelInput;
    use crate::engine::processor::AudioProcessor;

    fn start(config: EngineConfig) -> (AudioProcessor, EngineController) {
        let mut processor = AudioProcessor::new(config);
        let format = processor.output_format();
        let controller = processor.initialize(format).unwrap();
        (processor, controller)
    }

    fn mono() -> EngineConfig {
        EngineConfig {
            channels: 1,
            max_block_frames: 1024,
            ..Default::default()
        }
    }

    fn ones(frames: usize) -> AudioBuffer {
        AudioBuffer::constant(AudioBufferDesc::new(48000, 1, frames), 1.0).unwrap()
    }

    #[test]
    fn test_commands_apply_at_next_block() {
        let (mut processor, mut controller) = start(mono());
        controller.create_channel(ChannelSpec::new("voice")).unwrap();
        controller
            .create_channel(ChannelSpec::new("music").with_gain_db(-12.0))
            .unwrap();
        assert_eq!(processor.mixer().unwrap().channel_count(), 0, "nothing applied yet");

        let one = ones(1);
        let inputs = [ChannelInput::new("voice", &one), ChannelInput::new("music", &one)];
        let out = processor.process_frame(&inputs, 1, 0.0).unwrap();
        assert!((out.get(0, 0) - 1.251).abs() < 1e-3);
        assert!(controller.meters().clipping);
        assert_eq!(controller.rejected_commands(), 0);

        controller.reset_meters();
        let silence = AudioBuffer::allocate(AudioBufferDesc::new(48000, 1, 1)).unwrap();
        let inputs = [ChannelInput::new("voice", &silence)];
        processor.process_frame(&inputs, 1, 0.0).unwrap();
        let meters = controller.meters();
        assert!(!meters.clipping);
        assert_eq!(meters.peak[0], 0.0);
    }

    #[test]
    fn test_routing_cycle_rejected_synchronously() {
        let (mut processor, mut controller) = start(mono());
        controller.create_channel(ChannelSpec::new("a")).unwrap();
        controller.create_channel(ChannelSpec::new("b")).unwrap();
        controller.set_output_bus("a", "b").unwrap();

        let before = controller.snapshot();
        let err = controller.set_output_bus("b", "a").unwrap_err();
        assert!(matches!(err, EngineError::RoutingCycle { .. }));
        assert_eq!(controller.snapshot(), before);

        processor.process_frame(&[], 16, 0.0).unwrap();
        assert_eq!(processor.mixer().unwrap().snapshot(), before);
    }

    #[test]
    fn test_validation_errors() {
        let (_processor, mut controller) = start(EngineConfig {
            max_channels: 2,
            ..mono()
        });
        controller.create_channel(ChannelSpec::new("a")).unwrap();
        assert!(matches!(
            controller.create_channel(ChannelSpec::new("a")),
            Err(EngineError::DuplicateName(_))
        ));
        assert!(matches!(
            controller.create_channel(ChannelSpec::new("x").with_pan(2.0)),
            Err(EngineError::ParameterOutOfRange { .. })
        ));
        controller.create_channel(ChannelSpec::new("b")).unwrap();
        assert!(matches!(
            controller.create_channel(ChannelSpec::new("c")),
            Err(EngineError::ChannelCapacityExceeded { max: 2 })
        ));
        assert!(matches!(controller.set_gain_db("nope", 0.0), Err(EngineError::NotFound(_))));

        let index = controller.add_effect("a", EffectKind::Compressor).unwrap();
        assert!(matches!(
            controller.set_effect_parameter("a", index, "ratio", 0.5),
            Err(EngineError::ParameterOutOfRange { .. })
        ));
        assert!(matches!(
            controller.set_effect_parameter("a", index, "nope", 1.0),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            controller.load_impulse_response("a", index, &ones(8)),
            Err(EngineError::NotFound(_))
        ));
        controller.set_effect_parameter("a", index, "ratio", 4.0).unwrap();
        assert_eq!(controller.effect_parameter("a", index, "ratio").unwrap(), 4.0);
    }

    #[test]
    fn test_queue_full_leaves_mirror_unchanged() {
        let (mut processor, mut controller) = start(EngineConfig {
            command_queue_capacity: 2,
            ..mono()
        });
        controller.create_channel(ChannelSpec::new("a")).unwrap();
        controller.set_gain_db("a", -6.0).unwrap();
        assert!(matches!(controller.set_gain_db("a", -20.0), Err(EngineError::QueueFull)));
        assert_eq!(controller.snapshot().channels[0].gain_db, -6.0);

        processor.process_frame(&[], 16, 0.0).unwrap();
        controller.set_gain_db("a", -20.0).unwrap();
        processor.process_frame(&[], 16, 0.0).unwrap();
        assert_eq!(processor.mixer().unwrap().channel("a").unwrap().gain_db(), -20.0);
    }

    #[test]
    fn test_effect_editing_tracks_mixer() {
        let (mut processor, mut controller) = start(EngineConfig::default());
        controller.create_channel(ChannelSpec::new("gtr")).unwrap();
        controller.add_effect("gtr", EffectKind::Volume).unwrap();
        controller.add_effect("gtr", EffectKind::Compressor).unwrap();
        controller
            .insert_effect("gtr", 0, BuiltinEffect::new(EffectKind::Equalizer, 48000, 2))
            .unwrap();
        controller.move_effect("gtr", 0, 2).unwrap();
        controller.set_effect_enabled("gtr", 0, false).unwrap();
        controller.set_effect_parameter("gtr", 1, "threshold_db", -30.0).unwrap();
        controller.add_effect(MASTER_BUS_NAME, EffectKind::Reverb).unwrap();
        controller.remove_effect(MASTER_BUS_NAME, 0).unwrap();
        assert!(matches!(controller.move_effect("gtr", 0, 3), Err(EngineError::NotFound(_))));

        processor.process_frame(&[], 32, 0.0).unwrap();
        let mixer = processor.mixer().unwrap();
        let kinds: Vec<_> = mixer.chain("gtr").unwrap().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, [EffectKind::Volume, EffectKind::Compressor, EffectKind::Equalizer]);
        assert!(mixer.master_chain().is_empty());
        assert_eq!(mixer.snapshot(), controller.snapshot());
        assert_eq!(controller.rejected_commands(), 0);
    }

    #[test]
    fn test_chain_capacity() {
        let (_processor, mut controller) = start(EngineConfig {
            command_queue_capacity: 64,
            ..mono()
        });
        for _ in 0..MAX_EFFECTS_PER_CHAIN {
            controller.add_effect(MASTER_BUS_NAME, EffectKind::Volume).unwrap();
        }
        assert!(matches!(
            controller.add_effect(MASTER_BUS_NAME, EffectKind::Volume),
            Err(EngineError::ChainCapacityExceeded { max: MAX_EFFECTS_PER_CHAIN })
        ));
    }

    #[test]
    fn test_impulse_response_reports_latency() {
        let (mut processor, mut controller) = start(mono());
        controller.create_channel(ChannelSpec::new("v")).unwrap();
        let reverb = controller.add_effect("v", EffectKind::Reverb).unwrap();
        controller.set_effect_parameter("v", reverb, "mode", 1.0).unwrap();

        let mut impulse = AudioBuffer::allocate(AudioBufferDesc::new(48000, 1, 64)).unwrap();
        impulse.set(0, 0, 1.0);
        controller.load_impulse_response("v", reverb, &impulse).unwrap();

        processor.process_frame(&[], 16, 0.0).unwrap();
        assert_eq!(controller.latency_frames(), 128);
        assert_eq!(processor.latency_frames(), 128);
    }

    #[test]
    fn test_diverged_command_is_counted() {
        let (mut processor, mut controller) = start(mono());
        controller.create_channel(ChannelSpec::new("a")).unwrap();
        processor.process_frame(&[], 8, 0.0).unwrap();

        // Removed behind the controller's back
        processor.mixer_mut().unwrap().remove_channel("a").unwrap();
        controller.set_mute("a", true).unwrap();
        processor.process_frame(&[], 8, 0.0).unwrap();
        assert_eq!(controller.rejected_commands(), 1);
    }

    #[test]
    fn test_remove_channel_reroutes_children() {
        let (mut processor, mut controller) = start(mono());
        controller.create_channel(ChannelSpec::new("bus")).unwrap();
        controller.create_channel(ChannelSpec::new("kick").routed_to("bus")).unwrap();
        controller.remove_channel("bus").unwrap();
        assert_eq!(controller.snapshot().channels[0].output_bus, None);

        let one = ones(4);
        let out = processor.process_frame(&[ChannelInput::new("kick", &one)], 4, 0.0).unwrap();
        assert!((out.get(3, 0) - 1.0).abs() < 1e-6);
        assert_eq!(processor.mixer().unwrap().snapshot(), controller.snapshot());
    }

    #[test]
    fn test_restore_round_trip() {
        let session: SessionSnapshot = serde_yaml::from_str(
            "
master_gain_db: -2.0
master_effects:
  - kind: Compressor
    params: { ratio: 2.0 }
channels:
  - name: vocals
    gain_db: -3.0
    pan: 0.25
    output_bus: vox
    effects:
      - kind: Equalizer
        params: { band1_gain_db: 4.0 }
  - name: vox
    solo: true
",
        )
        .unwrap();

        let (mut processor, mut controller) = start(EngineConfig::default());
        controller.create_channel(ChannelSpec::new("stale")).unwrap();
        controller.restore(&session).unwrap();
        processor.process_frame(&[], 64, 0.0).unwrap();

        let restored = controller.snapshot();
        assert_eq!(processor.mixer().unwrap().snapshot(), restored);
        assert_eq!(restored.channels.len(), 2);
        assert_eq!(restored.channel("vocals").unwrap().output_bus.as_deref(), Some("vox"));
        assert_eq!(controller.effect_parameter("vocals", 0, "band1_gain_db").unwrap(), 4.0);
        assert_eq!(controller.master_gain_db(), -2.0);
    }

    #[test]
    fn test_restore_checks_queue_space_first() {
        let (_processor, mut controller) = start(EngineConfig {
            command_queue_capacity: 3,
            ..mono()
        });
        controller.create_channel(ChannelSpec::new("keep")).unwrap();
        let mut session = SessionSnapshot::default();
        session.channels.push(ChannelSnapshot::new("a"));
        session.channels.push(ChannelSnapshot::new("b"));
        assert!(matches!(controller.restore(&session), Err(EngineError::QueueFull)));
        assert_eq!(controller.channel_names().collect::<Vec<_>>(), ["keep"]);
    }
}
