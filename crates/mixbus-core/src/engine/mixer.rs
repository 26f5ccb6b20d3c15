//! Mixer - sums channels through the bus graph into the master output
//!
//! Features:
//! - Named channels with gain, equal-power pan, mute and solo
//! - Sub-mix buses: any channel can be the output bus of others
//! - Per-bus and master effect chains
//! - Path latency compensation for chains that delay their output
//! - Bypass for audition paths
//!
//! The control-plane API (`create_channel`, `set_output_bus`, ...) is
//! name-based and may allocate and log. [`Mixer::apply`] and
//! [`Mixer::process_buffers`] are the real-time entry points and do
//! neither. All per-block storage is reserved up front for
//! `max_channels` channels of `max_frames` frames.

use basedrop::Owned;

use super::channel::{accumulate, validate_gain_db, validate_pan, Channel, ChannelSpec};
use super::command::EngineCommand;
use super::gc::gc_handle;
use super::latency::plan_compensation;
use super::routing::{compute_depths, order_by_depth, resolve_activity, would_create_cycle, RoutingGraph};
use crate::buffer::{AudioBuffer, AudioBufferDesc};
use crate::effect::{BuiltinEffect, Effect, EffectChain, EffectKind};
use crate::error::{EngineError, EngineResult};
use crate::session::{ChannelSnapshot, EffectSnapshot, SessionSnapshot};
use crate::types::{db_to_linear, BusTarget, ChannelId, MASTER_BUS_NAME};

/// One source buffer for a processing cycle, tagged with the input bus it feeds
#[derive(Debug, Clone, Copy)]
pub struct ChannelInput<'a> {
    pub target: &'a str,
    pub buffer: &'a AudioBuffer,
}

impl<'a> ChannelInput<'a> {
    pub fn new(target: &'a str, buffer: &'a AudioBuffer) -> Self {
        Self { target, buffer }
    }
}

/// Main mixer
pub struct Mixer {
    sample_rate: u32,
    /// Output channel count (also the master bus width)
    channels: usize,
    max_frames: usize,
    max_channels: usize,
    strips: Vec<Owned<Channel>>,

    // Topology, rebuilt after every change. Capacity reserved for
    // `max_channels` so rebuilding on the audio thread never allocates.
    parents: Vec<Option<usize>>,
    depths: Vec<usize>,
    order: Vec<usize>,
    active: Vec<bool>,
    own_latency: Vec<usize>,
    arrival: Vec<usize>,
    incoming: Vec<usize>,
    compensation: Vec<usize>,
    any_solo: bool,

    master: AudioBuffer,
    master_chain: EffectChain,
    master_gain_db: f32,
    master_gain: f32,
    bypass: bool,
    latency_compensation: bool,
    latency_frames: usize,
    /// Sticky until taken: an effect failed or produced non-finite samples
    fault: bool,
}

impl Mixer {
    /// Create a mixer producing `format.channels` channels at `format.sample_rate`
    pub fn new(
        format: AudioBufferDesc,
        max_frames: usize,
        max_channels: usize,
        latency_compensation: bool,
    ) -> EngineResult<Self> {
        format.validate()?;
        let master = AudioBuffer::with_capacity(
            AudioBufferDesc::new(format.sample_rate, format.channels, 0),
            max_frames,
        )?;
        Ok(Self {
            sample_rate: format.sample_rate,
            channels: format.channels,
            max_frames,
            max_channels,
            strips: Vec::with_capacity(max_channels),
            parents: Vec::with_capacity(max_channels),
            depths: Vec::with_capacity(max_channels),
            order: Vec::with_capacity(max_channels),
            active: Vec::with_capacity(max_channels),
            own_latency: Vec::with_capacity(max_channels),
            arrival: Vec::with_capacity(max_channels),
            incoming: Vec::with_capacity(max_channels + 1),
            compensation: Vec::with_capacity(max_channels),
            any_solo: false,
            master,
            master_chain: EffectChain::new(),
            master_gain_db: 0.0,
            master_gain: 1.0,
            bypass: false,
            latency_compensation,
            latency_frames: 0,
            fault: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn channel_count(&self) -> usize {
        self.strips.len()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.strips.iter().find(|c| c.name() == name).map(|c| &**c)
    }

    pub fn channel_by_id(&self, id: ChannelId) -> Option<&Channel> {
        self.strips.iter().find(|c| c.id() == id).map(|c| &**c)
    }

    /// Channels in creation order
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.strips.iter().map(|c| c.name())
    }

    pub fn master_gain_db(&self) -> f32 {
        self.master_gain_db
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Whether any channel is soloed right now
    pub fn any_solo(&self) -> bool {
        self.any_solo
    }

    /// Latency of the slowest path to the output, master chain included
    pub fn latency_frames(&self) -> usize {
        self.latency_frames
    }

    pub fn master_chain(&self) -> &EffectChain {
        &self.master_chain
    }

    /// Read and clear the fault flag
    pub fn take_fault(&mut self) -> bool {
        std::mem::take(&mut self.fault)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.strips.iter().position(|c| c.name() == name)
    }

    fn index_of_id(&self, id: ChannelId) -> Option<usize> {
        self.strips.iter().position(|c| c.id() == id)
    }

    fn require(&self, name: &str) -> EngineResult<usize> {
        self.index_of(name)
            .ok_or_else(|| EngineError::not_found(format!("channel '{}'", name)))
    }

    /// Resolve a bus name (`"master"` or a channel name)
    pub fn resolve_bus(&self, bus: &str) -> EngineResult<BusTarget> {
        if bus == MASTER_BUS_NAME {
            return Ok(BusTarget::Master);
        }
        self.require(bus).map(|i| BusTarget::Channel(self.strips[i].id()))
    }

    fn target_exists(&self, target: BusTarget) -> bool {
        match target {
            BusTarget::Master => true,
            BusTarget::Channel(id) => self.index_of_id(id).is_some(),
        }
    }

    fn bus_channels(&self, target: BusTarget) -> Option<usize> {
        match target {
            BusTarget::Master => Some(self.channels),
            BusTarget::Channel(id) => self.channel_by_id(id).map(|c| c.channel_count()),
        }
    }

    fn chain_for(&self, target: BusTarget) -> Option<&EffectChain> {
        match target {
            BusTarget::Master => Some(&self.master_chain),
            BusTarget::Channel(id) => self.channel_by_id(id).map(|c| c.chain()),
        }
    }

    fn chain_for_mut(&mut self, target: BusTarget) -> Option<&mut EffectChain> {
        match target {
            BusTarget::Master => Some(&mut self.master_chain),
            BusTarget::Channel(id) => {
                let index = self.index_of_id(id)?;
                Some(self.strips[index].chain_mut())
            }
        }
    }

    /// Effect chain of a bus (`"master"` for the master chain)
    pub fn chain(&self, bus: &str) -> EngineResult<&EffectChain> {
        let target = self.resolve_bus(bus)?;
        self.chain_for(target)
            .ok_or_else(|| EngineError::not_found(format!("bus '{}'", bus)))
    }

    /// Effect at `index` on a bus
    pub fn effect(&self, bus: &str, index: usize) -> EngineResult<&BuiltinEffect> {
        self.chain(bus)?
            .get(index)
            .ok_or_else(|| EngineError::not_found(format!("effect #{} on '{}'", index, bus)))
    }

    fn effect_mut(&mut self, bus: &str, index: usize) -> EngineResult<&mut BuiltinEffect> {
        let target = self.resolve_bus(bus)?;
        self.chain_for_mut(target)
            .and_then(|chain| chain.get_mut(index))
            .ok_or_else(|| EngineError::not_found(format!("effect #{} on '{}'", index, bus)))
    }

    fn with_strip(&mut self, id: ChannelId, f: impl FnOnce(&mut Channel)) -> bool {
        match self.index_of_id(id) {
            Some(index) => {
                f(&mut *self.strips[index]);
                true
            }
            None => false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Channel management (control plane)
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a channel
    ///
    /// Fails with `DuplicateName` if the name is taken (or is `"master"`),
    /// `ChannelCapacityExceeded` when the mixer is full, `NotFound` for an
    /// unknown output bus and `ParameterOutOfRange` for invalid gain or pan.
    pub fn create_channel(&mut self, spec: ChannelSpec) -> EngineResult<ChannelId> {
        if spec.name == MASTER_BUS_NAME || self.index_of(&spec.name).is_some() {
            return Err(EngineError::DuplicateName(spec.name));
        }
        if self.strips.len() >= self.max_channels {
            return Err(EngineError::ChannelCapacityExceeded { max: self.max_channels });
        }
        spec.validate()?;
        let output = match &spec.output_bus {
            Some(bus) => self.resolve_bus(bus)?,
            None => BusTarget::Master,
        };
        let width = spec.channels.unwrap_or(self.channels);
        let id = ChannelId::next();
        let channel = Channel::new(id, &spec, width, output, self.sample_rate, self.max_frames)?;

        log::info!(
            "Created channel '{}' {} ({}ch) -> {}",
            spec.name,
            id,
            width,
            spec.output_bus.as_deref().unwrap_or(MASTER_BUS_NAME)
        );
        self.add_channel(Owned::new(&gc_handle(), channel));
        Ok(id)
    }

    /// Add a built channel (real-time safe)
    ///
    /// Returns false when the mixer is full or the id is taken; the channel
    /// is then released by the collector.
    pub fn add_channel(&mut self, mut channel: Owned<Channel>) -> bool {
        if self.strips.len() >= self.max_channels || self.index_of_id(channel.id()).is_some() {
            return false;
        }
        if !self.target_exists(channel.output()) {
            channel.set_output(BusTarget::Master);
        }
        self.strips.push(channel);
        self.refresh();
        true
    }

    /// Remove a channel; channels routed into it fall back to master
    pub fn remove_channel(&mut self, name: &str) -> EngineResult<()> {
        let index = self.require(name)?;
        let rerouted = self.remove_index(index);
        log::info!("Removed channel '{}' ({} channel(s) re-routed to master)", name, rerouted);
        Ok(())
    }

    /// Remove every channel and master effect
    pub fn clear(&mut self) {
        self.strips.clear();
        self.master_chain.clear();
        self.refresh();
    }

    fn remove_index(&mut self, index: usize) -> usize {
        let id = self.strips[index].id();
        let mut rerouted = 0;
        for strip in self.strips.iter_mut() {
            if strip.output() == BusTarget::Channel(id) {
                strip.set_output(BusTarget::Master);
                rerouted += 1;
            }
        }
        // The removed channel is freed on the collector thread
        self.strips.remove(index);
        self.refresh();
        rerouted
    }

    pub fn set_gain_db(&mut self, name: &str, gain_db: f32) -> EngineResult<()> {
        let gain_db = validate_gain_db(gain_db)?;
        let index = self.require(name)?;
        self.strips[index].set_gain_db(gain_db);
        Ok(())
    }

    pub fn set_pan(&mut self, name: &str, pan: f32) -> EngineResult<()> {
        let pan = validate_pan(pan)?;
        let index = self.require(name)?;
        self.strips[index].set_pan(pan);
        Ok(())
    }

    pub fn set_mute(&mut self, name: &str, mute: bool) -> EngineResult<()> {
        let index = self.require(name)?;
        self.strips[index].set_mute(mute);
        self.refresh();
        Ok(())
    }

    pub fn set_solo(&mut self, name: &str, solo: bool) -> EngineResult<()> {
        let index = self.require(name)?;
        self.strips[index].set_solo(solo);
        self.refresh();
        Ok(())
    }

    /// Route a channel into `bus` (`"master"` or another channel)
    ///
    /// Fails with `RoutingCycle` if `bus` already feeds this channel,
    /// directly or through other buses; routing is left unchanged.
    pub fn set_output_bus(&mut self, name: &str, bus: &str) -> EngineResult<()> {
        let index = self.require(name)?;
        let target = self.resolve_bus(bus)?;
        let id = self.strips[index].id();
        if let BusTarget::Channel(to) = target {
            if would_create_cycle(&*self, id, target) {
                log::warn!("Rejected routing '{}' -> '{}': cycle", name, bus);
                return Err(EngineError::RoutingCycle { from: id, to });
            }
        }
        self.strips[index].set_output(target);
        self.refresh();
        log::info!("Routed '{}' -> '{}'", name, bus);
        Ok(())
    }

    /// Read inputs tagged `tag` instead of the current input bus
    pub fn set_input_bus(&mut self, name: &str, tag: &str) -> EngineResult<()> {
        let index = self.require(name)?;
        self.strips[index].set_input_bus(Owned::new(&gc_handle(), tag.to_string()));
        Ok(())
    }

    pub fn set_master_gain_db(&mut self, gain_db: f32) -> EngineResult<()> {
        let gain_db = validate_gain_db(gain_db)?;
        self.set_master_gain(gain_db);
        Ok(())
    }

    fn set_master_gain(&mut self, gain_db: f32) {
        self.master_gain_db = gain_db;
        self.master_gain = db_to_linear(gain_db);
    }

    /// Copy the first input straight to the output, skipping all processing
    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    /// Reset effect state and compensation delay of a bus
    pub fn reset_channel(&mut self, bus: &str) -> EngineResult<()> {
        match self.resolve_bus(bus)? {
            BusTarget::Master => self.master_chain.reset(),
            BusTarget::Channel(id) => {
                self.with_strip(id, |c| c.reset());
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Effect chains (control plane)
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a default-configured effect; returns its index
    pub fn add_effect(&mut self, bus: &str, kind: EffectKind) -> EngineResult<usize> {
        let target = self.resolve_bus(bus)?;
        let width = self.bus_channels(target).unwrap_or(self.channels);
        self.insert_effect(bus, usize::MAX, BuiltinEffect::new(kind, self.sample_rate, width))
    }

    /// Insert an effect at `index` (clamped to the chain end); returns its index
    ///
    /// The effect is re-prepared for the bus format.
    pub fn insert_effect(&mut self, bus: &str, index: usize, mut effect: BuiltinEffect) -> EngineResult<usize> {
        let target = self.resolve_bus(bus)?;
        let width = self.bus_channels(target).unwrap_or(self.channels);
        effect.prepare(self.sample_rate, width);
        let kind = effect.kind();

        let chain = self
            .chain_for_mut(target)
            .ok_or_else(|| EngineError::not_found(format!("bus '{}'", bus)))?;
        let position = chain
            .insert(index, Owned::new(&gc_handle(), effect))
            .map_err(|(e, _)| e)?;
        self.refresh();
        log::info!("Added {:?} to '{}' at #{}", kind, bus, position);
        Ok(position)
    }

    pub fn remove_effect(&mut self, bus: &str, index: usize) -> EngineResult<()> {
        let target = self.resolve_bus(bus)?;
        let removed = self.chain_for_mut(target).and_then(|chain| chain.remove(index));
        match removed {
            Some(effect) => {
                log::info!("Removed {:?} #{} from '{}'", effect.kind(), index, bus);
                self.refresh();
                Ok(())
            }
            None => Err(EngineError::not_found(format!("effect #{} on '{}'", index, bus))),
        }
    }

    /// Reorder: the effect at `from` ends up at `to`
    pub fn move_effect(&mut self, bus: &str, from: usize, to: usize) -> EngineResult<()> {
        let target = self.resolve_bus(bus)?;
        let moved = self
            .chain_for_mut(target)
            .is_some_and(|chain| chain.move_effect(from, to));
        if moved {
            Ok(())
        } else {
            Err(EngineError::not_found(format!("effect #{} or #{} on '{}'", from, to, bus)))
        }
    }

    pub fn set_effect_enabled(&mut self, bus: &str, index: usize, enabled: bool) -> EngineResult<()> {
        self.effect_mut(bus, index)?.set_enabled(enabled);
        self.refresh();
        Ok(())
    }

    pub fn set_effect_parameter(&mut self, bus: &str, index: usize, name: &str, value: f32) -> EngineResult<()> {
        self.effect_mut(bus, index)?.set_parameter(name, value)?;
        self.refresh();
        Ok(())
    }

    pub fn effect_parameter(&self, bus: &str, index: usize, name: &str) -> EngineResult<f32> {
        self.effect(bus, index)?.get_parameter(name)
    }

    pub fn reset_effect(&mut self, bus: &str, index: usize) -> EngineResult<()> {
        self.effect_mut(bus, index)?.reset();
        Ok(())
    }

    /// Load an impulse response into the reverb at `index`
    pub fn load_impulse_response(&mut self, bus: &str, index: usize, impulse: &AudioBuffer) -> EngineResult<()> {
        let reverb = self
            .effect_mut(bus, index)?
            .as_reverb_mut()
            .ok_or_else(|| EngineError::not_found(format!("reverb #{} on '{}'", index, bus)))?;
        reverb.load_impulse_response(impulse)?;
        self.refresh();
        log::info!("Loaded {}-frame impulse response into '{}' #{}", impulse.frames(), bus, index);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Real-time path
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply a queued command (real-time safe)
    ///
    /// Returns false when the addressed channel or effect no longer exists
    /// or the change is invalid; the mixer is then left as it was.
    pub fn apply(&mut self, command: EngineCommand) -> bool {
        let applied = match command {
            EngineCommand::CreateChannel(channel) => self.add_channel(channel),
            EngineCommand::RemoveChannel(id) => match self.index_of_id(id) {
                Some(index) => {
                    self.remove_index(index);
                    true
                }
                None => false,
            },
            EngineCommand::SetChannelGain { id, gain_db } => self.with_strip(id, |c| c.set_gain_db(gain_db)),
            EngineCommand::SetChannelPan { id, pan } => self.with_strip(id, |c| c.set_pan(pan)),
            EngineCommand::SetChannelMute { id, mute } => self.with_strip(id, |c| c.set_mute(mute)),
            EngineCommand::SetChannelSolo { id, solo } => self.with_strip(id, |c| c.set_solo(solo)),
            EngineCommand::SetOutputBus { id, bus } => {
                if !self.target_exists(bus) || would_create_cycle(&*self, id, bus) {
                    false
                } else {
                    self.with_strip(id, |c| c.set_output(bus))
                }
            }
            EngineCommand::SetInputBus { id, tag } => self.with_strip(id, move |c| c.set_input_bus(tag)),
            EngineCommand::ResetChannel(target) => match target {
                BusTarget::Master => {
                    self.master_chain.reset();
                    true
                }
                BusTarget::Channel(id) => self.with_strip(id, |c| c.reset()),
            },
            EngineCommand::Clear => {
                self.strips.clear();
                self.master_chain.clear();
                true
            }
            EngineCommand::InsertEffect { target, index, effect } => self
                .chain_for_mut(target)
                .is_some_and(|chain| chain.insert(index, effect).is_ok()),
            EngineCommand::RemoveEffect { target, index } => self
                .chain_for_mut(target)
                .is_some_and(|chain| chain.remove(index).is_some()),
            EngineCommand::MoveEffect { target, from, to } => self
                .chain_for_mut(target)
                .is_some_and(|chain| chain.move_effect(from, to)),
            EngineCommand::SetEffectEnabled { target, index, enabled } => self
                .chain_for_mut(target)
                .and_then(|chain| chain.get_mut(index))
                .map(|effect| effect.set_enabled(enabled))
                .is_some(),
            EngineCommand::SetEffectParameter { target, index, param, value } => {
                match self.chain_for_mut(target).and_then(|chain| chain.get_mut(index)) {
                    // Index checked first: an unknown index would format an error
                    Some(effect) if param < effect.params().len() => effect.set_param(param, value).is_ok(),
                    _ => false,
                }
            }
            EngineCommand::ResetEffect { target, index } => self
                .chain_for_mut(target)
                .and_then(|chain| chain.get_mut(index))
                .map(|effect| effect.reset())
                .is_some(),
            EngineCommand::LoadImpulseResponse { target, index, convolver } => self
                .chain_for_mut(target)
                .and_then(|chain| chain.get_mut(index))
                .and_then(|effect| effect.as_reverb_mut())
                .map(move |reverb| reverb.install_convolver(convolver))
                .is_some(),
            EngineCommand::SetMasterGain(gain_db) => {
                self.set_master_gain(gain_db);
                true
            }
            EngineCommand::SetBypass(bypass) => {
                self.bypass = bypass;
                true
            }
        };
        if applied {
            self.refresh();
        }
        applied
    }

    /// Rebuild processing order, solo/mute activity and latency compensation
    ///
    /// Real-time safe: works in storage reserved at construction.
    fn refresh(&mut self) {
        let n = self.strips.len();

        self.parents.clear();
        for i in 0..n {
            let parent = match self.strips[i].output() {
                BusTarget::Master => None,
                BusTarget::Channel(id) => self.strips.iter().position(|c| c.id() == id),
            };
            self.parents.push(parent);
        }
        reset_scratch(&mut self.depths, n);
        reset_scratch(&mut self.active, n);
        reset_scratch(&mut self.own_latency, n);
        reset_scratch(&mut self.arrival, n);
        reset_scratch(&mut self.compensation, n);
        reset_scratch(&mut self.incoming, n + 1);

        compute_depths(&self.parents, &mut self.depths);
        order_by_depth(&self.depths, &mut self.order);

        let strips = &self.strips;
        self.any_solo = resolve_activity(
            &self.parents,
            &self.order,
            |i| strips[i].is_muted(),
            |i| strips[i].is_soloed(),
            &mut self.active,
        );

        for (latency, strip) in self.own_latency.iter_mut().zip(strips.iter()) {
            *latency = strip.chain().latency_frames();
        }
        let into_master = plan_compensation(
            &self.order,
            &self.parents,
            &self.own_latency,
            &mut self.arrival,
            &mut self.incoming,
            &mut self.compensation,
        );
        self.latency_frames = into_master + self.master_chain.latency_frames();

        let compensate = self.latency_compensation;
        for ((strip, &frames), &active) in self.strips.iter_mut().zip(&self.compensation).zip(&self.active) {
            strip.set_compensation(if compensate { frames } else { 0 });
            strip.set_active(active);
        }
    }

    /// Mix one block
    ///
    /// Every input must carry `output.frames()` frames and either the output
    /// channel count or the channel count of the channels reading it,
    /// otherwise this fails with `FormatMismatch` and `output` is silent.
    /// Non-finite samples are replaced with silence and reported through
    /// [`take_fault`](Self::take_fault).
    pub fn process_buffers(
        &mut self,
        inputs: &[ChannelInput<'_>],
        output: &mut AudioBuffer,
        time: f64,
    ) -> EngineResult<()> {
        output.clear();
        let frames = output.frames();
        if output.channels() != self.channels || frames > self.max_frames {
            return Err(EngineError::mismatch(
                (self.channels, frames.min(self.max_frames)),
                (output.channels(), frames),
            ));
        }
        for input in inputs {
            let width = input.buffer.channels();
            let width_ok = width == self.channels
                || self
                    .strips
                    .iter()
                    .any(|c| c.input_bus() == input.target && c.channel_count() == width);
            if input.buffer.frames() != frames || !width_ok {
                return Err(EngineError::mismatch((self.channels, frames), (width, input.buffer.frames())));
            }
        }

        if self.bypass {
            if let Some(first) = inputs.first() {
                accumulate(first.buffer, output);
            }
            return Ok(());
        }

        self.master.set_frames(frames)?;
        for strip in self.strips.iter_mut() {
            strip.begin_block(frames)?;
        }

        // Sources into the channels that read them
        for input in inputs {
            for (i, strip) in self.strips.iter_mut().enumerate() {
                if self.active[i] && strip.input_bus() == input.target {
                    accumulate(input.buffer, strip.work_mut());
                }
            }
        }

        // Children before the buses they feed
        let compensate = self.latency_compensation;
        for k in 0..self.order.len() {
            let i = self.order[k];
            if !self.active[i] {
                continue;
            }
            if self.strips[i].process(time, compensate) {
                self.fault = true;
            }
            match self.parents[i] {
                Some(parent) => {
                    let (src, dst) = pair_mut(&mut self.strips, i, parent);
                    src.contribute(dst.work_mut());
                }
                None => self.strips[i].contribute(&mut self.master),
            }
        }

        if self.master_chain.process(&mut self.master, time).is_err() {
            self.master.clear();
            self.fault = true;
        }
        if self.master.sanitize() {
            self.fault = true;
        }
        output.copy_from(&self.master)?;
        output.scale(self.master_gain);
        if output.sanitize() {
            self.fault = true;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshots
    // ═══════════════════════════════════════════════════════════════════════

    /// Capture the whole mix
    pub fn snapshot(&self) -> SessionSnapshot {
        let channels = self
            .strips
            .iter()
            .map(|c| ChannelSnapshot {
                name: c.name().to_string(),
                channels: Some(c.channel_count()),
                gain_db: c.gain_db(),
                pan: c.pan(),
                mute: c.is_muted(),
                solo: c.is_soloed(),
                input_bus: (c.input_bus() != c.name()).then(|| c.input_bus().to_string()),
                output_bus: match c.output() {
                    BusTarget::Master => None,
                    BusTarget::Channel(id) => self.channel_by_id(id).map(|p| p.name().to_string()),
                },
                effects: c.chain().iter().map(EffectSnapshot::capture).collect(),
            })
            .collect();
        SessionSnapshot {
            master_gain_db: self.master_gain_db,
            master_effects: self.master_chain.iter().map(EffectSnapshot::capture).collect(),
            channels,
        }
    }

    /// Replace the whole mix with `session`
    ///
    /// Channels are created first and routed afterwards, so the listing
    /// order does not matter. On error the mixer holds whatever was
    /// restored up to that point.
    pub fn restore(&mut self, session: &SessionSnapshot) -> EngineResult<()> {
        session.validate()?;
        self.clear();
        self.set_master_gain_db(session.master_gain_db)?;
        for effect in &session.master_effects {
            let effect = effect.build(self.sample_rate, self.channels)?;
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
            let width = channel.channels.unwrap_or(self.channels);
            for effect in &channel.effects {
                let effect = effect.build(self.sample_rate, width)?;
                self.insert_effect(&channel.name, usize::MAX, effect)?;
            }
        }
        log::info!(
            "Restored session: {} channel(s), {} master effect(s)",
            session.channels.len(),
            session.master_effects.len()
        );
        Ok(())
    }
}

impl RoutingGraph for Mixer {
    fn parent_of(&self, id: ChannelId) -> Option<ChannelId> {
        match self.channel_by_id(id)?.output() {
            BusTarget::Master => None,
            BusTarget::Channel(parent) => Some(parent),
        }
    }

    fn node_count(&self) -> usize {
        self.strips.len()
    }
}

/// Clear and refill with defaults, within existing capacity
fn reset_scratch<T: Clone + Default>(v: &mut Vec<T>, len: usize) {
    v.clear();
    v.resize(len, T::default());
}

/// Two distinct elements mutably
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
