//! Channel strips (buses)
//!
//! A channel is a named signal path: it collects the input buffers tagged
//! with its input bus, runs its effect chain, and contributes the result
//! (gain and pan applied) into its output bus or master. Channels that other
//! channels are routed into act as sub-mix buses.

use basedrop::Owned;

use crate::buffer::{AudioBuffer, AudioBufferDesc};
use crate::effect::EffectChain;
use crate::engine::gc::gc_handle;
use crate::engine::latency::DelayLine;
use crate::error::{EngineError, EngineResult};
use crate::types::{db_to_linear, BusTarget, ChannelId, Sample};

/// Valid channel gain range in dB
pub const GAIN_DB_RANGE: (f32, f32) = (-96.0, 24.0);

/// Valid pan range (-1 = hard left, +1 = hard right)
pub const PAN_RANGE: (f32, f32) = (-1.0, 1.0);

/// Parameter indices reported in channel `ParameterOutOfRange` errors
pub const CHANNEL_PARAM_GAIN: usize = 0;
pub const CHANNEL_PARAM_PAN: usize = 1;

fn check_range(index: usize, value: f32, (min, max): (f32, f32)) -> EngineResult<f32> {
    if value.is_nan() || value < min || value > max {
        Err(EngineError::ParameterOutOfRange { index, value, min, max })
    } else {
        Ok(value)
    }
}

/// Reject gains outside [`GAIN_DB_RANGE`]
pub fn validate_gain_db(db: f32) -> EngineResult<f32> {
    check_range(CHANNEL_PARAM_GAIN, db, GAIN_DB_RANGE)
}

/// Reject pan positions outside [`PAN_RANGE`]
pub fn validate_pan(pan: f32) -> EngineResult<f32> {
    check_range(CHANNEL_PARAM_PAN, pan, PAN_RANGE)
}

/// Equal-power pan law, returns `(left_gain, right_gain)`
///
/// The pan position maps linearly onto an angle in [0, π/2]; the gains are
/// its cosine and sine, so `left² + right² = 1` everywhere.
#[inline]
pub fn pan_law(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Sum `src` into `dst` at unity gain, adapting the channel count
///
/// Equal widths add channel by channel, a mono source is copied to every
/// destination channel, a mono destination receives the average of the
/// source channels. Otherwise the common channels are added.
pub fn accumulate(src: &AudioBuffer, dst: &mut AudioBuffer) {
    let frames = src.frames().min(dst.frames());
    let (src_ch, dst_ch) = (src.channels(), dst.channels());
    for frame in 0..frames {
        if dst_ch == 1 && src_ch > 1 {
            let sum: Sample = (0..src_ch).map(|ch| src.get(frame, ch)).sum();
            let idx = dst.index(frame, 0);
            dst.samples_mut()[idx] += sum / src_ch as Sample;
        } else if src_ch == 1 {
            let s = src.get(frame, 0);
            for ch in 0..dst_ch {
                let idx = dst.index(frame, ch);
                dst.samples_mut()[idx] += s;
            }
        } else {
            for ch in 0..src_ch.min(dst_ch) {
                let idx = dst.index(frame, ch);
                dst.samples_mut()[idx] += src.get(frame, ch);
            }
        }
    }
}

/// Mix a processed channel into its destination with gain and pan
///
/// - mono destination: the source channels are averaged, pan is ignored
/// - mono source: placed between the first two destination channels
/// - wider source: channel 0 takes the left gain, channel 1 the right gain,
///   any further channels pass at unity
pub fn mix_into(src: &AudioBuffer, dst: &mut AudioBuffer, gain: Sample, pan_gains: (Sample, Sample)) {
    let frames = src.frames().min(dst.frames());
    let (src_ch, dst_ch) = (src.channels(), dst.channels());
    let (left, right) = pan_gains;

    for frame in 0..frames {
        if dst_ch == 1 {
            let sum: Sample = (0..src_ch).map(|ch| src.get(frame, ch)).sum();
            let idx = dst.index(frame, 0);
            dst.samples_mut()[idx] += sum / src_ch as Sample * gain;
        } else if src_ch == 1 {
            let s = src.get(frame, 0) * gain;
            let (l, r) = (dst.index(frame, 0), dst.index(frame, 1));
            dst.samples_mut()[l] += s * left;
            dst.samples_mut()[r] += s * right;
        } else {
            for ch in 0..src_ch.min(dst_ch) {
                let pan = match ch {
                    0 => left,
                    1 => right,
                    _ => 1.0,
                };
                let idx = dst.index(frame, ch);
                dst.samples_mut()[idx] += src.get(frame, ch) * gain * pan;
            }
        }
    }
}

/// Creation parameters for a channel
///
/// ```ignore
/// let spec = ChannelSpec::new("vocals")
///     .with_gain_db(-3.0)
///     .with_pan(-0.25)
///     .routed_to("vox-bus");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub name: String,
    /// Channel count; `None` uses the mixer's output channel count
    pub channels: Option<usize>,
    pub gain_db: f32,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    /// Input tag this channel reads; `None` reads inputs tagged with its own name
    pub input_bus: Option<String>,
    /// Destination bus name; `None` feeds master
    pub output_bus: Option<String>,
}

impl ChannelSpec {
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
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_gain_db(mut self, gain_db: f32) -> Self {
        self.gain_db = gain_db;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn muted(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    pub fn soloed(mut self, solo: bool) -> Self {
        self.solo = solo;
        self
    }

    pub fn with_input_bus(mut self, input_bus: impl Into<String>) -> Self {
        self.input_bus = Some(input_bus.into());
        self
    }

    pub fn routed_to(mut self, bus: impl Into<String>) -> Self {
        self.output_bus = Some(bus.into());
        self
    }

    /// Check gain, pan and channel count
    pub fn validate(&self) -> EngineResult<()> {
        validate_gain_db(self.gain_db)?;
        validate_pan(self.pan)?;
        if self.channels == Some(0) {
            return Err(EngineError::InvalidFormat("channel count must be positive"));
        }
        Ok(())
    }

    /// Input tag this channel will read
    pub fn input_tag(&self) -> &str {
        self.input_bus.as_deref().unwrap_or(&self.name)
    }
}

/// A channel strip as owned by the mixer
pub struct Channel {
    id: ChannelId,
    name: String,
    channels: usize,
    gain_db: f32,
    gain: f32,
    pan: f32,
    pan_gains: (f32, f32),
    muted: bool,
    soloed: bool,
    /// Replaced from the audio thread, so the old tag must not be freed there
    input_bus: Owned<String>,
    output: BusTarget,
    chain: EffectChain,
    /// Summing/processing buffer, sized for the largest block
    work: AudioBuffer,
    /// Path latency compensation
    delay: DelayLine,
    /// Audible as of the last routing refresh
    active: bool,
}

impl Channel {
    /// Build a channel from a validated spec
    ///
    /// Allocates; call off the audio thread. `output` is the already
    /// resolved destination of `spec.output_bus`.
    pub fn new(
        id: ChannelId,
        spec: &ChannelSpec,
        channels: usize,
        output: BusTarget,
        sample_rate: u32,
        max_frames: usize,
    ) -> EngineResult<Self> {
        spec.validate()?;
        let work = AudioBuffer::with_capacity(AudioBufferDesc::new(sample_rate, channels, 0), max_frames)?;
        Ok(Self {
            id,
            name: spec.name.clone(),
            channels,
            gain_db: spec.gain_db,
            gain: db_to_linear(spec.gain_db),
            pan: spec.pan,
            pan_gains: pan_law(spec.pan),
            muted: spec.mute,
            soloed: spec.solo,
            input_bus: Owned::new(&gc_handle(), spec.input_tag().to_string()),
            output,
            chain: EffectChain::new(),
            work,
            delay: DelayLine::for_compensation(channels),
            active: true,
        })
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of audio channels this strip carries
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Linear gain derived from [`gain_db`](Self::gain_db)
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn pan_gains(&self) -> (f32, f32) {
        self.pan_gains
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    pub fn input_bus(&self) -> &str {
        &self.input_bus
    }

    pub fn output(&self) -> BusTarget {
        self.output
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain {
        &mut self.chain
    }

    /// Set gain; the value must already be within [`GAIN_DB_RANGE`]
    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain_db = gain_db;
        self.gain = db_to_linear(gain_db);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
        self.pan_gains = pan_law(pan);
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_solo(&mut self, soloed: bool) {
        self.soloed = soloed;
    }

    /// Swap the input tag; the old one is released by the collector
    pub fn set_input_bus(&mut self, tag: Owned<String>) {
        self.input_bus = tag;
    }

    pub fn set_output(&mut self, output: BusTarget) {
        self.output = output;
    }

    /// Reset effect state and the compensation delay
    pub fn reset(&mut self) {
        self.chain.reset();
        self.delay.clear();
    }

    pub(crate) fn work(&self) -> &AudioBuffer {
        &self.work
    }

    pub(crate) fn work_mut(&mut self) -> &mut AudioBuffer {
        &mut self.work
    }

    /// Prepare the work buffer for a block of `frames`
    pub(crate) fn begin_block(&mut self, frames: usize) -> EngineResult<()> {
        self.work.set_frames(frames)
    }

    /// Run the chain over the summed input
    ///
    /// Returns true when the path produced a fault (an effect error or a
    /// non-finite sample); the faulty output is replaced with silence.
    pub(crate) fn process(&mut self, time: f64, compensate: bool) -> bool {
        let mut fault = false;
        if self.chain.process(&mut self.work, time).is_err() {
            self.work.clear();
            fault = true;
        }
        if self.work.sanitize() {
            fault = true;
        }
        if compensate {
            self.delay.process(&mut self.work);
        }
        fault
    }

    /// Record whether the strip is audible
    ///
    /// An inactive strip skips processing, so its delay line still holds
    /// audio from before it went quiet; that is dropped when it comes back.
    pub(crate) fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.delay.clear();
        }
        self.active = active;
    }

    /// Apply a compensation delay; returns false if it had to be clamped
    pub(crate) fn set_compensation(&mut self, frames: usize) -> bool {
        self.delay.set_delay(frames)
    }

    pub fn compensation_frames(&self) -> usize {
        self.delay.delay()
    }

    /// Add this channel's processed output into `dst`
    pub(crate) fn contribute(&self, dst: &mut AudioBuffer) {
        mix_into(&self.work, dst, self.gain, self.pan_gains);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("gain_db", &self.gain_db)
            .field("pan", &self.pan)
            .field("muted", &self.muted)
            .field("soloed", &self.soloed)
            .field("input_bus", &*self.input_bus)
            .field("output", &self.output)
            .field("chain", &self.chain)
            .finish()
    }
}
