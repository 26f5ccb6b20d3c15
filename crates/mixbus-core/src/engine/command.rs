//! Lock-free command queue for real-time engine control
//!
//! The control thread sends commands through a lock-free queue and the
//! audio thread applies them at the start of each `process_frame`, so no
//! state ever changes mid-block.
//!
//! # Why Lock-Free?
//!
//! A mutex shared with the audio callback means the callback can stall
//! while the control thread holds it (building a channel, loading an
//! impulse response), and a stalled callback is an audible dropout. With
//! the `rtrb` ring buffer both push and pop are wait-free and O(1), and the
//! buffer is allocated once at startup.
//!
//! # Ownership
//!
//! Heap payloads (new channels, effects, convolvers, input tags) travel as
//! `basedrop::Owned<T>`. Whatever the audio thread replaces or discards is
//! handed to the collector thread instead of being freed in the callback.
//!
//! # Usage
//!
//! ```ignore
//! // At startup
//! let (tx, rx) = command_channel(COMMAND_QUEUE_CAPACITY);
//!
//! // Control thread: send commands (non-blocking)
//! tx.push(EngineCommand::SetChannelMute { id, mute: true })?;
//!
//! // Audio thread: apply pending commands
//! while let Ok(cmd) = rx.pop() {
//!     mixer.apply(cmd);
//! }
//! ```

use basedrop::Owned;

use crate::effect::{BuiltinEffect, Convolver};
use crate::engine::channel::Channel;
use crate::types::{BusTarget, ChannelId};

/// Commands sent from the control thread to the audio thread
///
/// Ids and values have been validated by the sender; the audio thread only
/// re-checks that the addressed channel or effect still exists.
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────
    /// Add a fully built channel
    CreateChannel(Owned<Channel>),
    /// Remove a channel; channels feeding it are re-routed to master
    RemoveChannel(ChannelId),
    SetChannelGain { id: ChannelId, gain_db: f32 },
    SetChannelPan { id: ChannelId, pan: f32 },
    SetChannelMute { id: ChannelId, mute: bool },
    SetChannelSolo { id: ChannelId, solo: bool },
    /// Route a channel's output (cycle-checked by the sender)
    SetOutputBus { id: ChannelId, bus: BusTarget },
    /// Change which input tag a channel reads
    SetInputBus { id: ChannelId, tag: Owned<String> },
    /// Reset effect state and compensation delay of a channel or master
    ResetChannel(BusTarget),
    /// Remove every channel and master effect
    Clear,

    // ─────────────────────────────────────────────────────────────
    // Effect chains
    // ─────────────────────────────────────────────────────────────
    /// Insert a prepared effect (index clamped to the chain length)
    InsertEffect {
        target: BusTarget,
        index: usize,
        effect: Owned<BuiltinEffect>,
    },
    RemoveEffect { target: BusTarget, index: usize },
    MoveEffect { target: BusTarget, from: usize, to: usize },
    SetEffectEnabled {
        target: BusTarget,
        index: usize,
        enabled: bool,
    },
    SetEffectParameter {
        target: BusTarget,
        index: usize,
        param: usize,
        value: f32,
    },
    ResetEffect { target: BusTarget, index: usize },
    /// Install a convolver built from an impulse response into a reverb
    LoadImpulseResponse {
        target: BusTarget,
        index: usize,
        convolver: Owned<Convolver>,
    },

    // ─────────────────────────────────────────────────────────────
    // Master
    // ─────────────────────────────────────────────────────────────
    SetMasterGain(f32),
    /// Copy the first input straight to the output
    SetBypass(bool),
}

/// Capacity of the command queue
///
/// Restoring a session sends one command per channel, effect and
/// parameter in a burst; 1024 leaves room for a few dozen channels with
/// full chains.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Create a new command channel (producer/consumer pair)
///
/// Returns `(Producer, Consumer)` where:
/// - Producer: Send side, owned by the control thread
/// - Consumer: Receive side, owned by the audio thread
pub fn command_channel(capacity: usize) -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_creation() {
        let (mut tx, mut rx) = command_channel(COMMAND_QUEUE_CAPACITY);
        let id = ChannelId(7);

        tx.push(EngineCommand::SetChannelMute { id, mute: true }).ok().unwrap();

        let cmd = rx.pop().ok().unwrap();
        assert!(matches!(cmd, EngineCommand::SetChannelMute { id: ChannelId(7), mute: true }));
    }

    #[test]
    fn test_command_channel_empty() {
        let (_tx, mut rx) = command_channel(4);

        // Empty queue should return error
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_channel_full() {
        let (mut tx, _rx) = command_channel(2);
        assert!(tx.push(EngineCommand::SetBypass(true)).is_ok());
        assert!(tx.push(EngineCommand::SetBypass(false)).is_ok());
        assert!(tx.push(EngineCommand::SetMasterGain(0.0)).is_err());
    }

    #[test]
    fn test_command_size() {
        // Owned payloads are pointer-sized, so the largest variants are the
        // effect addressing ones (target + two indices + value).
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 40, "EngineCommand is {} bytes, expected <= 40", size);
    }
}
