//! Audio engine - channels, bus routing, mixer, processor façade
//!
//! - Channel: one strip with gain, pan, mute/solo and an effect chain
//! - Mixer: sums channels through the bus graph into master
//! - Latency compensation across every path into a bus
//! - AudioProcessor / EngineController: the audio-thread and control-thread
//!   halves, joined by a lock-free command queue

mod channel;
mod command;
mod controller;
mod gc;
mod latency;
mod meter;
mod mixer;
mod processor;
mod routing;

pub use channel::*;
pub use command::*;
pub use controller::*;
pub use gc::*;
pub use latency::*;
pub use meter::*;
pub use mixer::*;
pub use processor::*;
pub use routing::*;
