//! Mixbus Core - real-time mixing and effects engine
//!
//! Buffers and format conversion, DSP effects, named channels routed
//! through sub-mix buses, metering, and a processor façade driven by a
//! lock-free control plane.

pub mod buffer;
pub mod config;
pub mod effect;
pub mod engine;
pub mod error;
pub mod session;
pub mod types;

pub use buffer::{AudioBuffer, AudioBufferDesc};
pub use engine::{AudioProcessor, ChannelInput, ChannelSpec, EngineController, MeterSnapshot};
pub use error::{EngineError, EngineResult};
pub use session::SessionSnapshot;
pub use types::*;
