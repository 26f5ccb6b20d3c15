//! Configuration for the mixbus engine and tools
//!
//! - Engine configuration (output format, pre-allocation limits)
//! - Generic YAML loading/saving shared by the engine and the renderer
//!
//! # Usage
//!
//! ```ignore
//! use mixbus_core::config::{load_config, save_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&config_path);
//! save_config(&config, &config_path)?;
//! ```

mod engine;
mod io;

pub use engine::EngineConfig;
pub use io::{load_config, load_yaml, save_config};
