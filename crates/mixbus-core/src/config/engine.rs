//! Engine configuration
//!
//! Selects the output format (through a DSP quality tier plus optional
//! overrides) and sizes every pre-allocated resource of the real-time path.

use serde::{Deserialize, Serialize};

use crate::buffer::AudioBufferDesc;
use crate::engine::COMMAND_QUEUE_CAPACITY;
use crate::types::{ChannelLayout, DspQuality, SampleFormat, MAX_BLOCK_FRAMES};

/// Engine configuration
///
/// ```yaml
/// quality: High
/// channels: 2
/// max_channels: 32
/// latency_compensation: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// DSP quality tier; picks the default sample rate and bit depth
    /// Default: Standard (48 kHz, 32-bit float)
    pub quality: DspQuality,

    /// Sample rate override in Hz
    pub sample_rate: Option<u32>,

    /// Output sample format override
    pub sample_format: Option<SampleFormat>,

    /// Output channel count
    /// Default: 2
    pub channels: usize,

    /// Speaker layout override (defaults to the canonical layout for `channels`)
    pub layout: Option<ChannelLayout>,

    /// Maximum number of mixer channels
    /// Default: 64
    pub max_channels: usize,

    /// Largest block `process_frame` accepts; every real-time buffer is
    /// allocated to this size up front
    /// Default: 8192
    pub max_block_frames: usize,

    /// Capacity of the control → audio command queue
    /// Default: 1024
    pub command_queue_capacity: usize,

    /// Delay lower-latency paths so everything reaching a bus stays aligned
    /// Default: true
    pub latency_compensation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quality: DspQuality::default(),
            sample_rate: None,
            sample_format: None,
            channels: 2,
            layout: None,
            max_channels: 64,
            max_block_frames: MAX_BLOCK_FRAMES,
            command_queue_capacity: COMMAND_QUEUE_CAPACITY,
            latency_compensation: true,
        }
    }
}

impl EngineConfig {
    /// Effective sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or_else(|| self.quality.default_sample_rate())
    }

    /// Effective output sample format
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format.unwrap_or_else(|| self.quality.default_format())
    }

    /// Output format described by this configuration (zero frames)
    pub fn output_desc(&self) -> AudioBufferDesc {
        let layout = self
            .layout
            .unwrap_or_else(|| ChannelLayout::for_channels(self.channels));
        AudioBufferDesc::new(self.sample_rate(), self.channels, 0)
            .with_format(self.sample_format())
            .with_layout(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        let desc = config.output_desc();
        assert_eq!(desc.sample_rate, 48000);
        assert_eq!(desc.format, SampleFormat::F32);
        assert_eq!(desc.layout, ChannelLayout::Stereo);
        assert_eq!(config.max_channels, 64);
        assert_eq!(config.max_block_frames, 8192);
    }

    #[test]
    fn test_quality_and_overrides() {
        let config = EngineConfig {
            quality: DspQuality::Draft,
            ..Default::default()
        };
        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.sample_format(), SampleFormat::I16);

        let config = EngineConfig {
            quality: DspQuality::High,
            sample_format: Some(SampleFormat::I24),
            channels: 6,
            ..Default::default()
        };
        let desc = config.output_desc();
        assert_eq!(desc.sample_rate, 96000);
        assert_eq!(desc.format, SampleFormat::I24);
        assert_eq!(desc.layout, ChannelLayout::Surround51);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: EngineConfig = serde_yaml::from_str("quality: High\nmax_channels: 8\n").unwrap();
        assert_eq!(config.quality, DspQuality::High);
        assert_eq!(config.max_channels, 8);
        assert_eq!(config.channels, 2);
        assert!(config.latency_compensation);
    }
}
