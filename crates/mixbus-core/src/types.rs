//! Common types for mixbus
//!
//! Fundamental audio types shared by every engine component: sample formats,
//! channel layouts, quality tiers and the identifiers used to address
//! channels and buses.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Default sample rate (48kHz - standard professional audio rate)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Maximum number of frames any buffer in the processing path can hold.
/// Every real-time buffer is pre-allocated to this size.
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Maximum latency for path compensation (in frames)
/// 100ms at 44.1kHz = 4410 frames
pub const MAX_LATENCY_FRAMES: usize = 4410;

/// Name reserved for the master bus
pub const MASTER_BUS_NAME: &str = "master";

/// Audio sample type used for all internal processing
pub type Sample = f32;

/// Externally negotiated sample format
///
/// Processing always happens in 32-bit float; the format only matters when
/// a buffer crosses the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    I16,
    I24,
    I32,
    #[default]
    F32,
    F64,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn sample_size(&self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 => 4,
            SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    /// Bit depth as reported to WAV writers and device layers
    pub fn bits(&self) -> u16 {
        (self.sample_size() * 8) as u16
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::F64)
    }
}

/// Speaker layout tag carried alongside the channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
    /// Left, right, center
    StereoCenter,
    Quad,
    Surround51,
    Surround71,
    /// Any other arrangement; only the channel count is meaningful
    Custom,
}

impl ChannelLayout {
    /// Channel count implied by the layout (`None` for custom layouts)
    pub fn channel_count(&self) -> Option<usize> {
        match self {
            ChannelLayout::Mono => Some(1),
            ChannelLayout::Stereo => Some(2),
            ChannelLayout::StereoCenter => Some(3),
            ChannelLayout::Quad => Some(4),
            ChannelLayout::Surround51 => Some(6),
            ChannelLayout::Surround71 => Some(8),
            ChannelLayout::Custom => None,
        }
    }

    /// Pick the canonical layout for a channel count
    pub fn for_channels(channels: usize) -> Self {
        match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            3 => ChannelLayout::StereoCenter,
            4 => ChannelLayout::Quad,
            6 => ChannelLayout::Surround51,
            8 => ChannelLayout::Surround71,
            _ => ChannelLayout::Custom,
        }
    }
}

/// DSP quality tier
///
/// Selects the default sample rate and bit depth of the output format.
/// Algorithms behave identically in every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DspQuality {
    /// 44.1kHz / 16-bit, for previews
    Draft,
    /// 48kHz / 32-bit float
    #[default]
    Standard,
    /// 96kHz / 32-bit float
    High,
}

impl DspQuality {
    pub fn default_sample_rate(&self) -> u32 {
        match self {
            DspQuality::Draft => 44100,
            DspQuality::Standard => DEFAULT_SAMPLE_RATE,
            DspQuality::High => 96000,
        }
    }

    pub fn default_format(&self) -> SampleFormat {
        match self {
            DspQuality::Draft => SampleFormat::I16,
            DspQuality::Standard | DspQuality::High => SampleFormat::F32,
        }
    }
}

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(1);

/// Stable numeric identity of a mixer channel
///
/// Names are for people; ids are what travels across the lock-free command
/// queue so the audio thread never touches strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a channel's output (or an effect chain) lives in the bus graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BusTarget {
    #[default]
    Master,
    Channel(ChannelId),
}

/// Convert decibels to a linear amplitude factor
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels (floored at -200 dB)
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.abs().max(1e-10).log10()
}
