//! Audio buffers
//!
//! [`AudioBuffer`] is the fixed-shape block of multi-channel samples every
//! other component operates on. Samples are always held as 32-bit floats;
//! the negotiated [`SampleFormat`] only matters at the engine boundary
//! (see [`format`]).
//!
//! Buffers used on the audio thread are allocated once with a frame
//! capacity and then re-shaped with [`AudioBuffer::set_frames`], which never
//! allocates.

pub mod format;
pub mod resample;

pub use resample::Resampler;

use std::iter::StepBy;
use std::slice::{Iter, IterMut};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{ChannelLayout, DspQuality, Sample, SampleFormat, DEFAULT_SAMPLE_RATE};

/// Shape and format of an audio buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioBufferDesc {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: usize,
    /// Externally negotiated sample format
    pub format: SampleFormat,
    /// Speaker layout tag
    pub layout: ChannelLayout,
    /// Number of sample-frames (one sample per channel)
    pub frames: usize,
    /// Interleaved (channel-minor) when true, planar (channel-major) when false
    pub interleaved: bool,
}

impl Default for AudioBufferDesc {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, 2, 0)
    }
}

impl AudioBufferDesc {
    /// Interleaved 32-bit float description with the canonical layout for `channels`
    pub fn new(sample_rate: u32, channels: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            format: SampleFormat::F32,
            layout: ChannelLayout::for_channels(channels),
            frames,
            interleaved: true,
        }
    }

    /// Default description for a quality tier
    pub fn for_quality(quality: DspQuality, channels: usize, frames: usize) -> Self {
        Self::new(quality.default_sample_rate(), channels, frames).with_format(quality.default_format())
    }

    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    /// Check the description and return the storage size in bytes
    ///
    /// `storage size == frames × channels × sample_size`
    pub fn storage_size(&self) -> EngineResult<usize> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidFormat("sample rate must be positive"));
        }
        if self.channels == 0 {
            return Err(EngineError::InvalidFormat("channel count must be positive"));
        }
        if let Some(expected) = self.layout.channel_count() {
            if expected != self.channels {
                return Err(EngineError::InvalidFormat("layout does not match channel count"));
            }
        }
        self.frames
            .checked_mul(self.channels)
            .and_then(|n| n.checked_mul(self.format.sample_size()))
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or(EngineError::InvalidFormat("storage size overflows"))
    }

    /// Validate without caring about the size
    pub fn validate(&self) -> EngineResult<()> {
        self.storage_size().map(|_| ())
    }

    /// Same channel count and frame count
    pub fn same_shape(&self, other: &AudioBufferDesc) -> bool {
        self.channels == other.channels && self.frames == other.frames
    }

    /// Duration of `frames` at this rate, in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// A block of multi-channel audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    desc: AudioBufferDesc,
    data: Vec<Sample>,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self {
            desc: AudioBufferDesc::default(),
            data: Vec::new(),
        }
    }
}

impl AudioBuffer {
    /// Allocate a silent buffer for `desc`
    pub fn allocate(desc: AudioBufferDesc) -> EngineResult<Self> {
        Self::with_capacity(desc, desc.frames)
    }

    /// Allocate a silent buffer able to hold up to `max_frames` frames
    ///
    /// The active frame count is `desc.frames`; it can later be changed with
    /// [`set_frames`](Self::set_frames) without reallocating.
    pub fn with_capacity(desc: AudioBufferDesc, max_frames: usize) -> EngineResult<Self> {
        desc.validate()?;
        let max_frames = max_frames.max(desc.frames);
        desc.with_frames(max_frames).validate()?;
        let mut data = Vec::with_capacity(max_frames * desc.channels);
        data.resize(desc.frames * desc.channels, 0.0);
        Ok(Self { desc, data })
    }

    /// Build an interleaved 32-bit float buffer from raw samples
    pub fn from_interleaved(sample_rate: u32, channels: usize, samples: &[Sample]) -> EngineResult<Self> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(EngineError::InvalidFormat("sample count is not a multiple of channel count"));
        }
        let desc = AudioBufferDesc::new(sample_rate, channels, samples.len() / channels);
        desc.validate()?;
        Ok(Self {
            desc,
            data: samples.to_vec(),
        })
    }

    /// Build a buffer holding the same value in every sample
    pub fn constant(desc: AudioBufferDesc, value: Sample) -> EngineResult<Self> {
        let mut buffer = Self::allocate(desc)?;
        buffer.data.fill(value);
        Ok(buffer)
    }

    /// Release the storage; the buffer becomes an empty (zero-frame) buffer.
    /// Calling this more than once is harmless.
    pub fn deallocate(&mut self) {
        self.data = Vec::new();
        self.desc.frames = 0;
    }

    #[inline]
    pub fn desc(&self) -> &AudioBufferDesc {
        &self.desc
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.desc.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.desc.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.desc.frames
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.desc.format
    }

    #[inline]
    pub fn is_interleaved(&self) -> bool {
        self.desc.interleaved
    }

    /// A zero-frame buffer carries no data this cycle
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.desc.frames == 0
    }

    /// Size in bytes of this buffer encoded in its negotiated format
    pub fn storage_size(&self) -> usize {
        self.desc.frames * self.desc.channels * self.desc.format.sample_size()
    }

    /// Maximum frame count reachable without reallocating
    pub fn capacity_frames(&self) -> usize {
        self.data.capacity() / self.desc.channels.max(1)
    }

    /// Change the active frame count within capacity and silence the buffer
    ///
    /// Real-time safe: never allocates. Fails with `FormatMismatch` when
    /// `frames` exceeds the capacity.
    pub fn set_frames(&mut self, frames: usize) -> EngineResult<()> {
        if frames > self.capacity_frames() {
            return Err(EngineError::mismatch(
                (self.desc.channels, self.capacity_frames()),
                (self.desc.channels, frames),
            ));
        }
        self.data.clear();
        self.data.resize(frames * self.desc.channels, 0.0);
        self.desc.frames = frames;
        Ok(())
    }

    /// Silence the buffer
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Position of (frame, channel) in the storage
    #[inline]
    pub fn index(&self, frame: usize, channel: usize) -> usize {
        if self.desc.interleaved {
            frame * self.desc.channels + channel
        } else {
            channel * self.desc.frames + frame
        }
    }

    #[inline]
    pub fn get(&self, frame: usize, channel: usize) -> Sample {
        self.data[self.index(frame, channel)]
    }

    #[inline]
    pub fn set(&mut self, frame: usize, channel: usize, value: Sample) {
        let idx = self.index(frame, channel);
        self.data[idx] = value;
    }

    /// Iterate one channel's samples in frame order
    pub fn channel(&self, channel: usize) -> StepBy<Iter<'_, Sample>> {
        let (start, end, step) = self.channel_span(channel);
        self.data[start..end].iter().step_by(step)
    }

    /// Mutably iterate one channel's samples in frame order
    pub fn channel_mut(&mut self, channel: usize) -> StepBy<IterMut<'_, Sample>> {
        let (start, end, step) = self.channel_span(channel);
        self.data[start..end].iter_mut().step_by(step)
    }

    fn channel_span(&self, channel: usize) -> (usize, usize, usize) {
        let frames = self.desc.frames;
        let channels = self.desc.channels;
        if frames == 0 {
            return (0, 0, 1);
        }
        if self.desc.interleaved {
            (channel, self.data.len(), channels)
        } else {
            (channel * frames, (channel + 1) * frames, 1)
        }
    }

    /// Raw samples in storage order
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.data
    }

    /// Mutable raw samples in storage order
    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.data
    }

    /// Copy `other` into this buffer
    ///
    /// Frame and channel counts must match; memory layouts may differ.
    pub fn copy_from(&mut self, other: &AudioBuffer) -> EngineResult<()> {
        self.check_shape(other)?;
        if self.desc.interleaved == other.desc.interleaved {
            self.data.copy_from_slice(&other.data);
        } else {
            for frame in 0..self.desc.frames {
                for ch in 0..self.desc.channels {
                    self.set(frame, ch, other.get(frame, ch));
                }
            }
        }
        Ok(())
    }

    /// Add `other × gain` into this buffer, sample by sample
    pub fn mix_from(&mut self, other: &AudioBuffer, gain: Sample) -> EngineResult<()> {
        self.check_shape(other)?;
        if self.desc.interleaved == other.desc.interleaved {
            for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
                *dst += *src * gain;
            }
        } else {
            for frame in 0..self.desc.frames {
                for ch in 0..self.desc.channels {
                    let idx = self.index(frame, ch);
                    self.data[idx] += other.get(frame, ch) * gain;
                }
            }
        }
        Ok(())
    }

    /// Scale every sample by `gain`
    pub fn scale(&mut self, gain: Sample) {
        for sample in &mut self.data {
            *sample *= gain;
        }
    }

    /// Peak absolute value over all channels
    pub fn peak(&self) -> Sample {
        self.data.iter().fold(0.0, |acc, s| acc.max(s.abs()))
    }

    /// Replace non-finite samples with silence; true if any were found
    pub fn sanitize(&mut self) -> bool {
        let mut found = false;
        for sample in &mut self.data {
            if !sample.is_finite() {
                *sample = 0.0;
                found = true;
            }
        }
        found
    }

    fn check_shape(&self, other: &AudioBuffer) -> EngineResult<()> {
        if self.desc.same_shape(&other.desc) {
            Ok(())
        } else {
            Err(EngineError::mismatch(
                (self.desc.channels, self.desc.frames),
                (other.desc.channels, other.desc.frames),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(frames: usize) -> AudioBufferDesc {
        AudioBufferDesc::new(48000, 2, frames)
    }

    #[test]
    fn test_allocate_rejects_bad_descriptions() {
        assert!(matches!(
            AudioBuffer::allocate(AudioBufferDesc::new(0, 2, 16)),
            Err(EngineError::InvalidFormat(_))
        ));
        assert!(matches!(
            AudioBuffer::allocate(AudioBufferDesc::new(48000, 0, 16)),
            Err(EngineError::InvalidFormat(_))
        ));
        let huge = AudioBufferDesc::new(48000, 8, usize::MAX / 4);
        assert!(matches!(huge.storage_size(), Err(EngineError::InvalidFormat(_))));
        let wrong_layout = stereo(4).with_layout(ChannelLayout::Surround51);
        assert!(wrong_layout.validate().is_err());
    }

    #[test]
    fn test_storage_size_follows_format() {
        let buffer = AudioBuffer::allocate(stereo(100).with_format(SampleFormat::I24)).unwrap();
        assert_eq!(buffer.storage_size(), 100 * 2 * 3);
        assert_eq!(buffer.desc().storage_size().unwrap(), 600);
    }

    #[test]
    fn test_zero_frame_buffer_is_valid_noop() {
        let mut a = AudioBuffer::allocate(stereo(0)).unwrap();
        let b = AudioBuffer::allocate(stereo(0)).unwrap();
        assert!(a.is_empty());
        a.clear();
        a.mix_from(&b, 0.5).unwrap();
        a.copy_from(&b).unwrap();
        assert_eq!(a.channel(1).count(), 0);
        assert_eq!(a.peak(), 0.0);
    }

    #[test]
    fn test_deallocate_is_idempotent() {
        let mut buffer = AudioBuffer::allocate(stereo(64)).unwrap();
        buffer.deallocate();
        buffer.deallocate();
        assert!(buffer.is_empty());
        assert_eq!(buffer.storage_size(), 0);
    }

    #[test]
    fn test_copy_and_mix_check_shape() {
        let mut a = AudioBuffer::allocate(stereo(4)).unwrap();
        let b = AudioBuffer::allocate(stereo(8)).unwrap();
        assert!(matches!(a.copy_from(&b), Err(EngineError::FormatMismatch { .. })));
        assert!(matches!(a.mix_from(&b, 1.0), Err(EngineError::FormatMismatch { .. })));
    }

    #[test]
    fn test_mix_from_scales_and_adds() {
        let mut a = AudioBuffer::constant(stereo(4), 0.5).unwrap();
        let b = AudioBuffer::constant(stereo(4), 1.0).unwrap();
        a.mix_from(&b, 0.25).unwrap();
        assert!(a.samples().iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_copy_between_layouts() {
        let interleaved = AudioBuffer::from_interleaved(48000, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mut planar = AudioBuffer::allocate(stereo(3).with_interleaved(false)).unwrap();
        planar.copy_from(&interleaved).unwrap();
        assert_eq!(planar.samples(), &[1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
        assert_eq!(planar.channel(1).copied().collect::<Vec<_>>(), vec![2.0, 4.0, 6.0]);
        assert_eq!(interleaved.channel(1).copied().collect::<Vec<_>>(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_set_frames_stays_within_capacity() {
        let mut buffer = AudioBuffer::with_capacity(stereo(16), 256).unwrap();
        assert_eq!(buffer.capacity_frames(), 256);
        buffer.set_frames(200).unwrap();
        assert_eq!(buffer.frames(), 200);
        assert_eq!(buffer.samples().len(), 400);
        assert!(buffer.set_frames(257).is_err());
    }

    #[test]
    fn test_sanitize_replaces_non_finite() {
        let mut buffer = AudioBuffer::from_interleaved(48000, 1, &[0.5, f32::NAN, f32::INFINITY]).unwrap();
        assert!(buffer.sanitize());
        assert_eq!(buffer.samples(), &[0.5, 0.0, 0.0]);
        assert!(!buffer.sanitize());
    }
}
