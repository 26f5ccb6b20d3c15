//! Sample format conversion
//!
//! Internally every buffer holds `f32`. Converting to an integer format
//! requantizes the samples in place to the values that format can
//! represent, so that what leaves the engine is exactly what a device or
//! file would store. Float formats are never clamped.

use crate::error::{EngineError, EngineResult};
use crate::types::{Sample, SampleFormat};

use super::{AudioBuffer, AudioBufferDesc};

const I16_SCALE: f64 = 32_768.0;
const I24_SCALE: f64 = 8_388_608.0;
const I32_SCALE: f64 = 2_147_483_648.0;

impl SampleFormat {
    /// Full-scale integer value for integer formats
    fn int_scale(&self) -> Option<f64> {
        match self {
            SampleFormat::I16 => Some(I16_SCALE),
            SampleFormat::I24 => Some(I24_SCALE),
            SampleFormat::I32 => Some(I32_SCALE),
            SampleFormat::F32 | SampleFormat::F64 => None,
        }
    }

    /// Round-trip one sample through this format
    #[inline]
    pub fn quantize(&self, sample: Sample) -> Sample {
        match self.int_scale() {
            Some(scale) => (to_int(sample, scale) as f64 / scale) as Sample,
            None => sample,
        }
    }
}

/// Scale, round and clamp to the integer range of `scale`
#[inline]
fn to_int(sample: Sample, scale: f64) -> i64 {
    let clamped = (sample as f64 * scale).round().clamp(-scale, scale - 1.0);
    clamped as i64
}

impl AudioBuffer {
    /// Requantize to `target` and adopt it as the buffer's format
    pub fn convert_to(&mut self, target: SampleFormat) {
        self.desc.format = target;
        self.quantize_in_place();
    }

    /// Requantize the samples to the buffer's own format
    ///
    /// Real-time safe; this is the last step of every processed block.
    pub fn quantize_in_place(&mut self) {
        let format = self.desc.format;
        if format.is_float() {
            return;
        }
        for sample in &mut self.data {
            *sample = format.quantize(*sample);
        }
    }

    /// Switch between interleaved and planar storage, preserving content
    pub fn convert_to_interleaved(&mut self, interleaved: bool) {
        if self.desc.interleaved == interleaved {
            return;
        }
        let frames = self.desc.frames;
        let channels = self.desc.channels;
        let mut data = Vec::with_capacity(self.data.capacity());
        data.resize(self.data.len(), 0.0);
        for frame in 0..frames {
            for ch in 0..channels {
                let (src, dst) = if interleaved {
                    (ch * frames + frame, frame * channels + ch)
                } else {
                    (frame * channels + ch, ch * frames + frame)
                };
                data[dst] = self.data[src];
            }
        }
        self.data = data;
        self.desc.interleaved = interleaved;
    }

    /// Encode as little-endian PCM in the buffer's format and storage order
    ///
    /// Returns the number of bytes written. `out` must hold at least
    /// [`storage_size`](Self::storage_size) bytes.
    pub fn encode_into(&self, out: &mut [u8]) -> EngineResult<usize> {
        let size = self.storage_size();
        if out.len() < size {
            return Err(EngineError::InvalidFormat("output byte buffer too small"));
        }
        let format = self.desc.format;
        let width = format.sample_size();
        for (sample, bytes) in self.data.iter().zip(out.chunks_exact_mut(width)) {
            match format {
                SampleFormat::I16 => {
                    let v = to_int(*sample, I16_SCALE) as i16;
                    bytes.copy_from_slice(&v.to_le_bytes());
                }
                SampleFormat::I24 => {
                    let v = to_int(*sample, I24_SCALE) as i32;
                    bytes.copy_from_slice(&v.to_le_bytes()[..3]);
                }
                SampleFormat::I32 => {
                    let v = to_int(*sample, I32_SCALE) as i32;
                    bytes.copy_from_slice(&v.to_le_bytes());
                }
                SampleFormat::F32 => bytes.copy_from_slice(&sample.to_le_bytes()),
                SampleFormat::F64 => bytes.copy_from_slice(&(*sample as f64).to_le_bytes()),
            }
        }
        Ok(size)
    }

    /// Decode little-endian PCM laid out as `desc` describes
    pub fn from_bytes(desc: AudioBufferDesc, bytes: &[u8]) -> EngineResult<Self> {
        if desc.storage_size()? != bytes.len() {
            return Err(EngineError::InvalidFormat("byte length does not match description"));
        }
        let mut buffer = AudioBuffer::allocate(desc)?;
        let width = desc.format.sample_size();
        for (sample, b) in buffer.data.iter_mut().zip(bytes.chunks_exact(width)) {
            *sample = match desc.format {
                SampleFormat::I16 => (i16::from_le_bytes([b[0], b[1]]) as f64 / I16_SCALE) as Sample,
                SampleFormat::I24 => {
                    // sign-extend from bit 23
                    let v = i32::from_le_bytes([b[0], b[1], b[2], 0]) << 8 >> 8;
                    (v as f64 / I24_SCALE) as Sample
                }
                SampleFormat::I32 => (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / I32_SCALE) as Sample,
                SampleFormat::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                SampleFormat::F64 => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as Sample,
            };
        }
        Ok(buffer)
    }

    /// Zero-copy view of the internal 32-bit float storage
    pub fn as_f32_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}
