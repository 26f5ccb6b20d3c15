//! WAV file I/O
//!
//! Decoding to and encoding from engine buffers with `hound`.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::{WavReader, WavSpec, WavWriter};

use mixbus_core::{AudioBuffer, AudioBufferDesc, SampleFormat};

/// Decode a whole WAV file (integer or float) into a float buffer
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = WavReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to decode {:?}", path))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?
        }
    };

    let buffer = AudioBuffer::from_interleaved(spec.sample_rate, spec.channels as usize, &samples)
        .with_context(|| format!("Invalid audio in {:?}", path))?;
    log::debug!(
        "Read {:?}: {} frames, {}ch @ {} Hz",
        path,
        buffer.frames(),
        buffer.channels(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

/// WAV header for an engine output format
///
/// 64-bit float is written as 32-bit float; WAV readers rarely support it.
pub fn wav_spec(desc: &AudioBufferDesc) -> WavSpec {
    let (bits_per_sample, sample_format) = match desc.format {
        SampleFormat::F32 | SampleFormat::F64 => (32, hound::SampleFormat::Float),
        int => (int.bits(), hound::SampleFormat::Int),
    };
    WavSpec {
        channels: desc.channels as u16,
        sample_rate: desc.sample_rate,
        bits_per_sample,
        sample_format,
    }
}

/// Streaming WAV writer fed with processed blocks
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    spec: WavSpec,
    frames: usize,
}

impl WavSink {
    pub fn create(path: &Path, desc: &AudioBufferDesc) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
        let spec = wav_spec(desc);
        let writer =
            WavWriter::create(path, spec).with_context(|| format!("Failed to create {:?}", path))?;
        Ok(Self { writer, spec, frames: 0 })
    }

    /// Append `buffer`, starting at frame `skip`
    pub fn write(&mut self, buffer: &AudioBuffer, skip: usize) -> Result<()> {
        if buffer.channels() != self.spec.channels as usize {
            bail!(
                "Block has {} channel(s), file has {}",
                buffer.channels(),
                self.spec.channels
            );
        }
        let scale = match self.spec.sample_format {
            hound::SampleFormat::Float => None,
            hound::SampleFormat::Int => Some((1u64 << (self.spec.bits_per_sample - 1)) as f32),
        };
        for frame in skip..buffer.frames() {
            for ch in 0..buffer.channels() {
                let sample = buffer.get(frame, ch);
                match scale {
                    None => self.writer.write_sample(sample)?,
                    Some(scale) => {
                        let value = (sample * scale).round().clamp(-scale, scale - 1.0) as i32;
                        self.writer.write_sample(value)?
                    }
                }
            }
        }
        self.frames += buffer.frames().saturating_sub(skip);
        Ok(())
    }

    /// Frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn finalize(self) -> Result<()> {
        self.writer.finalize().context("Failed to finalize WAV file")
    }
}
