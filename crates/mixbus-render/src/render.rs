//! Offline rendering loop
//!
//! Loads the session into a fresh processor, conforms every source to the
//! engine format, then runs `process_frame` block by block into a WAV sink.
//! The output is shifted by the engine's reported latency so it lines up
//! with the sources.

use std::path::Path;

use anyhow::{bail, Context, Result};

use mixbus_core::buffer::Resampler;
use mixbus_core::config::EngineConfig;
use mixbus_core::engine::accumulate;
use mixbus_core::{AudioBuffer, AudioBufferDesc, AudioProcessor, ChannelInput, MeterSnapshot};

use crate::job::RenderJob;
use crate::wav::{read_wav, WavSink};

/// Frames per resampler call when conforming sources
const RESAMPLE_CHUNK: usize = 4096;

/// What a finished render produced
#[derive(Debug, Clone)]
pub struct RenderSummary {
    pub frames: usize,
    pub sample_rate: u32,
    pub latency_frames: usize,
    pub meters: MeterSnapshot,
}

impl RenderSummary {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// A source converted to the engine rate and its readers' width
struct Source {
    tag: String,
    audio: AudioBuffer,
    /// Per-block view, reused every block
    block: AudioBuffer,
}

/// Render `job` into `out`
pub fn render(job: &RenderJob, config: EngineConfig, block_frames: usize, out: &Path) -> Result<RenderSummary> {
    if block_frames == 0 || block_frames > config.max_block_frames {
        bail!(
            "Block size {} outside 1..={} (max_block_frames)",
            block_frames,
            config.max_block_frames
        );
    }
    let mut processor = AudioProcessor::new(config);
    let format = processor.output_format();
    let controller = processor.initialize(format)?;

    // Single-threaded host: configure the mixer directly
    let mixer = processor.mixer_mut()?;
    mixer.restore(&job.session).context("Failed to restore session")?;
    for ir in &job.impulse_responses {
        let impulse = read_wav(&ir.path)?;
        let impulse = conform_rate(impulse, format.sample_rate)?;
        mixer
            .load_impulse_response(&ir.channel, ir.effect, &impulse)
            .with_context(|| format!("Failed to load impulse response {:?}", ir.path))?;
    }
    let latency = mixer.latency_frames();

    let mut sources = Vec::with_capacity(job.sources.len());
    for spec in &job.sources {
        let Some(width) = job.input_width(&spec.tag, format.channels) else {
            log::warn!("No channel reads '{}'; skipping {:?}", spec.tag, spec.path);
            continue;
        };
        let audio = read_wav(&spec.path)?;
        let audio = conform_width(conform_rate(audio, format.sample_rate)?, width)?;
        let block = AudioBuffer::with_capacity(AudioBufferDesc::new(format.sample_rate, width, 0), block_frames)?;
        sources.push(Source {
            tag: spec.tag.clone(),
            audio,
            block,
        });
    }

    let longest = sources.iter().map(|s| s.audio.frames()).max().unwrap_or(0);
    let tail = (job.tail_secs.max(0.0) as f64 * format.sample_rate as f64).round() as usize;
    let total = longest + tail + latency;
    log::info!(
        "Rendering {} source(s): {} frames + {} tail + {} latency, {}-frame blocks",
        sources.len(),
        longest,
        tail,
        latency,
        block_frames
    );

    let mut sink = WavSink::create(out, &format)?;
    let mut position = 0;
    while position < total {
        let frames = block_frames.min(total - position);
        for source in sources.iter_mut() {
            fill_block(&source.audio, position, frames, &mut source.block)?;
        }
        let inputs: Vec<ChannelInput<'_>> = sources
            .iter()
            .map(|s| ChannelInput::new(&s.tag, &s.block))
            .collect();

        let time = position as f64 / format.sample_rate as f64;
        let output = processor.process_frame(&inputs, frames, time)?;
        let skip = latency.saturating_sub(position).min(frames);
        sink.write(output, skip)?;
        position += frames;
    }

    let frames = sink.frames();
    sink.finalize()?;
    let summary = RenderSummary {
        frames,
        sample_rate: format.sample_rate,
        latency_frames: latency,
        meters: controller.meters(),
    };
    processor.shutdown()?;
    Ok(summary)
}

/// Copy `frames` frames of `audio` starting at `start` into `block`, silence past the end
fn fill_block(audio: &AudioBuffer, start: usize, frames: usize, block: &mut AudioBuffer) -> Result<()> {
    block.set_frames(frames)?;
    let available = audio.frames().saturating_sub(start).min(frames);
    for frame in 0..available {
        for ch in 0..block.channels() {
            block.set(frame, ch, audio.get(start + frame, ch));
        }
    }
    Ok(())
}

/// Convert to `rate` with the streaming resampler
fn conform_rate(audio: AudioBuffer, rate: u32) -> Result<AudioBuffer> {
    if audio.sample_rate() == rate {
        return Ok(audio);
    }
    let channels = audio.channels();
    let mut resampler = Resampler::new(audio.sample_rate(), rate, channels)?;
    let chunk_desc = AudioBufferDesc::new(audio.sample_rate(), channels, 0);
    let mut chunk = AudioBuffer::with_capacity(chunk_desc, RESAMPLE_CHUNK)?;
    let out_capacity = resampler.output_frames(RESAMPLE_CHUNK) + 1;
    let mut converted = AudioBuffer::with_capacity(AudioBufferDesc::new(rate, channels, 0), out_capacity)?;

    let mut samples = Vec::with_capacity(resampler.output_frames(audio.frames()) * channels);
    let mut start = 0;
    while start < audio.frames() {
        let frames = RESAMPLE_CHUNK.min(audio.frames() - start);
        fill_block(&audio, start, frames, &mut chunk)?;
        resampler.process(&chunk, &mut converted)?;
        for frame in 0..converted.frames() {
            samples.extend((0..channels).map(|ch| converted.get(frame, ch)));
        }
        start += frames;
    }
    log::info!(
        "Resampled {} Hz -> {} Hz ({} -> {} frames)",
        audio.sample_rate(),
        rate,
        audio.frames(),
        samples.len() / channels
    );
    Ok(AudioBuffer::from_interleaved(rate, channels, &samples)?)
}

/// Adapt the channel count: mono is spread, anything to mono is averaged
fn conform_width(audio: AudioBuffer, width: usize) -> Result<AudioBuffer> {
    if audio.channels() == width {
        return Ok(audio);
    }
    let desc = AudioBufferDesc::new(audio.sample_rate(), width, audio.frames());
    let mut adapted = AudioBuffer::allocate(desc)?;
    accumulate(&audio, &mut adapted);
    Ok(adapted)
}
