//! Audio processor - the engine façade
//!
//! Owns the negotiated output format, the mixer, the output buffer and the
//! meters, and exposes `process_frame` to the audio I/O layer.
//!
//! Lifecycle: construct → [`initialize`](AudioProcessor::initialize) →
//! `process_frame`... → [`shutdown`](AudioProcessor::shutdown). Initialize
//! returns the [`EngineController`] the control thread uses; everything it
//! sends is applied at the start of the next `process_frame`.

use rtrb::Consumer;

use super::command::{command_channel, EngineCommand};
use super::controller::EngineController;
use super::meter::{Meter, MeterSnapshot};
use super::mixer::{ChannelInput, Mixer};
use crate::buffer::{AudioBuffer, AudioBufferDesc};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::DspQuality;

/// State that only exists between initialize and shutdown
struct Running {
    mixer: Mixer,
    output: AudioBuffer,
    commands: Consumer<EngineCommand>,
    meter: Meter,
}

/// Top-level engine object
pub struct AudioProcessor {
    config: EngineConfig,
    format: AudioBufferDesc,
    running: Option<Running>,
}

impl AudioProcessor {
    pub fn new(config: EngineConfig) -> Self {
        let format = config.output_desc();
        Self {
            config,
            format,
            running: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Negotiated output format (frame count is per call)
    pub fn output_format(&self) -> AudioBufferDesc {
        self.format
    }

    pub fn quality(&self) -> DspQuality {
        self.config.quality
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// Change the output format used by the next `initialize`
    ///
    /// Fails with `ReinitializationRequired` while running: every effect's
    /// state depends on the sample rate.
    pub fn set_output_format(&mut self, format: AudioBufferDesc) -> EngineResult<()> {
        if self.running.is_some() {
            return Err(EngineError::ReinitializationRequired);
        }
        format.validate()?;
        self.format = format.with_frames(0);
        Ok(())
    }

    /// Pick a quality tier; resets the sample rate and format to its defaults
    pub fn set_quality(&mut self, quality: DspQuality) -> EngineResult<()> {
        if self.running.is_some() {
            return Err(EngineError::ReinitializationRequired);
        }
        self.config.quality = quality;
        self.config.sample_rate = None;
        self.config.sample_format = None;
        self.format = AudioBufferDesc::new(quality.default_sample_rate(), self.format.channels, 0)
            .with_format(quality.default_format())
            .with_layout(self.format.layout)
            .with_interleaved(self.format.interleaved);
        Ok(())
    }

    /// Allocate the mixer and output buffer for `format` and start
    ///
    /// Fails with `AlreadyInitialized` until [`shutdown`](Self::shutdown).
    pub fn initialize(&mut self, format: AudioBufferDesc) -> EngineResult<EngineController> {
        if self.running.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        format.validate()?;
        let format = format.with_frames(0);
        let max_frames = self.config.max_block_frames;

        let mixer = Mixer::new(format, max_frames, self.config.max_channels, self.config.latency_compensation)?;
        let output = AudioBuffer::with_capacity(format, max_frames)?;
        let (producer, consumer) = command_channel(self.config.command_queue_capacity);
        let meter = Meter::new(format.channels);
        let controller = EngineController::new(producer, meter.atomics(), format, &self.config);

        log::info!(
            "Audio processor initialized: {} Hz, {}ch, {:?}, {} frames max, {} channels max",
            format.sample_rate,
            format.channels,
            format.format,
            max_frames,
            self.config.max_channels
        );

        self.format = format;
        self.running = Some(Running {
            mixer,
            output,
            commands: consumer,
            meter,
        });
        Ok(controller)
    }

    /// Stop and release everything allocated by `initialize`
    ///
    /// The controller from that call stays valid but its commands go nowhere.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        let running = self.running.take().ok_or(EngineError::NotInitialized)?;
        log::info!(
            "Audio processor shut down after {} block(s)",
            running.meter.snapshot().blocks_processed
        );
        Ok(())
    }

    /// Process one block
    ///
    /// Applies pending control commands, mixes `inputs` into the output,
    /// updates the meters, then converts the output to the negotiated
    /// format. Real-time safe.
    pub fn process_frame(
        &mut self,
        inputs: &[ChannelInput<'_>],
        frame_count: usize,
        time: f64,
    ) -> EngineResult<&AudioBuffer> {
        let running = self.running.as_mut().ok_or(EngineError::NotInitialized)?;

        while let Ok(command) = running.commands.pop() {
            if !running.mixer.apply(command) {
                running.meter.count_rejected();
            }
        }
        running.meter.poll_reset();

        running.output.set_frames(frame_count)?;
        let result = running.mixer.process_buffers(inputs, &mut running.output, time);

        // Meter before quantizing: clipping is judged on the float signal
        running.meter.update(&running.output);
        if running.mixer.take_fault() {
            running.meter.set_fault();
        }
        running.meter.set_latency(running.mixer.latency_frames());
        result?;

        running.output.quantize_in_place();
        Ok(&running.output)
    }

    /// Current meters
    pub fn meters(&self) -> EngineResult<MeterSnapshot> {
        self.running
            .as_ref()
            .map(|r| r.meter.snapshot())
            .ok_or(EngineError::NotInitialized)
    }

    /// Clear peaks and the sticky clipping/fault flags
    pub fn reset_meters(&mut self) -> EngineResult<()> {
        let running = self.running.as_mut().ok_or(EngineError::NotInitialized)?;
        running.meter.reset();
        Ok(())
    }

    /// Latency-compensation offset of the output in frames
    pub fn latency_frames(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.mixer.latency_frames())
    }

    /// Direct mixer access for single-threaded hosts
    ///
    /// Changes made here bypass the controller's mirror; use one or the other.
    pub fn mixer(&self) -> EngineResult<&Mixer> {
        self.running.as_ref().map(|r| &r.mixer).ok_or(EngineError::NotInitialized)
    }

    pub fn mixer_mut(&mut self) -> EngineResult<&mut Mixer> {
        self.running.as_mut().map(|r| &mut r.mixer).ok_or(EngineError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channel::ChannelSpec;
    use crate::types::SampleFormat;

    fn mono_config() -> EngineConfig {
        EngineConfig {
            channels: 1,
            max_block_frames: 512,
            ..Default::default()
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut processor = AudioProcessor::new(EngineConfig::default());
        assert!(matches!(processor.process_frame(&[], 64, 0.0), Err(EngineError::NotInitialized)));
        assert!(matches!(processor.shutdown(), Err(EngineError::NotInitialized)));

        let format = processor.output_format();
        let _controller = processor.initialize(format).unwrap();
        assert!(processor.is_initialized());
        assert!(matches!(processor.initialize(format), Err(EngineError::AlreadyInitialized)));
        assert!(matches!(
            processor.set_output_format(format.with_format(SampleFormat::I16)),
            Err(EngineError::ReinitializationRequired)
        ));
        assert!(matches!(
            processor.set_quality(DspQuality::High),
            Err(EngineError::ReinitializationRequired)
        ));

        processor.shutdown().unwrap();
        processor.set_quality(DspQuality::High).unwrap();
        assert_eq!(processor.output_format().sample_rate, 96000);
        let format = processor.output_format();
        processor.initialize(format).unwrap();
    }

    #[test]
    fn test_invalid_format_rejected() {
        let mut processor = AudioProcessor::new(EngineConfig::default());
        let bad = AudioBufferDesc::new(0, 2, 0);
        assert!(matches!(processor.initialize(bad), Err(EngineError::InvalidFormat(_))));
        assert!(matches!(processor.set_output_format(bad), Err(EngineError::InvalidFormat(_))));
    }

    #[test]
    fn test_two_channel_mix_flags_clipping() {
        let mut processor = AudioProcessor::new(mono_config());
        let format = processor.output_format();
        processor.initialize(format).unwrap();
        let mixer = processor.mixer_mut().unwrap();
        mixer.create_channel(ChannelSpec::new("voice")).unwrap();
        mixer.create_channel(ChannelSpec::new("music").with_gain_db(-12.0)).unwrap();

        let one = AudioBuffer::constant(AudioBufferDesc::new(48000, 1, 1), 1.0).unwrap();
        let inputs = [ChannelInput::new("voice", &one), ChannelInput::new("music", &one)];
        let out = processor.process_frame(&inputs, 1, 0.0).unwrap();
        assert!((out.get(0, 0) - 1.251).abs() < 1e-3);

        let meters = processor.meters().unwrap();
        assert!(meters.clipping, "1.251 exceeds full scale");
        assert!((meters.peak[0] - 1.251).abs() < 1e-3);

        processor.reset_meters().unwrap();
        assert!(!processor.meters().unwrap().clipping);
    }

    #[test]
    fn test_output_is_quantized_after_metering() {
        let config = EngineConfig {
            sample_format: Some(SampleFormat::I16),
            ..mono_config()
        };
        let mut processor = AudioProcessor::new(config);
        let format = processor.output_format();
        processor.initialize(format).unwrap();
        processor.mixer_mut().unwrap().create_channel(ChannelSpec::new("a")).unwrap();

        let input = AudioBuffer::from_interleaved(48000, 1, &[0.1234567, 2.0]).unwrap();
        let out = processor.process_frame(&[ChannelInput::new("a", &input)], 2, 0.0).unwrap();
        let step = 1.0 / 32768.0;
        assert!((out.get(0, 0) - 0.1234567).abs() <= step);
        assert!(out.get(1, 0) <= 1.0, "quantized output is clamped to full scale");
        assert!(processor.meters().unwrap().clipping);
    }

    #[test]
    fn test_block_larger_than_capacity_fails() {
        let mut processor = AudioProcessor::new(mono_config());
        let format = processor.output_format();
        processor.initialize(format).unwrap();
        assert!(matches!(
            processor.process_frame(&[], 4096, 0.0),
            Err(EngineError::FormatMismatch { .. })
        ));
        // Zero frames is a valid no-op block
        assert_eq!(processor.process_frame(&[], 0, 0.0).unwrap().frames(), 0);
    }

    #[test]
    fn test_non_finite_input_sets_fault() {
        let mut processor = AudioProcessor::new(mono_config());
        let format = processor.output_format();
        processor.initialize(format).unwrap();
        processor.mixer_mut().unwrap().create_channel(ChannelSpec::new("a")).unwrap();

        let input = AudioBuffer::from_interleaved(48000, 1, &[f32::NAN, 0.5]).unwrap();
        let out = processor.process_frame(&[ChannelInput::new("a", &input)], 2, 0.0).unwrap();
        assert_eq!(out.get(0, 0), 0.0);
        assert_eq!(out.get(1, 0), 0.5);
        assert!(processor.meters().unwrap().fault);
    }
}
