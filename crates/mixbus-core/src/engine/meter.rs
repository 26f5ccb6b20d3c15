//! Output metering
//!
//! The audio thread measures every output block and publishes the results
//! through [`MeterAtomics`]; the control thread reads them lock-free. f32
//! values are stored as their bit patterns in `AtomicU32`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::types::linear_to_db;

/// Lock-free metering state shared between audio and control threads
pub struct MeterAtomics {
    /// Running peak per output channel since the last reset
    peak: Vec<AtomicU32>,
    /// RMS of the most recent block per output channel
    rms: Vec<AtomicU32>,
    /// Sticky: some output sample exceeded full scale
    clipping: AtomicBool,
    /// Sticky: a non-finite sample or effect error was silenced
    fault: AtomicBool,
    /// Commands the audio thread could not apply
    rejected_commands: AtomicU64,
    /// Current path latency in frames
    latency_frames: AtomicUsize,
    blocks_processed: AtomicU64,
    /// Set by the control thread, honoured at the next block
    reset_requested: AtomicBool,
}

impl MeterAtomics {
    pub fn new(channels: usize) -> Self {
        Self {
            peak: (0..channels).map(|_| AtomicU32::new(0)).collect(),
            rms: (0..channels).map(|_| AtomicU32::new(0)).collect(),
            clipping: AtomicBool::new(false),
            fault: AtomicBool::new(false),
            rejected_commands: AtomicU64::new(0),
            latency_frames: AtomicUsize::new(0),
            blocks_processed: AtomicU64::new(0),
            reset_requested: AtomicBool::new(false),
        }
    }

    pub fn channels(&self) -> usize {
        self.peak.len()
    }

    /// Running peak of an output channel (lock-free)
    #[inline]
    pub fn peak(&self, channel: usize) -> f32 {
        self.peak.get(channel).map_or(0.0, |a| f32::from_bits(a.load(Ordering::Relaxed)))
    }

    /// Last block RMS of an output channel (lock-free)
    #[inline]
    pub fn rms(&self, channel: usize) -> f32 {
        self.rms.get(channel).map_or(0.0, |a| f32::from_bits(a.load(Ordering::Relaxed)))
    }

    #[inline]
    pub fn is_clipping(&self) -> bool {
        self.clipping.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn has_fault(&self) -> bool {
        self.fault.load(Ordering::Relaxed)
    }

    pub fn rejected_commands(&self) -> u64 {
        self.rejected_commands.load(Ordering::Relaxed)
    }

    pub fn latency_frames(&self) -> usize {
        self.latency_frames.load(Ordering::Relaxed)
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Ask the audio thread to clear peaks and sticky flags
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Relaxed);
    }

    /// Copy everything into a plain snapshot
    pub fn snapshot(&self) -> MeterSnapshot {
        let channels = self.channels();
        MeterSnapshot {
            peak: (0..channels).map(|ch| self.peak(ch)).collect(),
            rms: (0..channels).map(|ch| self.rms(ch)).collect(),
            clipping: self.is_clipping(),
            fault: self.has_fault(),
            rejected_commands: self.rejected_commands(),
            latency_frames: self.latency_frames(),
            blocks_processed: self.blocks_processed(),
        }
    }
}

/// Point-in-time copy of the meters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterSnapshot {
    pub peak: Vec<f32>,
    pub rms: Vec<f32>,
    pub clipping: bool,
    pub fault: bool,
    pub rejected_commands: u64,
    pub latency_frames: usize,
    pub blocks_processed: u64,
}

impl MeterSnapshot {
    /// Peak of a channel in dBFS
    pub fn peak_db(&self, channel: usize) -> f32 {
        linear_to_db(self.peak.get(channel).copied().unwrap_or(0.0))
    }

    /// Block RMS of a channel in dBFS
    pub fn rms_db(&self, channel: usize) -> f32 {
        linear_to_db(self.rms.get(channel).copied().unwrap_or(0.0))
    }

    /// Highest running peak over all channels
    pub fn max_peak(&self) -> f32 {
        self.peak.iter().fold(0.0, |acc, &p| acc.max(p))
    }
}

/// Audio-thread side of the meters
///
/// Keeps the running values locally and publishes them once per block.
pub struct Meter {
    atomics: Arc<MeterAtomics>,
    peak: Vec<f32>,
    clipping: bool,
    fault: bool,
}

impl Meter {
    pub fn new(channels: usize) -> Self {
        Self {
            atomics: Arc::new(MeterAtomics::new(channels)),
            peak: vec![0.0; channels],
            clipping: false,
            fault: false,
        }
    }

    /// Handle for the control thread
    pub fn atomics(&self) -> Arc<MeterAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Clear peaks and sticky flags (real-time safe)
    pub fn reset(&mut self) {
        self.peak.fill(0.0);
        self.clipping = false;
        self.fault = false;
        self.publish_flags();
        for (ch, &peak) in self.peak.iter().enumerate() {
            self.atomics.peak[ch].store(peak.to_bits(), Ordering::Relaxed);
        }
    }

    /// Honour a reset requested from the control thread
    pub fn poll_reset(&mut self) {
        if self.atomics.reset_requested.swap(false, Ordering::Relaxed) {
            self.reset();
        }
    }

    pub fn count_rejected(&self) {
        self.atomics.rejected_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_fault(&mut self) {
        self.fault = true;
        self.atomics.fault.store(true, Ordering::Relaxed);
    }

    pub fn set_latency(&self, frames: usize) {
        self.atomics.latency_frames.store(frames, Ordering::Relaxed);
    }

    /// Measure one output block
    ///
    /// Peak is a running maximum, RMS covers this block only. Any sample
    /// above full scale latches the clipping flag.
    pub fn update(&mut self, buffer: &AudioBuffer) {
        let frames = buffer.frames();
        let channels = buffer.channels().min(self.peak.len());

        for ch in 0..channels {
            let mut block_peak = 0.0f32;
            let mut sum_sq = 0.0f64;
            for &s in buffer.channel(ch) {
                block_peak = block_peak.max(s.abs());
                sum_sq += (s as f64) * (s as f64);
            }
            if block_peak > 1.0 {
                self.clipping = true;
            }
            self.peak[ch] = self.peak[ch].max(block_peak);
            let rms = if frames > 0 { (sum_sq / frames as f64).sqrt() as f32 } else { 0.0 };

            self.atomics.peak[ch].store(self.peak[ch].to_bits(), Ordering::Relaxed);
            self.atomics.rms[ch].store(rms.to_bits(), Ordering::Relaxed);
        }
        self.publish_flags();
        self.atomics.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        self.atomics.snapshot()
    }

    fn publish_flags(&self) {
        self.atomics.clipping.store(self.clipping, Ordering::Relaxed);
        self.atomics.fault.store(self.fault, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_is_running_rms_is_per_block() {
        let mut meter = Meter::new(2);
        let loud = AudioBuffer::from_interleaved(48000, 2, &[0.8, -0.4, 0.8, -0.4]).unwrap();
        let quiet = AudioBuffer::from_interleaved(48000, 2, &[0.1, 0.1, 0.1, 0.1]).unwrap();

        meter.update(&loud);
        meter.update(&quiet);
        let snap = meter.snapshot();

        assert!((snap.peak[0] - 0.8).abs() < 1e-6, "peak must hold the loud block");
        assert!((snap.peak[1] - 0.4).abs() < 1e-6);
        assert!((snap.rms[0] - 0.1).abs() < 1e-6, "rms must only cover the last block");
        assert!(!snap.clipping);
        assert_eq!(snap.blocks_processed, 2);
    }

    #[test]
    fn test_clipping_is_sticky_until_reset() {
        let mut meter = Meter::new(1);
        meter.update(&AudioBuffer::from_interleaved(48000, 1, &[1.25]).unwrap());
        meter.update(&AudioBuffer::from_interleaved(48000, 1, &[0.0]).unwrap());
        assert!(meter.snapshot().clipping);

        // Exactly full scale is not clipping
        meter.atomics().request_reset();
        meter.poll_reset();
        meter.update(&AudioBuffer::from_interleaved(48000, 1, &[1.0]).unwrap());
        let snap = meter.snapshot();
        assert!(!snap.clipping);
        assert_eq!(snap.peak[0], 1.0);
    }

    #[test]
    fn test_fault_flag() {
        let mut meter = Meter::new(1);
        let atomics = meter.atomics();
        assert!(!atomics.has_fault());
        meter.set_fault();
        assert!(atomics.has_fault());
        meter.reset();
        assert!(!atomics.has_fault());
    }

    #[test]
    fn test_snapshot_db() {
        let snap = MeterSnapshot {
            peak: vec![0.5],
            ..Default::default()
        };
        assert!((snap.peak_db(0) + 6.0206).abs() < 1e-3);
        assert_eq!(snap.max_peak(), 0.5);
    }
}
