use parking_lot::RwLock;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::audio_capture::MicCapture;
use crate::config::AppConfig;

/// Mean bin magnitude (byte scale) above which the caller counts as speaking
pub const SPEAKING_THRESHOLD: f32 = 10.0;

/// Level tick period; one UI frame at ~60 Hz
const TICK_INTERVAL_MS: u64 = 16;

/// Amplification applied when scaling magnitudes into byte bins
const BIN_AMPLIFICATION: f32 = 4.0;

/// Live amplitude telemetry exposed to the UI layer.
///
/// Overwritten continuously while connected, reset to zero on cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioLevels {
    /// Normalized amplitude, 0.0 - 1.0
    pub volume: f32,
    /// True while the mean bin magnitude exceeds the speaking threshold
    pub is_speaking: bool,
}

/// Mean magnitude of a frequency-bin snapshot, on the 0-255 byte scale.
pub fn mean_magnitude(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
}

/// Derive amplitude and speaking flag from a frequency-bin snapshot.
pub fn levels_from_bins(bins: &[u8]) -> AudioLevels {
    let mean = mean_magnitude(bins);
    AudioLevels {
        volume: mean / 255.0,
        is_speaking: mean > SPEAKING_THRESHOLD,
    }
}

/// Frequency-domain analyzer for captured microphone frames.
///
/// Applies a Hann window for better frequency resolution, runs the FFT and
/// scales the first half of the spectrum into byte bins.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();
        Self {
            fft,
            fft_size,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    /// Produce a byte-scale frequency-bin snapshot from one capture frame.
    ///
    /// Input shorter than the FFT size is zero-padded, longer input is
    /// truncated. Returns `fft_size / 2` bins.
    pub fn analyze(&mut self, samples: &[f32]) -> Vec<u8> {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let scale = BIN_AMPLIFICATION * 255.0 / (self.fft_size as f32 / 2.0);
        self.buffer[..self.fft_size / 2]
            .iter()
            .map(|c| (c.norm() * scale).min(255.0) as u8)
            .collect()
    }
}

/// The audio pipeline handles, owned as a group.
///
/// Capture stream, FFT feeder task and level tick task are created together
/// and released together. Teardown never short-circuits: the tick is cancelled
/// first, then the feeder, then the capture stream is closed and the telemetry
/// reset, regardless of which steps had anything left to do.
pub struct AudioPipeline {
    capture: MicCapture,
    running: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
    tick: Option<JoinHandle<()>>,
    bins: Arc<RwLock<Vec<u8>>>,
    levels: Arc<RwLock<AudioLevels>>,
}

impl AudioPipeline {
    /// Acquire the microphone and start the analysis loop.
    ///
    /// The tick task is self-rescheduling: each tick reads the latest bin
    /// snapshot, recomputes the mean, and publishes volume plus speaking flag.
    /// It has no termination condition other than the running flag, so
    /// `teardown` must always run.
    pub fn start(
        config: &AppConfig,
        levels: Arc<RwLock<AudioLevels>>,
    ) -> Result<Self, anyhow::Error> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel::<Vec<f32>>(10);

        let mut capture = MicCapture::new();
        capture.start(tx, running.clone(), config)?;

        let bins: Arc<RwLock<Vec<u8>>> = Arc::new(RwLock::new(Vec::new()));

        let feeder_bins = bins.clone();
        let feeder_running = running.clone();
        let fft_size = config.fft_size;
        let feeder = tokio::spawn(async move {
            let mut analyzer = SpectrumAnalyzer::new(fft_size);
            while feeder_running.load(Ordering::Relaxed) {
                match rx.recv().await {
                    Some(samples) => {
                        *feeder_bins.write() = analyzer.analyze(&samples);
                    }
                    None => break,
                }
            }
        });

        let tick_bins = bins.clone();
        let tick_levels = levels.clone();
        let tick_running = running.clone();
        let tick = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
            while tick_running.load(Ordering::Relaxed) {
                interval.tick().await;
                let computed = levels_from_bins(&tick_bins.read());
                let mut current = tick_levels.write();
                if *current != computed {
                    *current = computed;
                }
            }
        });

        Ok(Self {
            capture,
            running,
            feeder: Some(feeder),
            tick: Some(tick),
            bins,
            levels,
        })
    }

    /// Release every handle in the group. Idempotent.
    pub fn teardown(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        // Cancel the scheduled tick before releasing what it reads.
        if let Some(handle) = self.tick.take() {
            handle.abort();
        }
        if let Some(handle) = self.feeder.take() {
            handle.abort();
        }

        self.capture.stop();
        self.bins.write().clear();
        *self.levels.write() = AudioLevels::default();
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_snapshot_is_zero() {
        assert_eq!(mean_magnitude(&[]), 0.0);
        let levels = levels_from_bins(&[]);
        assert_eq!(levels.volume, 0.0);
        assert!(!levels.is_speaking);
    }

    #[test]
    fn volume_is_mean_over_255() {
        let bins = vec![100u8; 64];
        let levels = levels_from_bins(&bins);
        assert!((levels.volume - 100.0 / 255.0).abs() < f32::EPSILON);
        assert!(levels.is_speaking);
    }

    #[test]
    fn speaking_threshold_is_strict() {
        // Exactly at the threshold does not count as speaking.
        assert!(!levels_from_bins(&[10u8; 32]).is_speaking);
        assert!(levels_from_bins(&[11u8; 32]).is_speaking);
    }

    #[test]
    fn analyzer_emits_half_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new(512);
        let bins = analyzer.analyze(&vec![0.0f32; 1024]);
        assert_eq!(bins.len(), 256);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn analyzer_sees_a_tone() {
        let mut analyzer = SpectrumAnalyzer::new(512);
        // 16 cycles across the window lands in bin 16.
        let samples: Vec<f32> = (0..512)
            .map(|i| (2.0 * std::f32::consts::PI * 16.0 * i as f32 / 512.0).sin())
            .collect();
        let bins = analyzer.analyze(&samples);
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 16);
        assert!(bins[16] > 0);
    }
}
