use parking_lot::{Mutex, RwLock};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio_levels::AudioLevels;

const REPORT_INTERVAL_SECS: u64 = 10;

/// Stores statistics about the live voice call
#[derive(Default, Clone)]
pub struct CallStats {
    pub messages_received: usize,
    pub agent_messages: usize,
    pub user_transcripts: usize,
    pub context_updates_sent: usize,
    pub peak_volume: f32,
    connected_at: Option<Instant>,
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    pub fn record_agent_message(&mut self) {
        self.messages_received += 1;
        self.agent_messages += 1;
    }

    pub fn record_user_transcript(&mut self) {
        self.messages_received += 1;
        self.user_transcripts += 1;
    }

    pub fn record_context_update(&mut self) {
        self.context_updates_sent += 1;
    }

    pub fn observe_volume(&mut self, volume: f32) {
        self.peak_volume = self.peak_volume.max(volume);
    }

    pub fn call_duration(&self) -> Duration {
        self.connected_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn report(&self) -> String {
        format!(
            "Call Statistics:\n\
             - Duration: {:.1}s\n\
             - Messages received: {}\n\
             - Agent messages: {}\n\
             - User transcripts: {}\n\
             - Context updates sent: {}\n\
             - Peak volume: {:.3}",
            self.call_duration().as_secs_f32(),
            self.messages_received,
            self.agent_messages,
            self.user_transcripts,
            self.context_updates_sent,
            self.peak_volume,
        )
    }

    /// Logs the statistics to the configured stats file
    pub fn log_to_file(&self, path: &str, is_final: bool) {
        if self.connected_at.is_none() {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let report_type = if is_final {
            "Final Report"
        } else {
            "Periodic Report"
        };
        let file_content = format!("\n--- {} ({}) ---\n{}\n", timestamp, report_type, self.report());

        match OpenOptions::new().append(true).create(true).open(path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", file_content) {
                    tracing::warn!("Failed to write to stats file: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to open stats file: {}", e),
        }
    }
}

/// Periodic reporter for call statistics.
///
/// Samples the live audio levels every second to track the volume peak and
/// writes a report every ten seconds while the session is running.
pub struct CallStatsReporter;

impl CallStatsReporter {
    pub fn spawn(
        stats: Arc<Mutex<CallStats>>,
        levels: Arc<RwLock<AudioLevels>>,
        running: Arc<AtomicBool>,
        log_path: String,
    ) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let mut ticks: u64 = 0;
            while running.load(Ordering::Relaxed) {
                interval.tick().await;
                ticks += 1;

                let volume = levels.read().volume;
                if let Some(mut stats) = stats.try_lock() {
                    stats.observe_volume(volume);
                    if ticks % REPORT_INTERVAL_SECS == 0 {
                        tracing::info!("{}", stats.report());
                        stats.log_to_file(&log_path, false);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut stats = CallStats::new();
        stats.record_agent_message();
        stats.record_agent_message();
        stats.record_user_transcript();
        stats.record_context_update();
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.agent_messages, 2);
        assert_eq!(stats.user_transcripts, 1);
        assert_eq!(stats.context_updates_sent, 1);
    }

    #[test]
    fn peak_volume_never_decreases() {
        let mut stats = CallStats::new();
        stats.observe_volume(0.4);
        stats.observe_volume(0.1);
        assert_eq!(stats.peak_volume, 0.4);
    }

    #[test]
    fn log_file_lands_at_the_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");
        let mut stats = CallStats::new();
        stats.mark_connected();
        stats.log_to_file(path.to_str().unwrap(), true);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Final Report"));
        assert!(content.contains("Call Statistics"));
    }

    #[test]
    fn report_mentions_every_counter() {
        let mut stats = CallStats::new();
        stats.mark_connected();
        stats.record_agent_message();
        let report = stats.report();
        assert!(report.contains("Messages received: 1"));
        assert!(report.contains("Peak volume"));
    }
}
