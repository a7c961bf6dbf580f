use portaudio as pa;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::AppConfig;

/// Microphone capture for the live voice session.
///
/// Opens a non-blocking PortAudio input stream and forwards mono f32 frames
/// to the level analyzer over a channel. The stream is owned here and only
/// here; `stop` (and `Drop`) close it so no audio hardware handle can outlive
/// the session that created it.
pub struct MicCapture {
    stream: Option<pa::Stream<pa::NonBlocking, pa::Input<f32>>>,
}

impl MicCapture {
    pub fn new() -> Self {
        Self { stream: None }
    }

    /// Starts capturing from the default input device.
    ///
    /// Frames are forwarded only while `running` is true; the callback asks
    /// PortAudio to complete once the flag drops. Failure here means the
    /// device is missing or permission was denied, which the session reports
    /// as a media access error.
    pub fn start(
        &mut self,
        tx: mpsc::Sender<Vec<f32>>,
        running: Arc<AtomicBool>,
        config: &AppConfig,
    ) -> Result<(), anyhow::Error> {
        let pa = pa::PortAudio::new()
            .map_err(|e| anyhow::anyhow!("Failed to initialize PortAudio: {}", e))?;

        let input_params = pa
            .default_input_stream_params::<f32>(1)
            .map_err(|e| anyhow::anyhow!("No default input device: {}", e))?;
        let settings = pa::InputStreamSettings::new(
            input_params,
            config.sample_rate as f64,
            config.buffer_size as u32,
        );

        let callback = move |pa::InputStreamCallbackArgs { buffer, .. }| {
            if running.load(Ordering::Relaxed) {
                // Dropping a frame under backpressure is fine; the analyzer
                // only ever wants the most recent snapshot.
                let _ = tx.try_send(buffer.to_vec());
                pa::Continue
            } else {
                pa::Complete
            }
        };

        let mut stream = pa
            .open_non_blocking_stream(settings, callback)
            .map_err(|e| anyhow::anyhow!("Failed to open input stream: {}", e))?;

        stream
            .start()
            .map_err(|e| anyhow::anyhow!("Failed to start input stream: {}", e))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Stops and closes the capture stream, releasing the audio device.
    ///
    /// Safe to call repeatedly; close errors are logged, never propagated, so
    /// the rest of the teardown always proceeds.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                tracing::warn!("Failed to stop capture stream: {}", e);
            }
            if let Err(e) = stream.close() {
                tracing::warn!("Failed to close capture stream: {}", e);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
