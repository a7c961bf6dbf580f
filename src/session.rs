use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::audio_levels::{AudioLevels, AudioPipeline};
use crate::call_stats::{CallStats, CallStatsReporter};
use crate::config::{AppConfig, API_KEY_ENV};
use crate::error::SessionError;
use crate::transport::{AgentConnection, AgentEvent, MessageRole};

/// Connection status of the voice session; the single source of truth the UI
/// renders from. Transitions happen only inside the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Per-event callbacks supplied by the caller at connect time.
///
/// All of them are optional; errors raised during the session are routed
/// through `on_error` rather than returned, so the hosting layer never has to
/// handle a fault it did not register for.
#[derive(Default)]
pub struct SessionCallbacks {
    /// Fires once with the conversation id after a successful handshake
    pub on_connect: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Fires once when the session ends, locally or remotely
    pub on_disconnect: Option<Box<dyn Fn() + Send + Sync>>,
    /// Fires for each conversation message the transport delivers
    pub on_message: Option<Box<dyn Fn(MessageRole, &str) + Send + Sync>>,
    /// Fires for every normalized session error
    pub on_error: Option<Box<dyn Fn(&SessionError) + Send + Sync>>,
}

/// Live bidirectional voice conversation with a remote agent.
///
/// Owns the session handle, the audio pipeline and the amplitude telemetry
/// exclusively. Cleanup runs on disconnect, on a remote-initiated end, and on
/// drop, so no exit path leaves a capture stream or analysis tick behind.
pub struct VoiceSession {
    config: AppConfig,
    status: Arc<RwLock<ConnectionStatus>>,
    connection: Arc<Mutex<Option<AgentConnection>>>,
    audio: Arc<Mutex<Option<AudioPipeline>>>,
    levels: Arc<RwLock<AudioLevels>>,
    callbacks: Arc<Mutex<Option<Arc<SessionCallbacks>>>>,
    stats: Arc<Mutex<CallStats>>,
    stats_running: Arc<AtomicBool>,
    event_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    had_session: Arc<AtomicBool>,
}

impl VoiceSession {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            connection: Arc::new(Mutex::new(None)),
            audio: Arc::new(Mutex::new(None)),
            levels: Arc::new(RwLock::new(AudioLevels::default())),
            callbacks: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(CallStats::new())),
            stats_running: Arc::new(AtomicBool::new(false)),
            event_task: Arc::new(Mutex::new(None)),
            had_session: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn levels(&self) -> AudioLevels {
        *self.levels.read()
    }

    pub fn volume(&self) -> f32 {
        self.levels.read().volume
    }

    pub fn is_speaking(&self) -> bool {
        self.levels.read().is_speaking
    }

    pub fn stats(&self) -> CallStats {
        self.stats.lock().clone()
    }

    /// Establish a session with the given agent.
    ///
    /// Duplicate requests while connecting or connected are silently ignored.
    /// Failures (missing credential, handshake, timeout) are surfaced through
    /// `on_error` and the `Error` status, never returned to the caller.
    pub async fn connect(&self, agent_id: &str, callbacks: SessionCallbacks) {
        {
            let mut status = self.status.write();
            match *status {
                ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                    tracing::debug!("Connect ignored; session already {:?}", *status);
                    return;
                }
                _ => *status = ConnectionStatus::Connecting,
            }
        }

        // A session that ended in Error can leave its handle, event loop and
        // audio pipeline behind; clear them before starting over so the old
        // transport cannot feed events into the new session.
        if let Some(handle) = self.event_task.lock().take() {
            handle.abort();
        }
        self.connection.lock().take();
        if let Some(mut pipeline) = self.audio.lock().take() {
            pipeline.teardown();
        }

        let callbacks = Arc::new(callbacks);
        *self.callbacks.lock() = Some(callbacks.clone());

        let Some(api_key) = self.config.resolve_api_key() else {
            self.fail(SessionError::Configuration(format!(
                "{} is not set and no api_key is configured",
                API_KEY_ENV
            )));
            return;
        };

        let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(64);
        let deadline = Duration::from_secs(self.config.connect_timeout_secs);
        let opened = tokio::time::timeout(
            deadline,
            AgentConnection::open(&self.config.agent_ws_url, agent_id, &api_key, event_tx),
        )
        .await;

        let connection = match opened {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                self.fail(e);
                return;
            }
            Err(_) => {
                self.fail(SessionError::Handshake(format!(
                    "no response from agent service within {}s",
                    self.config.connect_timeout_secs
                )));
                return;
            }
        };

        let conversation_id = connection.conversation_id().to_string();
        {
            // A concurrent disconnect may have ended the session while the
            // handshake was in flight; its request wins over ours, so the
            // fresh handle is dropped instead of committed.
            let mut status = self.status.write();
            if *status != ConnectionStatus::Connecting {
                tracing::debug!("Session ended while connecting; discarding handle");
                return;
            }
            *self.connection.lock() = Some(connection);
            *status = ConnectionStatus::Connected;
        }
        self.had_session.store(true, Ordering::Relaxed);
        self.stats.lock().mark_connected();

        if let Some(cb) = &callbacks.on_connect {
            cb(&conversation_id);
        }

        self.spawn_event_loop(event_rx);

        // Local telemetry is optional: a missing microphone degrades the
        // session (volume stays at zero) but the remote conversation stays up.
        match AudioPipeline::start(&self.config, self.levels.clone()) {
            Ok(pipeline) => {
                if self.status() == ConnectionStatus::Connected {
                    *self.audio.lock() = Some(pipeline);
                }
            }
            Err(e) => {
                let err = SessionError::MediaAccess(e.to_string());
                tracing::warn!("{}; continuing without audio telemetry", err);
                if let Some(cb) = &callbacks.on_error {
                    cb(&err);
                }
            }
        }

        if self.config.log_stats_enabled {
            self.stats_running.store(true, Ordering::Relaxed);
            CallStatsReporter::spawn(
                self.stats.clone(),
                self.levels.clone(),
                self.stats_running.clone(),
                self.config.stats_log_path.clone(),
            );
        }
    }

    /// End the session. Idempotent: safe with no active connection.
    ///
    /// Graceful remote termination is best-effort; cleanup runs afterwards
    /// regardless of whether the close handshake succeeded.
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().take();
        if let Some(mut connection) = connection {
            connection.close().await;
        }
        self.cleanup();
    }

    /// Send an out-of-band text update into the live conversation.
    ///
    /// Deliberately lenient: a no-op unless connected, so call sites need no
    /// guards.
    pub fn send_context(&self, text: &str) {
        if self.status() != ConnectionStatus::Connected {
            return;
        }
        let guard = self.connection.lock();
        if let Some(connection) = guard.as_ref() {
            if connection.send_context(text) {
                self.stats.lock().record_context_update();
            } else {
                tracing::warn!("Contextual update dropped; transport busy or gone");
            }
        }
    }

    fn spawn_event_loop(&self, mut events: mpsc::Receiver<AgentEvent>) {
        let status = self.status.clone();
        let connection = self.connection.clone();
        let audio = self.audio.clone();
        let callbacks = self.callbacks.clone();
        let stats = self.stats.clone();
        let stats_running = self.stats_running.clone();
        let had_session = self.had_session.clone();
        let stats_log_path = self.config.stats_log_path.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    AgentEvent::Message { role, text } => {
                        {
                            let mut stats = stats.lock();
                            match role {
                                MessageRole::Agent => stats.record_agent_message(),
                                MessageRole::User => stats.record_user_transcript(),
                            }
                        }
                        let current = callbacks.lock().clone();
                        if let Some(cbs) = current {
                            if let Some(cb) = &cbs.on_message {
                                cb(role, &text);
                            }
                        }
                    }
                    AgentEvent::Error { error } => {
                        tracing::error!("Session error: {}", error);
                        *status.write() = ConnectionStatus::Error;
                        let current = callbacks.lock().clone();
                        if let Some(cbs) = current {
                            if let Some(cb) = &cbs.on_error {
                                cb(&error);
                            }
                        }
                    }
                    AgentEvent::Disconnected { reason } => {
                        tracing::info!("Remote ended the session: {}", reason);
                        connection.lock().take();
                        if let Some(mut pipeline) = audio.lock().take() {
                            pipeline.teardown();
                        }
                        if stats_running.swap(false, Ordering::Relaxed) {
                            stats.lock().log_to_file(&stats_log_path, true);
                        }
                        had_session.store(false, Ordering::Relaxed);
                        *status.write() = ConnectionStatus::Disconnected;
                        let taken = callbacks.lock().take();
                        if let Some(cbs) = taken {
                            if let Some(cb) = &cbs.on_disconnect {
                                cb();
                            }
                        }
                        break;
                    }
                }
            }
        });

        *self.event_task.lock() = Some(handle);
    }

    fn fail(&self, error: SessionError) {
        {
            // A disconnect that raced the connect chain already settled the
            // state; a setup failure after that point is moot.
            let mut status = self.status.write();
            if *status != ConnectionStatus::Connecting {
                return;
            }
            *status = ConnectionStatus::Error;
        }
        tracing::error!("Session setup failed: {}", error);
        let current = self.callbacks.lock().clone();
        if let Some(cbs) = current {
            if let Some(cb) = &cbs.on_error {
                cb(&error);
            }
        }
    }

    /// Release every local resource. Callable any number of times.
    ///
    /// The disconnect callback fires only when a session was actually
    /// established; a failed or abandoned connect has nothing to report.
    fn cleanup(&self) {
        if let Some(handle) = self.event_task.lock().take() {
            handle.abort();
        }
        if let Some(mut pipeline) = self.audio.lock().take() {
            pipeline.teardown();
        }
        if self.stats_running.swap(false, Ordering::Relaxed) {
            self.stats.lock().log_to_file(&self.config.stats_log_path, true);
        }
        *self.status.write() = ConnectionStatus::Disconnected;
        let ended = self.had_session.swap(false, Ordering::Relaxed);
        let taken = self.callbacks.lock().take();
        if ended {
            if let Some(cbs) = taken {
                if let Some(cb) = &cbs.on_disconnect {
                    cb();
                }
            }
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        // Scope exit is an exit path like any other: dropping the connection
        // aborts its pump task, then the usual cleanup runs.
        self.connection.lock().take();
        self.cleanup();
    }
}
