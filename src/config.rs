use serde::{Deserialize, Serialize};

/// Environment variable holding the agent service API key.
///
/// The key is resolved lazily at connect time so a missing credential is a
/// reportable session error rather than a startup failure.
pub const API_KEY_ENV: &str = "TAVOLO_AGENT_API_KEY";

/// Configuration for the lead intake HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadServerConfig {
    /// Address the lead API binds to
    pub bind_addr: String,
    /// Path to the SQLite database file
    pub database_path: String,
    /// Automation tool webhook, forwarded to best-effort
    pub automation_webhook_url: Option<String>,
    /// CRM webhook, forwarded to best-effort
    pub crm_webhook_url: Option<String>,
}

impl Default for LeadServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            database_path: "tavolo_leads.db".to_string(),
            automation_webhook_url: None,
            crm_webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Websocket endpoint of the conversational agent service
    pub agent_ws_url: String,
    /// API key override; falls back to the TAVOLO_AGENT_API_KEY env var
    pub api_key: Option<String>,
    /// Deadline for the whole connect chain (handshake + metadata)
    pub connect_timeout_secs: u64,
    /// Audio sample rate in Hz used for microphone capture
    pub sample_rate: usize,
    /// Capture block size in samples
    pub buffer_size: usize,
    /// Number of FFT points for the level analyzer
    pub fft_size: usize,
    /// Whether to log periodic call statistics
    pub log_stats_enabled: bool,
    /// File the call statistics reports are appended to
    pub stats_log_path: String,
    /// Lead intake service configuration
    pub lead_server: LeadServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_ws_url: "wss://agents.tavolo.app/v1/conversation".to_string(),
            api_key: None,
            connect_timeout_secs: 15,
            sample_rate: 16000,
            buffer_size: 1024,
            fft_size: 512,
            log_stats_enabled: false,
            stats_log_path: "call_stats.log".to_string(),
            lead_server: LeadServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolve the agent API key from the config override or the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Helper function to read the application configuration
pub fn read_app_config() -> AppConfig {
    match std::fs::read_to_string("config.json") {
        Ok(config_str) => match serde_json::from_str(&config_str) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config.json: {}. Using default configuration.",
                    e
                );
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}
