pub mod audio_capture;
pub mod audio_levels;
pub mod call_stats;
pub mod config;
pub mod error;
pub mod lead_server;
pub mod leads;
pub mod session;
pub mod transport;

// Re-export key components for easier access
pub use audio_levels::{AudioLevels, SPEAKING_THRESHOLD};
pub use config::{read_app_config, AppConfig};
pub use error::SessionError;
pub use leads::LeadSubmission;
pub use session::{ConnectionStatus, SessionCallbacks, VoiceSession};
pub use transport::MessageRole;
