use thiserror::Error;

/// Errors surfaced by the voice session connector.
///
/// Every failure inside the connect/disconnect lifecycle is normalized to one
/// of these variants, routed to the caller-supplied error callback and
/// reflected in the connection status. Nothing here is returned directly to
/// the UI layer.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A required credential or setting is missing from the environment.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The remote agent service rejected or failed to establish the session.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Microphone permission was denied or no capture device is available.
    #[error("media access failed: {0}")]
    MediaAccess(String),
    /// A mid-session failure reported by the remote or the socket.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Short stable name for logging and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Configuration(_) => "configuration",
            SessionError::Handshake(_) => "handshake",
            SessionError::MediaAccess(_) => "media_access",
            SessionError::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(SessionError::Configuration("x".into()).kind(), "configuration");
        assert_eq!(SessionError::Handshake("x".into()).kind(), "handshake");
        assert_eq!(SessionError::MediaAccess("x".into()).kind(), "media_access");
        assert_eq!(SessionError::Transport("x".into()).kind(), "transport");
    }

    #[test]
    fn display_includes_cause() {
        let e = SessionError::Handshake("server returned 403".into());
        assert_eq!(e.to_string(), "handshake failed: server returned 403");
    }
}
