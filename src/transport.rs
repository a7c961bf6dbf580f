use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};

use crate::error::SessionError;

/// Who produced a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Agent,
    User,
}

/// Events the transport delivers to the session, in arrival order.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Message { role: MessageRole, text: String },
    Error { error: SessionError },
    Disconnected { reason: String },
}

/// Commands the session pushes into the pump task.
enum ClientCommand {
    Context(String),
    Close,
}

/// Messages the agent service sends over the socket.
///
/// The wire format is owned by the remote service; unknown types are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConversationInitiationMetadata { conversation_id: String },
    AgentResponse { text: String },
    UserTranscript { text: String },
    Ping { event_id: Option<u64> },
    Error { message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ConversationInitiationClientData,
    ContextualUpdate { text: String },
    Pong { event_id: Option<u64> },
}

fn parse_server_message(raw: &str) -> Option<ServerMessage> {
    match serde_json::from_str(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::debug!("Ignoring unrecognized agent message: {}", e);
            None
        }
    }
}

fn text_frame(msg: &ClientMessage) -> tungstenite::Message {
    // Serializing our own tagged enum cannot fail.
    let json = serde_json::to_string(msg).unwrap_or_default();
    tungstenite::Message::Text(json.into())
}

fn build_ws_request(
    url: &str,
    agent_id: &str,
    api_key: &str,
) -> Result<tungstenite::http::Request<()>, SessionError> {
    let uri = format!("{}?agent_id={}", url, agent_id);
    tungstenite::http::Request::builder()
        .uri(&uri)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Host", host_of(&uri))
        .header("x-api-key", api_key)
        .body(())
        .map_err(|e| SessionError::Handshake(format!("invalid request: {}", e)))
}

fn host_of(uri: &str) -> String {
    uri.split("://")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?']).next())
        .unwrap_or_default()
        .to_string()
}

/// Handle to an open conversation with the remote agent service.
///
/// Owns the outgoing command channel and the pump task that shuttles frames
/// both ways. Exactly one of these exists per connected session; dropping it
/// aborts the pump so the socket can never outlive its owner.
pub struct AgentConnection {
    conversation_id: String,
    commands: mpsc::Sender<ClientCommand>,
    pump: Option<JoinHandle<()>>,
}

impl AgentConnection {
    /// Open the websocket, send the initiation message and wait for the
    /// conversation metadata. The caller applies the overall connect deadline.
    pub async fn open(
        url: &str,
        agent_id: &str,
        api_key: &str,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<Self, SessionError> {
        let request = build_ws_request(url, agent_id, api_key)?;

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        ws_tx
            .send(text_frame(&ClientMessage::ConversationInitiationClientData))
            .await
            .map_err(|e| SessionError::Handshake(format!("init message failed: {}", e)))?;

        // The service may interleave pings before the metadata arrives.
        let conversation_id = loop {
            match ws_rx.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match parse_server_message(text.as_str()) {
                        Some(ServerMessage::ConversationInitiationMetadata {
                            conversation_id,
                        }) => break conversation_id,
                        Some(ServerMessage::Error { message }) => {
                            return Err(SessionError::Handshake(message));
                        }
                        Some(ServerMessage::Ping { event_id }) => {
                            let _ = ws_tx.send(text_frame(&ClientMessage::Pong { event_id })).await;
                        }
                        _ => {}
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    return Err(SessionError::Handshake(
                        "connection closed before metadata".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
            }
        };

        tracing::info!("Agent session established: {}", conversation_id);

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(32);

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ClientCommand::Context(text)) => {
                            if let Err(e) = ws_tx
                                .send(text_frame(&ClientMessage::ContextualUpdate { text }))
                                .await
                            {
                                tracing::warn!("Failed to send contextual update: {}", e);
                            }
                        }
                        // Local close: the session runs its own cleanup, so no
                        // Disconnected event is emitted here.
                        Some(ClientCommand::Close) | None => {
                            let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                            break;
                        }
                    },
                    frame = ws_rx.next() => match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            match parse_server_message(text.as_str()) {
                                Some(ServerMessage::AgentResponse { text }) => {
                                    let _ = events
                                        .send(AgentEvent::Message { role: MessageRole::Agent, text })
                                        .await;
                                }
                                Some(ServerMessage::UserTranscript { text }) => {
                                    let _ = events
                                        .send(AgentEvent::Message { role: MessageRole::User, text })
                                        .await;
                                }
                                Some(ServerMessage::Ping { event_id }) => {
                                    let _ = ws_tx
                                        .send(text_frame(&ClientMessage::Pong { event_id }))
                                        .await;
                                }
                                Some(ServerMessage::Error { message }) => {
                                    let _ = events
                                        .send(AgentEvent::Error {
                                            error: SessionError::Transport(message),
                                        })
                                        .await;
                                }
                                Some(ServerMessage::ConversationInitiationMetadata { .. })
                                | None => {}
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("{} {}", f.code, f.reason))
                                .unwrap_or_else(|| "remote closed".to_string());
                            let _ = events.send(AgentEvent::Disconnected { reason }).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = events
                                .send(AgentEvent::Error {
                                    error: SessionError::Transport(e.to_string()),
                                })
                                .await;
                            let _ = events
                                .send(AgentEvent::Disconnected { reason: e.to_string() })
                                .await;
                            break;
                        }
                        None => {
                            let _ = events
                                .send(AgentEvent::Disconnected {
                                    reason: "stream ended".to_string(),
                                })
                                .await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self {
            conversation_id,
            commands: cmd_tx,
            pump: Some(pump),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Queue an out-of-band contextual update. Returns false if the pump is
    /// gone or saturated; the caller treats that as best-effort.
    pub fn send_context(&self, text: &str) -> bool {
        self.commands
            .try_send(ClientCommand::Context(text.to_string()))
            .is_ok()
    }

    /// Graceful termination: ask the pump to send a close frame, then give it
    /// a short grace period before aborting. Errors are logged, not returned.
    pub async fn close(&mut self) {
        if self.commands.send(ClientCommand::Close).await.is_err() {
            tracing::debug!("Pump already gone during close");
        }
        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut pump)
                .await
                .is_err()
            {
                tracing::warn!("Pump did not finish in time; aborting");
                pump.abort();
            }
        }
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_message() {
        let msg = parse_server_message(
            r#"{"type":"conversation_initiation_metadata","conversation_id":"conv_42"}"#,
        );
        assert!(matches!(
            msg,
            Some(ServerMessage::ConversationInitiationMetadata { conversation_id }) if conversation_id == "conv_42"
        ));
    }

    #[test]
    fn parses_agent_response() {
        let msg = parse_server_message(r#"{"type":"agent_response","text":"Benvenuto!"}"#);
        assert!(matches!(
            msg,
            Some(ServerMessage::AgentResponse { text }) if text == "Benvenuto!"
        ));
    }

    #[test]
    fn unknown_types_are_ignored() {
        assert!(parse_server_message(r#"{"type":"audio","audio_base_64":"AAAA"}"#).is_none());
        assert!(parse_server_message("not json").is_none());
    }

    #[test]
    fn contextual_update_wire_shape() {
        let frame = text_frame(&ClientMessage::ContextualUpdate {
            text: "table for two".to_string(),
        });
        let tungstenite::Message::Text(json) = frame else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(json.as_str()).unwrap();
        assert_eq!(value["type"], "contextual_update");
        assert_eq!(value["text"], "table for two");
    }

    #[test]
    fn host_extraction() {
        assert_eq!(
            host_of("wss://agents.tavolo.app/v1/conversation?agent_id=a1"),
            "agents.tavolo.app"
        );
        assert_eq!(host_of("ws://127.0.0.1:9100/session"), "127.0.0.1:9100");
    }
}
