//! Wire protocol for client-server communication.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use stevedore_core::types::ExecSpec;
use stevedore_relay::OutboundEvent;

/// Exec request carried by the `exec` message.
///
/// `cmd` and `env` are space-separated strings, split on whitespace before
/// reaching the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecBody {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub stderr: bool,
    #[serde(default)]
    pub detach: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl ExecBody {
    /// Convert to the engine-facing exec spec.
    #[must_use]
    pub fn to_spec(&self) -> ExecSpec {
        ExecSpec {
            cmd: split_words(&self.cmd),
            env: split_words(&self.env),
            tty: self.tty,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            detach: self.detach,
            privileged: self.privileged,
            user: self.user.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(ToString::to_string).collect()
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the delivery group for a target id (`"sub"` for everything).
    Subscribe { id: String },
    /// One-shot container status check.
    Status { id: String },
    /// Start an exec instance inside the target container.
    Exec {
        id: String,
        #[serde(default)]
        body: ExecBody,
    },
    /// Terminal input for the active session (base64 encoded).
    Input { id: String, data: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Create an input message from raw bytes.
    #[must_use]
    pub fn input<S: Into<String>>(id: S, data: &[u8]) -> Self {
        Self::Input {
            id: id.into(),
            data: BASE64.encode(data),
        }
    }

    /// Decode input data from base64.
    #[must_use]
    pub fn decode_input(&self) -> Option<Vec<u8>> {
        if let Self::Input { data, .. } = self {
            decode_payload(data)
        } else {
            None
        }
    }
}

/// Decode a base64 payload field.
#[must_use]
pub fn decode_payload(data: &str) -> Option<Vec<u8>> {
    BASE64.decode(data).ok()
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription acknowledged.
    Subbed { id: String, connection_id: String },
    /// One-shot status reply.
    Status { id: String, status: String },
    /// Lifecycle event fan-out.
    Event {
        event: String,
        container: String,
        target: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    /// Exec instance created and started.
    ExecStarted { id: String, exec_id: String },
    /// Demultiplexed exec output (base64 encoded).
    Output {
        id: String,
        stream: String,
        data: String,
    },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create an output message from raw bytes.
    #[must_use]
    pub fn output<I: Into<String>, S: Into<String>>(id: I, stream: S, data: &[u8]) -> Self {
        Self::Output {
            id: id.into(),
            stream: stream.into(),
            data: BASE64.encode(data),
        }
    }

    /// Decode output data from base64.
    #[must_use]
    pub fn decode_output(&self) -> Option<Vec<u8>> {
        if let Self::Output { data, .. } = self {
            decode_payload(data)
        } else {
            None
        }
    }
}

impl From<&OutboundEvent> for ServerMessage {
    fn from(event: &OutboundEvent) -> Self {
        Self::Event {
            event: event.event.as_str().to_string(),
            container: event.container.clone(),
            target: event.target.clone(),
            state: event.state.clone(),
            status: event.status.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use stevedore_relay::EventName;

    use super::*;

    #[test]
    fn test_input_roundtrip() {
        let original = b"ls -la\n";
        let msg = ClientMessage::input("aabbccdd00112233", original);
        let decoded = msg.decode_input().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_output_roundtrip() {
        let original = b"total 0\n";
        let msg = ServerMessage::output("aabbccdd00112233", "stdout", original);
        let decoded = msg.decode_output().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_message_serialization() {
        let msg = ClientMessage::Subscribe {
            id: "aabbccdd00112233".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("subscribe"));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        if let ClientMessage::Subscribe { id } = parsed {
            assert_eq!(id, "aabbccdd00112233");
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_exec_body_splits_words() {
        let body = ExecBody {
            cmd: "sh -c  ls".to_string(),
            env: "TERM=xterm PATH=/bin".to_string(),
            tty: true,
            stdin: true,
            ..ExecBody::default()
        };
        let spec = body.to_spec();
        assert_eq!(spec.cmd, vec!["sh", "-c", "ls"]);
        assert_eq!(spec.env, vec!["TERM=xterm", "PATH=/bin"]);
        assert!(spec.keep_alive());
    }

    #[test]
    fn test_event_mapping() {
        let event = OutboundEvent::new(EventName::Started, "web", "aabbccdd00112233");
        let msg = ServerMessage::from(&event);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"event\":\"started\""));
        assert!(json.contains("\"container\":\"web\""));
        // Omitted optional fields stay off the wire.
        assert!(!json.contains("state"));
    }
}
