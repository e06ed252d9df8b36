//! Message wire types for session-scoped agent communication.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Update,
    Question,
    Decision,
    Action,
    TaskDispatch,
    ExecutionReport,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Question => "question",
            Self::Decision => "decision",
            Self::Action => "action",
            Self::TaskDispatch => "task_dispatch",
            Self::ExecutionReport => "execution_report",
        }
    }
}

/// Forward-compatible protocol extension block. Known field is the `uri`
/// discriminator; everything else is captured verbatim so consumers can
/// ignore fields they do not understand without dropping them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageExtension {
    pub uri: String,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl MessageExtension {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Open key/value metadata attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<MessageExtension>,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl MessageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extension: MessageExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub from_agent: String,
    /// Absent for broadcasts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    /// Strictly increasing per session, assigned by the bus.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }

    pub fn is_for(&self, agent_id: &str) -> bool {
        match &self.to_agent {
            Some(recipient) => recipient == agent_id,
            None => self.from_agent != agent_id,
        }
    }
}

/// Input to [`MessageBus::send_message`]. The bus assigns id, sequence and
/// timestamp.
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub session_id: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<MessageMetadata>,
}

impl SendMessage {
    pub fn new(
        session_id: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            from_agent: from_agent.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn to(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent = Some(agent_id.into());
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub(crate) fn into_message(self, sequence: u64) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            session_id: self.session_id,
            from_agent: self.from_agent,
            to_agent: self.to_agent,
            content: self.content,
            message_type: self.message_type,
            metadata: self.metadata,
            sequence,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_targets_everyone_but_sender() {
        let msg = SendMessage::new("s-1", "dev-0", "hello").into_message(1);
        assert!(msg.is_broadcast());
        assert!(msg.is_for("triage-0"));
        assert!(!msg.is_for("dev-0"));
    }

    #[test]
    fn test_direct_targets_single_recipient() {
        let msg = SendMessage::new("s-1", "dev-0", "hello")
            .to("triage-0")
            .into_message(1);
        assert!(!msg.is_broadcast());
        assert!(msg.is_for("triage-0"));
        assert!(!msg.is_for("arch-0"));
    }

    #[test]
    fn test_metadata_extension_roundtrip_ignores_unknown_fields() {
        let raw = r#"{
            "extensions": [
                {"uri": "mesh://discussion", "thread": "t-9", "unknown_flag": true}
            ],
            "note": "ad hoc"
        }"#;

        let metadata: MessageMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(metadata.extensions.len(), 1);
        assert_eq!(metadata.extensions[0].uri, "mesh://discussion");
        assert!(metadata.extensions[0].fields.contains_key("unknown_flag"));
        assert!(metadata.fields.contains_key("note"));

        let rendered = serde_json::to_string(&metadata).unwrap();
        let reparsed: MessageMetadata = serde_json::from_str(&rendered).unwrap();
        assert_eq!(reparsed.extensions[0].fields.len(), 2);
    }

    #[test]
    fn test_wire_shape_field_names() {
        let msg = SendMessage::new("s-1", "dev-0", "hi")
            .to("triage-0")
            .with_type(MessageType::Question)
            .into_message(7);

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["session_id"], "s-1");
        assert_eq!(value["from_agent"], "dev-0");
        assert_eq!(value["to_agent"], "triage-0");
        assert_eq!(value["message_type"], "question");
        assert_eq!(value["sequence"], 7);
    }
}
