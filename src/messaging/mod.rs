/// Messaging channel
///
/// Persisted student and psychologist messages with read state. Every send is
/// written to the database first; live delivery to open connections happens
/// afterwards through the [`ConnectionRegistry`] and never blocks the write.

mod registry;
mod store;

pub use registry::{ConnectionId, ConnectionRegistry};
pub use store::MessageStore;

use crate::{
    account::Role,
    error::{PortalError, PortalResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted message body, in characters
pub const MAX_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Student,
    Psychologist,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Student => "student",
            ParticipantKind::Psychologist => "psychologist",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "student" => Ok(ParticipantKind::Student),
            "psychologist" => Ok(ParticipantKind::Psychologist),
            _ => Err(PortalError::Internal(format!("Invalid participant kind: {}", s))),
        }
    }

    /// Participant kind for an account role; admins do not message
    pub fn for_role(role: Role) -> PortalResult<Self> {
        match role {
            Role::Student => Ok(ParticipantKind::Student),
            Role::Psychologist => Ok(ParticipantKind::Psychologist),
            Role::Admin => Err(PortalError::Forbidden(
                "Admins cannot take part in conversations".to_string(),
            )),
        }
    }
}

/// Sender or receiver of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub kind: ParticipantKind,
    /// Account id
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Participant,
    pub receiver: Participant,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// One row of the conversation list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub counterpart: Participant,
    pub last_message: Message,
    pub unread_count: i64,
}

/// Body of `POST /messages/:userId`
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Events pushed to live connections
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushEvent {
    #[serde(rename_all = "camelCase")]
    NewMessage { message: Message },
    #[serde(rename_all = "camelCase")]
    MessagesRead { reader_id: String, count: u64 },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

/// Frames accepted from a live connection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Send { receiver_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    MarkRead { sender_id: String },
}

/// Check a message body
pub fn validate_content(content: &str) -> PortalResult<()> {
    if content.trim().is_empty() {
        return Err(PortalError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(PortalError::Validation(format!(
            "Message content cannot exceed {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    Ok(())
}
