use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub owner_id: String,
    pub phone: String,
    #[sqlx(try_from = "String")]
    pub direction: Direction,
    pub body: String,
    #[sqlx(try_from = "String")]
    pub status: MessageStatus,
    pub provider_id: Option<String>,
    pub error: Option<String>,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub campaign_id: Option<Uuid>,
    pub owner_id: String,
    pub phone: String,
    pub direction: Direction,
    pub body: String,
    pub status: MessageStatus,
    pub provider_id: Option<String>,
}

impl CreateMessage {
    pub fn outbound(campaign_id: Option<Uuid>, owner_id: &str, phone: String, body: String) -> Self {
        Self {
            campaign_id,
            owner_id: owner_id.to_string(),
            phone,
            direction: Direction::Outbound,
            body,
            status: MessageStatus::Queued,
            provider_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "outbound" => Ok(Direction::Outbound),
            "inbound" => Ok(Direction::Inbound),
            other => Err(format!("unknown message direction: {}", other)),
        }
    }
}

/// Delivery status of a message.
///
/// `Other` carries carrier statuses this service does not know yet; they are
/// stored verbatim and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Other(String),
}

impl MessageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Queued => 0,
            MessageStatus::Sent | MessageStatus::Other(_) => 1,
            MessageStatus::Delivered | MessageStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle.
    /// Identical statuses are not a transition.
    pub fn can_transition_to(&self, next: &MessageStatus) -> bool {
        if self == next || self.is_terminal() {
            return false;
        }
        match next {
            MessageStatus::Other(_) => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl From<String> for MessageStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => MessageStatus::Queued,
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Other(value),
        }
    }
}

impl From<&str> for MessageStatus {
    fn from(value: &str) -> Self {
        MessageStatus::from(value.to_string())
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(MessageStatus::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub phone: String,
    pub last_message_at: DateTime<Utc>,
}
