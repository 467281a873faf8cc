use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persistent chat channel between a matched client/specialist pair.
///
/// At most one thread exists per (client, specialist, request) triple;
/// `find_or_create_thread` is the idempotent entry point.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ChatThread {
    pub id: Uuid,
    pub client_id: Uuid,
    pub specialist_id: Uuid,
    pub request_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.specialist_id == user_id
    }

    /// The participant on the far side of the thread from `user_id`.
    pub fn other_participant(&self, user_id: Uuid) -> Uuid {
        if self.client_id == user_id {
            self.specialist_id
        } else {
            self.client_id
        }
    }
}

/// A single message in a thread. Never edited or deleted; the only mutation
/// is the read flag flipping false -> true.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub attachment_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
