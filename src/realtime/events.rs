use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::chatmodel::ChatMessage;

/// Events fanned out to the room subscribed to one thread. The `event` tag
/// values are the wire names the UI consumers dispatch on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ThreadEvent {
    #[serde(rename = "message:new")]
    MessageNew {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        message: ChatMessage,
    },

    #[serde(rename = "message:read")]
    MessageRead {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        #[serde(rename = "readerId")]
        reader_id: Uuid,
    },

    #[serde(rename = "thread:updated")]
    ThreadUpdated {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        #[serde(rename = "lastMessage")]
        last_message: Option<ChatMessage>,
        #[serde(rename = "unreadCount")]
        unread_count: i64,
    },
}

impl ThreadEvent {
    pub fn thread_id(&self) -> Uuid {
        match self {
            ThreadEvent::MessageNew { thread_id, .. }
            | ThreadEvent::MessageRead { thread_id, .. }
            | ThreadEvent::ThreadUpdated { thread_id, .. } => *thread_id,
        }
    }
}
