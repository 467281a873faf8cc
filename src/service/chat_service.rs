use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::db::chatdb::ChatStoreExt;
use crate::db::userdb::UserExt;
use crate::models::chatmodel::{ChatMessage, ChatThread};
use crate::models::usermodel::{User, UserRole};
use crate::realtime::events::ThreadEvent;
use crate::realtime::hub::EventPublisher;
use crate::service::error::ServiceError;
use crate::service::match_service::{MESSAGE_MAX_LEN, MESSAGE_MIN_LEN};

#[derive(Debug, Serialize, Clone)]
pub struct ThreadParticipant {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ThreadOverview {
    pub thread: ChatThread,
    pub other_user: ThreadParticipant,
    pub last_message: Option<ChatMessage>,
    pub unread_count: i64,
}

/// One page of messages, oldest first. `items.first()` is the cursor for the
/// next (older) page.
#[derive(Debug, Serialize, Clone)]
pub struct MessagePage {
    pub items: Vec<ChatMessage>,
    pub has_more: bool,
}

pub struct ChatService<S> {
    store: Arc<S>,
    events: Arc<dyn EventPublisher>,
}

impl<S> ChatService<S>
where
    S: ChatStoreExt + UserExt + Send + Sync,
{
    pub fn new(store: Arc<S>, events: Arc<dyn EventPublisher>) -> Self {
        ChatService { store, events }
    }

    async fn authorized_thread(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
    ) -> Result<ChatThread, ServiceError> {
        let thread = self
            .store
            .get_thread_by_id(thread_id)
            .await?
            .ok_or(ServiceError::ThreadNotFound(thread_id))?;
        if !thread.is_participant(user_id) {
            return Err(ServiceError::NotParticipant(user_id, thread_id));
        }
        Ok(thread)
    }

    /// Explicit client-initiated contact; lookup-or-create, same as the
    /// acceptance path.
    pub async fn open_thread(
        &self,
        actor: &User,
        other_user_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<ChatThread, ServiceError> {
        let other = self
            .store
            .get_user(other_user_id)
            .await?
            .ok_or(ServiceError::Validation("User not found".to_string()))?;

        let (client_id, specialist_id) = match actor.role {
            UserRole::Specialist => (other.id, actor.id),
            _ => (actor.id, other.id),
        };

        Ok(self
            .store
            .find_or_create_thread(client_id, specialist_id, request_id)
            .await?)
    }

    pub async fn send_message(
        &self,
        thread_id: Uuid,
        sender_id: Uuid,
        body: String,
        attachment_id: Option<Uuid>,
    ) -> Result<ChatMessage, ServiceError> {
        let len = body.chars().count();
        if !(MESSAGE_MIN_LEN..=MESSAGE_MAX_LEN).contains(&len) {
            return Err(ServiceError::Validation(format!(
                "Message must be between {MESSAGE_MIN_LEN} and {MESSAGE_MAX_LEN} characters"
            )));
        }

        let thread = self.authorized_thread(thread_id, sender_id).await?;

        let message = self
            .store
            .create_message(thread_id, sender_id, body, attachment_id)
            .await?;

        // Events go out only after the write committed, in commit order.
        let recipient = thread.other_participant(sender_id);
        let unread_count = self
            .store
            .unread_count_for_thread(thread_id, recipient)
            .await
            .unwrap_or(0);

        self.events.publish(ThreadEvent::MessageNew {
            thread_id,
            message: message.clone(),
        });
        self.events.publish(ThreadEvent::ThreadUpdated {
            thread_id,
            last_message: Some(message.clone()),
            unread_count,
        });

        Ok(message)
    }

    /// Page backward through a thread. The store returns newest-first; the
    /// page is reversed so consumers render oldest -> newest.
    pub async fn list_messages(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
        before_id: Option<Uuid>,
        limit: i64,
    ) -> Result<MessagePage, ServiceError> {
        self.authorized_thread(thread_id, user_id).await?;

        let mut items = self
            .store
            .list_messages(thread_id, before_id, limit + 1)
            .await?;
        let has_more = items.len() as i64 > limit;
        items.truncate(limit as usize);
        items.reverse();

        Ok(MessagePage { items, has_more })
    }

    pub async fn mark_read(&self, thread_id: Uuid, reader_id: Uuid) -> Result<u64, ServiceError> {
        self.authorized_thread(thread_id, reader_id).await?;

        let changed = self.store.mark_thread_read(thread_id, reader_id).await?;
        if changed > 0 {
            self.events.publish(ThreadEvent::MessageRead {
                thread_id,
                reader_id,
            });
        }
        Ok(changed)
    }

    pub async fn thread_overviews(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ThreadOverview>, ServiceError> {
        let threads = self.store.get_user_threads(user_id, limit, offset).await?;

        let mut overviews = Vec::with_capacity(threads.len());
        for thread in threads {
            let other_id = thread.other_participant(user_id);
            let other = self
                .store
                .get_user(other_id)
                .await?
                .ok_or(ServiceError::Validation("User not found".to_string()))?;

            let last_message = self
                .store
                .list_messages(thread.id, None, 1)
                .await?
                .into_iter()
                .next();
            let unread_count = self.store.unread_count_for_thread(thread.id, user_id).await?;

            overviews.push(ThreadOverview {
                thread,
                other_user: ThreadParticipant {
                    id: other.id,
                    name: other.name,
                    username: other.username,
                    avatar_url: other.avatar_url,
                },
                last_message,
                unread_count,
            });
        }

        Ok(overviews)
    }

    pub async fn thread_detail(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
    ) -> Result<(ChatThread, ThreadParticipant), ServiceError> {
        let thread = self.authorized_thread(thread_id, user_id).await?;
        let other_id = thread.other_participant(user_id);
        let other = self
            .store
            .get_user(other_id)
            .await?
            .ok_or(ServiceError::Validation("User not found".to_string()))?;

        Ok((
            thread,
            ThreadParticipant {
                id: other.id,
                name: other.name,
                username: other.username,
                avatar_url: other.avatar_url,
            },
        ))
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        Ok(self.store.unread_count(user_id).await?)
    }
}
