//! In-memory store used by unit tests. Implements the same store traits as
//! `DBClient`, with every transactional operation executed under one mutex
//! guard so it is atomic the way a database transaction is.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::chatdb::ChatStoreExt;
use super::matchdb::{
    MatchStoreExt, ERR_ALREADY_APPLIED, ERR_APPLICATION_PROCESSED, ERR_REQUEST_NOT_OPEN,
};
use super::userdb::UserExt;
use crate::models::chatmodel::*;
use crate::models::matchmodel::*;
use crate::models::usermodel::{User, UserRole};
use crate::realtime::events::ThreadEvent;
use crate::realtime::hub::EventPublisher;

/// Publisher that records every event, for asserting on what the services
/// emitted and in what order.
#[derive(Default)]
pub struct RecordingPublisher {
    events: std::sync::Mutex<Vec<ThreadEvent>>,
}

impl RecordingPublisher {
    pub fn take(&self) -> Vec<ThreadEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: ThreadEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    requests: HashMap<Uuid, Request>,
    applications: HashMap<Uuid, Application>,
    threads: Vec<ChatThread>,
    messages: Vec<ChatMessage>,
    reviews: HashMap<Uuid, (Uuid, Uuid)>,
    last_ts: Option<DateTime<Utc>>,
}

impl State {
    // Strictly increasing timestamps, mirroring the DB ordering invariant.
    fn next_ts(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_ts {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        self.last_ts = Some(ts);
        ts
    }

    fn find_thread(
        &self,
        client_id: Uuid,
        specialist_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Option<ChatThread> {
        self.threads
            .iter()
            .find(|t| {
                t.client_id == client_id
                    && t.specialist_id == specialist_id
                    && t.request_id == request_id
            })
            .cloned()
    }

    fn find_or_create_thread(
        &mut self,
        client_id: Uuid,
        specialist_id: Uuid,
        request_id: Option<Uuid>,
    ) -> ChatThread {
        if let Some(thread) = self.find_thread(client_id, specialist_id, request_id) {
            return thread;
        }
        let thread = ChatThread {
            id: Uuid::new_v4(),
            client_id,
            specialist_id,
            request_id,
            last_message_at: None,
            created_at: self.next_ts(),
        };
        self.threads.push(thread.clone());
        thread
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, role: UserRole) -> User {
        let mut state = self.inner.lock().await;
        let ts = state.next_ts();
        let id = Uuid::new_v4();
        let user = User {
            id,
            name: format!("user-{id}"),
            username: format!("user-{id}"),
            email: format!("{id}@example.com"),
            role,
            avatar_url: None,
            created_at: ts,
            updated_at: ts,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn thread_count(&self) -> usize {
        self.inner.lock().await.threads.len()
    }

    pub async fn review_exists(&self, request_id: Uuid) -> bool {
        self.inner.lock().await.reviews.contains_key(&request_id)
    }
}

#[async_trait]
impl UserExt for InMemoryStore {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, Error> {
        Ok(self.inner.lock().await.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl MatchStoreExt for InMemoryStore {
    async fn create_request(
        &self,
        client_id: Uuid,
        category_id: Uuid,
        title: String,
        description: Option<String>,
    ) -> Result<Request, Error> {
        let mut state = self.inner.lock().await;
        let ts = state.next_ts();
        let request = Request {
            id: Uuid::new_v4(),
            client_id,
            category_id,
            title,
            description,
            status: RequestStatus::Open,
            created_at: ts,
            updated_at: ts,
        };
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request_by_id(&self, request_id: Uuid) -> Result<Option<Request>, Error> {
        Ok(self.inner.lock().await.requests.get(&request_id).cloned())
    }

    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: RequestStatus,
    ) -> Result<Request, Error> {
        let mut state = self.inner.lock().await;
        let ts = state.next_ts();
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(Error::RowNotFound)?;
        request.status = status;
        request.updated_at = ts;
        Ok(request.clone())
    }

    async fn create_application(
        &self,
        request_id: Uuid,
        specialist_id: Uuid,
        message: String,
    ) -> Result<Application, Error> {
        let mut state = self.inner.lock().await;
        let duplicate = state.applications.values().any(|a| {
            a.request_id == request_id
                && a.specialist_id == specialist_id
                && a.status != ApplicationStatus::Declined
        });
        if duplicate {
            return Err(Error::Protocol(ERR_ALREADY_APPLIED.into()));
        }
        let application = Application {
            id: Uuid::new_v4(),
            request_id,
            specialist_id,
            message,
            status: ApplicationStatus::Sent,
            created_at: state.next_ts(),
        };
        state
            .applications
            .insert(application.id, application.clone());
        Ok(application)
    }

    async fn get_application_by_id(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Application>, Error> {
        Ok(self
            .inner
            .lock()
            .await
            .applications
            .get(&application_id)
            .cloned())
    }

    async fn get_request_applications(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<Application>, Error> {
        let state = self.inner.lock().await;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect();
        applications.sort_by_key(|a| a.created_at);
        Ok(applications)
    }

    async fn get_accepted_application(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Application>, Error> {
        Ok(self
            .inner
            .lock()
            .await
            .applications
            .values()
            .find(|a| a.request_id == request_id && a.status == ApplicationStatus::Accepted)
            .cloned())
    }

    async fn accept_application(
        &self,
        application_id: Uuid,
    ) -> Result<(Application, Request, ChatThread), Error> {
        let mut state = self.inner.lock().await;

        let application = state
            .applications
            .get(&application_id)
            .cloned()
            .ok_or(Error::RowNotFound)?;

        if application.status == ApplicationStatus::Accepted {
            let request = state
                .requests
                .get(&application.request_id)
                .cloned()
                .ok_or(Error::RowNotFound)?;
            let thread = state.find_or_create_thread(
                request.client_id,
                application.specialist_id,
                Some(request.id),
            );
            return Ok((application, request, thread));
        }

        if application.status == ApplicationStatus::Declined {
            return Err(Error::Protocol(ERR_APPLICATION_PROCESSED.into()));
        }

        let request = state
            .requests
            .get(&application.request_id)
            .cloned()
            .ok_or(Error::RowNotFound)?;
        if request.status != RequestStatus::Open {
            return Err(Error::Protocol(ERR_REQUEST_NOT_OPEN.into()));
        }

        let ts = state.next_ts();
        let application = {
            let entry = state.applications.get_mut(&application_id).unwrap();
            entry.status = ApplicationStatus::Accepted;
            entry.clone()
        };
        let request = {
            let entry = state.requests.get_mut(&application.request_id).unwrap();
            entry.status = RequestStatus::InProgress;
            entry.updated_at = ts;
            entry.clone()
        };
        let thread = state.find_or_create_thread(
            request.client_id,
            application.specialist_id,
            Some(request.id),
        );

        Ok((application, request, thread))
    }

    async fn decline_application(&self, application_id: Uuid) -> Result<Application, Error> {
        let mut state = self.inner.lock().await;
        let application = state
            .applications
            .get(&application_id)
            .cloned()
            .ok_or(Error::RowNotFound)?;

        match application.status {
            ApplicationStatus::Declined => Ok(application),
            ApplicationStatus::Accepted => {
                Err(Error::Protocol(ERR_APPLICATION_PROCESSED.into()))
            }
            ApplicationStatus::Sent => {
                let entry = state.applications.get_mut(&application_id).unwrap();
                entry.status = ApplicationStatus::Declined;
                Ok(entry.clone())
            }
        }
    }

    async fn create_review_placeholder(
        &self,
        request_id: Uuid,
        client_id: Uuid,
        specialist_id: Uuid,
    ) -> Result<(), Error> {
        let mut state = self.inner.lock().await;
        state
            .reviews
            .entry(request_id)
            .or_insert((client_id, specialist_id));
        Ok(())
    }
}

#[async_trait]
impl ChatStoreExt for InMemoryStore {
    async fn find_or_create_thread(
        &self,
        client_id: Uuid,
        specialist_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<ChatThread, Error> {
        let mut state = self.inner.lock().await;
        Ok(state.find_or_create_thread(client_id, specialist_id, request_id))
    }

    async fn get_thread_by_id(&self, thread_id: Uuid) -> Result<Option<ChatThread>, Error> {
        Ok(self
            .inner
            .lock()
            .await
            .threads
            .iter()
            .find(|t| t.id == thread_id)
            .cloned())
    }

    async fn get_user_threads(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatThread>, Error> {
        let state = self.inner.lock().await;
        let mut threads: Vec<ChatThread> = state
            .threads
            .iter()
            .filter(|t| t.is_participant(user_id))
            .cloned()
            .collect();
        threads.sort_by_key(|t| std::cmp::Reverse(t.last_message_at.unwrap_or(t.created_at)));
        Ok(threads
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_message(
        &self,
        thread_id: Uuid,
        sender_id: Uuid,
        body: String,
        attachment_id: Option<Uuid>,
    ) -> Result<ChatMessage, Error> {
        let mut state = self.inner.lock().await;
        if !state.threads.iter().any(|t| t.id == thread_id) {
            return Err(Error::RowNotFound);
        }
        let ts = state.next_ts();
        let message = ChatMessage {
            id: Uuid::new_v4(),
            thread_id,
            sender_id,
            body,
            attachment_id,
            is_read: false,
            read_at: None,
            created_at: ts,
        };
        state.messages.push(message.clone());
        if let Some(thread) = state.threads.iter_mut().find(|t| t.id == thread_id) {
            thread.last_message_at = Some(ts);
        }
        Ok(message)
    }

    async fn list_messages(
        &self,
        thread_id: Uuid,
        before_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, Error> {
        let state = self.inner.lock().await;
        let cursor_ts = match before_id {
            Some(id) => Some(
                state
                    .messages
                    .iter()
                    .find(|m| m.id == id)
                    .map(|m| m.created_at)
                    .ok_or(Error::RowNotFound)?,
            ),
            None => None,
        };
        let mut messages: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .filter(|m| cursor_ts.map_or(true, |ts| m.created_at < ts))
            .cloned()
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn mark_thread_read(&self, thread_id: Uuid, reader_id: Uuid) -> Result<u64, Error> {
        let mut state = self.inner.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for message in state
            .messages
            .iter_mut()
            .filter(|m| m.thread_id == thread_id && m.sender_id != reader_id && !m.is_read)
        {
            message.is_read = true;
            message.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn unread_count_for_thread(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, Error> {
        let state = self.inner.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id && m.sender_id != user_id && !m.is_read)
            .count() as i64)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, Error> {
        let state = self.inner.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                let thread = state.threads.iter().find(|t| t.id == m.thread_id);
                thread.map_or(false, |t| t.is_participant(user_id))
                    && m.sender_id != user_id
                    && !m.is_read
            })
            .count() as i64)
    }
}
