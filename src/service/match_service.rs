use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::db::chatdb::ChatStoreExt;
use crate::db::matchdb::MatchStoreExt;
use crate::models::chatmodel::ChatThread;
use crate::models::matchmodel::*;
use crate::models::usermodel::{User, UserRole};
use crate::realtime::events::ThreadEvent;
use crate::realtime::hub::EventPublisher;
use crate::service::error::ServiceError;
use crate::service::permissions;

pub const MESSAGE_MIN_LEN: usize = 1;
pub const MESSAGE_MAX_LEN: usize = 1000;

#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub application: Application,
    pub request: Request,
    pub thread: ChatThread,
}

/// Owns Request/Application state transitions. The hard invariants (at most
/// one accepted application per request, idempotent thread creation) are
/// enforced by the store's transaction boundary; this layer does the
/// authorization and precondition checks and publishes events after commit.
pub struct MatchService<S> {
    store: Arc<S>,
    events: Arc<dyn EventPublisher>,
}

impl<S> MatchService<S>
where
    S: MatchStoreExt + ChatStoreExt + Send + Sync,
{
    pub fn new(store: Arc<S>, events: Arc<dyn EventPublisher>) -> Self {
        MatchService { store, events }
    }

    pub async fn create_request(
        &self,
        client: &User,
        category_id: Uuid,
        title: String,
        description: Option<String>,
    ) -> Result<Request, ServiceError> {
        if client.role != UserRole::Client {
            return Err(ServiceError::Validation(
                "Only clients can post requests".to_string(),
            ));
        }
        if title.trim().is_empty() {
            return Err(ServiceError::Validation("Title is required".to_string()));
        }

        Ok(self
            .store
            .create_request(client.id, category_id, title, description)
            .await?)
    }

    pub async fn get_request(&self, request_id: Uuid) -> Result<Request, ServiceError> {
        self.store
            .get_request_by_id(request_id)
            .await?
            .ok_or(ServiceError::RequestNotFound(request_id))
    }

    /// Applications are visible to the owning client only.
    pub async fn list_applications(
        &self,
        request_id: Uuid,
        acting_user_id: Uuid,
    ) -> Result<Vec<Application>, ServiceError> {
        let request = self.get_request(request_id).await?;
        if !permissions::can_decide_application(acting_user_id, &request) {
            return Err(ServiceError::NotRequestOwner(acting_user_id, request_id));
        }
        Ok(self.store.get_request_applications(request_id).await?)
    }

    pub async fn create_application(
        &self,
        request_id: Uuid,
        specialist: &User,
        message: String,
    ) -> Result<Application, ServiceError> {
        let len = message.chars().count();
        if !(MESSAGE_MIN_LEN..=MESSAGE_MAX_LEN).contains(&len) {
            return Err(ServiceError::Validation(format!(
                "Application message must be between {MESSAGE_MIN_LEN} and {MESSAGE_MAX_LEN} characters"
            )));
        }

        let request = self.get_request(request_id).await?;
        if !permissions::can_apply(specialist, &request) {
            return Err(ServiceError::NotRequestOwner(specialist.id, request_id));
        }
        if request.status != RequestStatus::Open {
            return Err(ServiceError::RequestNotOpen(request_id));
        }

        self.store
            .create_application(request_id, specialist.id, message)
            .await
            .map_err(|e| ServiceError::from_apply_store_err(e, request_id, specialist.id))
    }

    /// Accept an application on behalf of the owning client. Atomic: the
    /// application flips to ACCEPTED, the request to IN_PROGRESS and the chat
    /// thread is looked up or created, all in one transaction. Re-accepting
    /// an already-accepted application returns the same thread without side
    /// effects; accepting a declined one or racing a closed request fails.
    pub async fn accept_application(
        &self,
        application_id: Uuid,
        acting_user_id: Uuid,
    ) -> Result<AcceptOutcome, ServiceError> {
        let application = self
            .store
            .get_application_by_id(application_id)
            .await?
            .ok_or(ServiceError::ApplicationNotFound(application_id))?;
        let request = self.get_request(application.request_id).await?;

        if !permissions::can_decide_application(acting_user_id, &request) {
            return Err(ServiceError::NotRequestOwner(acting_user_id, request.id));
        }
        if application.status == ApplicationStatus::Declined {
            return Err(ServiceError::InvalidApplicationStatus(
                application_id,
                ApplicationStatus::Declined,
            ));
        }
        if application.status == ApplicationStatus::Sent && request.status != RequestStatus::Open {
            return Err(ServiceError::RequestNotOpen(request.id));
        }

        // The store re-checks both statuses under row locks; a raced caller
        // loses there, never by corrupting state.
        let (application, request, thread) = self
            .store
            .accept_application(application_id)
            .await
            .map_err(|e| ServiceError::from_accept_store_err(e, application_id, request.id))?;

        debug!(
            request_id = %request.id,
            application_id = %application.id,
            thread_id = %thread.id,
            "application accepted"
        );

        self.events.publish(ThreadEvent::ThreadUpdated {
            thread_id: thread.id,
            last_message: None,
            unread_count: 0,
        });

        Ok(AcceptOutcome {
            application,
            request,
            thread,
        })
    }

    /// Decline an application. Declining twice is a no-op success so a
    /// double-clicked button never surfaces an error.
    pub async fn decline_application(
        &self,
        application_id: Uuid,
        acting_user_id: Uuid,
    ) -> Result<Application, ServiceError> {
        let application = self
            .store
            .get_application_by_id(application_id)
            .await?
            .ok_or(ServiceError::ApplicationNotFound(application_id))?;
        let request = self.get_request(application.request_id).await?;

        if !permissions::can_decide_application(acting_user_id, &request) {
            return Err(ServiceError::NotRequestOwner(acting_user_id, request.id));
        }
        if application.status == ApplicationStatus::Accepted {
            return Err(ServiceError::InvalidApplicationStatus(
                application_id,
                ApplicationStatus::Accepted,
            ));
        }

        self.store
            .decline_application(application_id)
            .await
            .map_err(|e| ServiceError::from_application_store_err(e, application_id))
    }

    pub async fn update_request_status(
        &self,
        request_id: Uuid,
        acting_user_id: Uuid,
        new_status: RequestStatus,
    ) -> Result<Request, ServiceError> {
        let request = self.get_request(request_id).await?;
        let accepted = self.store.get_accepted_application(request_id).await?;
        let accepted_specialist = accepted.as_ref().map(|a| a.specialist_id);

        let is_owner = request.client_id == acting_user_id;
        let is_accepted_specialist = accepted_specialist == Some(acting_user_id);
        if !is_owner && !is_accepted_specialist {
            return Err(ServiceError::NotRequestOwner(acting_user_id, request_id));
        }
        if !permissions::can_transition(acting_user_id, &request, accepted_specialist, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: request.status,
                to: new_status,
            });
        }

        let updated = self
            .store
            .update_request_status(request_id, new_status)
            .await?;

        if updated.status == RequestStatus::Completed {
            if let Some(application) = accepted {
                self.store
                    .create_review_placeholder(
                        updated.id,
                        updated.client_id,
                        application.specialist_id,
                    )
                    .await?;
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::{InMemoryStore, RecordingPublisher};

    struct Fixture {
        store: Arc<InMemoryStore>,
        events: Arc<RecordingPublisher>,
        service: MatchService<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(RecordingPublisher::default());
        let service = MatchService::new(store.clone(), events.clone());
        Fixture {
            store,
            events,
            service,
        }
    }

    async fn open_request(fx: &Fixture) -> (User, Request) {
        let client = fx.store.add_user(UserRole::Client).await;
        let request = fx
            .service
            .create_request(&client, Uuid::new_v4(), "fix my boiler".to_string(), None)
            .await
            .unwrap();
        (client, request)
    }

    async fn sent_application(fx: &Fixture, request: &Request) -> (User, Application) {
        let specialist = fx.store.add_user(UserRole::Specialist).await;
        let application = fx
            .service
            .create_application(request.id, &specialist, "I can help".to_string())
            .await
            .unwrap();
        (specialist, application)
    }

    #[tokio::test]
    async fn accept_transitions_all_three_records_atomically() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (specialist, application) = sent_application(&fx, &request).await;

        let outcome = fx
            .service
            .accept_application(application.id, client.id)
            .await
            .unwrap();

        assert_eq!(outcome.application.status, ApplicationStatus::Accepted);
        assert_eq!(outcome.request.status, RequestStatus::InProgress);
        assert_eq!(outcome.thread.client_id, client.id);
        assert_eq!(outcome.thread.specialist_id, specialist.id);
        assert_eq!(outcome.thread.request_id, Some(request.id));

        let events = fx.events.take();
        assert!(matches!(
            events.as_slice(),
            [ThreadEvent::ThreadUpdated { thread_id, .. }] if *thread_id == outcome.thread.id
        ));
    }

    #[tokio::test]
    async fn accept_is_idempotent_and_never_duplicates_the_thread() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (_, application) = sent_application(&fx, &request).await;

        let first = fx
            .service
            .accept_application(application.id, client.id)
            .await
            .unwrap();
        let second = fx
            .service
            .accept_application(application.id, client.id)
            .await
            .unwrap();

        assert_eq!(first.thread.id, second.thread.id);
        assert_eq!(fx.store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn accept_requires_the_owning_client() {
        let fx = fixture();
        let (_, request) = open_request(&fx).await;
        let (specialist, application) = sent_application(&fx, &request).await;

        let err = fx
            .service
            .accept_application(application.id, specialist.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotRequestOwner(_, _)));
    }

    #[tokio::test]
    async fn accept_of_unknown_application_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .accept_application(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ApplicationNotFound(_)));
    }

    #[tokio::test]
    async fn second_application_loses_the_acceptance_race() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (_, first) = sent_application(&fx, &request).await;
        let (_, second) = sent_application(&fx, &request).await;

        fx.service
            .accept_application(first.id, client.id)
            .await
            .unwrap();

        let err = fx
            .service
            .accept_application(second.id, client.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RequestNotOpen(_)));
    }

    #[tokio::test]
    async fn concurrent_accepts_produce_exactly_one_acceptance() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;

        let mut applications = Vec::new();
        for _ in 0..8 {
            let (_, application) = sent_application(&fx, &request).await;
            applications.push(application);
        }

        let service = Arc::new(MatchService::new(fx.store.clone(), fx.events.clone()));
        let mut handles = Vec::new();
        for application in &applications {
            let service = service.clone();
            let application_id = application.id;
            let client_id = client.id;
            handles.push(tokio::spawn(async move {
                service.accept_application(application_id, client_id).await
            }));
        }

        let mut accepted = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(ServiceError::RequestNotOpen(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(conflicts, applications.len() - 1);

        let stored = fx
            .store
            .get_request_applications(request.id)
            .await
            .unwrap();
        let accepted_rows = stored
            .iter()
            .filter(|a| a.status == ApplicationStatus::Accepted)
            .count();
        assert_eq!(accepted_rows, 1);
        assert_eq!(fx.store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn accepting_a_declined_application_is_rejected() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (_, application) = sent_application(&fx, &request).await;

        fx.service
            .decline_application(application.id, client.id)
            .await
            .unwrap();

        let err = fx
            .service
            .accept_application(application.id, client.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidApplicationStatus(_, ApplicationStatus::Declined)
        ));
    }

    #[tokio::test]
    async fn declining_twice_is_a_quiet_success() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (_, application) = sent_application(&fx, &request).await;

        let first = fx
            .service
            .decline_application(application.id, client.id)
            .await
            .unwrap();
        let second = fx
            .service
            .decline_application(application.id, client.id)
            .await
            .unwrap();

        assert_eq!(first.status, ApplicationStatus::Declined);
        assert_eq!(second.status, ApplicationStatus::Declined);
    }

    #[tokio::test]
    async fn declining_an_accepted_application_is_rejected() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (_, application) = sent_application(&fx, &request).await;

        fx.service
            .accept_application(application.id, client.id)
            .await
            .unwrap();

        let err = fx
            .service
            .decline_application(application.id, client.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidApplicationStatus(_, ApplicationStatus::Accepted)
        ));
    }

    #[tokio::test]
    async fn duplicate_application_conflicts_until_declined() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (specialist, application) = sent_application(&fx, &request).await;

        let err = fx
            .service
            .create_application(request.id, &specialist, "again".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyApplied(_, _)));

        fx.service
            .decline_application(application.id, client.id)
            .await
            .unwrap();

        // A fresh application is allowed once the old one is declined.
        fx.service
            .create_application(request.id, &specialist, "second try".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn application_message_length_is_bounded() {
        let fx = fixture();
        let (_, request) = open_request(&fx).await;
        let specialist = fx.store.add_user(UserRole::Specialist).await;

        let too_short = fx
            .service
            .create_application(request.id, &specialist, String::new())
            .await
            .unwrap_err();
        assert!(matches!(too_short, ServiceError::Validation(_)));

        let too_long = fx
            .service
            .create_application(request.id, &specialist, "x".repeat(1001))
            .await
            .unwrap_err();
        assert!(matches!(too_long, ServiceError::Validation(_)));

        fx.service
            .create_application(request.id, &specialist, "x".repeat(1000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn applying_to_a_non_open_request_fails() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let specialist = fx.store.add_user(UserRole::Specialist).await;

        fx.service
            .update_request_status(request.id, client.id, RequestStatus::Cancelled)
            .await
            .unwrap();

        let err = fx
            .service
            .create_application(request.id, &specialist, "too late".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RequestNotOpen(_)));
    }

    #[tokio::test]
    async fn completion_creates_the_review_placeholder_once() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (specialist, application) = sent_application(&fx, &request).await;

        fx.service
            .accept_application(application.id, client.id)
            .await
            .unwrap();

        // The accepted specialist may complete the request.
        let updated = fx
            .service
            .update_request_status(request.id, specialist.id, RequestStatus::Completed)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Completed);
        assert!(fx.store.review_exists(request.id).await);
    }

    #[tokio::test]
    async fn cancel_is_only_available_before_matching() {
        let fx = fixture();
        let (client, request) = open_request(&fx).await;
        let (_, application) = sent_application(&fx, &request).await;

        fx.service
            .accept_application(application.id, client.id)
            .await
            .unwrap();

        let err = fx
            .service
            .update_request_status(request.id, client.id, RequestStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn bystanders_cannot_move_request_status() {
        let fx = fixture();
        let (_, request) = open_request(&fx).await;
        let stranger = fx.store.add_user(UserRole::Specialist).await;

        let err = fx
            .service
            .update_request_status(request.id, stranger.id, RequestStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotRequestOwner(_, _)));
    }
}
