use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::models::chatmodel::ChatMessage;

/// How often the poll fallback asks for new messages.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Signals observed from the realtime channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    Connected,
    ConnectionError,
    Disconnected { local_close: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    PushActive,
    PollFallback,
}

/// Two-state delivery machine. Polling covers the gaps: before the channel
/// ever connects, and after any failure or remote disconnect. A local close
/// stops delivery for good instead of falling back.
#[derive(Debug)]
pub struct DeliveryController {
    mode: DeliveryMode,
    stopped: bool,
}

impl DeliveryController {
    pub fn new() -> Self {
        DeliveryController {
            mode: DeliveryMode::PollFallback,
            stopped: false,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed a channel signal through the machine. Returns the new mode only
    /// when the signal caused a transition.
    pub fn observe(&mut self, signal: ChannelSignal) -> Option<DeliveryMode> {
        if self.stopped {
            return None;
        }

        let next = match signal {
            ChannelSignal::Connected => DeliveryMode::PushActive,
            ChannelSignal::ConnectionError => DeliveryMode::PollFallback,
            ChannelSignal::Disconnected { local_close: false } => DeliveryMode::PollFallback,
            ChannelSignal::Disconnected { local_close: true } => {
                self.stopped = true;
                return None;
            }
        };

        if next == self.mode {
            return None;
        }
        self.mode = next;
        Some(next)
    }
}

impl Default for DeliveryController {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the poll fallback fetches messages from. In the app this is the
/// message history endpoint; tests substitute a stub.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_after(
        &self,
        thread_id: Uuid,
        after_id: Option<Uuid>,
    ) -> Result<Vec<ChatMessage>, sqlx::Error>;
}

/// An optimistic entry shown before the server confirms the send.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub client_ref: String,
    pub body: String,
}

/// The rendered state of one thread. Messages may arrive twice (push and
/// poll racing) or echo back a send that is still pending locally; both are
/// collapsed here so the consumer never shows duplicates.
#[derive(Debug)]
pub struct ThreadView {
    user_id: Uuid,
    messages: Vec<ChatMessage>,
    seen: HashSet<Uuid>,
    pending: Vec<PendingEntry>,
}

impl ThreadView {
    pub fn new(user_id: Uuid) -> Self {
        ThreadView {
            user_id,
            messages: Vec::new(),
            seen: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn add_pending(&mut self, client_ref: impl Into<String>, body: impl Into<String>) {
        self.pending.push(PendingEntry {
            client_ref: client_ref.into(),
            body: body.into(),
        });
    }

    /// Ingest a confirmed message. Returns false when the identifier was
    /// already seen. A confirmed message from the viewing user resolves the
    /// oldest pending entry with the same body.
    pub fn ingest(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }

        if message.sender_id == self.user_id {
            if let Some(pos) = self.pending.iter().position(|p| p.body == message.body) {
                self.pending.remove(pos);
            }
        }

        let at = self
            .messages
            .iter()
            .position(|m| (m.created_at, m.id) > (message.created_at, message.id))
            .unwrap_or(self.messages.len());
        self.messages.insert(at, message);
        true
    }

    pub fn ingest_all(&mut self, messages: Vec<ChatMessage>) -> usize {
        messages.into_iter().filter(|m| self.ingest(m.clone())).count()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn pending(&self) -> &[PendingEntry] {
        &self.pending
    }

    pub fn last_id(&self) -> Option<Uuid> {
        self.messages.last().map(|m| m.id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Interval poller feeding a `ThreadView` while the fallback mode is active.
pub struct ThreadPoller {
    handle: Option<JoinHandle<()>>,
}

impl ThreadPoller {
    pub fn start<S: MessageSource + 'static>(
        source: Arc<S>,
        thread_id: Uuid,
        view: Arc<Mutex<ThreadView>>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so start+stop cycles
            // during quick reconnects do not hammer the source.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let after_id = view.lock().await.last_id();
                match source.fetch_after(thread_id, after_id).await {
                    Ok(batch) => {
                        if !batch.is_empty() {
                            let added = view.lock().await.ingest_all(batch);
                            debug!(thread_id = %thread_id, added, "poll fallback fetched messages");
                        }
                    }
                    Err(e) => {
                        debug!(thread_id = %thread_id, error = %e, "poll fetch failed");
                    }
                }
            }
        });
        ThreadPoller {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ThreadPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Glue between the channel lifecycle and the poller: polls while in
/// fallback, idles while push is active, shuts down on local close.
pub struct FallbackDriver<S: MessageSource + 'static> {
    controller: DeliveryController,
    source: Arc<S>,
    thread_id: Uuid,
    view: Arc<Mutex<ThreadView>>,
    interval: Duration,
    poller: Option<ThreadPoller>,
}

impl<S: MessageSource + 'static> FallbackDriver<S> {
    pub fn new(
        source: Arc<S>,
        thread_id: Uuid,
        view: Arc<Mutex<ThreadView>>,
        interval: Duration,
    ) -> Self {
        let mut driver = FallbackDriver {
            controller: DeliveryController::new(),
            source,
            thread_id,
            view,
            interval,
            poller: None,
        };
        // Starts in fallback until the channel reports a connection.
        driver.sync_poller();
        driver
    }

    pub fn mode(&self) -> DeliveryMode {
        self.controller.mode()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().map(ThreadPoller::is_running).unwrap_or(false)
    }

    pub fn handle(&mut self, signal: ChannelSignal) {
        self.controller.observe(signal);
        self.sync_poller();
    }

    fn sync_poller(&mut self) {
        let want_polling =
            !self.controller.is_stopped() && self.controller.mode() == DeliveryMode::PollFallback;

        match (want_polling, self.poller.is_some()) {
            (true, false) => {
                self.poller = Some(ThreadPoller::start(
                    self.source.clone(),
                    self.thread_id,
                    self.view.clone(),
                    self.interval,
                ));
            }
            (false, true) => {
                if let Some(mut poller) = self.poller.take() {
                    poller.stop();
                }
            }
            _ => {}
        }
    }
}
