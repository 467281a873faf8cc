use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::db::chatdb::ChatStoreExt;
use crate::db::userdb::UserExt;
use crate::error::{ErrorMessage, HttpError};
use crate::models::usermodel::User;
use crate::realtime::events::ThreadEvent;
use crate::realtime::hub::EventHub;
use crate::utils::token;
use crate::AppState;

/// Frames the client sends to manage room membership.
#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
enum ClientFrame {
    #[serde(rename = "join:thread")]
    Join {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
    },
    #[serde(rename = "leave:thread")]
    Leave {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
    },
}

/// Acknowledgement / error frames; thread events themselves are serialized
/// straight from `ThreadEvent`.
#[derive(Debug, Serialize)]
#[serde(tag = "event")]
enum ControlFrame {
    #[serde(rename = "joined:thread")]
    Joined {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
    },
    #[serde(rename = "left:thread")]
    Left {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// A connection's thread-room subscriptions. Each joined room runs one
/// forwarder task pumping hub events into the connection's outbound queue;
/// leaving (or dropping the whole membership) aborts the forwarder, so a
/// closed chat view can never keep receiving events.
pub struct RoomMembership {
    hub: Arc<EventHub>,
    out: mpsc::Sender<ThreadEvent>,
    rooms: HashMap<Uuid, JoinHandle<()>>,
}

impl RoomMembership {
    pub fn new(hub: Arc<EventHub>, out: mpsc::Sender<ThreadEvent>) -> Self {
        RoomMembership {
            hub,
            out,
            rooms: HashMap::new(),
        }
    }

    /// Idempotent: joining a room twice keeps a single forwarder.
    pub fn join(&mut self, thread_id: Uuid) {
        if self.rooms.contains_key(&thread_id) {
            return;
        }

        let mut rx = self.hub.subscribe(thread_id);
        let out = self.out.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if out.send(event).await.is_err() {
                            break;
                        }
                    }
                    // Slow consumer skipped events; it reconciles via the
                    // read API, same as an offline client.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.rooms.insert(thread_id, handle);
    }

    pub fn leave(&mut self, thread_id: Uuid) -> bool {
        match self.rooms.remove(&thread_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, thread_id: Uuid) -> bool {
        self.rooms.contains_key(&thread_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&mut self) {
        for (_, handle) in self.rooms.drain() {
            handle.abort();
        }
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        self.clear();
    }
}

/// WebSocket handshake. Identity is checked before the upgrade; a bad token
/// terminates the attempt with 401 and no retry within the handshake.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    Extension(app_state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpError> {
    let sub = token::decode_token(query.token, app_state.env.jwt_secret.as_bytes())?;
    let user_id = Uuid::parse_str(&sub)
        .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidToken.to_string()))?;

    let user = app_state
        .db_client
        .get_user(user_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNoLongerExist.to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, user)))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user: User) {
    let (mut sink, mut stream) = socket.split();

    let (event_tx, mut event_rx) = mpsc::channel::<ThreadEvent>(64);
    let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<ControlFrame>(16);

    let writer_task = tokio::spawn(async move {
        loop {
            let json = tokio::select! {
                Some(event) = event_rx.recv() => serde_json::to_string(&event),
                Some(frame) = ctrl_rx.recv() => serde_json::to_string(&frame),
                else => break,
            };

            let json = match json {
                Ok(j) => j,
                Err(e) => {
                    debug!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut rooms = RoomMembership::new(app_state.events.clone(), event_tx);
    debug!(user_id = %user.id, "websocket connected");

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        debug!(user_id = %user.id, error = %e, "invalid client frame");
                        let _ = ctrl_tx
                            .send(ControlFrame::Error {
                                message: "Unrecognized frame".to_string(),
                            })
                            .await;
                        continue;
                    }
                };

                match frame {
                    ClientFrame::Join { thread_id } => {
                        let allowed = app_state
                            .db_client
                            .get_thread_by_id(thread_id)
                            .await
                            .ok()
                            .flatten()
                            .map(|t| t.is_participant(user.id))
                            .unwrap_or(false);

                        if allowed {
                            rooms.join(thread_id);
                            let _ = ctrl_tx.send(ControlFrame::Joined { thread_id }).await;
                        } else {
                            let _ = ctrl_tx
                                .send(ControlFrame::Error {
                                    message: "Not a participant of this thread".to_string(),
                                })
                                .await;
                        }
                    }
                    ClientFrame::Leave { thread_id } => {
                        rooms.leave(thread_id);
                        let _ = ctrl_tx.send(ControlFrame::Left { thread_id }).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Disconnect, voluntary or not: drop all rooms, tell nobody.
    rooms.clear();
    writer_task.abort();
    debug!(user_id = %user.id, "websocket disconnected");
}
