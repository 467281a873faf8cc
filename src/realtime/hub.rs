use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::ThreadEvent;

/// Publishing seam between the match/chat services and the realtime layer.
/// The in-process hub below is the only implementation today; a shared
/// pub/sub can be substituted here without touching the services.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ThreadEvent);
}

const ROOM_CAPACITY: usize = 256;

/// In-process fan-out keyed by thread id. Delivery is fire-and-forget:
/// at-least-once to currently subscribed connections, nothing retained for
/// connections that were offline.
pub struct EventHub {
    rooms: RwLock<HashMap<Uuid, broadcast::Sender<ThreadEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        EventHub {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to one thread's room, creating it on first use.
    pub fn subscribe(&self, thread_id: Uuid) -> broadcast::Receiver<ThreadEvent> {
        let mut rooms = self.rooms.write().unwrap();
        rooms
            .entry(thread_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, thread_id: Uuid) -> usize {
        self.rooms
            .read()
            .unwrap()
            .get(&thread_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for EventHub {
    fn publish(&self, event: ThreadEvent) {
        let thread_id = event.thread_id();
        let mut rooms = self.rooms.write().unwrap();
        let Some(tx) = rooms.get(&thread_id) else {
            // Nobody listening; events are re-derivable from persisted state.
            return;
        };

        if tx.send(event).is_err() {
            // Last receiver is gone; drop the empty room.
            rooms.remove(&thread_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_event(thread_id: Uuid) -> ThreadEvent {
        ThreadEvent::MessageRead {
            thread_id,
            reader_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn delivers_to_room_subscribers() {
        let hub = EventHub::new();
        let thread_id = Uuid::new_v4();
        let mut rx = hub.subscribe(thread_id);

        let event = read_event(thread_id);
        hub.publish(event.clone());

        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn rooms_are_isolated() {
        let hub = EventHub::new();
        let thread_a = Uuid::new_v4();
        let thread_b = Uuid::new_v4();
        let mut rx_a = hub.subscribe(thread_a);
        let mut rx_b = hub.subscribe(thread_b);

        hub.publish(read_event(thread_a));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = EventHub::new();
        hub.publish(read_event(Uuid::new_v4()));
    }

    #[test]
    fn preserves_order_within_a_thread() {
        let hub = EventHub::new();
        let thread_id = Uuid::new_v4();
        let mut rx = hub.subscribe(thread_id);

        let first = read_event(thread_id);
        let second = read_event(thread_id);
        hub.publish(first.clone());
        hub.publish(second.clone());

        assert_eq!(rx.try_recv().unwrap(), first);
        assert_eq!(rx.try_recv().unwrap(), second);
    }

    #[test]
    fn drops_room_once_all_receivers_are_gone() {
        let hub = EventHub::new();
        let thread_id = Uuid::new_v4();
        let rx = hub.subscribe(thread_id);
        assert_eq!(hub.subscriber_count(thread_id), 1);

        drop(rx);
        hub.publish(read_event(thread_id));
        assert_eq!(hub.subscriber_count(thread_id), 0);
    }
}
