use shared::RealtimeEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Sink for state-change notifications. The order service only ever talks to
/// this trait, so tests can swap in a recorder.
pub trait EventPublisher: Send + Sync {
    /// Fire-and-forget. Must not block on slow or absent subscribers.
    fn publish(&self, event: RealtimeEvent);
}

/// In-process fan-out to every connected display.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest
/// ones and are expected to refetch state instead of replaying.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: RealtimeEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => debug!("Published {} to {} subscribers", name, receivers),
            Err(_) => debug!("Dropped {}: no subscribers connected", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{OrderItemStatus, TableStatus};

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let bus = EventBus::new(16);
        let mut kitchen = bus.subscribe();
        let mut front = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(RealtimeEvent::TableStatusUpdated { table_id: 2, status: TableStatus::Occupied });
        bus.publish(RealtimeEvent::NewOrder);

        for rx in [&mut kitchen, &mut front] {
            assert_eq!(
                rx.recv().await.unwrap(),
                RealtimeEvent::TableStatusUpdated { table_id: 2, status: TableStatus::Occupied }
            );
            assert_eq!(rx.recv().await.unwrap(), RealtimeEvent::NewOrder);
        }
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.publish(RealtimeEvent::NewOrder);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_events() {
        let bus = EventBus::new(4);
        bus.publish(RealtimeEvent::NewOrder);

        let mut rx = bus.subscribe();
        bus.publish(RealtimeEvent::OrderStatusUpdated { order_item_id: 9, status: OrderItemStatus::Ready });
        assert_eq!(
            rx.recv().await.unwrap(),
            RealtimeEvent::OrderStatusUpdated { order_item_id: 9, status: OrderItemStatus::Ready }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_missed() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(RealtimeEvent::NewOrder);
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert_eq!(missed, 3),
            other => panic!("expected lag, got {:?}", other),
        }
    }
}
