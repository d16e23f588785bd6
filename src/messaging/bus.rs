//! Broadcast bus carrying [`AppEvent`]s to views.

use super::AppEvent;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

/// Sender half of the event bus.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<AppEvent>,
}

impl EventSender {
    /// Send an event.
    pub fn send(&self, event: AppEvent) -> Result<(), BusError> {
        self.tx.send(event).map_err(|_| BusError::Closed)?;
        Ok(())
    }

    /// Send an event, ignoring the absence of subscribers.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.send(event);
    }

    /// Send an info notice.
    pub fn info(&self, text: impl Into<String>) {
        self.publish(AppEvent::info(text));
    }

    /// Send a success notice.
    pub fn success(&self, text: impl Into<String>) {
        self.publish(AppEvent::success(text));
    }

    /// Send a warning notice.
    pub fn warning(&self, text: impl Into<String>) {
        self.publish(AppEvent::warning(text));
    }
}

/// Receiver half of the event bus.
pub struct EventReceiver {
    rx: broadcast::Receiver<AppEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<AppEvent, BusError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => BusError::Lagged(n),
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<AppEvent>, BusError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }

    /// Take every event that is already queued.
    ///
    /// Lag is skipped over; the missed events are gone.
    pub fn drain(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(event)) => events.push(event),
                Ok(None) | Err(BusError::Closed) => break,
                Err(BusError::Lagged(_)) => continue,
            }
        }
        events
    }
}

/// Event bus between the conversation manager and its views.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Get a sender.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Channel closed")]
    Closed,
    #[error("Lagged behind by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // EventBus Tests
    // =========================================================================

    #[test]
    fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let sender = bus.sender();

        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        sender.publish(AppEvent::PersonasChanged);

        assert_eq!(receiver1.try_recv().unwrap(), Some(AppEvent::PersonasChanged));
        assert_eq!(receiver2.try_recv().unwrap(), Some(AppEvent::PersonasChanged));
    }

    #[test]
    fn test_send_without_subscribers_is_closed() {
        let bus = EventBus::new();
        let result = bus.sender().send(AppEvent::PersonasChanged);
        assert!(matches!(result, Err(BusError::Closed)));

        // publish swallows it
        bus.sender().publish(AppEvent::PersonasChanged);
        bus.sender().info("ignored");
    }

    #[test]
    fn test_subscriber_sees_only_later_events() {
        let bus = EventBus::new();
        bus.sender().info("before");
        let mut receiver = bus.subscribe();
        bus.sender().info("after");

        assert_eq!(receiver.drain(), vec![AppEvent::info("after")]);
    }

    // =========================================================================
    // EventReceiver Tests
    // =========================================================================

    #[tokio::test]
    async fn test_recv_in_order() {
        let bus = EventBus::new();
        let sender = bus.sender();
        let mut receiver = bus.subscribe();

        sender.info("first");
        sender.warning("second");

        assert_eq!(receiver.recv().await.unwrap(), AppEvent::info("first"));
        assert_eq!(receiver.recv().await.unwrap(), AppEvent::warning("second"));
    }

    #[tokio::test]
    async fn test_recv_closed() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        drop(bus);

        assert!(matches!(receiver.recv().await, Err(BusError::Closed)));
    }

    #[test]
    fn test_try_recv_lagged() {
        let (tx, _) = broadcast::channel::<AppEvent>(2);
        let mut receiver = EventReceiver { rx: tx.subscribe() };

        for i in 0..5 {
            let _ = tx.send(AppEvent::info(format!("msg {}", i)));
        }

        assert!(matches!(receiver.try_recv(), Err(BusError::Lagged(3))));
    }

    #[test]
    fn test_drain_skips_lag() {
        let (tx, _) = broadcast::channel::<AppEvent>(2);
        let mut receiver = EventReceiver { rx: tx.subscribe() };

        for i in 0..5 {
            let _ = tx.send(AppEvent::info(format!("msg {}", i)));
        }

        assert_eq!(
            receiver.drain(),
            vec![AppEvent::info("msg 3"), AppEvent::info("msg 4")]
        );
    }

    #[test]
    fn test_bus_error_display() {
        assert_eq!(BusError::Closed.to_string(), "Channel closed");
        assert_eq!(BusError::Lagged(42).to_string(), "Lagged behind by 42 events");
    }
}
