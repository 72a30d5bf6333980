use tokio::sync::mpsc;
use tracing::debug;

pub type ListenerId = u64;

struct ListenerSession {
    id: ListenerId,
    tx: mpsc::UnboundedSender<String>,
}

/// Open websocket sessions waiting for river events.
#[derive(Default)]
pub struct Listeners {
    sessions: Vec<ListenerSession>,
    next_id: ListenerId,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; events arrive on the returned receiver.
    pub fn register(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.push(ListenerSession { id, tx });
        (id, rx)
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.sessions.retain(|s| s.id != id);
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Offer `event` to every session. Closed sessions are dropped without
    /// affecting delivery to the rest. Returns the number delivered.
    pub fn notify(&mut self, event: &str) -> usize {
        let mut delivered = 0;
        self.sessions.retain(|s| match s.tx.send(event.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!(listener = s.id, "Dropping closed listener");
                false
            }
        });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_reaches_every_session() {
        let mut listeners = Listeners::new();
        let (_, mut rx1) = listeners.register();
        let (_, mut rx2) = listeners.register();

        assert_eq!(listeners.notify("updated news.opml"), 2);
        assert_eq!(rx1.try_recv().unwrap(), "updated news.opml");
        assert_eq!(rx2.try_recv().unwrap(), "updated news.opml");
    }

    #[test]
    fn test_closed_session_does_not_block_others() {
        let mut listeners = Listeners::new();
        let (_, rx1) = listeners.register();
        let (_, mut rx2) = listeners.register();
        drop(rx1);

        assert_eq!(listeners.notify("item {}"), 1);
        assert_eq!(rx2.try_recv().unwrap(), "item {}");
        assert_eq!(listeners.count(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut listeners = Listeners::new();
        let (id, _rx) = listeners.register();
        listeners.unregister(id);
        assert_eq!(listeners.count(), 0);
        assert_eq!(listeners.notify("x"), 0);
    }
}
