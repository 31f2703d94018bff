use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-reactor broadcast of committed events.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a reactor's events. Creates the channel if needed.
    pub fn subscribe(&self, serial_no: &str) -> broadcast::Receiver<Event> {
        self.channels
            .entry(serial_no.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to the event's reactor, and for moves also to the reactor the
    /// booking left. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let targets = std::iter::once(event.reactor_serial_no())
            .chain(event.previous_reactor_serial_no());
        for serial in targets {
            if let Some(sender) = self.channels.get(serial) {
                let _ = sender.send(event.clone());
            }
        }
    }

    pub fn remove(&self, serial_no: &str) {
        self.channels.remove(serial_no);
    }
}
