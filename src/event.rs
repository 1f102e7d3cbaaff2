//! Event mailbox feeding the coordinator.
//!
//! Transport callbacks and network driver callbacks run on their own
//! threads. They post into an unbounded channel and return immediately;
//! one task drains the channel into the coordinator.

use crate::network::NetworkEvent;
use crate::transport::TransportEvent;
use log::debug;
use tokio::sync::mpsc;

/// Anything the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Transport(TransportEvent),
    Network(NetworkEvent),
}

impl From<TransportEvent> for Event {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

impl From<NetworkEvent> for Event {
    fn from(event: NetworkEvent) -> Self {
        Self::Network(event)
    }
}

/// Posting side of the mailbox. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Queue an event. Returns `false` once the receiving loop is gone.
    pub fn post(&self, event: impl Into<Event>) -> bool {
        let event = event.into();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!("Mailbox closed, dropping {:?}", event);
                false
            }
        }
    }
}

/// Draining side of the mailbox.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Wait for the next event. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an event if one is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected sender/receiver pair.
pub fn mailbox() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}
