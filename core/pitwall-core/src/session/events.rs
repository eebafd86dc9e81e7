//! Lifecycle events and the bounded queue that carries them to the stats tracker.
//!
//! The queue is FIFO with a single consumer. When the tracker falls behind,
//! [`EventSender::send`] waits for capacity instead of dropping events, so the
//! tracker always sees every event in the order it was sent.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use pitwall_protocol::SessionState;

use crate::error::QueueClosed;

pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First sighting of a session. Fires once per session lifetime.
    New,
    /// Any observed change to a live session.
    Update,
    /// The session reached Complete, Errored or Lost. Fires exactly once,
    /// after every `Update` for that session.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub state: SessionState,
    /// Active session count at the moment the event was produced.
    pub active_count: usize,
}

impl Event {
    pub fn new(kind: EventType, state: SessionState, active_count: usize) -> Self {
        Self {
            kind,
            state,
            active_count,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.id
    }
}

#[derive(Debug)]
pub(crate) enum TrackerMessage {
    Event(Box<Event>),
    /// Acknowledged once every message queued before it has been processed.
    Flush(oneshot::Sender<()>),
}

/// Creates the bounded event queue between the monitor and the tracker.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer half. Cloneable so several feeders can share one ordered queue;
/// ordering is preserved per sender.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<TrackerMessage>,
}

impl EventSender {
    /// Enqueues an event, waiting while the queue is full.
    pub async fn send(&self, event: Event) -> Result<(), QueueClosed> {
        self.tx
            .send(TrackerMessage::Event(Box::new(event)))
            .await
            .map_err(|_| QueueClosed)
    }

    /// Blocking variant for producers running outside the async runtime.
    /// Panics if called from within an async context.
    pub fn blocking_send(&self, event: Event) -> Result<(), QueueClosed> {
        self.tx
            .blocking_send(TrackerMessage::Event(Box::new(event)))
            .map_err(|_| QueueClosed)
    }

    /// Waits until every event sent before this call has been fully processed
    /// by the tracker.
    pub async fn flush(&self) -> Result<(), QueueClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(TrackerMessage::Flush(ack_tx))
            .await
            .map_err(|_| QueueClosed)?;
        ack_rx.await.map_err(|_| QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the tracker's run loop.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<TrackerMessage>,
}

impl EventReceiver {
    pub(crate) async fn recv(&mut self) -> Option<TrackerMessage> {
        self.rx.recv().await
    }

    pub(crate) fn try_recv(&mut self) -> Option<TrackerMessage> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting new events; already-queued messages can still be drained.
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}
