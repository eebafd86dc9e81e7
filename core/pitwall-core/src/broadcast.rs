//! Fan-out of session state to connected clients.
//!
//! Store mutations arrive through [`Broadcaster::enqueue`] (called from the
//! store's notify callback) and are coalesced until the throttle window
//! closes, then sent as one `delta` frame. New clients get a full `snapshot`,
//! and every client gets a fresh snapshot on the snapshot interval.
//!
//! Each client has a bounded outbound queue drained by its own writer task.
//! A full queue or a failed write evicts that client only.
//!
//! Lock order: `clients` → store, `clients` → `pending` → `last_broadcast`,
//! store → `pending`. `enqueue` runs under the store's write lock, so it only
//! touches `pending`. Snapshots are taken and deltas drained while holding
//! `clients`, so a client never receives a delta older than its snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pitwall_protocol::{
    CompletionPayload, DeltaPayload, ErrorPayload, Frame, ServerMessage, SessionState,
    SnapshotPayload, SourceHealth, SourceHealthPayload,
};

use crate::config::BroadcastConfig;
use crate::error::SinkError;
use crate::session::{SessionStore, StoreChange};

pub type ClientId = u64;

/// Where a client's serialized frames go (a socket, a websocket, a channel).
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: String) -> Result<(), SinkError>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<String> {
    async fn send_frame(&mut self, frame: String) -> Result<(), SinkError> {
        self.send(frame).await.map_err(|_| SinkError::Closed)
    }
}

struct ClientSlot {
    tx: mpsc::Sender<String>,
    next_seq: u64,
    writer: JoinHandle<()>,
}

impl ClientSlot {
    /// Queues one frame. Sequence numbers advance only for queued frames, so
    /// a client sees a contiguous run starting at 1.
    fn deliver(&mut self, id: ClientId, message: &ServerMessage) -> bool {
        let frame = Frame {
            seq: self.next_seq,
            message: message.clone(),
        };
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(client_id = id, kind = message.kind(), error = %err, "Failed to serialize frame");
                return true;
            }
        };
        match self.tx.try_send(json) {
            Ok(()) => {
                self.next_seq += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = id, "Client queue full; evicting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client_id = id, "Client queue closed");
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct PendingDelta {
    updates: BTreeMap<String, SessionState>,
    removed: BTreeSet<String>,
}

impl PendingDelta {
    fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.removed.is_empty()
    }
}

/// Queues `message` to every client, evicting any that cannot take it.
fn deliver_all(clients: &mut HashMap<ClientId, ClientSlot>, message: &ServerMessage) {
    let failed: Vec<ClientId> = clients
        .iter_mut()
        .filter_map(|(id, slot)| (!slot.deliver(*id, message)).then_some(*id))
        .collect();
    for id in failed {
        if let Some(slot) = clients.remove(&id) {
            slot.writer.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Broadcaster {
    store: Arc<SessionStore>,
    config: BroadcastConfig,
    clients: Mutex<HashMap<ClientId, ClientSlot>>,
    next_client: AtomicU64,
    pending: Mutex<PendingDelta>,
    wake: Notify,
    /// What clients were last told about each session, for diffing.
    last_broadcast: Mutex<HashMap<String, SessionState>>,
    source_health: Mutex<Vec<SourceHealth>>,
}

impl Broadcaster {
    pub fn new(store: Arc<SessionStore>, config: BroadcastConfig) -> Self {
        Self {
            store,
            config,
            clients: Mutex::new(HashMap::new()),
            next_client: AtomicU64::new(0),
            pending: Mutex::new(PendingDelta::default()),
            wake: Notify::new(),
            last_broadcast: Mutex::new(HashMap::new()),
            source_health: Mutex::new(Vec::new()),
        }
    }

    /// Records a store mutation for the next delta.
    ///
    /// Meant to be called from a store notify callback: it never touches the
    /// store and never blocks on anything but the pending buffer.
    pub fn enqueue(&self, change: StoreChange) {
        if change.is_empty() {
            return;
        }
        {
            let mut pending = lock(&self.pending);
            for id in change.removed {
                pending.updates.remove(&id);
                pending.removed.insert(id);
            }
            for state in change.updated {
                pending.removed.remove(&state.id);
                pending.updates.insert(state.id.clone(), state);
            }
        }
        self.wake.notify_one();
    }

    /// Registers a client and queues its initial snapshot. Must be called
    /// from within a tokio runtime; the client's writer task is spawned here.
    pub fn add_client<S: FrameSink>(self: &Arc<Self>, sink: S) -> ClientId {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.config.client_queue_capacity.max(1));
        let writer = spawn_writer(Arc::downgrade(self), id, sink, rx);
        let mut slot = ClientSlot {
            tx,
            next_seq: 1,
            writer,
        };

        let mut clients = lock(&self.clients);
        let snapshot = self.snapshot_message();
        if slot.deliver(id, &snapshot) {
            clients.insert(id, slot);
            info!(client_id = id, clients = clients.len(), "Client connected");
        } else {
            slot.writer.abort();
        }
        id
    }

    pub fn remove_client(&self, id: ClientId) -> bool {
        let removed = lock(&self.clients).remove(&id);
        match removed {
            Some(slot) => {
                slot.writer.abort();
                info!(client_id = id, "Client disconnected");
                true
            }
            None => false,
        }
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Sends a message to every client, evicting any that cannot take it.
    pub fn broadcast(&self, message: ServerMessage) {
        let mut clients = lock(&self.clients);
        deliver_all(&mut clients, &message);
        debug!(kind = message.kind(), clients = clients.len(), "Broadcast");
    }

    /// Sends a message to one client. Returns false if the client is gone or
    /// was evicted.
    pub fn send_to(&self, id: ClientId, message: ServerMessage) -> bool {
        let mut clients = lock(&self.clients);
        let Some(slot) = clients.get_mut(&id) else {
            return false;
        };
        if slot.deliver(id, &message) {
            return true;
        }
        if let Some(slot) = clients.remove(&id) {
            slot.writer.abort();
        }
        false
    }

    /// Sends one client a fresh snapshot, e.g. after it reports a sequence gap.
    pub fn resync(&self, id: ClientId) -> bool {
        let mut clients = lock(&self.clients);
        let Some(slot) = clients.get_mut(&id) else {
            return false;
        };
        let snapshot = self.snapshot_message();
        if slot.deliver(id, &snapshot) {
            debug!(client_id = id, "Resynced client");
            return true;
        }
        if let Some(slot) = clients.remove(&id) {
            slot.writer.abort();
        }
        false
    }

    pub fn send_error(&self, id: ClientId, code: &str, message: impl Into<String>) -> bool {
        self.send_to(
            id,
            ServerMessage::Error(ErrorPayload {
                code: code.to_string(),
                message: message.into(),
            }),
        )
    }

    pub fn source_health(&self) -> Vec<SourceHealth> {
        lock(&self.source_health).clone()
    }

    /// Replaces the source health table, broadcasting it if anything changed.
    pub fn set_source_health(&self, mut sources: Vec<SourceHealth>) {
        sources.sort_by(|a, b| a.source.cmp(&b.source));
        {
            let mut current = lock(&self.source_health);
            if *current == sources {
                return;
            }
            *current = sources.clone();
        }
        self.broadcast(ServerMessage::SourceHealth(SourceHealthPayload { sources }));
    }

    fn snapshot_message(&self) -> ServerMessage {
        ServerMessage::Snapshot(SnapshotPayload {
            sessions: self.store.get_all(),
            source_health: self.source_health(),
        })
    }

    pub fn broadcast_snapshot(&self) {
        let mut clients = lock(&self.clients);
        if clients.is_empty() {
            return;
        }
        let snapshot = self.snapshot_message();
        deliver_all(&mut clients, &snapshot);
    }

    /// Sends everything queued since the last flush as one delta, followed by
    /// a `completion` for each session that just reached a terminal activity.
    /// Sessions identical to what clients last saw are left out.
    pub fn flush_pending(&self) {
        let mut clients = lock(&self.clients);
        let pending = std::mem::take(&mut *lock(&self.pending));
        if pending.is_empty() {
            return;
        }

        let mut updates = Vec::new();
        let mut completions = Vec::new();
        {
            let mut last = lock(&self.last_broadcast);
            for (id, state) in pending.updates {
                let previous = last.get(&id);
                if previous == Some(&state) {
                    continue;
                }
                if state.is_terminal() && !previous.is_some_and(SessionState::is_terminal) {
                    completions.push(CompletionPayload {
                        session_id: state.id.clone(),
                        activity: state.activity,
                        name: state.name.clone(),
                    });
                }
                last.insert(id, state.clone());
                updates.push(state);
            }
            for id in &pending.removed {
                last.remove(id);
            }
        }

        let removed: Vec<String> = pending.removed.into_iter().collect();
        if updates.is_empty() && removed.is_empty() {
            return;
        }
        updates.sort_by_key(|state| state.lane);

        deliver_all(
            &mut clients,
            &ServerMessage::Delta(DeltaPayload { updates, removed }),
        );
        for completion in completions {
            deliver_all(&mut clients, &ServerMessage::Completion(completion));
        }
        debug!(clients = clients.len(), "Flushed delta");
    }

    /// Flush loop: waits for queued changes, lets the throttle window fill,
    /// then sends one delta. Also sends periodic snapshots. Frames still
    /// queued at cancellation are not guaranteed to be delivered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut snapshots = tokio::time::interval(self.config.snapshot_interval());
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);
        snapshots.tick().await;
        let throttle = self.config.throttle();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(throttle) => {}
                    }
                    self.flush_pending();
                }
                _ = snapshots.tick() => self.broadcast_snapshot(),
            }
        }

        let clients = std::mem::take(&mut *lock(&self.clients));
        for slot in clients.into_values() {
            slot.writer.abort();
        }
        debug!("Broadcaster stopped");
    }
}

fn spawn_writer<S: FrameSink>(
    broadcaster: Weak<Broadcaster>,
    id: ClientId,
    mut sink: S,
    mut rx: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = sink.send_frame(frame).await {
                debug!(client_id = id, error = %err, "Client write failed");
                if let Some(broadcaster) = broadcaster.upgrade() {
                    broadcaster.remove_client(id);
                }
                return;
            }
        }
    })
}
