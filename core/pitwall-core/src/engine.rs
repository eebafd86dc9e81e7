//! PitwallEngine - wires the store, tracker and broadcaster together.
//!
//! The engine is the one place that knows how the parts connect:
//! - store mutations are fed to the broadcaster from inside the store's
//!   notify callback
//! - tracker unlocks and XP progress are re-broadcast as wire messages
//! - loadout changes are persisted by the tracker and announced as `equipped`
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use pitwall_core::{PitwallConfig, PitwallEngine, StorageConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let storage = StorageConfig::discover()?;
//! let cancel = CancellationToken::new();
//! let (engine, tasks) = PitwallEngine::open(&storage, &PitwallConfig::default(), cancel.clone())?;
//! engine.push_sessions(sessions);
//! cancel.cancel();
//! tasks.join().await;
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pitwall_protocol::{ClientMessage, EquippedPayload, ServerMessage, SessionState, SourceHealth};

use crate::api::{
    AchievementsResponse, ChallengesResponse, HealthResponse, SessionsResponse, StatsResponse,
};
use crate::broadcast::{Broadcaster, ClientId, FrameSink};
use crate::config::PitwallConfig;
use crate::error::{QueueClosed, RewardError};
use crate::persistence::PersistenceStore;
use crate::session::{event_channel, Event, EventSender, SessionStore};
use crate::stats::{Stats, StatsTracker};
use crate::storage::StorageConfig;

/// Handles to the engine's background loops.
pub struct EngineTasks {
    tracker: JoinHandle<()>,
    broadcaster: JoinHandle<()>,
}

impl EngineTasks {
    /// Waits for both loops to finish. The tracker's final save has completed
    /// once this returns.
    pub async fn join(self) {
        if let Err(err) = self.tracker.await {
            warn!(error = %err, "Stats tracker task failed");
        }
        if let Err(err) = self.broadcaster.await {
            warn!(error = %err, "Broadcaster task failed");
        }
    }
}

pub struct PitwallEngine {
    season: String,
    store: Arc<SessionStore>,
    tracker: Arc<StatsTracker>,
    broadcaster: Arc<Broadcaster>,
    events: EventSender,
}

impl PitwallEngine {
    /// Loads `stats.json` from `storage`, rotating to the configured season,
    /// and starts the engine.
    pub fn open(
        storage: &StorageConfig,
        config: &PitwallConfig,
        cancel: CancellationToken,
    ) -> crate::Result<(Self, EngineTasks)> {
        let now = Utc::now();
        let season = config.season.resolve_label(now);
        let persistence = PersistenceStore::new(storage.stats_file());
        let stats = persistence.load_season(&season, now)?;
        info!(
            path = %persistence.path().display(),
            season = %season,
            tier = stats.battle_pass.tier,
            achievements = stats.achievements_unlocked.len(),
            "Loaded stats"
        );
        Ok(Self::launch(config, stats, Some(persistence), cancel))
    }

    /// Starts the tracker and broadcaster loops over `stats`. Must be called
    /// from within a tokio runtime.
    pub fn launch(
        config: &PitwallConfig,
        stats: Stats,
        persistence: Option<PersistenceStore>,
        cancel: CancellationToken,
    ) -> (Self, EngineTasks) {
        let season = stats.battle_pass.season.clone();
        let store = Arc::new(SessionStore::new());
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&store),
            config.broadcast.clone(),
        ));

        let mut tracker =
            StatsTracker::new(stats).with_save_interval(config.tracker.save_interval());
        if let Some(persistence) = persistence {
            tracker = tracker.with_persistence(persistence);
        }
        let tracker = {
            let on_unlock = Arc::clone(&broadcaster);
            let on_progress = Arc::clone(&broadcaster);
            Arc::new(
                tracker
                    .on_achievement(move |payload| {
                        on_unlock.broadcast(ServerMessage::AchievementUnlocked(payload))
                    })
                    .on_battle_pass_progress(move |payload| {
                        on_progress.broadcast(ServerMessage::BattlepassProgress(payload))
                    }),
            )
        };

        let (events, receiver) = event_channel(config.tracker.event_queue_capacity);
        let tasks = EngineTasks {
            tracker: tokio::spawn(Arc::clone(&tracker).run(receiver, cancel.clone())),
            broadcaster: tokio::spawn(Arc::clone(&broadcaster).run(cancel)),
        };

        let engine = Self {
            season,
            store,
            tracker,
            broadcaster,
            events,
        };
        (engine, tasks)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<StatsTracker> {
        &self.tracker
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// A producer handle for the event queue.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Monitor-facing
    // ─────────────────────────────────────────────────────────────────────────────

    /// Applies a batch of session snapshots atomically and queues the delta.
    pub fn push_sessions(&self, sessions: Vec<SessionState>) -> Vec<SessionState> {
        let broadcaster = &self.broadcaster;
        self.store
            .batch_update_and_notify(sessions, |change| broadcaster.enqueue(change))
    }

    pub fn remove_sessions(&self, ids: &[String]) -> Vec<String> {
        let broadcaster = &self.broadcaster;
        self.store
            .batch_remove_and_notify(ids, |change| broadcaster.enqueue(change))
    }

    /// Queues a lifecycle event, waiting while the queue is full.
    pub async fn push_event(&self, event: Event) -> Result<(), QueueClosed> {
        self.events.send(event).await
    }

    /// Waits until every event queued so far has been processed.
    pub async fn flush(&self) -> Result<(), QueueClosed> {
        self.events.flush().await
    }

    pub fn set_source_health(&self, sources: Vec<SourceHealth>) {
        self.broadcaster.set_source_health(sources);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn health(&self) -> HealthResponse {
        HealthResponse::ok(
            self.season.clone(),
            self.store.len(),
            self.store.active_count(),
            self.broadcaster.client_count(),
        )
    }

    pub fn sessions(&self) -> SessionsResponse {
        let sessions = self.store.get_all();
        let active_count = sessions.iter().filter(|state| !state.is_terminal()).count();
        SessionsResponse {
            sessions,
            active_count,
            source_health: self.broadcaster.source_health(),
        }
    }

    pub fn stats(&self) -> StatsResponse {
        StatsResponse {
            stats: self.tracker.stats(),
            battle_pass: self.tracker.battle_pass_progress(),
        }
    }

    pub fn achievements(&self) -> AchievementsResponse {
        AchievementsResponse::from_stats(&self.tracker.stats())
    }

    pub fn challenges(&self) -> ChallengesResponse {
        let challenges = self.tracker.challenges();
        ChallengesResponse {
            week_start: self.tracker.stats().weekly.week_start,
            challenges,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Loadout
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn equip(&self, reward_id: &str, slot: &str) -> Result<EquippedPayload, RewardError> {
        let equipped = self.tracker.equip(reward_id, slot)?;
        let payload = EquippedPayload { equipped };
        self.broadcaster
            .broadcast(ServerMessage::Equipped(payload.clone()));
        Ok(payload)
    }

    pub fn unequip(&self, slot: &str) -> Result<EquippedPayload, RewardError> {
        let equipped = self.tracker.unequip(slot)?;
        let payload = EquippedPayload { equipped };
        self.broadcaster
            .broadcast(ServerMessage::Equipped(payload.clone()));
        Ok(payload)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Subscribers
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn subscribe<S: FrameSink>(&self, sink: S) -> ClientId {
        self.broadcaster.add_client(sink)
    }

    pub fn unsubscribe(&self, id: ClientId) {
        self.broadcaster.remove_client(id);
    }

    /// Handles a message sent by a subscribed client. Failures are reported
    /// back to that client as an `error` frame.
    pub fn handle_client_message(&self, id: ClientId, message: ClientMessage) {
        let result = match message {
            ClientMessage::Resync => {
                self.broadcaster.resync(id);
                Ok(())
            }
            ClientMessage::Equip { reward_id, slot } => self.equip(&reward_id, &slot).map(|_| ()),
            ClientMessage::Unequip { slot } => self.unequip(&slot).map(|_| ()),
        };
        if let Err(err) = result {
            self.broadcaster.send_error(id, err.code(), err.to_string());
        }
    }
}
