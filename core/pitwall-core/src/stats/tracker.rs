//! The stats tracker: the single consumer of the event queue.
//!
//! Each event is folded into [`Stats`] in one critical section: counters,
//! XP awards, the weekly snapshot, challenge completion and achievement
//! evaluation all see the same, fully applied state. Notification callbacks
//! run after the lock is released.
//!
//! Saving clones the stats under the lock and writes outside it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pitwall_protocol::{
    AchievementPayload, Activity, BattlePassProgressPayload, RewardSlot, SessionState, XpGrant,
};

use super::types::Stats;
use crate::achievements;
use crate::challenges::{self, ChallengeProgress};
use crate::error::{PersistenceError, RewardError};
use crate::persistence::PersistenceStore;
use crate::rewards::{self, Reward};
use crate::session::{Event, EventReceiver, EventType, TrackerMessage};

pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(5);
pub const RECENT_XP_LIMIT: usize = 10;

const XP_SESSION_START: u64 = 10;
const XP_COMPLETION: u64 = 50;
const XP_CONTEXT_HALF: u64 = 25;
const XP_CONTEXT_REDLINE: u64 = 50;
const XP_STREAK_BONUS: u64 = 100;
const STREAK_BONUS_EVERY: u64 = 5;
const XP_NEW_SOURCE: u64 = 150;
const XP_NEW_MODEL: u64 = 150;

const PHOTO_FINISH_WINDOW_MS: i64 = 10_000;
const HIGH_UTILIZATION: f64 = 0.5;
const REDLINE_UTILIZATION: f64 = 0.9;

const MILESTONE_HALF: u8 = 1 << 0;
const MILESTONE_REDLINE: u8 = 1 << 1;

pub type AchievementCallback = Box<dyn Fn(AchievementPayload) + Send + Sync>;
pub type ProgressCallback = Box<dyn Fn(BattlePassProgressPayload) + Send + Sync>;

/// Per-session bookkeeping that lives only as long as the session.
#[derive(Debug, Default)]
struct SessionWork {
    milestones: u8,
    /// Last cumulative token count seen, for deriving burn deltas.
    last_tokens: u64,
}

#[derive(Debug, Default)]
struct Notifications {
    achievements: Vec<AchievementPayload>,
    progress: Option<BattlePassProgressPayload>,
}

#[derive(Debug)]
struct TrackerState {
    stats: Stats,
    sessions: HashMap<String, SessionWork>,
    /// Sessions whose `New` event has been counted.
    counted: HashSet<String>,
    /// Live sessions currently at or above [`HIGH_UTILIZATION`].
    high_utilization: HashSet<String>,
    recent_xp: VecDeque<XpGrant>,
    generation: u64,
    saved_generation: u64,
}

impl TrackerState {
    fn new(stats: Stats) -> Self {
        Self {
            stats,
            sessions: HashMap::new(),
            counted: HashSet::new(),
            high_utilization: HashSet::new(),
            recent_xp: VecDeque::with_capacity(RECENT_XP_LIMIT),
            generation: 0,
            saved_generation: 0,
        }
    }

    fn grant(&mut self, amount: u64, reason: impl Into<String>) {
        self.stats.battle_pass.award_xp(amount);
        if self.recent_xp.len() == RECENT_XP_LIMIT {
            self.recent_xp.pop_front();
        }
        self.recent_xp.push_back(XpGrant {
            amount,
            reason: reason.into(),
        });
    }

    fn apply(&mut self, event: &Event, now: DateTime<Utc>) -> Notifications {
        let start_xp = self.stats.battle_pass.xp;
        let start_tier = self.stats.battle_pass.tier;

        if challenges::rotate_if_needed(&mut self.stats.weekly, now) {
            info!(
                week_start = ?self.stats.weekly.week_start,
                active = ?self.stats.weekly.active,
                "Rotated weekly challenges"
            );
        }

        let state = &event.state;
        if event.kind == EventType::New {
            self.record_new(state);
        }
        self.observe(state, event.active_count);
        if event.kind == EventType::Terminal {
            self.record_terminal(state, now);
        }

        for challenge in challenges::award_completed(&mut self.stats.weekly) {
            info!(challenge = challenge.id, xp = challenge.xp, "Weekly challenge complete");
            self.grant(challenge.xp, format!("Challenge: {}", challenge.name));
        }

        // Achievement XP can satisfy tier-based achievements, so evaluate
        // until nothing new unlocks.
        let mut unlocked = Vec::new();
        loop {
            let batch = achievements::evaluate(&mut self.stats, now);
            if batch.is_empty() {
                break;
            }
            for achievement in batch {
                info!(achievement = achievement.id, tier = ?achievement.tier, "Achievement unlocked");
                self.grant(achievement.tier.xp(), format!("Achievement: {}", achievement.name));
                unlocked.push(achievement.payload());
            }
        }

        self.generation += 1;

        let mut progress = None;
        if self.stats.battle_pass.xp != start_xp {
            let tier = self.stats.battle_pass.tier;
            if tier > start_tier {
                info!(from = start_tier, to = tier, "Battle pass tier up");
            }
            progress = Some(self.progress_payload(rewards::for_tiers_between(start_tier, tier)));
        }

        Notifications {
            achievements: unlocked,
            progress,
        }
    }

    fn record_new(&mut self, state: &SessionState) {
        if !self.counted.insert(state.id.clone()) {
            debug!(session_id = %state.id, "Ignoring repeated new-session event");
            return;
        }

        self.stats.total_sessions += 1;
        self.stats.weekly.snapshot.sessions_started += 1;
        self.grant(XP_SESSION_START, "Session started");

        if !state.source.is_empty() {
            let count = self
                .stats
                .sessions_per_source
                .entry(state.source.clone())
                .or_insert(0);
            *count += 1;
            let first = *count == 1;
            self.stats.weekly.snapshot.sources.insert(state.source.clone());
            if first {
                self.grant(XP_NEW_SOURCE, format!("New source: {}", state.source));
            }
        }

        if !state.model.is_empty() {
            let count = self
                .stats
                .sessions_per_model
                .entry(state.model.clone())
                .or_insert(0);
            *count += 1;
            let first = *count == 1;
            self.stats.weekly.snapshot.models.insert(state.model.clone());
            if first {
                self.grant(XP_NEW_MODEL, format!("New model: {}", state.model));
            }
        }

        info!(
            session_id = %state.id,
            source = %state.source,
            model = %state.model,
            "Session started"
        );
    }

    fn observe(&mut self, state: &SessionState, active_count: usize) {
        let utilization = if state.context_utilization.is_finite() {
            state.context_utilization
        } else {
            0.0
        };

        let work = self.sessions.entry(state.id.clone()).or_default();
        let burned = state.tokens_used.saturating_sub(work.last_tokens);
        work.last_tokens = state.tokens_used;

        let crossed_half = utilization >= HIGH_UTILIZATION && work.milestones & MILESTONE_HALF == 0;
        if crossed_half {
            work.milestones |= MILESTONE_HALF;
        }
        let crossed_redline =
            utilization >= REDLINE_UTILIZATION && work.milestones & MILESTONE_REDLINE == 0;
        if crossed_redline {
            work.milestones |= MILESTONE_REDLINE;
        }

        self.stats.total_tokens_burned = self.stats.total_tokens_burned.saturating_add(burned);
        self.stats.weekly.snapshot.tokens_burned =
            self.stats.weekly.snapshot.tokens_burned.saturating_add(burned);

        if crossed_half {
            self.grant(XP_CONTEXT_HALF, "Context past 50%");
        }
        if crossed_redline {
            self.stats.weekly.snapshot.redline_sessions += 1;
            self.grant(XP_CONTEXT_REDLINE, "Context past 90%");
        }

        if !state.is_terminal() && utilization >= HIGH_UTILIZATION {
            self.high_utilization.insert(state.id.clone());
        } else {
            self.high_utilization.remove(&state.id);
        }

        let stats = &mut self.stats;
        stats.max_high_utilization_concurrent = stats
            .max_high_utilization_concurrent
            .max(self.high_utilization.len() as u64);
        stats.max_context_utilization = stats.max_context_utilization.max(utilization);
        if state.burn_rate.is_finite() {
            stats.max_burn_rate = stats.max_burn_rate.max(state.burn_rate);
        }
        stats.max_tool_calls = stats.max_tool_calls.max(state.tool_call_count);
        stats.max_messages = stats.max_messages.max(state.message_count);
        stats.max_duration_secs = stats
            .max_duration_secs
            .max(state.elapsed(state.last_activity_at).num_seconds());

        let active = active_count as u64;
        stats.max_concurrent = stats.max_concurrent.max(active);
        stats.weekly.snapshot.max_concurrent = stats.weekly.snapshot.max_concurrent.max(active);
    }

    fn record_terminal(&mut self, state: &SessionState, now: DateTime<Utc>) {
        match state.activity {
            Activity::Complete => {
                let stats = &mut self.stats;
                stats.total_completions += 1;
                if !state.source.is_empty() {
                    *stats
                        .completions_per_source
                        .entry(state.source.clone())
                        .or_insert(0) += 1;
                }
                stats.consecutive_completions += 1;
                stats.best_streak = stats.best_streak.max(stats.consecutive_completions);

                let weekly = &mut stats.weekly.snapshot;
                weekly.completions += 1;
                weekly.best_streak = weekly.best_streak.max(stats.consecutive_completions);

                let finished_at = state.completed_at.unwrap_or(now);
                if let Some(previous) = stats.last_completion_at {
                    let gap_ms = finished_at
                        .signed_duration_since(previous)
                        .num_milliseconds()
                        .abs();
                    if gap_ms <= PHOTO_FINISH_WINDOW_MS {
                        stats.photo_finish_seen = true;
                        weekly.photo_finishes += 1;
                        info!(session_id = %state.id, gap_ms, "Photo finish");
                    }
                }
                stats.last_completion_at = Some(match stats.last_completion_at {
                    Some(previous) => previous.max(finished_at),
                    None => finished_at,
                });

                let streak = stats.consecutive_completions;
                self.grant(XP_COMPLETION, "Session complete");
                if streak % STREAK_BONUS_EVERY == 0 {
                    self.grant(XP_STREAK_BONUS, format!("{} in a row", streak));
                }
            }
            Activity::Errored => {
                self.stats.total_errors += 1;
                self.stats.consecutive_completions = 0;
                self.stats.weekly.snapshot.errors += 1;
            }
            Activity::Lost => {
                self.stats.total_lost += 1;
                self.stats.consecutive_completions = 0;
            }
            other => {
                warn!(
                    session_id = %state.id,
                    activity = other.as_str(),
                    "Terminal event carries a non-terminal activity"
                );
            }
        }

        info!(session_id = %state.id, activity = state.activity.as_str(), "Session finished");

        self.sessions.remove(&state.id);
        self.counted.remove(&state.id);
        self.high_utilization.remove(&state.id);
    }

    fn progress_payload(&self, rewards: Vec<&Reward>) -> BattlePassProgressPayload {
        let battle_pass = &self.stats.battle_pass;
        BattlePassProgressPayload {
            xp: battle_pass.xp,
            tier: battle_pass.tier,
            tier_progress: battle_pass.tier_progress(),
            recent_xp: self.recent_xp.iter().cloned().collect(),
            rewards: rewards.into_iter().map(Reward::info).collect(),
        }
    }
}

/// Owns the [`Stats`] aggregate. Share it behind an `Arc`; the event loop is
/// [`StatsTracker::run`].
pub struct StatsTracker {
    state: Mutex<TrackerState>,
    persistence: Option<PersistenceStore>,
    save_interval: Duration,
    on_achievement: Option<AchievementCallback>,
    on_progress: Option<ProgressCallback>,
}

impl StatsTracker {
    pub fn new(stats: Stats) -> Self {
        Self {
            state: Mutex::new(TrackerState::new(stats)),
            persistence: None,
            save_interval: DEFAULT_SAVE_INTERVAL,
            on_achievement: None,
            on_progress: None,
        }
    }

    pub fn with_persistence(mut self, persistence: PersistenceStore) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Called once per newly unlocked achievement, outside the tracker lock.
    pub fn on_achievement<F>(mut self, callback: F) -> Self
    where
        F: Fn(AchievementPayload) + Send + Sync + 'static,
    {
        self.on_achievement = Some(Box::new(callback));
        self
    }

    /// Called after any event that changed battle pass XP, outside the tracker lock.
    pub fn on_battle_pass_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(BattlePassProgressPayload) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    // Every mutation completes before its guard drops, so a poisoned lock
    // still guards consistent stats.
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Folds one event into the stats using the current time.
    pub fn process(&self, event: &Event) {
        self.process_at(event, Utc::now());
    }

    pub fn process_at(&self, event: &Event, now: DateTime<Utc>) {
        let notifications = self.lock().apply(event, now);

        if let Some(callback) = &self.on_achievement {
            for payload in notifications.achievements {
                callback(payload);
            }
        }
        if let (Some(callback), Some(progress)) = (&self.on_progress, notifications.progress) {
            callback(progress);
        }
    }

    /// Deep copy of the current stats.
    pub fn stats(&self) -> Stats {
        self.lock().stats.clone()
    }

    /// Progress of this week's challenges, rotating first if the week has turned.
    pub fn challenges(&self) -> Vec<ChallengeProgress> {
        self.challenges_at(Utc::now())
    }

    pub fn challenges_at(&self, now: DateTime<Utc>) -> Vec<ChallengeProgress> {
        let mut state = self.lock();
        if challenges::rotate_if_needed(&mut state.stats.weekly, now) {
            state.generation += 1;
        }
        challenges::progress(&state.stats.weekly)
    }

    /// Current battle pass standing with the recent XP ledger.
    pub fn battle_pass_progress(&self) -> BattlePassProgressPayload {
        self.lock().progress_payload(Vec::new())
    }

    pub fn equip(
        &self,
        reward_id: &str,
        slot: &str,
    ) -> Result<BTreeMap<RewardSlot, String>, RewardError> {
        let mut state = self.lock();
        let reward = rewards::equip(&mut state.stats, reward_id, slot)?;
        state.generation += 1;
        info!(reward = reward.id, slot = %reward.slot, "Equipped reward");
        Ok(state.stats.equipped.clone())
    }

    pub fn unequip(&self, slot: &str) -> Result<BTreeMap<RewardSlot, String>, RewardError> {
        let mut state = self.lock();
        if let Some(previous) = rewards::unequip(&mut state.stats, slot)? {
            state.generation += 1;
            info!(reward = %previous, slot, "Unequipped reward");
        }
        Ok(state.stats.equipped.clone())
    }

    /// True if anything changed since the last successful save.
    pub fn is_dirty(&self) -> bool {
        let state = self.lock();
        state.generation != state.saved_generation
    }

    /// Writes the stats unconditionally. A no-op without a persistence store.
    pub fn save(&self) -> Result<(), PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let (stats, generation) = {
            let state = self.lock();
            (state.stats.clone(), state.generation)
        };
        persistence.save(&stats)?;
        let mut state = self.lock();
        state.saved_generation = state.saved_generation.max(generation);
        Ok(())
    }

    /// Writes the stats only if they changed since the last save.
    pub fn save_if_dirty(&self) -> Result<bool, PersistenceError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn handle(&self, message: TrackerMessage) {
        match message {
            TrackerMessage::Event(event) => self.process(&event),
            TrackerMessage::Flush(ack) => {
                // The flusher may have given up waiting.
                let _ = ack.send(());
            }
        }
    }

    async fn persist(self: &Arc<Self>, force: bool) {
        if self.persistence.is_none() {
            return;
        }
        let tracker = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || {
            if force {
                tracker.save().map(|()| true)
            } else {
                tracker.save_if_dirty()
            }
        })
        .await;

        match result {
            Ok(Ok(true)) => debug!("Saved stats"),
            Ok(Ok(false)) => {}
            Ok(Err(err)) => warn!(error = %err, "Failed to save stats; will retry"),
            Err(err) => warn!(error = %err, "Stats save task failed"),
        }
    }

    /// The event loop. Processes events in arrival order, saves on the
    /// interval when dirty, and on cancellation (or once every sender is
    /// gone) stops accepting events, drains what is queued, and saves.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.save_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_ms = self.save_interval.as_millis() as u64, "Stats tracker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = events.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = ticker.tick() => self.persist(false).await,
            }
        }

        events.close();
        let mut drained = 0usize;
        while let Some(message) = events.try_recv() {
            self.handle(message);
            drained += 1;
        }

        self.persist(true).await;
        info!(drained, "Stats tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::event_channel;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn session(id: &str) -> SessionState {
        let mut state = SessionState::new(id, wednesday());
        state.source = "claude".to_string();
        state.model = "opus".to_string();
        state
    }

    fn event(kind: EventType, state: SessionState, active: usize) -> Event {
        Event::new(kind, state, active)
    }

    fn finished(id: &str, activity: Activity, at: DateTime<Utc>) -> Event {
        let mut state = session(id);
        state.activity = activity;
        state.completed_at = Some(at);
        event(EventType::Terminal, state, 0)
    }

    #[test]
    fn repeated_new_event_counts_once() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        let new = event(EventType::New, session("a"), 1);
        tracker.process_at(&new, wednesday());
        tracker.process_at(&new, wednesday());

        let stats = tracker.stats();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.sessions_per_source["claude"], 1);
        assert_eq!(stats.weekly.snapshot.sessions_started, 1);
    }

    #[test]
    fn new_session_grants_start_source_and_model_xp_once() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        tracker.process_at(&event(EventType::New, session("a"), 1), wednesday());
        let after_first = tracker.stats().battle_pass.xp;
        // start + new source + new model + first_lap (Bronze)
        assert_eq!(after_first, 10 + 150 + 150 + 100);

        tracker.process_at(&event(EventType::New, session("b"), 2), wednesday());
        let stats = tracker.stats();
        // start + side_by_side (Bronze)
        assert_eq!(stats.battle_pass.xp, after_first + 10 + 100);
    }

    #[test]
    fn token_burn_uses_cumulative_deltas() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        let mut state = session("a");
        tracker.process_at(&event(EventType::New, state.clone(), 1), wednesday());
        for tokens in [10_000, 25_000, 40_000] {
            state.tokens_used = tokens;
            tracker.process_at(&event(EventType::Update, state.clone(), 1), wednesday());
        }

        let stats = tracker.stats();
        assert_eq!(stats.weekly.snapshot.tokens_burned, 40_000);
        assert_eq!(stats.total_tokens_burned, 40_000);
    }

    #[test]
    fn reused_session_id_starts_fresh_after_terminal() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        let mut state = session("a");
        state.tokens_used = 5_000;
        tracker.process_at(&event(EventType::New, state.clone(), 1), wednesday());
        state.activity = Activity::Complete;
        tracker.process_at(&event(EventType::Terminal, state, 0), wednesday());

        let mut again = session("a");
        again.tokens_used = 3_000;
        tracker.process_at(&event(EventType::New, again, 1), wednesday());

        let stats = tracker.stats();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.weekly.snapshot.tokens_burned, 8_000);
    }

    #[test]
    fn context_milestones_fire_once_per_session() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        let mut state = session("a");
        tracker.process_at(&event(EventType::New, state.clone(), 1), wednesday());

        for utilization in [0.55, 0.6, 0.91, 0.92, 0.5] {
            state.context_utilization = utilization;
            tracker.process_at(&event(EventType::Update, state.clone(), 1), wednesday());
        }

        let progress = tracker.battle_pass_progress();
        let half = progress
            .recent_xp
            .iter()
            .filter(|grant| grant.reason == "Context past 50%")
            .count();
        let redline = progress
            .recent_xp
            .iter()
            .filter(|grant| grant.reason == "Context past 90%")
            .count();
        assert_eq!((half, redline), (1, 1));
        assert_eq!(tracker.stats().weekly.snapshot.redline_sessions, 1);
    }

    #[test]
    fn streaks_reset_on_error_and_loss() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        let t = wednesday();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            tracker.process_at(&finished(id, Activity::Complete, t + chrono::Duration::minutes(i as i64)), t);
        }
        assert_eq!(tracker.stats().consecutive_completions, 3);

        tracker.process_at(&finished("d", Activity::Lost, t), t);
        let stats = tracker.stats();
        assert_eq!(stats.consecutive_completions, 0);
        assert_eq!(stats.total_lost, 1);
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.best_streak, 3);

        tracker.process_at(&finished("e", Activity::Errored, t), t);
        let stats = tracker.stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.weekly.snapshot.errors, 1);
    }

    #[test]
    fn every_fifth_completion_grants_streak_bonus() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        let t = wednesday();
        for i in 0..5 {
            let at = t + chrono::Duration::minutes(i);
            tracker.process_at(&finished(&format!("s{}", i), Activity::Complete, at), at);
        }
        let progress = tracker.battle_pass_progress();
        assert!(progress.recent_xp.iter().any(|grant| grant.reason == "5 in a row"));
    }

    #[test]
    fn high_utilization_concurrency_tracks_live_sessions() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        for id in ["a", "b"] {
            let mut state = session(id);
            state.context_utilization = 0.7;
            tracker.process_at(&event(EventType::Update, state, 2), wednesday());
        }
        assert_eq!(tracker.stats().max_high_utilization_concurrent, 2);

        let mut done = session("a");
        done.context_utilization = 0.7;
        done.activity = Activity::Complete;
        tracker.process_at(&event(EventType::Terminal, done, 1), wednesday());

        let mut third = session("c");
        third.context_utilization = 0.8;
        tracker.process_at(&event(EventType::Update, third, 2), wednesday());
        assert_eq!(tracker.stats().max_high_utilization_concurrent, 2);
    }

    #[test]
    fn callbacks_receive_unlocks_and_progress() {
        let unlocked = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let tracker = {
            let unlocked = Arc::clone(&unlocked);
            let progress = Arc::clone(&progress);
            StatsTracker::new(Stats::new("s1"))
                .on_achievement(move |payload| unlocked.lock().unwrap().push(payload.id))
                .on_battle_pass_progress(move |payload| progress.lock().unwrap().push(payload.xp))
        };

        tracker.process_at(&event(EventType::New, session("a"), 1), wednesday());
        assert_eq!(*unlocked.lock().unwrap(), vec!["first_lap".to_string()]);
        assert_eq!(*progress.lock().unwrap(), vec![410]);

        // Nothing changes XP: no progress callback.
        tracker.process_at(&event(EventType::Update, session("a"), 1), wednesday());
        assert_eq!(progress.lock().unwrap().len(), 1);
    }

    #[test]
    fn tier_up_reports_newly_unlocked_rewards() {
        let mut stats = Stats::new("s1");
        stats.battle_pass.award_xp(950);
        let rewards = Arc::new(Mutex::new(Vec::new()));
        let tracker = {
            let rewards = Arc::clone(&rewards);
            StatsTracker::new(stats).on_battle_pass_progress(move |payload| {
                rewards
                    .lock()
                    .unwrap()
                    .extend(payload.rewards.into_iter().map(|reward| reward.id));
            })
        };

        tracker.process_at(&finished("a", Activity::Complete, wednesday()), wednesday());
        assert!(rewards.lock().unwrap().contains(&"paint_bronze".to_string()));
        tracker.equip("paint_bronze", "paint").expect("unlocked by tier 1");
    }

    #[test]
    fn recent_xp_is_capped() {
        let tracker = StatsTracker::new(Stats::new("s1"));
        for i in 0..20 {
            let mut state = session(&format!("s{}", i));
            state.source = String::new();
            state.model = String::new();
            tracker.process_at(&event(EventType::New, state, 1), wednesday());
        }
        assert_eq!(tracker.battle_pass_progress().recent_xp.len(), RECENT_XP_LIMIT);
    }

    #[test]
    fn save_if_dirty_skips_clean_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let tracker = StatsTracker::new(Stats::new("s1"))
            .with_persistence(PersistenceStore::new(&path));

        assert!(!tracker.save_if_dirty().unwrap());
        assert!(!path.exists());

        tracker.process_at(&event(EventType::New, session("a"), 1), wednesday());
        assert!(tracker.is_dirty());
        assert!(tracker.save_if_dirty().unwrap());
        assert!(!tracker.is_dirty());
        assert!(!tracker.save_if_dirty().unwrap());

        let saved = PersistenceStore::new(&path).load().unwrap();
        assert_eq!(saved.total_sessions, 1);
    }

    #[test]
    fn failed_save_stays_dirty_and_retries() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("state");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("stats.json");
        let tracker = StatsTracker::new(Stats::new("s1"))
            .with_persistence(PersistenceStore::new(&path));

        tracker.process_at(&event(EventType::New, session("a"), 1), wednesday());
        assert!(tracker.save_if_dirty().is_err());
        assert!(tracker.is_dirty());
        assert!(tracker.save_if_dirty().is_err());

        std::fs::remove_file(&blocker).unwrap();
        std::fs::create_dir(&blocker).unwrap();
        assert!(tracker.save_if_dirty().unwrap());
        assert!(!tracker.is_dirty());

        let saved = PersistenceStore::new(&path).load().unwrap();
        assert_eq!(saved.total_sessions, 1);
    }

    #[tokio::test]
    async fn flush_waits_for_queued_events() {
        let tracker = Arc::new(StatsTracker::new(Stats::new("s1")));
        let (tx, rx) = event_channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&tracker).run(rx, cancel.clone()));

        for i in 0..12 {
            tx.send(event(EventType::New, session(&format!("s{}", i)), 1))
                .await
                .unwrap();
        }
        tx.flush().await.unwrap();
        assert_eq!(tracker.stats().total_sessions, 12);

        cancel.cancel();
        task.await.unwrap();
        assert!(tx.send(event(EventType::New, session("late"), 1)).await.is_err());
    }

    #[tokio::test]
    async fn cancellation_drains_and_saves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let tracker = Arc::new(
            StatsTracker::new(Stats::new("s1"))
                .with_persistence(PersistenceStore::new(&path))
                .with_save_interval(Duration::from_secs(3600)),
        );
        let (tx, rx) = event_channel(8);
        for i in 0..3 {
            tx.send(event(EventType::New, session(&format!("s{}", i)), 1))
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        Arc::clone(&tracker).run(rx, cancel).await;

        let saved = PersistenceStore::new(&path).load().unwrap();
        assert_eq!(saved.total_sessions, 3);
        assert!(!tracker.is_dirty());
    }
}
