use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use pitwall_core::challenges::{self, week_start};
use pitwall_core::stats::{BattlePass, SeasonRecord, WeeklyChallengeState, WeeklySnapshot};
use pitwall_core::{
    event_channel, Event, EventType, PersistenceStore, PitwallConfig, PitwallEngine, Stats,
    StatsTracker, StorageConfig,
};
use pitwall_protocol::{Activity, RewardSlot, SessionState};

fn wednesday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
}

fn session(id: &str) -> SessionState {
    let mut state = SessionState::new(id, wednesday());
    state.source = "claude".to_string();
    state.model = "opus".to_string();
    state
}

fn completed(id: &str, at: DateTime<Utc>) -> Event {
    let mut state = session(id);
    state.activity = Activity::Complete;
    state.completed_at = Some(at);
    Event::new(EventType::Terminal, state, 0)
}

#[test]
fn photo_finish_unlocks_once() {
    let unlocked = Arc::new(Mutex::new(Vec::new()));
    let tracker = {
        let unlocked = Arc::clone(&unlocked);
        StatsTracker::new(Stats::new("s1"))
            .on_achievement(move |payload| unlocked.lock().unwrap().push(payload.id))
    };

    let first = wednesday();
    tracker.process_at(&completed("a", first), first);
    assert!(!tracker.stats().photo_finish_seen);

    let second = first + Duration::milliseconds(10_000);
    tracker.process_at(&completed("b", second), second);

    let third = second + Duration::milliseconds(2_000);
    tracker.process_at(&completed("c", third), third);

    let stats = tracker.stats();
    assert!(stats.photo_finish_seen);
    assert!(stats.achievements_unlocked.contains_key("photo_finish"));
    let photo_unlocks = unlocked
        .lock()
        .unwrap()
        .iter()
        .filter(|id| id.as_str() == "photo_finish")
        .count();
    assert_eq!(photo_unlocks, 1);
}

#[test]
fn completions_further_apart_are_not_photo_finishes() {
    let tracker = StatsTracker::new(Stats::new("s1"));
    let first = wednesday();
    tracker.process_at(&completed("a", first), first);
    let second = first + Duration::milliseconds(10_001);
    tracker.process_at(&completed("b", second), second);
    assert!(!tracker.stats().photo_finish_seen);
}

#[tokio::test]
async fn redline_unlock_is_stamped_during_processing() {
    let tracker = Arc::new(StatsTracker::new(Stats::new("s1")));
    let (tx, rx) = event_channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&tracker).run(rx, cancel.clone()));

    let mut state = SessionState::new("a", Utc::now());
    state.context_utilization = 0.95;

    let before = Utc::now();
    tx.send(Event::new(EventType::Update, state, 1)).await.unwrap();
    tx.flush().await.unwrap();
    let after = Utc::now();

    let unlocked_at = tracker.stats().achievements_unlocked["redline"];
    assert!(unlocked_at >= before && unlocked_at <= after);

    cancel.cancel();
    task.await.unwrap();
}

#[test]
fn run_10_sessions_awards_xp_exactly_once() {
    let now = wednesday();
    let mut stats = Stats::new("s1");
    stats.weekly = WeeklyChallengeState {
        week_start: Some(week_start(now)),
        active: vec![
            "run_10_sessions".to_string(),
            "burn_2m".to_string(),
            "finish_20".to_string(),
        ],
        ..Default::default()
    };
    let tracker = StatsTracker::new(stats);

    for i in 0..10 {
        let event = Event::new(EventType::New, session(&format!("s{}", i)), 1);
        tracker.process_at(&event, now);
    }

    let progress = tracker.challenges_at(now);
    let run_10 = progress
        .iter()
        .find(|row| row.id == "run_10_sessions")
        .expect("active");
    assert!(run_10.complete);
    assert!(run_10.xp_awarded);
    assert_eq!(run_10.current, 10);

    let xp = tracker.stats().battle_pass.xp;
    for _ in 0..3 {
        tracker.challenges_at(now);
        tracker.process_at(&Event::new(EventType::Update, session("s0"), 1), now);
    }
    assert_eq!(tracker.stats().battle_pass.xp, xp);

    let mut weekly = tracker.stats().weekly;
    assert!(challenges::award_completed(&mut weekly).is_empty());
}

#[test]
fn challenge_rotation_is_stable_across_trackers() {
    let now = wednesday();
    let a = StatsTracker::new(Stats::new("s1"));
    let b = StatsTracker::new(Stats::new("s1"));
    let ids = |rows: Vec<challenges::ChallengeProgress>| -> Vec<String> {
        rows.into_iter().map(|row| row.id).collect()
    };

    let first = ids(a.challenges_at(now));
    assert_eq!(first, ids(b.challenges_at(now + Duration::days(3))));
    assert_eq!(first, ids(a.challenges_at(now + Duration::days(2))));
    assert_eq!(first.len(), 3);
}

fn populated_stats() -> Stats {
    let at = wednesday();
    Stats {
        version: 1,
        total_sessions: 42,
        total_completions: 30,
        total_errors: 4,
        total_lost: 2,
        consecutive_completions: 6,
        best_streak: 11,
        total_tokens_burned: 1_250_000,
        sessions_per_source: HashMap::from([("claude".to_string(), 40), ("codex".to_string(), 2)]),
        sessions_per_model: HashMap::from([("opus".to_string(), 42)]),
        completions_per_source: HashMap::from([("claude".to_string(), 30)]),
        max_context_utilization: 195_383.0 / 200_000.0,
        max_burn_rate: 48_213.0 / 7.0,
        max_concurrent: 4,
        max_high_utilization_concurrent: 2,
        max_tool_calls: 180,
        max_messages: 90,
        max_duration_secs: 5_400,
        last_completion_at: Some(at),
        photo_finish_seen: true,
        achievements_unlocked: HashMap::from([
            ("first_lap".to_string(), at - Duration::days(30)),
            ("photo_finish".to_string(), at),
        ]),
        battle_pass: BattlePass {
            season: "2026-S4".to_string(),
            tier: 3,
            xp: 3_400,
        },
        season_archive: vec![SeasonRecord {
            season: "2026-S3".to_string(),
            tier: 7,
            xp: 7_250,
            archived_at: at - Duration::days(14),
        }],
        equipped: BTreeMap::from([(RewardSlot::Decal, "decal_photo".to_string())]),
        weekly: WeeklyChallengeState {
            week_start: Some(week_start(at)),
            active: vec!["grid_3".to_string(), "finish_5".to_string(), "burn_500k".to_string()],
            snapshot: WeeklySnapshot {
                sessions_started: 8,
                completions: 5,
                errors: 1,
                tokens_burned: 310_000,
                max_concurrent: 3,
                best_streak: 4,
                photo_finishes: 1,
                redline_sessions: 2,
                models: BTreeSet::from(["opus".to_string()]),
                sources: BTreeSet::from(["claude".to_string(), "codex".to_string()]),
            },
            xp_awarded: BTreeSet::from(["finish_5".to_string(), "grid_3".to_string()]),
        },
    }
}

#[test]
fn save_then_load_round_trips_without_leftovers() {
    let dir = TempDir::new().unwrap();
    let store = PersistenceStore::new(dir.path().join("stats.json"));
    let stats = populated_stats();

    for _ in 0..5 {
        store.save(&stats).unwrap();
    }
    assert_eq!(store.load().unwrap(), stats);

    let entries: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["stats.json".to_string()]);
}

#[test]
fn ratio_derived_floats_survive_save_and_load() {
    let dir = TempDir::new().unwrap();
    let store = PersistenceStore::new(dir.path().join("stats.json"));
    let ratios = [
        0.9769148508246097,
        195_383.0 / 200_000.0,
        1.0 / 3.0,
        123_457.0 / 128_000.0,
        0.1 + 0.2,
    ];
    for ratio in ratios {
        let mut stats = Stats::new("s1");
        stats.max_context_utilization = ratio;
        stats.max_burn_rate = ratio * 60_000.0 / 7.0;
        store.save(&stats).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.max_context_utilization.to_bits(), ratio.to_bits());
        assert_eq!(loaded.max_burn_rate.to_bits(), stats.max_burn_rate.to_bits());
    }
}

#[tokio::test]
async fn engine_persists_on_shutdown_and_reloads() {
    let dir = TempDir::new().unwrap();
    let storage = StorageConfig::with_root(dir.path().to_path_buf());
    let mut config = PitwallConfig::default();
    config.season.label = Some("2026-S4".to_string());
    config.tracker.save_interval_ms = 3_600_000;

    let cancel = CancellationToken::new();
    let (engine, tasks) = PitwallEngine::open(&storage, &config, cancel.clone()).unwrap();
    for i in 0..3 {
        let state = SessionState::new(format!("s{}", i), Utc::now());
        engine.push_sessions(vec![state.clone()]);
        engine
            .push_event(Event::new(EventType::New, state, i + 1))
            .await
            .unwrap();
    }
    engine.flush().await.unwrap();
    assert_eq!(engine.sessions().sessions.len(), 3);
    cancel.cancel();
    tasks.join().await;

    let reopened_cancel = CancellationToken::new();
    let (reopened, tasks) =
        PitwallEngine::open(&storage, &config, reopened_cancel.clone()).unwrap();
    let stats = reopened.stats().stats;
    assert_eq!(stats.total_sessions, 3);
    assert_eq!(stats.max_concurrent, 3);
    assert_eq!(stats.battle_pass.season, "2026-S4");
    assert!(stats.achievements_unlocked.contains_key("first_lap"));
    assert!(reopened.sessions().sessions.is_empty());

    reopened_cancel.cancel();
    tasks.join().await;
}

#[tokio::test]
async fn season_change_archives_on_open() {
    let dir = TempDir::new().unwrap();
    let storage = StorageConfig::with_root(dir.path().to_path_buf());
    let mut previous = Stats::new("2026-S3");
    previous.battle_pass.award_xp(5_100);
    previous
        .achievements_unlocked
        .insert("first_lap".to_string(), wednesday());
    PersistenceStore::new(storage.stats_file())
        .save(&previous)
        .unwrap();

    let mut config = PitwallConfig::default();
    config.season.label = Some("2026-S4".to_string());
    let cancel = CancellationToken::new();
    let (engine, tasks) = PitwallEngine::open(&storage, &config, cancel.clone()).unwrap();

    let stats = engine.stats().stats;
    assert_eq!(stats.battle_pass.tier, 0);
    assert_eq!(stats.season_archive.len(), 1);
    assert_eq!(stats.season_archive[0].tier, 5);
    assert!(stats.achievements_unlocked.contains_key("first_lap"));

    cancel.cancel();
    tasks.join().await;
}
