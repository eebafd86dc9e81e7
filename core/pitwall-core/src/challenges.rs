//! Weekly challenges.
//!
//! Three challenges from a fixed pool are active per ISO week. The selection is
//! a pure function of the week's Monday 00:00 UTC timestamp, so every restart
//! (and every machine) picks the same three for a given week.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::stats::{WeeklyChallengeState, WeeklySnapshot};

pub const ACTIVE_PER_WEEK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    SessionsStarted(u64),
    Completions(u64),
    TokensBurned(u64),
    Concurrent(u64),
    Streak(u64),
    PhotoFinishes(u64),
    RedlineSessions(u64),
    DistinctModels(u64),
    /// Completions with no errored session in the same week.
    CleanCompletions(u64),
}

impl Goal {
    pub fn target(&self) -> u64 {
        match *self {
            Goal::SessionsStarted(n)
            | Goal::Completions(n)
            | Goal::TokensBurned(n)
            | Goal::Concurrent(n)
            | Goal::Streak(n)
            | Goal::PhotoFinishes(n)
            | Goal::RedlineSessions(n)
            | Goal::DistinctModels(n)
            | Goal::CleanCompletions(n) => n,
        }
    }

    pub fn current(&self, snapshot: &WeeklySnapshot) -> u64 {
        match self {
            Goal::SessionsStarted(_) => snapshot.sessions_started,
            Goal::Completions(_) => snapshot.completions,
            Goal::TokensBurned(_) => snapshot.tokens_burned,
            Goal::Concurrent(_) => snapshot.max_concurrent,
            Goal::Streak(_) => snapshot.best_streak,
            Goal::PhotoFinishes(_) => snapshot.photo_finishes,
            Goal::RedlineSessions(_) => snapshot.redline_sessions,
            Goal::DistinctModels(_) => snapshot.models.len() as u64,
            Goal::CleanCompletions(_) => {
                if snapshot.errors == 0 {
                    snapshot.completions
                } else {
                    0
                }
            }
        }
    }

    pub fn is_met(&self, snapshot: &WeeklySnapshot) -> bool {
        self.current(snapshot) >= self.target()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub xp: u64,
    pub goal: Goal,
}

const fn challenge(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    xp: u64,
    goal: Goal,
) -> Challenge {
    Challenge {
        id,
        name,
        description,
        xp,
        goal,
    }
}

pub static POOL: &[Challenge] = &[
    challenge("run_10_sessions", "Busy Week", "Start 10 sessions", 300, Goal::SessionsStarted(10)),
    challenge("run_25_sessions", "Full Calendar", "Start 25 sessions", 600, Goal::SessionsStarted(25)),
    challenge("finish_5", "Five Flags", "Complete 5 sessions", 300, Goal::Completions(5)),
    challenge("finish_20", "Points Haul", "Complete 20 sessions", 700, Goal::Completions(20)),
    challenge("burn_500k", "Fuel Stop", "Burn 500,000 tokens", 400, Goal::TokensBurned(500_000)),
    challenge("burn_2m", "Tanker", "Burn 2,000,000 tokens", 800, Goal::TokensBurned(2_000_000)),
    challenge("grid_3", "Three Wide", "Run 3 sessions at once", 400, Goal::Concurrent(3)),
    challenge("streak_5", "On a Roll", "Complete 5 sessions in a row", 500, Goal::Streak(5)),
    challenge("weekly_photo_finish", "Dead Heat", "Score a photo finish", 500, Goal::PhotoFinishes(1)),
    challenge("redline_3", "Heavy Foot", "Push 3 sessions past 90% context", 400, Goal::RedlineSessions(3)),
    challenge("model_mix", "Mixed Fleet", "Race with 2 different models", 300, Goal::DistinctModels(2)),
    challenge("clean_sheet", "Clean Sheet", "Complete 10 sessions without an error", 600, Goal::CleanCompletions(10)),
];

pub fn find(id: &str) -> Option<&'static Challenge> {
    POOL.iter().find(|challenge| challenge.id == id)
}

/// Monday 00:00 UTC of the ISO week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    let monday = now.date_naive() - Duration::days(days_from_monday);
    Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN))
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        self.0 >> 33
    }
}

/// The challenge ids active for the week starting at `week_start`.
pub fn select_for_week(week_start: DateTime<Utc>) -> Vec<String> {
    let mut rng = Lcg(fnv1a(&week_start.timestamp().to_le_bytes()));
    let mut ids: Vec<&str> = POOL.iter().map(|challenge| challenge.id).collect();
    for i in (1..ids.len()).rev() {
        let j = (rng.next() % (i as u64 + 1)) as usize;
        ids.swap(i, j);
    }
    ids.into_iter()
        .take(ACTIVE_PER_WEEK)
        .map(str::to_string)
        .collect()
}

/// Moves the state to the week containing `now` if it is not already there,
/// selecting that week's challenges and clearing the rolling snapshot and the
/// awarded set. Within the same week an empty `active` list is re-selected
/// and the week's progress is kept. Returns true if anything changed.
pub fn rotate_if_needed(state: &mut WeeklyChallengeState, now: DateTime<Utc>) -> bool {
    let start = week_start(now);
    if state.week_start == Some(start) {
        if !state.active.is_empty() {
            return false;
        }
        state.active = select_for_week(start);
        return true;
    }
    state.week_start = Some(start);
    state.active = select_for_week(start);
    state.snapshot = WeeklySnapshot::default();
    state.xp_awarded.clear();
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeProgress {
    pub id: String,
    pub name: String,
    pub description: String,
    pub current: u64,
    pub target: u64,
    pub complete: bool,
    pub xp: u64,
    pub xp_awarded: bool,
}

/// Progress of every active challenge, in selection order. Unknown ids (from a
/// pool that has since shrunk) are skipped.
pub fn progress(state: &WeeklyChallengeState) -> Vec<ChallengeProgress> {
    state
        .active
        .iter()
        .filter_map(|id| find(id))
        .map(|challenge| {
            let current = challenge.goal.current(&state.snapshot);
            let target = challenge.goal.target();
            ChallengeProgress {
                id: challenge.id.to_string(),
                name: challenge.name.to_string(),
                description: challenge.description.to_string(),
                current: current.min(target),
                target,
                complete: current >= target,
                xp: challenge.xp,
                xp_awarded: state.xp_awarded.contains(challenge.id),
            }
        })
        .collect()
}

/// Marks every newly completed active challenge as awarded and returns them.
/// The caller grants the XP; a challenge is returned at most once per week.
pub fn award_completed(state: &mut WeeklyChallengeState) -> Vec<&'static Challenge> {
    let mut awarded = Vec::new();
    for id in &state.active {
        let Some(challenge) = find(id) else {
            continue;
        };
        if state.xp_awarded.contains(challenge.id) || !challenge.goal.is_met(&state.snapshot) {
            continue;
        }
        awarded.push(challenge);
    }
    for challenge in &awarded {
        state.xp_awarded.insert(challenge.id.to_string());
    }
    awarded
}
