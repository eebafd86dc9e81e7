//! Achievement registry and evaluator.
//!
//! Each achievement is a named [`Condition`] over [`Stats`]. Evaluation is
//! idempotent: anything already present in `achievements_unlocked` is skipped,
//! and an unlock timestamp is written exactly once.

use chrono::{DateTime, Utc};

use pitwall_protocol::{AchievementPayload, AchievementTier};
use pitwall_protocol::AchievementTier::{Bronze, Gold, Platinum, Silver};

use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    TotalSessions(u64),
    TotalCompletions(u64),
    TotalErrors(u64),
    BestStreak(u64),
    PhotoFinish,
    ContextUtilization(f64),
    Concurrent(u64),
    HighUtilizationConcurrent(u64),
    DistinctModels(usize),
    DistinctSources(usize),
    ToolCalls(u64),
    Messages(u64),
    DurationSecs(i64),
    BurnRate(f64),
    TokensBurned(u64),
    BattlePassTier(u32),
}

impl Condition {
    pub fn is_met(&self, stats: &Stats) -> bool {
        match *self {
            Condition::TotalSessions(n) => stats.total_sessions >= n,
            Condition::TotalCompletions(n) => stats.total_completions >= n,
            Condition::TotalErrors(n) => stats.total_errors >= n,
            Condition::BestStreak(n) => stats.best_streak >= n,
            Condition::PhotoFinish => stats.photo_finish_seen,
            Condition::ContextUtilization(threshold) => {
                stats.max_context_utilization >= threshold
            }
            Condition::Concurrent(n) => stats.max_concurrent >= n,
            Condition::HighUtilizationConcurrent(n) => stats.max_high_utilization_concurrent >= n,
            Condition::DistinctModels(n) => stats.sessions_per_model.len() >= n,
            Condition::DistinctSources(n) => stats.sessions_per_source.len() >= n,
            Condition::ToolCalls(n) => stats.max_tool_calls >= n,
            Condition::Messages(n) => stats.max_messages >= n,
            Condition::DurationSecs(n) => stats.max_duration_secs >= n,
            Condition::BurnRate(threshold) => stats.max_burn_rate >= threshold,
            Condition::TokensBurned(n) => stats.total_tokens_burned >= n,
            Condition::BattlePassTier(n) => stats.battle_pass.tier >= n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tier: AchievementTier,
    pub condition: Condition,
}

impl Achievement {
    /// Wire form, including the reward this achievement unlocks, if any.
    pub fn payload(&self) -> AchievementPayload {
        AchievementPayload {
            id: self.id.to_string(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            tier: self.tier,
            reward: crate::rewards::for_achievement(self.id).map(|reward| reward.info()),
        }
    }
}

const fn achievement(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    tier: AchievementTier,
    condition: Condition,
) -> Achievement {
    Achievement {
        id,
        name,
        description,
        tier,
        condition,
    }
}

pub static ACHIEVEMENTS: &[Achievement] = &[
    achievement("first_lap", "First Lap", "Start your first session", Bronze, Condition::TotalSessions(1)),
    achievement("first_finish", "Checkered Flag", "Complete a session", Bronze, Condition::TotalCompletions(1)),
    achievement("warm_up", "Warm-Up Laps", "Start 10 sessions", Bronze, Condition::TotalSessions(10)),
    achievement("century", "Century", "Start 100 sessions", Silver, Condition::TotalSessions(100)),
    achievement("grand_tour", "Grand Tour", "Start 1,000 sessions", Gold, Condition::TotalSessions(1_000)),
    achievement("podium_regular", "Podium Regular", "Complete 50 sessions", Silver, Condition::TotalCompletions(50)),
    achievement("champion", "Champion", "Complete 500 sessions", Gold, Condition::TotalCompletions(500)),
    achievement("hat_trick", "Hat Trick", "Complete 3 sessions in a row", Bronze, Condition::BestStreak(3)),
    achievement("clean_run", "Clean Run", "Complete 10 sessions in a row", Silver, Condition::BestStreak(10)),
    achievement("untouchable", "Untouchable", "Complete 50 sessions in a row", Platinum, Condition::BestStreak(50)),
    achievement("photo_finish", "Photo Finish", "Two sessions finish within 10 seconds", Gold, Condition::PhotoFinish),
    achievement("redline", "Redline", "Push a session to 95% context", Silver, Condition::ContextUtilization(0.95)),
    achievement("side_by_side", "Side by Side", "Run 2 sessions at once", Bronze, Condition::Concurrent(2)),
    achievement("full_grid", "Full Grid", "Run 5 sessions at once", Gold, Condition::Concurrent(5)),
    achievement("pressure_cooker", "Pressure Cooker", "Keep 3 sessions above 50% context at once", Gold, Condition::HighUtilizationConcurrent(3)),
    achievement("polyglot", "Polyglot", "Race with 3 different models", Silver, Condition::DistinctModels(3)),
    achievement("crossover", "Crossover", "Race sessions from 2 different sources", Silver, Condition::DistinctSources(2)),
    achievement("pit_crew", "Pit Crew", "Make 100 tool calls in one session", Silver, Condition::ToolCalls(100)),
    achievement("tool_fiend", "Tool Fiend", "Make 500 tool calls in one session", Gold, Condition::ToolCalls(500)),
    achievement("chatterbox", "Chatterbox", "Exchange 200 messages in one session", Silver, Condition::Messages(200)),
    achievement("endurance", "Endurance", "Keep one session running for 2 hours", Gold, Condition::DurationSecs(2 * 60 * 60)),
    achievement("afterburner", "Afterburner", "Burn 10,000 tokens per minute", Silver, Condition::BurnRate(10_000.0)),
    achievement("token_millionaire", "Token Millionaire", "Burn 1,000,000 tokens in total", Gold, Condition::TokensBurned(1_000_000)),
    achievement("hard_knocks", "Hard Knocks", "Survive 10 errored sessions", Bronze, Condition::TotalErrors(10)),
    achievement("season_champion", "Season Champion", "Reach the top battle pass tier", Platinum, Condition::BattlePassTier(10)),
];

pub fn find(id: &str) -> Option<&'static Achievement> {
    ACHIEVEMENTS.iter().find(|achievement| achievement.id == id)
}

/// Unlocks every achievement whose condition now holds and that has not been
/// unlocked before, stamping it with `now`. Returns only the new unlocks.
pub fn evaluate(stats: &mut Stats, now: DateTime<Utc>) -> Vec<&'static Achievement> {
    let mut unlocked = Vec::new();
    for achievement in ACHIEVEMENTS {
        if stats.achievements_unlocked.contains_key(achievement.id) {
            continue;
        }
        if achievement.condition.is_met(stats) {
            stats
                .achievements_unlocked
                .insert(achievement.id.to_string(), now);
            unlocked.push(achievement);
        }
    }
    unlocked
}
