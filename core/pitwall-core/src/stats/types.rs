//! The persisted stats aggregate.
//!
//! Counters only grow; high-water marks only rise. Maps tolerate `null` on
//! load so hand-edited or older files reinitialize them instead of failing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use pitwall_protocol::RewardSlot;

/// Current on-disk schema version of `stats.json`.
pub const STATS_VERSION: u32 = 1;

pub const MAX_TIER: u32 = 10;
pub const XP_PER_TIER: u64 = 1000;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattlePass {
    #[serde(default)]
    pub season: String,
    #[serde(default)]
    pub tier: u32,
    #[serde(default)]
    pub xp: u64,
}

impl BattlePass {
    pub fn new(season: impl Into<String>) -> Self {
        Self {
            season: season.into(),
            tier: 0,
            xp: 0,
        }
    }

    /// Adds XP and recomputes the tier. Returns the previous tier.
    ///
    /// The tier is `xp / 1000`, capped at [`MAX_TIER`]; XP keeps accumulating
    /// past the cap.
    pub fn award_xp(&mut self, amount: u64) -> u32 {
        let previous = self.tier;
        self.xp = self.xp.saturating_add(amount);
        self.tier = tier_for_xp(self.xp);
        previous
    }

    /// Progress toward the next tier in `0.0..1.0`; `1.0` once capped.
    pub fn tier_progress(&self) -> f64 {
        if self.tier >= MAX_TIER {
            return 1.0;
        }
        (self.xp % XP_PER_TIER) as f64 / XP_PER_TIER as f64
    }
}

pub fn tier_for_xp(xp: u64) -> u32 {
    (xp / XP_PER_TIER).min(MAX_TIER as u64) as u32
}

/// Final standing of a finished season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub season: String,
    pub tier: u32,
    pub xp: u64,
    pub archived_at: DateTime<Utc>,
}

/// Rolling counters for the current challenge week.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeeklySnapshot {
    #[serde(default)]
    pub sessions_started: u64,
    #[serde(default)]
    pub completions: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub tokens_burned: u64,
    #[serde(default)]
    pub max_concurrent: u64,
    #[serde(default)]
    pub best_streak: u64,
    #[serde(default)]
    pub photo_finishes: u64,
    /// Sessions that crossed 90% context utilization this week.
    #[serde(default)]
    pub redline_sessions: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub models: BTreeSet<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sources: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeeklyChallengeState {
    /// Monday 00:00 UTC of the active ISO week. `None` until the first rotation.
    #[serde(default)]
    pub week_start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub snapshot: WeeklySnapshot,
    /// Challenges whose XP has been granted this week.
    #[serde(default, deserialize_with = "null_as_default")]
    pub xp_awarded: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_completions: u64,
    #[serde(default)]
    pub total_errors: u64,
    #[serde(default)]
    pub total_lost: u64,
    #[serde(default)]
    pub consecutive_completions: u64,
    #[serde(default)]
    pub best_streak: u64,
    #[serde(default)]
    pub total_tokens_burned: u64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub sessions_per_source: HashMap<String, u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sessions_per_model: HashMap<String, u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completions_per_source: HashMap<String, u64>,

    #[serde(default)]
    pub max_context_utilization: f64,
    #[serde(default)]
    pub max_burn_rate: f64,
    #[serde(default)]
    pub max_concurrent: u64,
    /// Most sessions simultaneously at or above 50% context utilization.
    #[serde(default)]
    pub max_high_utilization_concurrent: u64,
    #[serde(default)]
    pub max_tool_calls: u64,
    #[serde(default)]
    pub max_messages: u64,
    #[serde(default)]
    pub max_duration_secs: i64,

    #[serde(default)]
    pub last_completion_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub photo_finish_seen: bool,

    /// Achievement id → unlock time. Written once per key, never removed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub achievements_unlocked: HashMap<String, DateTime<Utc>>,
    #[serde(default = "default_battle_pass", deserialize_with = "null_as_battle_pass")]
    pub battle_pass: BattlePass,
    #[serde(default, deserialize_with = "null_as_default")]
    pub season_archive: Vec<SeasonRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub equipped: BTreeMap<RewardSlot, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weekly: WeeklyChallengeState,
}

fn default_version() -> u32 {
    STATS_VERSION
}

fn default_battle_pass() -> BattlePass {
    BattlePass::new("")
}

fn null_as_battle_pass<'de, D>(deserializer: D) -> Result<BattlePass, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BattlePass>::deserialize(deserializer)?.unwrap_or_else(default_battle_pass))
}

impl Default for Stats {
    fn default() -> Self {
        Self::new("")
    }
}

impl Stats {
    pub fn new(season: impl Into<String>) -> Self {
        Self {
            version: STATS_VERSION,
            total_sessions: 0,
            total_completions: 0,
            total_errors: 0,
            total_lost: 0,
            consecutive_completions: 0,
            best_streak: 0,
            total_tokens_burned: 0,
            sessions_per_source: HashMap::new(),
            sessions_per_model: HashMap::new(),
            completions_per_source: HashMap::new(),
            max_context_utilization: 0.0,
            max_burn_rate: 0.0,
            max_concurrent: 0,
            max_high_utilization_concurrent: 0,
            max_tool_calls: 0,
            max_messages: 0,
            max_duration_secs: 0,
            last_completion_at: None,
            photo_finish_seen: false,
            achievements_unlocked: HashMap::new(),
            battle_pass: BattlePass::new(season),
            season_archive: Vec::new(),
            equipped: BTreeMap::new(),
            weekly: WeeklyChallengeState::default(),
        }
    }

    /// Archives the current battle pass and starts `season` at tier 0 when the
    /// label differs. Achievements and the equipped loadout are permanent and
    /// carry over. Returns true if a rotation happened.
    pub fn rotate_season(&mut self, season: &str, now: DateTime<Utc>) -> bool {
        if self.battle_pass.season == season {
            return false;
        }
        if !self.battle_pass.season.is_empty() || self.battle_pass.xp > 0 {
            self.season_archive.push(SeasonRecord {
                season: self.battle_pass.season.clone(),
                tier: self.battle_pass.tier,
                xp: self.battle_pass.xp,
                archived_at: now,
            });
        }
        self.battle_pass = BattlePass::new(season);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tier_advances_at_each_thousand() {
        let mut bp = BattlePass::new("s1");
        bp.award_xp(999);
        assert_eq!(bp.tier, 0);
        bp.award_xp(1);
        assert_eq!(bp.tier, 1);
        bp.award_xp(999);
        assert_eq!(bp.tier, 1);
        bp.award_xp(1);
        assert_eq!(bp.tier, 2);
    }

    #[test]
    fn tier_caps_but_xp_keeps_growing() {
        let mut bp = BattlePass::new("s1");
        bp.award_xp(10_000);
        assert_eq!(bp.tier, 10);
        let previous = bp.award_xp(5_500);
        assert_eq!(previous, 10);
        assert_eq!(bp.tier, MAX_TIER);
        assert_eq!(bp.xp, 15_500);
        assert!((bp.tier_progress() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tier_progress_is_fraction_of_current_tier() {
        let mut bp = BattlePass::new("s1");
        bp.award_xp(2_250);
        assert!((bp.tier_progress() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn rotate_season_archives_and_resets() {
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let mut stats = Stats::new("2026-S3");
        stats.battle_pass.award_xp(4_200);
        stats
            .achievements_unlocked
            .insert("first_lap".to_string(), now);
        stats
            .equipped
            .insert(RewardSlot::Paint, "paint_bronze".to_string());

        assert!(stats.rotate_season("2026-S4", now));
        assert_eq!(stats.battle_pass, BattlePass::new("2026-S4"));
        assert_eq!(stats.season_archive.len(), 1);
        assert_eq!(stats.season_archive[0].season, "2026-S3");
        assert_eq!(stats.season_archive[0].tier, 4);
        assert_eq!(stats.season_archive[0].xp, 4_200);
        assert!(stats.achievements_unlocked.contains_key("first_lap"));
        assert_eq!(stats.equipped.len(), 1);

        assert!(!stats.rotate_season("2026-S4", now));
        assert_eq!(stats.season_archive.len(), 1);
    }

    #[test]
    fn first_season_label_does_not_archive_empty_pass() {
        let now = Utc::now();
        let mut stats = Stats::default();
        assert!(stats.rotate_season("2026-S4", now));
        assert!(stats.season_archive.is_empty());
    }

    #[test]
    fn null_maps_are_reinitialized() {
        let json = serde_json::json!({
            "version": 1,
            "total_sessions": 3,
            "sessions_per_source": null,
            "achievements_unlocked": null,
            "equipped": null,
            "battle_pass": null,
            "weekly": {"active": null, "snapshot": null, "xp_awarded": null}
        });
        let stats: Stats = serde_json::from_value(json).expect("parse stats");
        assert_eq!(stats.total_sessions, 3);
        assert!(stats.sessions_per_source.is_empty());
        assert!(stats.sessions_per_model.is_empty());
        assert!(stats.achievements_unlocked.is_empty());
        assert!(stats.equipped.is_empty());
        assert_eq!(stats.battle_pass.tier, 0);
        assert!(stats.weekly.active.is_empty());
        assert!(stats.weekly.xp_awarded.is_empty());
    }
}
