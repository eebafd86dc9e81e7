//! Response bodies for the query and loadout routes
//! (`/api/sessions`, `/api/stats`, `/api/achievements`, `/api/challenges`,
//! `/api/equip`, `/api/unequip`) and the matching daemon IPC methods.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pitwall_protocol::{
    AchievementTier, BattlePassProgressPayload, RewardInfo, RewardSlot, SessionState,
    SourceHealth, PROTOCOL_VERSION,
};

use crate::achievements::ACHIEVEMENTS;
use crate::challenges::ChallengeProgress;
use crate::rewards::{Unlock, REWARDS};
use crate::stats::Stats;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub pid: u32,
    pub version: &'static str,
    pub protocol_version: u32,
    pub season: String,
    pub sessions: usize,
    pub active_sessions: usize,
    pub clients: usize,
}

impl HealthResponse {
    pub fn ok(season: String, sessions: usize, active_sessions: usize, clients: usize) -> Self {
        Self {
            status: "ok",
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: PROTOCOL_VERSION,
            season,
            sessions,
            active_sessions,
            clients,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    pub sessions: Vec<SessionState>,
    pub active_count: usize,
    pub source_health: Vec<SourceHealth>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub stats: Stats,
    pub battle_pass: BattlePassProgressPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementStatus {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tier: AchievementTier,
    pub xp: u64,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub reward: Option<RewardInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardStatus {
    pub id: &'static str,
    pub name: &'static str,
    pub slot: RewardSlot,
    /// Human-readable unlock rule, e.g. `tier 3` or `achievement photo_finish`.
    pub unlock: String,
    pub unlocked: bool,
    pub equipped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementsResponse {
    pub achievements: Vec<AchievementStatus>,
    pub rewards: Vec<RewardStatus>,
    pub equipped: BTreeMap<RewardSlot, String>,
    pub unlocked_count: usize,
    pub total_count: usize,
}

impl AchievementsResponse {
    pub fn from_stats(stats: &Stats) -> Self {
        let achievements: Vec<AchievementStatus> = ACHIEVEMENTS
            .iter()
            .map(|achievement| AchievementStatus {
                id: achievement.id,
                name: achievement.name,
                description: achievement.description,
                tier: achievement.tier,
                xp: achievement.tier.xp(),
                unlocked_at: stats.achievements_unlocked.get(achievement.id).copied(),
                reward: achievement.payload().reward,
            })
            .collect();

        let rewards = REWARDS
            .iter()
            .map(|reward| RewardStatus {
                id: reward.id,
                name: reward.name,
                slot: reward.slot,
                unlock: match reward.unlock {
                    Unlock::Tier(tier) => format!("tier {}", tier),
                    Unlock::Achievement(id) => format!("achievement {}", id),
                },
                unlocked: reward.is_unlocked(stats),
                equipped: stats.equipped.get(&reward.slot).map(String::as_str) == Some(reward.id),
            })
            .collect();

        let unlocked_count = achievements
            .iter()
            .filter(|status| status.unlocked_at.is_some())
            .count();

        Self {
            total_count: achievements.len(),
            unlocked_count,
            achievements,
            rewards,
            equipped: stats.equipped.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengesResponse {
    pub week_start: Option<DateTime<Utc>>,
    pub challenges: Vec<ChallengeProgress>,
}
