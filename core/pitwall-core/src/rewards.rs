//! Cosmetic rewards and the equipped loadout.
//!
//! A reward unlocks either by owning a named achievement or by the battle pass
//! reaching the tier that grants it. Each reward belongs to exactly one of the
//! seven [`RewardSlot`]s; equipping replaces whatever occupies that slot.

use pitwall_protocol::{RewardInfo, RewardSlot};

use crate::error::RewardError;
use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlock {
    Achievement(&'static str),
    Tier(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reward {
    pub id: &'static str,
    pub name: &'static str,
    pub slot: RewardSlot,
    pub unlock: Unlock,
}

impl Reward {
    pub fn info(&self) -> RewardInfo {
        RewardInfo {
            id: self.id.to_string(),
            name: self.name.to_string(),
            slot: self.slot,
        }
    }

    pub fn is_unlocked(&self, stats: &Stats) -> bool {
        match self.unlock {
            Unlock::Achievement(id) => stats.achievements_unlocked.contains_key(id),
            Unlock::Tier(tier) => stats.battle_pass.tier >= tier,
        }
    }
}

const fn reward(id: &'static str, name: &'static str, slot: RewardSlot, unlock: Unlock) -> Reward {
    Reward {
        id,
        name,
        slot,
        unlock,
    }
}

pub static REWARDS: &[Reward] = &[
    // Battle pass track, one per tier.
    reward("paint_bronze", "Bronze Paint", RewardSlot::Paint, Unlock::Tier(1)),
    reward("trail_smoke", "Smoke Trail", RewardSlot::Trail, Unlock::Tier(2)),
    reward("decal_stripes", "Racing Stripes", RewardSlot::Decal, Unlock::Tier(3)),
    reward("horn_classic", "Classic Horn", RewardSlot::Horn, Unlock::Tier(4)),
    reward("title_contender", "Contender", RewardSlot::Title, Unlock::Tier(5)),
    reward("paint_silver", "Silver Paint", RewardSlot::Paint, Unlock::Tier(6)),
    reward("trail_flame", "Flame Trail", RewardSlot::Trail, Unlock::Tier(7)),
    reward("theme_night", "Night Race", RewardSlot::Theme, Unlock::Tier(8)),
    reward("badge_laurel", "Laurel Wreath", RewardSlot::Badge, Unlock::Tier(9)),
    reward("paint_gold", "Gold Paint", RewardSlot::Paint, Unlock::Tier(10)),
    // Achievement rewards.
    reward("badge_checkered", "Checkered Flag", RewardSlot::Badge, Unlock::Achievement("first_finish")),
    reward("decal_photo", "Photo Finish Decal", RewardSlot::Decal, Unlock::Achievement("photo_finish")),
    reward("trail_sparks", "Spark Trail", RewardSlot::Trail, Unlock::Achievement("redline")),
    reward("theme_grid", "Starting Grid", RewardSlot::Theme, Unlock::Achievement("full_grid")),
    reward("horn_polyglot", "Polyglot Horn", RewardSlot::Horn, Unlock::Achievement("polyglot")),
    reward("paint_chrome", "Chrome Paint", RewardSlot::Paint, Unlock::Achievement("token_millionaire")),
    reward("title_untouchable", "Untouchable", RewardSlot::Title, Unlock::Achievement("untouchable")),
    reward("badge_champion", "Season Champion", RewardSlot::Badge, Unlock::Achievement("season_champion")),
];

pub fn find(id: &str) -> Option<&'static Reward> {
    REWARDS.iter().find(|reward| reward.id == id)
}

/// The reward granted by owning an achievement, if any.
pub fn for_achievement(achievement_id: &str) -> Option<&'static Reward> {
    REWARDS
        .iter()
        .find(|reward| matches!(reward.unlock, Unlock::Achievement(id) if id == achievement_id))
}

/// Rewards granted by tiers in `(from, to]`, i.e. newly reached when the tier
/// moves from `from` to `to`.
pub fn for_tiers_between(from: u32, to: u32) -> Vec<&'static Reward> {
    REWARDS
        .iter()
        .filter(|reward| matches!(reward.unlock, Unlock::Tier(tier) if tier > from && tier <= to))
        .collect()
}

pub fn unlocked(stats: &Stats) -> Vec<&'static Reward> {
    REWARDS
        .iter()
        .filter(|reward| reward.is_unlocked(stats))
        .collect()
}

fn parse_slot(slot: &str) -> Result<RewardSlot, RewardError> {
    slot.parse::<RewardSlot>()
        .map_err(|_| RewardError::InvalidSlot(slot.to_string()))
}

/// Puts an unlocked reward into its slot, replacing the previous occupant.
pub fn equip(
    stats: &mut Stats,
    reward_id: &str,
    slot: &str,
) -> Result<&'static Reward, RewardError> {
    let slot = parse_slot(slot)?;
    let reward = find(reward_id).ok_or_else(|| RewardError::UnknownReward(reward_id.to_string()))?;
    if reward.slot != slot {
        return Err(RewardError::SlotMismatch {
            reward: reward.id.to_string(),
            slot,
            expected: reward.slot,
        });
    }
    if !reward.is_unlocked(stats) {
        return Err(RewardError::NotUnlocked(reward.id.to_string()));
    }
    stats.equipped.insert(slot, reward.id.to_string());
    Ok(reward)
}

/// Clears a slot. Returns the reward id that occupied it, if any.
pub fn unequip(stats: &mut Stats, slot: &str) -> Result<Option<String>, RewardError> {
    let slot = parse_slot(slot)?;
    Ok(stats.equipped.remove(&slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_achievements_exist() {
        let ids: HashSet<&str> = REWARDS.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), REWARDS.len());
        for reward in REWARDS {
            if let Unlock::Achievement(id) = reward.unlock {
                assert!(crate::achievements::find(id).is_some(), "{} missing", id);
            }
        }
    }

    #[test]
    fn every_tier_grants_one_reward() {
        for tier in 1..=10 {
            assert_eq!(for_tiers_between(tier - 1, tier).len(), 1, "tier {}", tier);
        }
        assert_eq!(for_tiers_between(0, 10).len(), 10);
        assert!(for_tiers_between(3, 3).is_empty());
    }

    #[test]
    fn equip_requires_unlock() {
        let mut stats = Stats::new("s1");
        let err = equip(&mut stats, "paint_bronze", "paint").expect_err("locked");
        assert_eq!(err, RewardError::NotUnlocked("paint_bronze".to_string()));

        stats.battle_pass.award_xp(1_000);
        equip(&mut stats, "paint_bronze", "paint").expect("equip");
        assert_eq!(
            stats.equipped.get(&RewardSlot::Paint).map(String::as_str),
            Some("paint_bronze")
        );
    }

    #[test]
    fn equip_replaces_slot_occupant() {
        let mut stats = Stats::new("s1");
        stats.battle_pass.award_xp(6_000);
        equip(&mut stats, "paint_bronze", "paint").expect("bronze");
        equip(&mut stats, "paint_silver", "paint").expect("silver");
        assert_eq!(stats.equipped.len(), 1);
        assert_eq!(stats.equipped[&RewardSlot::Paint], "paint_silver");
    }

    #[test]
    fn achievement_rewards_follow_unlocks() {
        let mut stats = Stats::new("s1");
        assert!(!find("decal_photo").expect("exists").is_unlocked(&stats));
        stats
            .achievements_unlocked
            .insert("photo_finish".to_string(), Utc::now());
        equip(&mut stats, "decal_photo", "decal").expect("equip decal");
        assert_eq!(for_achievement("photo_finish").map(|r| r.id), Some("decal_photo"));
        assert!(for_achievement("first_lap").is_none());
    }

    #[test]
    fn equip_errors_are_typed() {
        let mut stats = Stats::new("s1");
        stats.battle_pass.award_xp(10_000);

        assert_eq!(
            equip(&mut stats, "nope", "paint"),
            Err(RewardError::UnknownReward("nope".to_string()))
        );
        assert_eq!(
            equip(&mut stats, "paint_gold", "wheels"),
            Err(RewardError::InvalidSlot("wheels".to_string()))
        );
        assert!(matches!(
            equip(&mut stats, "paint_gold", "trail"),
            Err(RewardError::SlotMismatch { .. })
        ));
        assert!(stats.equipped.is_empty());
    }

    #[test]
    fn unequip_clears_slot() {
        let mut stats = Stats::new("s1");
        stats.battle_pass.award_xp(2_000);
        equip(&mut stats, "trail_smoke", "trail").expect("equip");
        assert_eq!(
            unequip(&mut stats, "trail").expect("unequip"),
            Some("trail_smoke".to_string())
        );
        assert_eq!(unequip(&mut stats, "trail").expect("unequip again"), None);
        assert!(unequip(&mut stats, "spoiler").is_err());
    }
}
