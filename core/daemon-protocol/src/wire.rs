//! Broadcast frames pushed to subscribed clients (web canvas, terminal dashboard).
//!
//! Every frame is `{"type": ..., "seq": N, "payload": {...}}`. Sequence numbers
//! are per connection and contiguous, so a client that sees a gap can send
//! [`ClientMessage::Resync`] and receive a fresh snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::session::{Activity, SessionState, SourceHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl AchievementTier {
    /// Battle pass XP granted when an achievement of this tier unlocks.
    pub fn xp(self) -> u64 {
        match self {
            AchievementTier::Bronze => 100,
            AchievementTier::Silver => 250,
            AchievementTier::Gold => 500,
            AchievementTier::Platinum => 1000,
        }
    }
}

/// Cosmetic slots. A loadout holds at most one reward per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSlot {
    Paint,
    Trail,
    Decal,
    Badge,
    Title,
    Horn,
    Theme,
}

impl RewardSlot {
    pub const ALL: [RewardSlot; 7] = [
        RewardSlot::Paint,
        RewardSlot::Trail,
        RewardSlot::Decal,
        RewardSlot::Badge,
        RewardSlot::Title,
        RewardSlot::Horn,
        RewardSlot::Theme,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RewardSlot::Paint => "paint",
            RewardSlot::Trail => "trail",
            RewardSlot::Decal => "decal",
            RewardSlot::Badge => "badge",
            RewardSlot::Title => "title",
            RewardSlot::Horn => "horn",
            RewardSlot::Theme => "theme",
        }
    }
}

impl fmt::Display for RewardSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSlot(pub String);

impl fmt::Display for UnknownSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reward slot: {}", self.0)
    }
}

impl std::error::Error for UnknownSlot {}

impl FromStr for RewardSlot {
    type Err = UnknownSlot;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        RewardSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == normalized)
            .ok_or_else(|| UnknownSlot(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub sessions: Vec<SessionState>,
    pub source_health: Vec<SourceHealth>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    pub updates: Vec<SessionState>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub session_id: String,
    pub activity: Activity,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardInfo {
    pub id: String,
    pub name: String,
    pub slot: RewardSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementPayload {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tier: AchievementTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<RewardInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpGrant {
    pub amount: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlePassProgressPayload {
    pub xp: u64,
    pub tier: u32,
    /// Fraction of the way to the next tier; 1.0 once the cap is reached.
    pub tier_progress: f64,
    #[serde(rename = "recentXP")]
    pub recent_xp: Vec<XpGrant>,
    /// Rewards newly unlocked by tier advancement in this update.
    pub rewards: Vec<RewardInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquippedPayload {
    pub equipped: BTreeMap<RewardSlot, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealthPayload {
    pub sources: Vec<SourceHealth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Server → client message body. Serialized adjacently tagged as `type`/`payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot(SnapshotPayload),
    Delta(DeltaPayload),
    Completion(CompletionPayload),
    Equipped(EquippedPayload),
    AchievementUnlocked(AchievementPayload),
    SourceHealth(SourceHealthPayload),
    BattlepassProgress(BattlePassProgressPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Snapshot(_) => "snapshot",
            ServerMessage::Delta(_) => "delta",
            ServerMessage::Completion(_) => "completion",
            ServerMessage::Equipped(_) => "equipped",
            ServerMessage::AchievementUnlocked(_) => "achievement_unlocked",
            ServerMessage::SourceHealth(_) => "source_health",
            ServerMessage::BattlepassProgress(_) => "battlepass_progress",
            ServerMessage::Error(_) => "error",
        }
    }
}

/// The full wire envelope: `{type, seq, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub seq: u64,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client → server messages accepted on a subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Resync,
    Equip {
        #[serde(rename = "rewardId")]
        reward_id: String,
        slot: String,
    },
    Unequip {
        slot: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_serializes_type_seq_payload() {
        let frame = Frame {
            seq: 7,
            message: ServerMessage::Delta(DeltaPayload {
                updates: Vec::new(),
                removed: vec!["s-1".to_string()],
            }),
        };
        let value: serde_json::Value =
            serde_json::from_str(&frame.to_json().expect("json")).expect("parse");
        assert_eq!(value["type"], "delta");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["payload"]["removed"][0], "s-1");
    }

    #[test]
    fn battlepass_payload_uses_recent_xp_key() {
        let message = ServerMessage::BattlepassProgress(BattlePassProgressPayload {
            xp: 1500,
            tier: 1,
            tier_progress: 0.5,
            recent_xp: vec![XpGrant {
                amount: 50,
                reason: "completion".to_string(),
            }],
            rewards: Vec::new(),
        });
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], "battlepass_progress");
        assert_eq!(value["payload"]["recentXP"][0]["amount"], 50);
        assert_eq!(value["payload"]["tierProgress"], 0.5);
    }

    #[test]
    fn achievement_kind_matches_wire_name() {
        let message = ServerMessage::AchievementUnlocked(AchievementPayload {
            id: "redline".to_string(),
            name: "Redline".to_string(),
            description: "d".to_string(),
            tier: AchievementTier::Silver,
            reward: None,
        });
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], message.kind());
        assert!(value["payload"].get("reward").is_none());
    }

    #[test]
    fn reward_slot_parses_case_insensitively() {
        assert_eq!("Paint".parse::<RewardSlot>(), Ok(RewardSlot::Paint));
        assert_eq!(" horn ".parse::<RewardSlot>(), Ok(RewardSlot::Horn));
        assert!("wheels".parse::<RewardSlot>().is_err());
    }

    #[test]
    fn equipped_payload_keys_are_slot_names() {
        let mut equipped = BTreeMap::new();
        equipped.insert(RewardSlot::Trail, "trail_flame".to_string());
        let value = serde_json::to_value(EquippedPayload { equipped }).expect("serialize");
        assert_eq!(value["equipped"]["trail"], "trail_flame");
    }

    #[test]
    fn client_messages_parse() {
        let resync: ClientMessage =
            serde_json::from_str(r#"{"type":"resync"}"#).expect("resync");
        assert_eq!(resync, ClientMessage::Resync);
        let equip: ClientMessage =
            serde_json::from_str(r#"{"type":"equip","rewardId":"paint_gold","slot":"paint"}"#)
                .expect("equip");
        assert_eq!(
            equip,
            ClientMessage::Equip {
                reward_id: "paint_gold".to_string(),
                slot: "paint".to_string()
            }
        );
    }
}
