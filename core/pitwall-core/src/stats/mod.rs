//! The persisted stats aggregate and the tracker that owns it.
//!
//! - [`types`]: `Stats`, `BattlePass` and the weekly challenge state
//! - [`tracker`]: the single-consumer actor that folds events into `Stats`

mod tracker;
mod types;

pub use tracker::{
    AchievementCallback, ProgressCallback, StatsTracker, DEFAULT_SAVE_INTERVAL, RECENT_XP_LIMIT,
};
pub use types::{
    tier_for_xp, BattlePass, SeasonRecord, Stats, WeeklyChallengeState, WeeklySnapshot, MAX_TIER,
    STATS_VERSION, XP_PER_TIER,
};
