//! # pitwall-core
//!
//! Session-state coordination for pitwall: the live session table, the
//! lifecycle event pipeline, the stats tracker with its achievement, reward and
//! weekly challenge evaluators, crash-safe persistence, and the delta
//! broadcaster that feeds dashboards.
//!
//! ## Design Principles
//!
//! - **Explicit instances**: store, tracker and broadcaster are constructed and
//!   passed around; nothing lives in a global.
//! - **One owner per aggregate**: the session table sits behind one lock, the
//!   stats behind another, and only the tracker mutates stats.
//! - **Copies out**: every read returns an owned clone.
//! - **Declarative rules**: achievements, rewards and challenges are static
//!   tables of named conditions.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pitwall_core::{PitwallConfig, PitwallEngine, Stats};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (engine, tasks) =
//!     PitwallEngine::launch(&PitwallConfig::default(), Stats::default(), None, cancel.clone());
//! engine.push_sessions(sessions);
//! engine.push_event(event).await?;
//! ```

pub mod achievements;
pub mod api;
pub mod broadcast;
pub mod challenges;
pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod rewards;
pub mod session;
pub mod stats;
pub mod storage;

pub use broadcast::{Broadcaster, ClientId, FrameSink};
pub use config::{load_config, PitwallConfig};
pub use engine::{EngineTasks, PitwallEngine};
pub use error::{
    ConfigError, PersistenceError, PitwallError, QueueClosed, Result, RewardError, SinkError,
};
pub use persistence::PersistenceStore;
pub use session::{
    event_channel, Event, EventReceiver, EventSender, EventType, SessionStore, StoreChange,
};
pub use stats::{Stats, StatsTracker};
pub use storage::StorageConfig;
