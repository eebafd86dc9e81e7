//! Live session state and the lifecycle event stream.
//!
//! ```text
//! Monitor ──update_and_notify──▶ SessionStore ──notify──▶ Broadcaster
//!    │
//!    └──────send(Event)────────▶ event queue ───────────▶ StatsTracker
//! ```
//!
//! - [`store`]: the concurrent session table with lane assignment
//! - [`events`]: `New`/`Update`/`Terminal` events and the bounded queue

mod events;
mod store;

pub use events::{
    event_channel, Event, EventReceiver, EventSender, EventType, DEFAULT_EVENT_QUEUE_CAPACITY,
};
pub(crate) use events::TrackerMessage;
pub use store::{SessionStore, StoreChange};
