//! Event bus (spec §4.4): priority-aware pub/sub with adaptive batching
//! over the closed event-type vocabulary.

mod bus;
mod event;

pub use bus::{BusMetrics, EventBus, Handler, SharedEventBus, SubscribeFilter};
pub use event::{Event, EventKind, Priority};
