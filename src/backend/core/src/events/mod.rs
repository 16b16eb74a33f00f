//! Live event stream
//!
//! - **`event`**: event names and payload builders (`state-change`, `log`, ...).
//! - **`broadcast`**: the bounded publish/subscribe channel behind `/events`.

pub mod broadcast;
pub mod event;

pub use broadcast::{BroadcastStats, EventBroadcaster, EventSubscription};
pub use event::{EventLevel, EventName, RecoveryEvent};
