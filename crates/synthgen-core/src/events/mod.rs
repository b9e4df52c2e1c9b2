//! Log relay between the job runner and stream subscribers.
//!
//! - `LogLine` - one captured line of generator output
//! - `RelayEvent` - sequenced line or sentinel carried by the relay
//! - `EventRelay` - per-job fan-out with a bounded replay buffer

mod relay;
mod types;

pub use relay::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_REPLAY_LIMIT, EventRelay, Subscription};
pub use types::{
    Delivery, END_OF_STREAM, LogLine, LogStream, REFRESH_FILES, RelayEvent, RelayPayload,
};
