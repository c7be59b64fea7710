//! Append-only domain event log

mod model;
mod store;

pub use model::{actions, Event, EventEntity};
pub use store::{fetch_after, insert_event, new_event};
