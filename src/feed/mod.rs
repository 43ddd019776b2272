//! Feed ingestion
//!
//! Owns the live connection to the upstream market-data socket: decodes and
//! validates every inbound message, appends one envelope per message to the
//! broadcast log, and manages subscription control frames over the same
//! connection.

mod protocol;
mod socket;
mod worker;

pub use protocol::{ControlFrame, ControlMethod, SubscriptionMode};
pub use socket::{RawFrame, SocketEvent, SocketHandle};
pub use worker::{FeedError, FeedState, FeedWorker, ReconcileReport};
