//! `hydronom-middleware` – live fan-out and command hand-off.
//!
//! Routes data between the ingestion path and its consumers without caring
//! about the data's meaning.
//!
//! # Modules
//!
//! - [`sink`] – [`FrameSink`]: the seam between the hub and whatever
//!   transport owns a subscriber connection.
//! - [`hub`] – [`SubscriptionHub`]: per-vehicle subscriber sets with isolated,
//!   time-bounded sends and deferred eviction of dead subscribers.
//! - [`command_queue`] – [`CommandQueue`] / [`CommandDrain`]: unbounded
//!   multi-producer, single-consumer FIFO of operator commands.

pub mod command_queue;
pub mod hub;
pub mod sink;

pub use command_queue::{CommandDrain, CommandQueue, command_queue};
pub use hub::{BroadcastReport, DEFAULT_SEND_TIMEOUT, Subscription, SubscriptionHub, SubscriptionId};
pub use sink::FrameSink;
