//! `hydronom-store` – the fleet link's state and record keeping.
//!
//! # Modules
//!
//! - [`cache`] – [`StateCache`][cache::StateCache]: latest telemetry snapshot
//!   per vehicle and latest mission record per task, held in sharded
//!   concurrent maps so unrelated vehicles never contend.
//! - [`journal`] – [`Journal`][journal::Journal]: append-only JSONL log,
//!   partitioned by UTC day and record kind (telemetry vs. events).

pub mod cache;
pub mod journal;

pub use cache::StateCache;
pub use journal::{Journal, RecordKind, partition_path};
