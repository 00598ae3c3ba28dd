//! `hydronom-kernel` – state distribution and command dispatch.
//!
//! The kernel does not move data itself; it decides the order in which the
//! store and the middleware see it.
//!
//! # Modules
//!
//! - [`control_plane`] – [`ControlPlane`][control_plane::ControlPlane]: the
//!   single entry point used by the transport layer. Telemetry goes cache →
//!   journal → hub, so a subscriber never sees a push before the matching
//!   state is queryable. Commands go queue → journal.
//! - [`validation`] – identifier checks applied before anything reaches the
//!   cache or the journal.

pub mod control_plane;
pub mod validation;

pub use control_plane::ControlPlane;
