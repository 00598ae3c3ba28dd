//! `hydronom-gateway` – HTTP + WebSocket transport for the telemetry engine.
//!
//! Boots a small [warp] server (default port `5000`) that:
//!
//! 1. **Routes** JSON HTTP requests under `/api/*` onto the
//!    [`ControlPlane`] (telemetry ingestion, latest-state queries, operator
//!    commands, missions, health). Every `/api/*` request needs an
//!    `Authorization` header carrying the configured token.
//!
//! 2. **Streams** live telemetry over WebSocket at
//!    `/ws/telemetry/{vehicleId}`: a `hello` frame on connect, then one
//!    `telemetry` frame per ingested snapshot of that vehicle.
//!
//! 3. **Serves** the command queue to the vehicle control channel over
//!    `GET /api/commands/next`.
//!
//! [`ControlPlane`]: hydronom_kernel::ControlPlane

pub mod routes;
pub mod server;
pub mod ws;

pub use routes::{DEFAULT_AUTH_TOKEN, DEFAULT_CORS_ORIGIN, MAX_BODY_BYTES, Router};
pub use server::{DEFAULT_BIND_ADDRESS, DEFAULT_PORT, GatewayServer};
