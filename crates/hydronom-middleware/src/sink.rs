//! The subscriber connection seam.
//!
//! The hub never owns a connection. The transport layer (the gateway's
//! WebSocket handler, or a test double) owns an `Arc<dyn FrameSink>` and the
//! hub keeps only a `Weak` to it, so a connection torn down by its owner
//! simply stops being reachable.

use async_trait::async_trait;
use hydronom_types::FleetError;

/// Anything that can push a text frame to one live subscriber.
///
/// # Contract
///
/// * `send_text` – deliver one complete frame. Return
///   [`FleetError::Transport`] when the peer is gone; the hub bounds the call
///   with its own timeout, so implementations may await back-pressure.
///
/// * `is_open` – cheap, non-blocking check used to skip connections that
///   already reported closure.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, frame: &str) -> Result<(), FleetError>;

    fn is_open(&self) -> bool;
}
