//! WebSocket live-telemetry connections.
//!
//! The connection task owns the [`WebSocketSink`] and the hub only ever sees
//! a `Weak` to it. The receive loop in [`serve_subscriber`] is the sole
//! owner of the [`Subscription`][hydronom_middleware::Subscription] guard: as
//! soon as the peer closes, errors, or goes away the guard drops and the
//! subscriber is unregistered, independently of any in-flight broadcast.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hydronom_kernel::ControlPlane;
use hydronom_middleware::FrameSink;
use hydronom_types::FleetError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Reply};

use crate::routes::segment;

type WsWriter = SplitSink<WebSocket, Message>;

/// Write half of one WebSocket connection.
pub struct WebSocketSink {
    writer: Mutex<WsWriter>,
    open: AtomicBool,
}

impl WebSocketSink {
    fn new(writer: WsWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&self, frame: &str) -> Result<(), FleetError> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::text(frame)).await {
            self.mark_closed();
            return Err(FleetError::Transport(e.to_string()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// `GET /ws/telemetry/{vehicleId}` with a WebSocket upgrade.
pub fn live_route(plane: ControlPlane) -> BoxedFilter<(Response,)> {
    let plane = warp::any().map(move || plane.clone());
    warp::path("ws")
        .and(warp::path("telemetry"))
        .and(segment())
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(plane)
        .map(|vehicle_id: String, ws: Ws, peer: Option<SocketAddr>, plane: ControlPlane| {
            ws.on_upgrade(move |socket| async move {
                if let Err(e) = serve_subscriber(socket, peer, vehicle_id, plane).await {
                    warn!(?peer, error = %e, "live subscriber rejected");
                }
            })
            .into_response()
        })
        .boxed()
}

/// Serve one upgraded connection as a live subscriber until the peer
/// disconnects.
pub async fn serve_subscriber(
    socket: WebSocket,
    peer: Option<SocketAddr>,
    vehicle_id: String,
    plane: ControlPlane,
) -> Result<(), FleetError> {
    let (ws_tx, mut ws_rx) = socket.split();
    let sink = Arc::new(WebSocketSink::new(ws_tx));
    let handle: Arc<dyn FrameSink> = sink.clone();

    let subscription = plane.subscribe(&vehicle_id, &handle).await?;
    info!(?peer, %vehicle_id, id = %subscription.id(), "live subscriber connected");

    // Inbound frames are ignored; the loop only watches for closure.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(msg) if msg.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                debug!(?peer, error = %e, "websocket receive failed");
                break;
            }
        }
    }

    sink.mark_closed();
    drop(subscription);
    info!(?peer, %vehicle_id, "live subscriber disconnected");
    Ok(())
}
