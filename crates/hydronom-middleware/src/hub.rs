//! Per-vehicle publish/subscribe hub.
//!
//! Live viewers subscribe to one vehicle id. Every call to
//! [`SubscriptionHub::broadcast`] serializes the telemetry frame once and
//! pushes it to every subscriber of that vehicle concurrently:
//!
//! * each send is bounded by the hub's send timeout, so a hung peer cannot
//!   stall the pass;
//! * a failure on one subscriber never affects delivery to the others;
//! * subscribers that are closed, dropped by their owner, failed, or timed
//!   out are evicted after the pass completes.
//!
//! Subscriber sets live in a sharded map keyed by vehicle id; a pass works on
//! a copy of the set taken under the shard lock, and no lock is held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use hydronom_types::{HubFrame, Telemetry};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sink::FrameSink;

/// Upper bound on a single subscriber send before the peer is considered hung.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Hub-assigned, process-unique subscription identifier.
pub type SubscriptionId = Uuid;

type SubscriberSet = HashMap<SubscriptionId, Weak<dyn FrameSink>>;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers removed at the end of the pass.
    pub evicted: usize,
}

/// Shared fan-out hub. Construct once and share it behind an [`Arc`].
pub struct SubscriptionHub {
    vehicles: DashMap<String, SubscriberSet>,
    send_timeout: Duration,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl SubscriptionHub {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            vehicles: DashMap::new(),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Register `sink` as a subscriber of `vehicle_id` and greet it.
    ///
    /// The hello frame is sent after registration; if it fails the
    /// subscription stays in place and the dead peer is evicted on the next
    /// broadcast. Dropping the returned [`Subscription`] unsubscribes, and so
    /// does dropping this future while the hello is still in flight.
    pub async fn subscribe(
        self: &Arc<Self>,
        vehicle_id: &str,
        sink: &Arc<dyn FrameSink>,
    ) -> Subscription {
        let id = Uuid::new_v4();
        self.vehicles
            .entry(vehicle_id.to_string())
            .or_default()
            .insert(id, Arc::downgrade(sink));
        // Guard first: cancellation at the await below must still unregister.
        let subscription = Subscription {
            hub: Arc::clone(self),
            vehicle_id: vehicle_id.to_string(),
            id,
        };
        info!(vehicle_id, subscription = %id, "subscriber registered");

        match (HubFrame::Hello { vehicle_id }).to_json() {
            Ok(hello) => match timeout(self.send_timeout, sink.send_text(&hello)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(vehicle_id, subscription = %id, error = %e, "hello frame not delivered"),
                Err(_) => debug!(vehicle_id, subscription = %id, "hello frame timed out"),
            },
            Err(e) => warn!(error = %e, "could not encode hello frame"),
        }

        subscription
    }

    /// Remove one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, vehicle_id: &str, id: SubscriptionId) {
        if let Entry::Occupied(mut set) = self.vehicles.entry(vehicle_id.to_string()) {
            if set.get_mut().remove(&id).is_some() {
                debug!(vehicle_id, subscription = %id, "subscriber removed");
            }
            if set.get().is_empty() {
                set.remove();
            }
        }
    }

    /// Number of live registrations for `vehicle_id`.
    pub fn subscriber_count(&self, vehicle_id: &str) -> usize {
        self.vehicles.get(vehicle_id).map_or(0, |set| set.len())
    }

    /// Push `snapshot` to every subscriber of `vehicle_id`.
    ///
    /// Never fails: transport errors are logged and resolved by eviction.
    /// A vehicle with no subscribers is a no-op.
    pub async fn broadcast(&self, vehicle_id: &str, snapshot: &Telemetry) -> BroadcastReport {
        let targets: Vec<(SubscriptionId, Weak<dyn FrameSink>)> = match self.vehicles.get(vehicle_id) {
            Some(set) => set.iter().map(|(id, sink)| (*id, Weak::clone(sink))).collect(),
            None => return BroadcastReport::default(),
        };
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let frame = match (HubFrame::Telemetry { data: snapshot }).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(vehicle_id, error = %e, "could not encode telemetry frame");
                return BroadcastReport::default();
            }
        };

        let send_timeout = self.send_timeout;
        let frame = frame.as_str();
        let outcomes = join_all(targets.into_iter().map(|(id, sink)| async move {
            let Some(sink) = sink.upgrade() else {
                debug!(vehicle_id, subscription = %id, "subscriber connection dropped");
                return (id, false);
            };
            if !sink.is_open() {
                debug!(vehicle_id, subscription = %id, "subscriber connection closed");
                return (id, false);
            }
            match timeout(send_timeout, sink.send_text(frame)).await {
                Ok(Ok(())) => (id, true),
                Ok(Err(e)) => {
                    warn!(vehicle_id, subscription = %id, error = %e, "telemetry send failed");
                    (id, false)
                }
                Err(_) => {
                    warn!(vehicle_id, subscription = %id, timeout_ms = send_timeout.as_millis() as u64, "subscriber hung; evicting");
                    (id, false)
                }
            }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, delivered) in outcomes {
            if delivered {
                report.delivered += 1;
            } else {
                self.unsubscribe(vehicle_id, id);
                report.evicted += 1;
            }
        }
        report
    }
}

/// A live registration on the hub. Dropping it unsubscribes.
///
/// Hold it for exactly as long as the underlying connection is being served;
/// the drop runs on normal close, on error, and when the serving task is
/// cancelled.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Arc<SubscriptionHub>,
    vehicle_id: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.vehicle_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hydronom_types::FleetError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every frame; can be told to fail or to report closed.
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        fail: AtomicBool,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<serde_json::Value> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|f| serde_json::from_str(f).unwrap())
                .collect()
        }

        fn telemetry_frames(&self) -> Vec<serde_json::Value> {
            self.frames()
                .into_iter()
                .filter(|f| f["type"] == "telemetry")
                .collect()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_text(&self, frame: &str) -> Result<(), FleetError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FleetError::Transport("connection reset".into()));
            }
            self.frames.lock().unwrap().push(frame.to_string());
            Ok(())
        }

        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    /// Accepts the hello frame, then never completes another send.
    #[derive(Default)]
    struct HangingSink {
        greeted: AtomicBool,
    }

    #[async_trait]
    impl FrameSink for HangingSink {
        async fn send_text(&self, _frame: &str) -> Result<(), FleetError> {
            if !self.greeted.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            std::future::pending::<()>().await;
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    /// Takes its time over every frame, the hello included.
    struct SlowSink;

    #[async_trait]
    impl FrameSink for SlowSink {
        async fn send_text(&self, _frame: &str) -> Result<(), FleetError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn snapshot(id: &str, leak: bool) -> Telemetry {
        let mut t = Telemetry::default();
        t.vehicle.id = id.to_string();
        t.leak = leak;
        t
    }

    fn recording() -> (Arc<RecordingSink>, Arc<dyn FrameSink>) {
        let sink = Arc::new(RecordingSink::default());
        let dyn_sink: Arc<dyn FrameSink> = sink.clone();
        (sink, dyn_sink)
    }

    #[tokio::test]
    async fn subscribe_sends_hello_frame() {
        let hub = Arc::new(SubscriptionHub::default());
        let (sink, dyn_sink) = recording();

        let sub = hub.subscribe("v1", &dyn_sink).await;

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "hello");
        assert_eq!(frames[0]["vehicleId"], "v1");
        assert_eq!(sub.vehicle_id(), "v1");
        assert_eq!(hub.subscriber_count("v1"), 1);
    }

    #[tokio::test]
    async fn failed_hello_keeps_registration() {
        let hub = Arc::new(SubscriptionHub::default());
        let (sink, dyn_sink) = recording();
        sink.fail.store(true, Ordering::SeqCst);

        let _sub = hub.subscribe("v1", &dyn_sink).await;
        assert_eq!(hub.subscriber_count("v1"), 1);

        // Next broadcast detects the dead peer.
        let report = hub.broadcast("v1", &snapshot("v1", false)).await;
        assert_eq!(report, BroadcastReport { delivered: 0, evicted: 1 });
        assert_eq!(hub.subscriber_count("v1"), 0);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_noop() {
        let hub = SubscriptionHub::default();
        let report = hub.broadcast("nobody", &snapshot("nobody", false)).await;
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(hub.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_exactly_one_frame_per_broadcast() {
        let hub = Arc::new(SubscriptionHub::default());
        let (sink, dyn_sink) = recording();
        let _sub = hub.subscribe("v1", &dyn_sink).await;

        let report = hub.broadcast("v1", &snapshot("v1", true)).await;
        assert_eq!(report.delivered, 1);

        let frames = sink.telemetry_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["leak"], true);
        assert_eq!(frames[0]["data"]["vehicle"]["id"], "v1");
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_vehicle() {
        let hub = Arc::new(SubscriptionHub::default());
        let (v1_sink, v1_dyn) = recording();
        let (v2_sink, v2_dyn) = recording();
        let _a = hub.subscribe("v1", &v1_dyn).await;
        let _b = hub.subscribe("v2", &v2_dyn).await;

        hub.broadcast("v1", &snapshot("v1", false)).await;

        assert_eq!(v1_sink.telemetry_frames().len(), 1);
        assert!(v2_sink.telemetry_frames().is_empty());
    }

    #[tokio::test]
    async fn failing_subscriber_is_isolated_and_evicted() {
        let hub = Arc::new(SubscriptionHub::default());
        let (good, good_dyn) = recording();
        let (bad, bad_dyn) = recording();
        let _good_sub = hub.subscribe("v1", &good_dyn).await;
        let _bad_sub = hub.subscribe("v1", &bad_dyn).await;
        bad.fail.store(true, Ordering::SeqCst);

        let report = hub.broadcast("v1", &snapshot("v1", false)).await;
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert_eq!(good.telemetry_frames().len(), 1);
        assert_eq!(hub.subscriber_count("v1"), 1);

        // The evicted subscriber is not attempted again even if it recovers.
        bad.fail.store(false, Ordering::SeqCst);
        let report = hub.broadcast("v1", &snapshot("v1", false)).await;
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 0 });
        assert!(bad.telemetry_frames().is_empty());
    }

    #[tokio::test]
    async fn closed_subscriber_is_evicted_without_send() {
        let hub = Arc::new(SubscriptionHub::default());
        let (sink, dyn_sink) = recording();
        let _sub = hub.subscribe("v1", &dyn_sink).await;
        sink.closed.store(true, Ordering::SeqCst);

        let report = hub.broadcast("v1", &snapshot("v1", false)).await;
        assert_eq!(report.evicted, 1);
        assert!(sink.telemetry_frames().is_empty());
    }

    #[tokio::test]
    async fn dropped_connection_is_evicted() {
        let hub = Arc::new(SubscriptionHub::default());
        let (sink, dyn_sink) = recording();
        let sub = hub.subscribe("v1", &dyn_sink).await;
        // Transport releases the connection while the guard is leaked elsewhere.
        drop(sink);
        drop(dyn_sink);
        std::mem::forget(sub);

        let report = hub.broadcast("v1", &snapshot("v1", false)).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(hub.subscriber_count("v1"), 0);
    }

    #[tokio::test]
    async fn hung_subscriber_does_not_stall_others() {
        let hub = Arc::new(SubscriptionHub::new(Duration::from_millis(50)));
        let (good, good_dyn) = recording();
        let hanging: Arc<dyn FrameSink> = Arc::new(HangingSink::default());
        let _good_sub = hub.subscribe("v1", &good_dyn).await;
        let _hung_sub = hub.subscribe("v1", &hanging).await;

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            hub.broadcast("v1", &snapshot("v1", false)),
        )
        .await
        .expect("broadcast must finish despite a hung peer");

        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert_eq!(good.telemetry_frames().len(), 1);
        assert_eq!(hub.subscriber_count("v1"), 1);
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_noop() {
        let hub = Arc::new(SubscriptionHub::default());
        let (_sink, dyn_sink) = recording();
        let (_other, other_dyn) = recording();
        let sub = hub.subscribe("v1", &dyn_sink).await;
        let _keep = hub.subscribe("v1", &other_dyn).await;
        let id = sub.id();

        hub.unsubscribe("v1", id);
        assert_eq!(hub.subscriber_count("v1"), 1);
        hub.unsubscribe("v1", id);
        assert_eq!(hub.subscriber_count("v1"), 1);

        // The guard's own unsubscribe on drop is a third, harmless call.
        drop(sub);
        assert_eq!(hub.subscriber_count("v1"), 1);
        hub.unsubscribe("unknown-vehicle", id);
    }

    #[tokio::test]
    async fn dropping_guard_unsubscribes() {
        let hub = Arc::new(SubscriptionHub::default());
        let (_sink, dyn_sink) = recording();
        {
            let _sub = hub.subscribe("v1", &dyn_sink).await;
            assert_eq!(hub.subscriber_count("v1"), 1);
        }
        assert_eq!(hub.subscriber_count("v1"), 0);
    }

    #[tokio::test]
    async fn cancelled_task_releases_subscription() {
        let hub = Arc::new(SubscriptionHub::default());
        let (_sink, dyn_sink) = recording();

        let task_hub = Arc::clone(&hub);
        let task = tokio::spawn(async move {
            let _sub = task_hub.subscribe("v1", &dyn_sink).await;
            std::future::pending::<()>().await;
        });

        for _ in 0..100 {
            if hub.subscriber_count("v1") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hub.subscriber_count("v1"), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(hub.subscriber_count("v1"), 0);
    }

    #[tokio::test]
    async fn cancelled_during_hello_leaves_no_registration() {
        let hub = Arc::new(SubscriptionHub::default());
        let dyn_sink: Arc<dyn FrameSink> = Arc::new(SlowSink);

        let task_hub = Arc::clone(&hub);
        let task_sink = Arc::clone(&dyn_sink);
        let task = tokio::spawn(async move {
            let _sub = task_hub.subscribe("v1", &task_sink).await;
            std::future::pending::<()>().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.subscriber_count("v1"), 1, "registered before the hello completes");

        task.abort();
        let _ = task.await;
        assert_eq!(hub.subscriber_count("v1"), 0);
    }

    #[tokio::test]
    async fn subscription_ids_are_unique() {
        let hub = Arc::new(SubscriptionHub::default());
        let (_sink, dyn_sink) = recording();
        let a = hub.subscribe("v1", &dyn_sink).await;
        let b = hub.subscribe("v1", &dyn_sink).await;
        assert_ne!(a.id(), b.id());
        assert_eq!(hub.subscriber_count("v1"), 2);
    }
}
