use crate::{proto, ResolveError};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};
use rule_controller_core::Kind;
use tokio::time;

/// Metrics for `Observe` streams.
#[derive(Clone, Debug)]
pub struct ObserveMetrics {
    streams: Counter,
    active: Gauge,
    duration: Histogram,
    rejected: Family<RejectLabels, Counter>,
    requests: Family<RequestLabels, Counter>,
    pushes: Family<KindLabels, Counter>,
}

/// Tracks an accepted stream until it is dropped.
#[derive(Debug)]
pub(crate) struct StreamObserver {
    start: time::Instant,
    active: Gauge,
    duration: Histogram,
    pushes: Family<KindLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RejectLabels {
    reason: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RequestLabels {
    kind: &'static str,
    request: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct KindLabels {
    kind: &'static str,
}

// === impl ObserveMetrics ===

impl ObserveMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let streams = Counter::default();
        reg.register(
            "streams",
            "Total number of accepted Observe streams",
            streams.clone(),
        );

        let active = Gauge::default();
        reg.register(
            "active_streams",
            "Number of open Observe streams",
            active.clone(),
        );

        // Streams live as long as the client stays connected.
        let duration = Histogram::new([1.0, 60.0, 300.0, 3600.0, 86400.0]);
        reg.register_with_unit(
            "stream_duration",
            "Lifetime of closed Observe streams",
            Unit::Seconds,
            duration.clone(),
        );

        let rejected = Family::default();
        reg.register(
            "rejected",
            "Total number of Observe calls refused because the client endpoint could not be resolved",
            rejected.clone(),
        );

        let requests = Family::default();
        reg.register(
            "requests",
            "Total number of subscriptions and acknowledgements read from clients",
            requests.clone(),
        );

        let pushes = Family::default();
        reg.register(
            "pushes",
            "Total number of rule snapshots written to clients",
            pushes.clone(),
        );

        Self {
            streams,
            active,
            duration,
            rejected,
            requests,
            pushes,
        }
    }

    pub(crate) fn accepted(&self) -> StreamObserver {
        self.streams.inc();
        self.active.inc();
        StreamObserver {
            start: time::Instant::now(),
            active: self.active.clone(),
            duration: self.duration.clone(),
            pushes: self.pushes.clone(),
        }
    }

    pub(crate) fn rejected(&self, error: &ResolveError) {
        self.rejected
            .get_or_create(&RejectLabels {
                reason: error.reason(),
            })
            .inc();
    }

    pub(crate) fn request(&self, req: &proto::ObserveRequest) {
        let kind = req
            .r#type
            .parse::<Kind>()
            .map(|kind| kind.as_str())
            .unwrap_or("unknown");
        let request = if req.nonce.is_empty() {
            "listen"
        } else {
            "ack"
        };
        self.requests
            .get_or_create(&RequestLabels { kind, request })
            .inc();
    }
}

// === impl StreamObserver ===

impl StreamObserver {
    pub(crate) fn pushed(&self, kind: Kind) {
        self.pushes
            .get_or_create(&KindLabels {
                kind: kind.as_str(),
            })
            .inc();
    }
}

impl Drop for StreamObserver {
    fn drop(&mut self) {
        self.active.dec();
        self.duration.observe(self.start.elapsed().as_secs_f64());
    }
}
