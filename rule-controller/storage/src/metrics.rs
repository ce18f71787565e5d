use crate::SharedStorage;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use rule_controller_core::Kind;

#[derive(Clone, Debug, Default)]
pub struct StorageMetrics {
    connects: Counter,
    disconnects: Counter,
    pushes: Family<KindLabels, Counter>,
    acks: Family<KindLabels, Counter>,
    stale_acks: Counter,
    coalesced: Family<KindLabels, Counter>,
    send_failures: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Debug)]
struct Instrumented(SharedStorage);

/// Exports gauges describing the current contents of the storage.
pub fn register_collector(reg: &mut Registry, storage: SharedStorage) {
    reg.register_collector(Box::new(Instrumented(storage)));
}

// === impl StorageMetrics ===

impl StorageMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "connects",
            "Total number of client sessions opened",
            metrics.connects.clone(),
        );
        reg.register(
            "disconnects",
            "Total number of client sessions closed",
            metrics.disconnects.clone(),
        );
        reg.register(
            "pushes",
            "Total number of rule snapshots sent to clients",
            metrics.pushes.clone(),
        );
        reg.register(
            "acks",
            "Total number of pushes acknowledged by clients",
            metrics.acks.clone(),
        );
        reg.register(
            "stale_acks",
            "Total number of ignored acknowledgements with an unexpected nonce",
            metrics.stale_acks.clone(),
        );
        reg.register(
            "coalesced",
            "Total number of rule changes deferred while a push was unacknowledged",
            metrics.coalesced.clone(),
        );
        reg.register(
            "send_failures",
            "Total number of pushes that failed or timed out",
            metrics.send_failures.clone(),
        );
        metrics
    }

    pub(crate) fn connected(&self) {
        self.connects.inc();
    }

    pub(crate) fn disconnected(&self) {
        self.disconnects.inc();
    }

    pub(crate) fn pushed(&self, kind: Kind) {
        self.pushes.get_or_create(&KindLabels::from(kind)).inc();
    }

    pub(crate) fn acked(&self, kind: Kind) {
        self.acks.get_or_create(&KindLabels::from(kind)).inc();
    }

    pub(crate) fn stale_ack(&self) {
        self.stale_acks.inc();
    }

    pub(crate) fn coalesced(&self, kind: Kind) {
        self.coalesced.get_or_create(&KindLabels::from(kind)).inc();
    }

    pub(crate) fn send_failed(&self, kind: Kind) {
        self.send_failures.get_or_create(&KindLabels::from(kind)).inc();
    }
}

impl From<Kind> for KindLabels {
    fn from(kind: Kind) -> Self {
        Self {
            kind: kind.as_str(),
        }
    }
}

// === impl Instrumented ===

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let connections = ConstGauge::new(self.0.connection_count() as i64);
        let connections_encoder = encoder.encode_descriptor(
            "connections",
            "The number of connected clients",
            None,
            MetricType::Gauge,
        )?;
        connections.encode(connections_encoder)?;

        let mut revision_encoder = encoder.encode_descriptor(
            "revision",
            "The current revision of each rule kind",
            None,
            MetricType::Gauge,
        )?;
        for (kind, revision) in self.0.revisions() {
            let labels = [("kind", kind.as_str())];
            let revision = ConstGauge::new(revision);
            let revision_encoder = revision_encoder.encode_family(&labels)?;
            revision.encode(revision_encoder)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionConfig, Storage};

    #[test]
    fn encodes_counters_and_gauges() {
        let mut reg = Registry::default();
        let metrics = StorageMetrics::register(reg.sub_registry_with_prefix("storage"));
        let storage = Storage::shared(ConnectionConfig::default(), metrics.clone());
        register_collector(reg.sub_registry_with_prefix("storage"), storage);

        metrics.pushed(Kind::Authorization);
        metrics.pushed(Kind::Authorization);
        metrics.stale_ack();

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &reg).unwrap();
        assert!(
            text.contains(r#"storage_pushes_total{kind="authorization/v1beta1"} 2"#),
            "{text}"
        );
        assert!(text.contains("storage_stale_acks_total 1"), "{text}");
        assert!(text.contains("storage_connections 0"), "{text}");
    }
}
