use crate::{
    connection::{self, Connection, ConnectionConfig, ConnectionHandle, ConnectionId},
    EndpointConnection, StorageMetrics,
};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use rule_controller_core::{Endpoint, ExactError, Kind, Origin, ToClient};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, info, info_span, Instrument};

pub type SharedStorage = Arc<Storage>;

/// Process-wide rule distribution state: the latest origin of each kind and
/// the set of connected clients.
#[derive(Debug)]
pub struct Storage {
    latest: RwLock<HashMap<Kind, Arc<dyn Origin>>>,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    config: ConnectionConfig,
    metrics: StorageMetrics,
}

// === impl Storage ===

impl Storage {
    pub fn shared(config: ConnectionConfig, metrics: StorageMetrics) -> SharedStorage {
        Arc::new(Self {
            latest: Default::default(),
            connections: Default::default(),
            next_id: AtomicU64::new(1),
            config,
            metrics,
        })
    }

    pub fn latest(&self, kind: Kind) -> Option<Arc<dyn Origin>> {
        self.latest.read().get(&kind).cloned()
    }

    /// Computes an endpoint's view of a kind. Returns `None` if no rules of
    /// the kind have been published.
    pub fn snapshot(
        &self,
        kind: Kind,
        endpoint: Option<&Endpoint>,
    ) -> Option<Result<ToClient, ExactError>> {
        self.latest(kind).map(|origin| origin.exact(endpoint))
    }

    pub fn revisions(&self) -> Vec<(Kind, i64)> {
        let mut revisions = self
            .latest
            .read()
            .iter()
            .map(|(kind, origin)| (*kind, origin.revision()))
            .collect::<Vec<_>>();
        revisions.sort_unstable();
        revisions
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Installs a new origin and signals every client subscribed to its kind.
    ///
    /// Signalling only marks the kind pending on each connection; it never
    /// waits on a client's send path.
    pub(crate) fn publish(&self, origin: Arc<dyn Origin>) {
        let kind = origin.kind();
        let revision = origin.revision();
        self.latest.write().insert(kind, origin);

        let connections = self
            .connections
            .read()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        let notified = connections.iter().filter(|c| c.notify(kind)).count();
        debug!(%kind, revision, connections = notified, "Published rules");
    }

    /// Registers a client session and spawns its receive and dispatch tasks.
    pub fn connect<T>(self: &Arc<Self>, endpoint: Endpoint, transport: T) -> ConnectionHandle
    where
        T: EndpointConnection,
    {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(
            id,
            endpoint,
            Box::new(transport),
            self.config.clone(),
            self.metrics.clone(),
        ));
        self.connections.write().insert(id, conn.clone());
        self.metrics.connected();
        info!(connection = %id, endpoint = %conn.endpoint().id, "Client connected");

        let span = info_span!("connection", id = %id);
        tokio::spawn(connection::receive(self.clone(), conn.clone()).instrument(span.clone()));
        tokio::spawn(connection::dispatch(self.clone(), conn.clone()).instrument(span));

        ConnectionHandle::new(self.clone(), conn)
    }

    /// Removes a connection and closes its transport.
    ///
    /// Returns false if the connection was already removed.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.write().remove(&id) else {
            return false;
        };
        conn.close();
        self.metrics.disconnected();
        info!(connection = %id, "Client disconnected");
        true
    }
}
