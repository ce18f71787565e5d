use crate::{queue::WorkQueue, SharedStorage, Storage, StorageMetrics};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use rule_controller_core::{Endpoint, Kind, ObserveRequest, ObserveResponse, ToClient};
use std::{collections::hash_map::Entry, fmt, sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// The transport side of a client session.
#[async_trait::async_trait]
pub trait EndpointConnection: Send + Sync + 'static {
    async fn send(&self, rsp: ObserveResponse) -> Result<(), SendError>;

    /// Receives the next client message. Returns `None` once the client has
    /// closed its side of the stream.
    async fn recv(&self) -> anyhow::Result<Option<ObserveRequest>>;

    /// Closes the stream. Must not block.
    fn disconnect(&self);
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Bounds each push attempt.
    pub send_timeout: Duration,

    /// The number of consecutive failed pushes after which a session is
    /// closed. Zero disables the bound.
    pub max_send_failures: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("stream closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// A client session.
pub struct Connection {
    id: ConnectionId,
    endpoint: Endpoint,
    transport: Box<dyn EndpointConnection>,
    state: Mutex<Session>,
    queue: WorkQueue,
    closed: CancellationToken,
    config: ConnectionConfig,
    metrics: StorageMetrics,
}

/// A handle to a registered session, held by the transport that opened it.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    storage: SharedStorage,
    connection: Arc<Connection>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PushStatus {
    /// Nothing has been pushed yet.
    #[default]
    Idle,

    /// A push awaits acknowledgement.
    Pushing,

    /// The last push was acknowledged.
    Pushed,
}

/// Push and acknowledgement state of one kind on one connection.
#[derive(Clone, Debug, Default)]
pub struct AckState {
    status: PushStatus,
    push_queued: bool,
    nonces: u64,
    last_push_nonce: Option<String>,
    in_flight: Option<ToClient>,
    acked: Option<ToClient>,
}

#[derive(Debug, Default)]
struct Session {
    acks: HashMap<Kind, AckState>,
    send_failures: u32,
}

// === impl ConnectionConfig ===

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            max_send_failures: 3,
        }
    }
}

// === impl ConnectionId ===

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl AckState ===

impl AckState {
    pub fn status(&self) -> PushStatus {
        self.status
    }

    /// Indicates whether a change arrived while a push was unacknowledged.
    pub fn push_queued(&self) -> bool {
        self.push_queued
    }

    pub fn last_push_nonce(&self) -> Option<&str> {
        self.last_push_nonce.as_deref()
    }

    /// The revision of the unacknowledged push, if any.
    pub fn pushing_revision(&self) -> Option<i64> {
        self.in_flight.as_ref().map(|s| s.revision)
    }

    /// The revision most recently acknowledged by the client.
    pub fn acked_revision(&self) -> Option<i64> {
        self.acked.as_ref().map(|s| s.revision)
    }

    fn next_nonce(&mut self) -> String {
        self.nonces += 1;
        self.nonces.to_string()
    }
}

// === impl Connection ===

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        endpoint: Endpoint,
        transport: Box<dyn EndpointConnection>,
        config: ConnectionConfig,
        metrics: StorageMetrics,
    ) -> Self {
        Self {
            id,
            endpoint,
            transport,
            state: Default::default(),
            queue: Default::default(),
            closed: CancellationToken::new(),
            config,
            metrics,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_listening(&self, kind: Kind) -> bool {
        self.state.lock().acks.contains_key(&kind)
    }

    pub fn ack_state(&self, kind: Kind) -> Option<AckState> {
        self.state.lock().acks.get(&kind).cloned()
    }

    /// The number of kinds awaiting dispatch.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Marks a kind pending if the client is subscribed to it.
    pub(crate) fn notify(&self, kind: Kind) -> bool {
        if !self.is_listening(kind) {
            return false;
        }
        self.queue.push(kind);
        true
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
        self.queue.shutdown();
        self.state.lock().acks.clear();
        self.transport.disconnect();
    }

    fn handle_request(&self, storage: &Storage, req: ObserveRequest) {
        let kind = match req.kind.parse::<Kind>() {
            Ok(kind) => kind,
            Err(error) => {
                debug!(%error, nonce = %req.nonce, "Ignoring request");
                return;
            }
        };

        if req.is_ack() {
            self.ack(kind, &req.nonce);
        } else {
            self.listen(storage, kind);
        }
    }

    fn listen(&self, storage: &Storage, kind: Kind) {
        {
            let mut session = self.state.lock();
            match session.acks.entry(kind) {
                Entry::Vacant(entry) => {
                    info!(%kind, "Client subscribed");
                    entry.insert(AckState::default());
                }
                Entry::Occupied(mut entry) => {
                    debug!(%kind, "Client resubscribed");
                    let ack = entry.get_mut();
                    ack.acked = None;
                    if ack.status == PushStatus::Pushing {
                        ack.push_queued = true;
                        return;
                    }
                }
            }
        }

        if storage.latest(kind).is_some() {
            self.queue.push(kind);
        }
    }

    fn ack(&self, kind: Kind, nonce: &str) {
        let queued = {
            let mut session = self.state.lock();
            let ack = match session.acks.get_mut(&kind) {
                Some(ack)
                    if ack.status == PushStatus::Pushing
                        && ack.last_push_nonce.as_deref() == Some(nonce) =>
                {
                    ack
                }
                _ => {
                    debug!(%kind, %nonce, "Ignoring stale acknowledgement");
                    self.metrics.stale_ack();
                    return;
                }
            };
            ack.status = PushStatus::Pushed;
            ack.acked = ack.in_flight.take();
            std::mem::take(&mut ack.push_queued)
        };

        trace!(%kind, %nonce, "Client acknowledged");
        self.metrics.acked(kind);
        if queued {
            self.queue.push(kind);
        }
    }

    /// Pushes the endpoint's current view of a kind, unless a push is already
    /// in flight or the client already has it.
    async fn sync(&self, storage: &Storage, kind: Kind) {
        let Some(origin) = storage.latest(kind) else {
            warn!(%kind, "No rules published; discarding");
            return;
        };

        {
            let mut session = self.state.lock();
            let Some(ack) = session.acks.get_mut(&kind) else {
                trace!(%kind, "Not subscribed");
                return;
            };
            if ack.status == PushStatus::Pushing {
                ack.push_queued = true;
                self.metrics.coalesced(kind);
                debug!(%kind, "Push in flight; deferring");
                return;
            }
        }

        let snapshot = match origin.exact(Some(&self.endpoint)) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, "Failed to compute rules");
                return;
            }
        };

        let (rsp, previous) = {
            let mut session = self.state.lock();
            let Some(ack) = session.acks.get_mut(&kind) else {
                return;
            };
            if ack
                .acked
                .as_ref()
                .is_some_and(|acked| acked.data == snapshot.data)
            {
                debug!(%kind, revision = snapshot.revision, "Client is up to date");
                return;
            }

            let previous = (ack.status, ack.last_push_nonce.take());
            let nonce = ack.next_nonce();
            ack.status = PushStatus::Pushing;
            ack.last_push_nonce = Some(nonce.clone());
            let rsp = ObserveResponse {
                nonce,
                kind,
                revision: snapshot.revision,
                data: snapshot.data.clone(),
            };
            ack.in_flight = Some(snapshot);
            (rsp, previous)
        };
        let nonce = rsp.nonce.clone();
        let revision = rsp.revision;

        let timeout = self.config.send_timeout;
        let res = match time::timeout(timeout, self.transport.send(rsp)).await {
            Ok(res) => res,
            Err(_) => Err(SendError::Timeout(timeout)),
        };

        match res {
            Ok(()) => {
                self.state.lock().send_failures = 0;
                self.metrics.pushed(kind);
                debug!(%kind, revision, %nonce, "Pushed rules");
            }
            Err(error) => {
                self.metrics.send_failed(kind);
                let (failures, requeue) = {
                    let mut session = self.state.lock();
                    // An acknowledgement may have raced the failed send.
                    let requeue = match session.acks.get_mut(&kind) {
                        Some(ack)
                            if ack.status == PushStatus::Pushing
                                && ack.last_push_nonce.as_deref() == Some(nonce.as_str()) =>
                        {
                            let (status, last_push_nonce) = previous;
                            ack.status = status;
                            ack.last_push_nonce = last_push_nonce;
                            ack.in_flight = None;
                            std::mem::take(&mut ack.push_queued)
                        }
                        _ => false,
                    };
                    session.send_failures += 1;
                    (session.send_failures, requeue)
                };
                warn!(%error, %kind, revision, failures, "Failed to push rules");

                let max = self.config.max_send_failures;
                if max > 0 && failures >= max {
                    warn!(failures, "Too many failed pushes; disconnecting");
                    storage.disconnect(self.id);
                    return;
                }
                if requeue {
                    self.queue.push(kind);
                }
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Reads client messages until the stream ends, fails, or the connection is
/// closed.
pub(crate) async fn receive(storage: SharedStorage, conn: Arc<Connection>) {
    loop {
        let res = tokio::select! {
            res = conn.transport.recv() => res,
            _ = conn.closed.cancelled() => return,
        };
        match res {
            Ok(Some(req)) => conn.handle_request(&storage, req),
            Ok(None) => {
                debug!("Client closed the stream");
                break;
            }
            Err(error) => {
                info!(%error, "Failed to receive from client");
                break;
            }
        }
    }
    storage.disconnect(conn.id);
}

/// Pushes pending kinds one at a time until the connection is closed.
pub(crate) async fn dispatch(storage: SharedStorage, conn: Arc<Connection>) {
    while let Some(kind) = conn.queue.next().await {
        conn.sync(&storage, kind).await;
    }
    trace!("Dispatch complete");
}

// === impl ConnectionHandle ===

impl ConnectionHandle {
    pub(crate) fn new(storage: SharedStorage, connection: Arc<Connection>) -> Self {
        Self {
            storage,
            connection,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Closes the session. Returns false if it was already closed.
    pub fn disconnect(&self) -> bool {
        self.storage.disconnect(self.connection.id)
    }

    /// Completes once the session has been closed.
    pub async fn closed(&self) {
        self.connection.closed.cancelled().await
    }
}
