mod connection;

use crate::{
    ConnectionConfig, ConnectionHandle, EndpointConnection, SendError, SharedStorage, Storage,
    StorageMetrics,
};
use parking_lot::Mutex;
use rule_controller_core::{
    policy::authorization::{Authorization, AuthorizationSpec, Rule, Target},
    Endpoint, Kind, ObserveRequest, ObserveResponse,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{sync::mpsc, time};

fn mk_storage(config: ConnectionConfig) -> SharedStorage {
    Storage::shared(config, StorageMetrics::default())
}

fn mk_endpoint() -> Endpoint {
    Endpoint {
        id: "web-0".to_string(),
        ips: vec!["10.0.0.1".to_string()],
        ..Default::default()
    }
}

fn mk_authz(name: &str, action: &str) -> Authorization {
    Authorization {
        name: name.to_string(),
        spec: Some(AuthorizationSpec {
            action: action.to_string(),
            ..Default::default()
        }),
    }
}

/// An authorization policy whose rule only targets endpoints in `ns`.
fn mk_authz_in_namespace(name: &str, ns: &str) -> Authorization {
    Authorization {
        name: name.to_string(),
        spec: Some(AuthorizationSpec {
            action: "deny".to_string(),
            rules: vec![Rule {
                to: Some(Target {
                    namespaces: vec![ns.to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn trace_init() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

/// Polls `f` until it returns true or a second has elapsed.
async fn eventually(f: impl Fn() -> bool) {
    for _ in 0..100 {
        if f() {
            return;
        }
        time::sleep(time::Duration::from_millis(10)).await;
    }
    panic!("condition not satisfied within 1s");
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum SendMode {
    #[default]
    Deliver,
    Fail,
    Hang,
    /// Delivers the push, then fails once `Controls::release` is notified.
    FailAfterDelivery,
}

#[derive(Debug, Default)]
struct Controls {
    mode: Mutex<SendMode>,
    attempts: AtomicUsize,
    disconnects: AtomicUsize,
    release: tokio::sync::Notify,
}

struct MockTransport {
    sent: mpsc::UnboundedSender<ObserveResponse>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<anyhow::Result<ObserveRequest>>>,
    controls: Arc<Controls>,
}

/// The client side of a mock session.
struct Client {
    handle: ConnectionHandle,
    requests: Option<mpsc::UnboundedSender<anyhow::Result<ObserveRequest>>>,
    responses: mpsc::UnboundedReceiver<ObserveResponse>,
    controls: Arc<Controls>,
}

// === impl Controls ===

impl Controls {
    fn set_mode(&self, mode: SendMode) {
        *self.mode.lock() = mode;
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

// === impl MockTransport ===

#[async_trait::async_trait]
impl EndpointConnection for MockTransport {
    async fn send(&self, rsp: ObserveResponse) -> Result<(), SendError> {
        self.controls.attempts.fetch_add(1, Ordering::SeqCst);
        let mode = *self.controls.mode.lock();
        match mode {
            SendMode::Deliver => self.sent.send(rsp).map_err(|_| SendError::Closed),
            SendMode::Fail => Err(SendError::Transport(anyhow::anyhow!("connection reset"))),
            SendMode::Hang => std::future::pending().await,
            SendMode::FailAfterDelivery => {
                self.sent.send(rsp).map_err(|_| SendError::Closed)?;
                self.controls.release.notified().await;
                Err(SendError::Transport(anyhow::anyhow!("write deadline exceeded")))
            }
        }
    }

    async fn recv(&self) -> anyhow::Result<Option<ObserveRequest>> {
        self.requests.lock().await.recv().await.transpose()
    }

    fn disconnect(&self) {
        self.controls.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// === impl Client ===

impl Client {
    fn connect(storage: &SharedStorage, endpoint: Endpoint) -> Self {
        let (sent, responses) = mpsc::unbounded_channel();
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let controls = Arc::new(Controls::default());
        let handle = storage.connect(
            endpoint,
            MockTransport {
                sent,
                requests: tokio::sync::Mutex::new(requests),
                controls: controls.clone(),
            },
        );
        Self {
            handle,
            requests: Some(requests_tx),
            responses,
            controls,
        }
    }

    fn request(&self, req: anyhow::Result<ObserveRequest>) {
        self.requests
            .as_ref()
            .expect("stream must be open")
            .send(req)
            .expect("connection must be receiving");
    }

    fn listen(&self, kind: Kind) {
        self.request(Ok(ObserveRequest::listen(kind)));
    }

    fn ack(&self, rsp: &ObserveResponse) {
        self.request(Ok(ObserveRequest::ack(rsp.kind, rsp.nonce.clone())));
    }

    /// Closes the client's side of the stream.
    fn hangup(&mut self) {
        self.requests = None;
    }

    async fn next(&mut self) -> ObserveResponse {
        time::timeout(time::Duration::from_secs(1), self.responses.recv())
            .await
            .expect("timed out waiting for a push")
            .expect("transport must not be dropped")
    }

    async fn assert_idle(&mut self) {
        time::sleep(time::Duration::from_millis(100)).await;
        if let Ok(rsp) = self.responses.try_recv() {
            panic!("unexpected push: {rsp:?}");
        }
    }
}
