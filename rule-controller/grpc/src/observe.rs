use crate::{
    api::{RuleService, RuleServiceServer},
    metrics::{ObserveMetrics, StreamObserver},
    proto, ResolveEndpoint,
};
use futures::prelude::*;
use rule_controller_core::{ObserveRequest, ObserveResponse};
use rule_controller_storage::{ConnectionHandle, EndpointConnection, SendError, SharedStorage};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct RuleServer<R> {
    storage: SharedStorage,
    resolver: R,
    metrics: ObserveMetrics,
    response_buffer: usize,
    drain: drain::Watch,
}

/// Adapts an `Observe` call to a storage session.
struct GrpcConnection {
    requests: tokio::sync::Mutex<tonic::Streaming<proto::ObserveRequest>>,
    responses: parking_lot::Mutex<Option<mpsc::Sender<ObserveResponse>>>,
    metrics: ObserveMetrics,
}

/// Closes the storage session when the response stream is dropped.
struct StreamGuard {
    handle: ConnectionHandle,
    observer: StreamObserver,
}

type BoxObserveStream =
    std::pin::Pin<Box<dyn Stream<Item = Result<proto::ObserveResponse, tonic::Status>> + Send>>;

// === impl RuleServer ===

impl<R> RuleServer<R>
where
    R: ResolveEndpoint,
{
    pub fn new(
        storage: SharedStorage,
        resolver: R,
        metrics: ObserveMetrics,
        response_buffer: usize,
        drain: drain::Watch,
    ) -> Self {
        Self {
            storage,
            resolver,
            metrics,
            response_buffer: response_buffer.max(1),
            drain,
        }
    }

    pub fn svc(self) -> RuleServiceServer<Self> {
        RuleServiceServer::new(self)
    }
}

#[async_trait::async_trait]
impl<R> RuleService for RuleServer<R>
where
    R: ResolveEndpoint,
{
    type ObserveStream = BoxObserveStream;

    async fn observe(
        &self,
        req: tonic::Request<tonic::Streaming<proto::ObserveRequest>>,
    ) -> Result<tonic::Response<BoxObserveStream>, tonic::Status> {
        let endpoint = match self.resolver.resolve(req.remote_addr(), req.metadata()) {
            Ok(endpoint) => endpoint,
            Err(error) => {
                info!(%error, "Rejecting client");
                self.metrics.rejected(&error);
                return Err(error.into());
            }
        };
        debug!(id = %endpoint.id, ips = ?endpoint.ips, "Resolved client endpoint");

        let (tx, rx) = mpsc::channel(self.response_buffer);
        let conn = GrpcConnection {
            requests: tokio::sync::Mutex::new(req.into_inner()),
            responses: parking_lot::Mutex::new(Some(tx)),
            metrics: self.metrics.clone(),
        };
        let guard = StreamGuard {
            observer: self.metrics.accepted(),
            handle: self.storage.connect(endpoint, conn),
        };

        Ok(tonic::Response::new(response_stream(
            self.drain.clone(),
            rx,
            guard,
        )))
    }
}

fn response_stream(
    drain: drain::Watch,
    mut rx: mpsc::Receiver<ObserveResponse>,
    guard: StreamGuard,
) -> BoxObserveStream {
    Box::pin(async_stream::try_stream! {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            tokio::select! {
                // The session closes the channel when it disconnects.
                res = rx.recv() => match res {
                    Some(rsp) => {
                        guard.observer.pushed(rsp.kind);
                        yield proto::ObserveResponse::from(rsp);
                    }
                    None => return,
                },

                // If the server starts shutting down, close the stream so that it doesn't hold the
                // server open.
                _ = (&mut shutdown) => {
                    return;
                }
            }
        }
    })
}

// === impl GrpcConnection ===

#[async_trait::async_trait]
impl EndpointConnection for GrpcConnection {
    async fn send(&self, rsp: ObserveResponse) -> Result<(), SendError> {
        let tx = self.responses.lock().clone().ok_or(SendError::Closed)?;
        tx.send(rsp).await.map_err(|_| SendError::Closed)
    }

    async fn recv(&self) -> anyhow::Result<Option<ObserveRequest>> {
        let msg = self.requests.lock().await.message().await?;
        if let Some(req) = &msg {
            self.metrics.request(req);
        }
        Ok(msg.map(Into::into))
    }

    fn disconnect(&self) {
        self.responses.lock().take();
    }
}

// === impl StreamGuard ===

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.handle.disconnect();
    }
}
