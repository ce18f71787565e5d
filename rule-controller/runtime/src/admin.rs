use crate::{core::Kind, handlers::Handlers, storage::SharedStorage};
use anyhow::Result;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use prometheus_client::registry::Registry;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Serves health checks, metrics and rule introspection and authoring.
#[derive(Clone)]
pub struct Admin {
    storage: SharedStorage,
    handlers: Handlers,
    registry: Arc<Registry>,
    ready: Arc<AtomicBool>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to encode metrics")]
    Metrics(#[from] std::fmt::Error),
}

type Body = http_body_util::Full<bytes::Bytes>;

/// A parsed `/rules/<kind>[/<namespace>/<name>]` path.
#[derive(Debug, PartialEq, Eq)]
enum RulePath {
    Kind(Kind),
    Rule { kind: Kind, key: String },
}

// === impl Admin ===

impl Admin {
    pub fn new(storage: SharedStorage, handlers: Handlers, registry: Registry) -> Self {
        Self {
            storage,
            handlers,
            registry: Arc::new(registry),
            ready: Default::default(),
        }
    }

    /// Marks the process ready to serve clients.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    async fn route<B>(self, req: Request<B>) -> Result<Response<Body>, Error>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        match (&method, path.as_str()) {
            (&http::Method::GET, "/live") => Ok(text(http::StatusCode::OK, "alive\n")),
            (&http::Method::GET, "/ready") => {
                if self.ready.load(Ordering::Acquire) {
                    Ok(text(http::StatusCode::OK, "ready\n"))
                } else {
                    Ok(text(http::StatusCode::SERVICE_UNAVAILABLE, "not ready\n"))
                }
            }
            (&http::Method::GET, "/metrics") => {
                let mut buf = String::new();
                prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
                Ok(Response::builder()
                    .status(http::StatusCode::OK)
                    .header(
                        http::header::CONTENT_TYPE,
                        "application/openmetrics-text; version=1.0.0; charset=utf-8",
                    )
                    .body(Body::from(buf))
                    .expect("metrics response must be valid"))
            }
            (_, path) => match path.strip_prefix("/rules/").map(RulePath::parse) {
                Some(Some(rule)) => self.rules(method.clone(), rule, req.into_body()).await,
                _ => Ok(not_found()),
            },
        }
    }

    async fn rules<B>(
        &self,
        method: http::Method,
        path: RulePath,
        body: B,
    ) -> Result<Response<Body>, Error>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match (method, path) {
            (http::Method::GET, RulePath::Kind(kind)) => match self.storage.snapshot(kind, None) {
                None => Ok(json(http::StatusCode::OK, "[]".to_string())),
                Some(Ok(snapshot)) => Ok(json(http::StatusCode::OK, snapshot.data)),
                Some(Err(error)) => {
                    warn!(%error, "Failed to encode rules");
                    Ok(text(http::StatusCode::INTERNAL_SERVER_ERROR, "\n"))
                }
            },

            (http::Method::PUT, RulePath::Rule { kind, key }) => {
                let Some(sink) = self.handlers.get(kind) else {
                    return Ok(not_found());
                };
                let bytes = body
                    .collect()
                    .await
                    .map_err(|e| Error::Request(e.into()))?
                    .to_bytes();
                match sink.apply(key.clone(), &bytes).await {
                    Ok(()) => {
                        info!(%kind, %key, "Rule applied");
                        Ok(text(http::StatusCode::ACCEPTED, "\n"))
                    }
                    Err(error) => {
                        debug!(%error, %kind, %key, "Rejecting rule");
                        Ok(text(http::StatusCode::BAD_REQUEST, &format!("{error}\n")))
                    }
                }
            }

            (http::Method::DELETE, RulePath::Rule { kind, key }) => {
                let Some(sink) = self.handlers.get(kind) else {
                    return Ok(not_found());
                };
                match sink.delete(key.clone()).await {
                    Ok(()) => {
                        info!(%kind, %key, "Rule deleted");
                        Ok(text(http::StatusCode::ACCEPTED, "\n"))
                    }
                    Err(error) => {
                        warn!(%error, %kind, %key, "Failed to delete rule");
                        Ok(text(http::StatusCode::SERVICE_UNAVAILABLE, "\n"))
                    }
                }
            }

            _ => Ok(text(http::StatusCode::METHOD_NOT_ALLOWED, "\n")),
        }
    }
}

impl<B> tower::Service<Request<B>> for Admin
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), path = %req.uri().path(), "Admin request");
        Box::pin(self.clone().route(req))
    }
}

impl std::fmt::Debug for Admin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admin")
            .field("handlers", &self.handlers)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Serves the admin API until the drain signal fires.
pub async fn serve(addr: SocketAddr, admin: Admin, drain: drain::Watch) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Admin server listening");

    tokio::pin! {
        let shutdown = drain.signaled();
    }
    loop {
        let (stream, client) = tokio::select! {
            res = listener.accept() => res?,
            _ = (&mut shutdown) => return Ok(()),
        };
        let svc = TowerToHyperService::new(admin.clone());
        tokio::spawn(async move {
            let conn = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), svc);
            if let Err(error) = conn.await {
                debug!(%error, %client, "Admin connection failed");
            }
        });
    }
}

// === impl RulePath ===

impl RulePath {
    /// Parses `<name>/<version>[/<namespace>/<name>]`.
    fn parse(path: &str) -> Option<Self> {
        let segments = path.split('/').collect::<Vec<_>>();
        match segments.as_slice() {
            [name, version] => {
                let kind = format!("{name}/{version}").parse().ok()?;
                Some(Self::Kind(kind))
            }
            [name, version, ns, rule] if !ns.is_empty() && !rule.is_empty() => {
                let kind = format!("{name}/{version}").parse().ok()?;
                Some(Self::Rule {
                    kind,
                    key: format!("{ns}/{rule}"),
                })
            }
            _ => None,
        }
    }
}

fn text(status: http::StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body.to_string()))
        .expect("text response must be valid")
}

fn json(status: http::StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("json response must be valid")
}

fn not_found() -> Response<Body> {
    text(http::StatusCode::NOT_FOUND, "\n")
}
