use crate::{
    admin::{self, Admin},
    grpc::{self, metrics::ObserveMetrics, PeerResolver},
    handlers::Handlers,
    storage::{self, ConnectionConfig, SharedStorage, Storage, StorageMetrics},
};
use anyhow::Result;
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use tokio::time::Duration;
use tonic::transport::Server;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{prelude::*, EnvFilter};

// The number of pending rule changes buffered per kind.
const EVENT_QUEUE_SIZE: usize = 128;

#[derive(Debug, Parser)]
#[clap(
    name = "rule-controller",
    about = "Distributes traffic rules to data plane clients"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "rule_controller=info,warn",
        env = "RULE_CONTROLLER_LOG"
    )]
    log_level: String,

    #[clap(long, default_value = "plain")]
    log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:30060")]
    grpc_addr: SocketAddr,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    /// Bounds each push to a client.
    #[clap(long, default_value = "5000")]
    send_timeout_ms: u64,

    /// The number of consecutive failed pushes after which a client is
    /// disconnected. Zero never disconnects.
    #[clap(long, default_value = "3")]
    max_send_failures: u32,

    /// The number of pushes buffered on each response stream.
    #[clap(long, default_value = "16")]
    response_buffer: usize,

    /// Trusts the endpoint asserted by clients in `x-rule-endpoint` request
    /// metadata.
    #[clap(long)]
    trust_endpoint_header: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            grpc_addr,
            admin_addr,
            send_timeout_ms,
            max_send_failures,
            response_buffer,
            trust_endpoint_header,
        } = self;

        init_tracing(&log_level, log_format)?;

        let mut prom = <Registry>::default();
        let storage_metrics = StorageMetrics::register(prom.sub_registry_with_prefix("storage"));
        let storage = Storage::shared(
            ConnectionConfig {
                send_timeout: Duration::from_millis(send_timeout_ms),
                max_send_failures,
            },
            storage_metrics,
        );
        storage::register_collector(prom.sub_registry_with_prefix("storage"), storage.clone());
        let observe_metrics = ObserveMetrics::register(prom.sub_registry_with_prefix("observe"));

        // Each kind has exactly one writer; the admin API feeds it changes.
        let handlers = Handlers::spawn(&storage, EVENT_QUEUE_SIZE);

        let (drain_tx, drain_rx) = drain::channel();

        let admin = Admin::new(storage.clone(), handlers, prom);
        tokio::spawn(
            admin::serve(admin_addr, admin.clone(), drain_rx.clone())
                .map_err(|error| tracing::error!(%error, "Admin server failed"))
                .instrument(info_span!("admin")),
        );

        let grpc = tokio::spawn(
            grpc(
                grpc_addr,
                storage,
                PeerResolver::new(trust_endpoint_header),
                observe_metrics,
                response_buffer,
                drain_rx,
            )
            .instrument(info_span!("grpc")),
        );
        admin.set_ready();

        tokio::select! {
            res = grpc => {
                res??;
                anyhow::bail!("gRPC server exited unexpectedly");
            }
            res = shutdown_signal() => res?,
        }

        info!("Shutting down");
        drain_tx.drain().await;
        Ok(())
    }
}

fn init_tracing(log_level: &str, log_format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)?;
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

async fn grpc(
    addr: SocketAddr,
    storage: SharedStorage,
    resolver: PeerResolver,
    metrics: ObserveMetrics,
    response_buffer: usize,
    drain: drain::Watch,
) -> Result<()> {
    let svc =
        grpc::RuleServer::new(storage, resolver, metrics, response_buffer, drain.clone()).svc();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder().add_service(svc).serve_with_shutdown(addr, close_rx.map(|_| {}));
    }

    info!(%addr, "rule gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}
