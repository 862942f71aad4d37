//! `rkcsi`: the RK8s CSI controller daemon.
//!
//! Serves the identity and controller services of the S3 driver over QUIC.

mod config;
mod tls;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libs3csi::store::{MemoryStore, ObjectStoreProvider, S3Provider};
use libs3csi::transport::server::CsiServer;
use libs3csi::{CsiController, CsiIdentity, S3Backend};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{Args, BackendKind, LogFormat};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn serve<T>(args: &Args, tls_config: rustls::ServerConfig, handler: T) -> Result<()>
where
    T: CsiIdentity + CsiController + 'static,
{
    let server = CsiServer::new(args.listen, tls_config, Arc::new(handler))
        .with_context(|| format!("bind {}", args.listen))?;

    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("listen for shutdown signal")?;
            info!("shutdown signal received");
            server.close();
        }
    }
    Ok(())
}

fn backend<P: ObjectStoreProvider>(args: &Args, provider: P) -> S3Backend<P> {
    S3Backend::new(provider).with_driver_name(args.driver_name.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let tls_config = tls::load_server_config(&args.tls_cert, &args.tls_key)?;

    info!(
        listen = %args.listen,
        driver = %args.driver_name,
        backend = ?args.backend,
        version = env!("CARGO_PKG_VERSION"),
        "starting rkcsi",
    );

    match args.backend {
        BackendKind::S3 => {
            let provider = S3Provider::new(args.s3_defaults());
            serve(&args, tls_config, backend(&args, provider)).await
        }
        BackendKind::Memory => serve(&args, tls_config, backend(&args, MemoryStore::new())).await,
    }
}
