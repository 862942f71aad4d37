//! Command-line and environment configuration for the `rkcsi` daemon.
//!
//! Every flag can also be set through the environment variable shown in
//! `--help`; flags win over the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use libs3csi::identity::DEFAULT_DRIVER_NAME;
use libs3csi::store::S3Config;

/// Object-storage backend serving the volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// S3-compatible service; credentials come with each request.
    S3,
    /// In-process store, lost on restart. For local testing only.
    Memory,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// RK8s CSI controller for S3-backed volumes.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Address the QUIC endpoint binds to.
    #[arg(long, env = "RKCSI_LISTEN", default_value = "0.0.0.0:7443")]
    pub listen: SocketAddr,

    /// PEM certificate chain presented to clients.
    #[arg(long, env = "RKCSI_TLS_CERT")]
    pub tls_cert: PathBuf,

    /// PEM private key matching `--tls-cert`.
    #[arg(long, env = "RKCSI_TLS_KEY")]
    pub tls_key: PathBuf,

    /// Plugin name reported by GetPluginInfo.
    #[arg(long, env = "RKCSI_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// Object store holding the volumes.
    #[arg(long, env = "RKCSI_BACKEND", value_enum, default_value_t = BackendKind::S3)]
    pub backend: BackendKind,

    /// Default S3 endpoint, overridden by the `endpoint` secret.
    #[arg(long, env = "RKCSI_S3_ENDPOINT", default_value = "")]
    pub s3_endpoint: String,

    /// Default S3 region, overridden by the `region` secret.
    #[arg(long, env = "RKCSI_S3_REGION", default_value = "")]
    pub s3_region: String,

    /// Log format. The level is taken from `RUST_LOG` (default `info`).
    #[arg(long, env = "RKCSI_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    /// Provider defaults; per-request secrets take precedence.
    pub fn s3_defaults(&self) -> S3Config {
        S3Config {
            region: self.s3_region.clone(),
            endpoint: self.s3_endpoint.clone(),
            ..Default::default()
        }
    }
}
