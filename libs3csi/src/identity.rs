//! CSI Identity service.
//!
//! Lets the orchestrator discover which plugin sits behind an endpoint and
//! whether it is ready to take controller calls.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Name the S3 controller registers under unless configured otherwise.
pub const DEFAULT_DRIVER_NAME: &str = "rk8s.s3.csi";

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Plugin name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Liveness probe; `true` when ready to serve.
    ///
    /// The controller keeps no local state and connects to object storage
    /// per request, so the default reports ready as soon as it is serving.
    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    /// Plugin-level capabilities.  Controller plugins advertise
    /// [`PluginCapability::ControllerService`].
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}
