//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion, capability validation and (unsupported) expansion.  It is
//! invoked by the RKS control plane when a claim is bound or released.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerExpandVolumeRequest, ControllerExpandVolumeResponse, ControllerServiceCapability,
    CreateVolumeRequest, DeleteVolumeRequest, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, Volume,
};

/// Controller service: centralized volume management.
///
/// Operations in this trait run on the control plane (RKS) and coordinate
/// with the storage backend to provision / deprovision volumes.  All of them
/// must be idempotent: the caller retries on any error.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a volume, or return the existing one with the same name.
    ///
    /// The returned [`Volume`] carries the `volume_id` and `volume_context`
    /// that must be forwarded to subsequent Node operations.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.  Deleting an absent volume
    /// succeeds.
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    ///
    /// Unsupported capabilities yield a response without confirmation, not
    /// an error.
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError>;

    /// Grow a volume.
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError>;

    /// RPCs this controller implements.
    async fn controller_get_capabilities(
        &self,
    ) -> Result<Vec<ControllerServiceCapability>, CsiError>;
}
