//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the CSI client (RKS side) and the controller
//! via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(DeleteVolumeRequest),
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    /// Expand a volume (Controller).
    ControllerExpandVolume(ControllerExpandVolumeRequest),
    /// Query controller RPC capabilities (Controller).
    ControllerGetCapabilities,

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was created, or already existed.
    VolumeCreated(Volume),
    /// Outcome of a capability check.
    CapabilitiesValidated(ValidateVolumeCapabilitiesResponse),
    /// A volume was expanded.
    VolumeExpanded(ControllerExpandVolumeResponse),
    /// Controller RPC capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerServiceCapability>),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ValidateVolumeCapabilities(req) => {
                write!(f, "ValidateVolumeCapabilities({})", req.volume_id)
            }
            Self::ControllerExpandVolume(req) => {
                write!(f, "ControllerExpandVolume({})", req.volume_id)
            }
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::CapabilitiesValidated(resp) => {
                write!(f, "CapabilitiesValidated(confirmed={})", resp.is_confirmed())
            }
            Self::VolumeExpanded(resp) => write!(f, "VolumeExpanded({})", resp.capacity_bytes),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}
