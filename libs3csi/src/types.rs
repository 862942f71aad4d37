//! Core CSI types: volumes, capabilities, requests, and plugin info.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
///
/// For S3-backed volumes this is either `<bucket>` or `<bucket>/<prefix>`;
/// see [`crate::volume_id`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Credentials forwarded by the orchestrator with each request.
///
/// The `Debug` implementation prints key names only, so requests can be
/// logged without leaking access keys.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secrets(HashMap<String, String>);

impl Secrets {
    /// Look up a secret value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a secret value, treating empty strings as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// `true` when no secrets were supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Secrets").field("keys", &keys).finish()
    }
}

impl From<HashMap<String, String>> for Secrets {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Secrets {
    fn from(entries: [(K, V); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed, mirroring the CSI access modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Can only be published once as read/write on a single node.
    SingleNodeWriter,
    /// Can only be published once as read-only on a single node.
    SingleNodeReaderOnly,
    /// Can be published as read-only at multiple nodes.
    MultiNodeReaderOnly,
    /// Can be published at multiple nodes, only one of which may write.
    MultiNodeSingleWriter,
    /// Can be published as read/write at multiple nodes.
    MultiNodeMultiWriter,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type; empty lets the node side choose.
    #[serde(default)]
    pub fs_type: String,
}

impl VolumeCapability {
    /// A mount capability with the given access mode and no flags.
    pub fn with_access_mode(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            mount_flags: Vec::new(),
            fs_type: String::new(),
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::with_access_mode(AccessMode::SingleNodeWriter)
    }
}

/// Capacity bounds requested for a volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    /// The volume must be at least this large.
    #[serde(default)]
    pub required_bytes: u64,
    /// The volume must not exceed this size; `0` means unbounded.
    #[serde(default)]
    pub limit_bytes: u64,
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// A provisioned volume as returned by `CreateVolume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.  Echoes the
    /// request parameters.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Requests & responses
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Name suggested by the orchestrator; the volume id is derived from it.
    pub name: String,
    /// Desired capacity.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters, e.g. `bucket` and `mounter`.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Object-storage credentials.
    #[serde(default)]
    pub secrets: Secrets,
}

impl CreateVolumeRequest {
    /// Requested capacity in bytes, `0` when no range was given.
    pub fn required_bytes(&self) -> u64 {
        self.capacity_range.map_or(0, |r| r.required_bytes)
    }
}

/// Request to delete a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    /// Volume to delete.
    pub volume_id: VolumeId,
    /// Object-storage credentials.
    #[serde(default)]
    pub secrets: Secrets,
}

/// Request to check a set of capabilities against an existing volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    /// Volume to check.
    pub volume_id: VolumeId,
    /// Capabilities the caller intends to use.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Object-storage credentials.
    #[serde(default)]
    pub secrets: Secrets,
}

/// Result of a capability check.
///
/// A rejection is not an error: `confirmed` is `None` and `message` says why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Capabilities the plugin confirms, if all requested ones are supported.
    #[serde(default)]
    pub confirmed: Option<Vec<VolumeCapability>>,
    /// Explanation when the capabilities were not confirmed.
    #[serde(default)]
    pub message: String,
}

impl ValidateVolumeCapabilitiesResponse {
    /// `true` when the requested capabilities were confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }
}

/// Request to grow a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerExpandVolumeRequest {
    /// Volume to expand.
    pub volume_id: VolumeId,
    /// New capacity bounds.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Object-storage credentials.
    #[serde(default)]
    pub secrets: Secrets,
}

/// Response to a successful expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerExpandVolumeResponse {
    /// Capacity after expansion.
    pub capacity_bytes: u64,
    /// Whether the node must also run an expansion step.
    pub node_expansion_required: bool,
}

// ---------------------------------------------------------------------------
// Plugin info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"rk8s.s3.csi"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// RPCs a Controller service advertises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerServiceCapability {
    /// `CreateVolume` and `DeleteVolume`.
    CreateDeleteVolume,
    /// `ControllerPublishVolume` and `ControllerUnpublishVolume`.
    PublishUnpublishVolume,
    /// `ControllerExpandVolume`.
    ExpandVolume,
}
