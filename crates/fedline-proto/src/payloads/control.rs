//! Coordination protocol payloads.
//!
//! These travel under the control opcodes and are consumed by the
//! coordination layer only. None of them reach a federate's message queue
//! except [`ResignNotice`], which is also delivered to joined federates so
//! they can clean up after the resigning peer.

use serde::{Deserialize, Serialize};

use crate::{Handle, MemberId};

/// Wire form of a channel manifest, published by the coordinator.
///
/// The receiving process attaches its own identity on install; the local
/// identity is never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    /// Name of the channel this manifest describes.
    pub channel: String,
    /// Incremented on every manifest mutation.
    pub version: u64,
    /// Member answering discovery requests.
    pub coordinator: MemberId,
    /// Last handle allocated.
    pub highest_handle: Handle,
    /// Channel members with their handles.
    pub members: Vec<(MemberId, Handle)>,
    /// Opaque federation model, present once a federation exists.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<Vec<u8>>,
    /// Joined federates.
    pub federates: Vec<FederateEntry>,
}

/// One joined federate inside a [`ManifestSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederateEntry {
    /// Process hosting the federate.
    pub member: MemberId,
    /// Federate handle (equal to the member handle).
    pub handle: Handle,
    /// Federate name as joined.
    pub name: String,
}

/// Request to create the federation with the given model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFederation {
    /// Federation name.
    pub federation: String,
    /// Opaque object model.
    pub model: Vec<u8>,
}

/// Notice that the sending process joined under `federate_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Name the federate joined with (possibly suffixed with its handle).
    pub federate_name: String,
}

/// What a resigning federate's owned state should become.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResignAction {
    /// Leave everything in place.
    NoAction,
    /// Release attribute ownership.
    ReleaseAttributes,
    /// Delete owned objects.
    DeleteObjects,
    /// Delete owned objects and release remaining attributes.
    DeleteObjectsAndReleaseAttributes,
    /// Cancel pending ownership transfers.
    CancelPendingAcquisitions,
    /// Cancel pending transfers, then delete and release.
    CancelThenDeleteThenDivest,
}

impl ResignAction {
    /// Whether objects owned by the federate are deleted.
    #[must_use]
    pub const fn deletes_objects(self) -> bool {
        matches!(
            self,
            Self::DeleteObjects
                | Self::DeleteObjectsAndReleaseAttributes
                | Self::CancelThenDeleteThenDivest
        )
    }
}

/// Full resignation message.
///
/// Carried whole (not just the name) because receivers act on `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResignNotice {
    /// Handle of the resigning federate.
    pub federate: Handle,
    /// Name of the resigning federate.
    pub federate_name: String,
    /// Federation being left.
    pub federation: String,
    /// Policy for the federate's owned state.
    pub action: ResignAction,
    /// True when synthesized locally for a crashed or departed federate.
    #[serde(default)]
    pub synthesized: bool,
}

/// Request to destroy the named federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyFederation {
    /// Federation name.
    pub federation: String,
}
