//! Replicated channel manifest.
//!
//! Every process on a channel holds its own `Manifest`: who is connected, which
//! handle each member was given, who the coordinator is, and whether a
//! federation (and which federates) exist. Processes keep their copies in step
//! by applying the same view changes and lifecycle broadcasts in the same
//! order; newcomers adopt the coordinator's copy wholesale.
//!
//! # Invariants
//!
//! - Federates ⊆ members.
//! - Handles are unique and strictly increasing; a departed member's handle is
//!   never reused.
//! - A joined federate implies an installed federation model.
//! - `version` increases on every mutation.
//!
//! The type is not synchronized; the coordination layer keeps it behind a
//! single lock so all mutators are serialized.

use std::{collections::BTreeMap, fmt};

use fedline_proto::{FederateEntry, Handle, ManifestSnapshot, MemberId};

/// A joined federate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederateInfo {
    /// Federate handle (the member handle of its process).
    pub handle: Handle,
    /// Name as joined.
    pub name: String,
}

/// Per-process view of a federation channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    channel: String,
    local: MemberId,
    version: u64,
    coordinator: MemberId,
    highest_handle: Handle,
    members: BTreeMap<MemberId, Handle>,
    model: Option<Vec<u8>>,
    federates: BTreeMap<MemberId, FederateInfo>,
}

impl Manifest {
    /// Fresh manifest for a process that appointed itself coordinator.
    ///
    /// The local process is recorded as the first member.
    pub fn new(channel: impl Into<String>, local: MemberId) -> Self {
        let mut manifest = Self {
            channel: channel.into(),
            local,
            version: 0,
            coordinator: local,
            highest_handle: 0,
            members: BTreeMap::new(),
            model: None,
            federates: BTreeMap::new(),
        };
        manifest.record_member_joined_channel(local);
        manifest
    }

    /// Install a manifest received from the coordinator.
    ///
    /// Federate entries whose member is missing from the member list are
    /// dropped so the subset invariant holds regardless of what was sent.
    pub fn from_snapshot(local: MemberId, snapshot: ManifestSnapshot) -> Self {
        let members: BTreeMap<MemberId, Handle> = snapshot.members.into_iter().collect();
        let federates = snapshot
            .federates
            .into_iter()
            .filter(|entry| members.contains_key(&entry.member))
            .map(|entry| (entry.member, FederateInfo { handle: entry.handle, name: entry.name }))
            .collect();
        let highest_handle =
            members.values().copied().max().unwrap_or(0).max(snapshot.highest_handle);

        Self {
            channel: snapshot.channel,
            local,
            version: snapshot.version,
            coordinator: snapshot.coordinator,
            highest_handle,
            members,
            model: snapshot.model,
            federates,
        }
    }

    /// Wire form for publishing. The local identity is not included.
    pub fn snapshot(&self) -> ManifestSnapshot {
        ManifestSnapshot {
            channel: self.channel.clone(),
            version: self.version,
            coordinator: self.coordinator,
            highest_handle: self.highest_handle,
            members: self.members.iter().map(|(id, handle)| (*id, *handle)).collect(),
            model: self.model.clone(),
            federates: self
                .federates
                .iter()
                .map(|(member, info)| FederateEntry {
                    member: *member,
                    handle: info.handle,
                    name: info.name.clone(),
                })
                .collect(),
        }
    }

    // Lifecycle notifications

    /// Allocate the next handle for `member` if it has not been seen.
    ///
    /// Idempotent: a known member keeps its handle and the version is
    /// unchanged. Returns the member's handle.
    pub fn record_member_joined_channel(&mut self, member: MemberId) -> Handle {
        if let Some(handle) = self.members.get(&member) {
            return *handle;
        }

        self.highest_handle += 1;
        self.members.insert(member, self.highest_handle);
        self.version += 1;
        self.highest_handle
    }

    /// Remove `member` from the channel.
    ///
    /// Any federate entry for the member goes too. If the member was the
    /// coordinator, the remaining member with the lowest handle takes over.
    /// Returns whether `member` was known.
    pub fn record_member_left_channel(&mut self, member: MemberId) -> bool {
        if self.members.remove(&member).is_none() {
            return false;
        }

        self.federates.remove(&member);
        self.version += 1;

        if member == self.coordinator
            && let Some((successor, _)) = self.members.iter().min_by_key(|(_, handle)| **handle)
        {
            self.coordinator = *successor;
        }

        true
    }

    /// Record every member of a view and report who is missing from it.
    ///
    /// New members are recorded in view order. Departed members are returned
    /// but NOT removed: the caller synthesizes resignations first and then
    /// calls [`Self::record_member_left_channel`] for each.
    pub fn apply_view(&mut self, view: &[MemberId]) -> Vec<MemberId> {
        for member in view {
            self.record_member_joined_channel(*member);
        }

        self.members.keys().filter(|member| !view.contains(member)).copied().collect()
    }

    /// A federation was created with `model`.
    pub fn record_federation_created(&mut self, model: Vec<u8>) {
        self.model = Some(model);
        self.version += 1;
    }

    /// The federation was destroyed.
    ///
    /// Callers verify that no federates are joined first.
    pub fn record_federation_destroyed(&mut self) {
        debug_assert!(self.federates.is_empty(), "destroying federation with joined federates");
        self.model = None;
        self.version += 1;
    }

    /// `member` joined as `name`.
    ///
    /// An unseen member is recorded first so federates stay a subset of
    /// members. Returns the federate handle, or `None` when no federation
    /// exists (nothing is recorded). Duplicate names are not checked here.
    pub fn record_federate_joined(&mut self, member: MemberId, name: impl Into<String>) -> Option<Handle> {
        if self.model.is_none() {
            return None;
        }

        let handle = self.record_member_joined_channel(member);
        self.federates.insert(member, FederateInfo { handle, name: name.into() });
        self.version += 1;
        Some(handle)
    }

    /// `member` resigned. Returns the departed federate, if it was joined.
    pub fn record_federate_resigned(&mut self, member: MemberId) -> Option<FederateInfo> {
        let info = self.federates.remove(&member)?;
        self.version += 1;
        Some(info)
    }

    /// Attach a different local identity (used when installing a copy).
    pub fn set_local(&mut self, local: MemberId) {
        self.local = local;
    }

    // Queries

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Local process identity.
    pub fn local(&self) -> MemberId {
        self.local
    }

    /// Mutation counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current coordinator.
    pub fn coordinator(&self) -> MemberId {
        self.coordinator
    }

    /// Whether the local process is the coordinator.
    pub fn is_coordinator(&self) -> bool {
        self.coordinator == self.local
    }

    /// Last handle allocated.
    pub fn highest_handle(&self) -> Handle {
        self.highest_handle
    }

    /// Handle of `member`, if it is connected.
    pub fn member_handle(&self, member: MemberId) -> Option<Handle> {
        self.members.get(&member).copied()
    }

    /// Handle of the local process, if it has been recorded.
    pub fn local_handle(&self) -> Option<Handle> {
        self.member_handle(self.local)
    }

    /// Connected members ordered by identity.
    pub fn members(&self) -> impl Iterator<Item = (MemberId, Handle)> + '_ {
        self.members.iter().map(|(id, handle)| (*id, *handle))
    }

    /// Number of connected members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether a federation exists on the channel.
    pub fn contains_federation(&self) -> bool {
        self.model.is_some()
    }

    /// Installed federation model.
    pub fn model(&self) -> Option<&[u8]> {
        self.model.as_deref()
    }

    /// Whether any federate joined with `name`.
    pub fn contains_federate(&self, name: &str) -> bool {
        self.federates.values().any(|info| info.name == name)
    }

    /// Whether `member` hosts a joined federate.
    pub fn is_joined_federate(&self, member: MemberId) -> bool {
        self.federates.contains_key(&member)
    }

    /// Whether the local process hosts a joined federate.
    pub fn is_local_federate_joined(&self) -> bool {
        self.is_joined_federate(self.local)
    }

    /// Joined federate hosted by `member`.
    pub fn federate(&self, member: MemberId) -> Option<&FederateInfo> {
        self.federates.get(&member)
    }

    /// Name of the federate hosted by `member`.
    pub fn federate_name(&self, member: MemberId) -> Option<&str> {
        self.federates.get(&member).map(|info| info.name.as_str())
    }

    /// Federate handle of the federate hosted by `member`.
    pub fn federate_handle(&self, member: MemberId) -> Option<Handle> {
        self.federates.get(&member).map(|info| info.handle)
    }

    /// Handles of every joined federate, ascending.
    pub fn federate_handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.federates.values().map(|info| info.handle).collect();
        handles.sort_unstable();
        handles
    }

    /// Number of joined federates.
    pub fn federate_count(&self) -> usize {
        self.federates.len()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "manifest channel={} version={}", self.channel, self.version)?;
        writeln!(
            f,
            "  local={:#034x} highest_handle={} federation={}",
            self.local,
            self.highest_handle,
            self.contains_federation()
        )?;

        let mut members: Vec<_> = self.members.iter().collect();
        members.sort_by_key(|(_, handle)| **handle);

        for (member, handle) in members {
            let marker = if *member == self.coordinator { " [coordinator]" } else { "" };
            match self.federates.get(member) {
                Some(info) => writeln!(
                    f,
                    "  (federate)    handle={handle} name={} id={member:#034x}{marker}",
                    info.name
                )?,
                None => writeln!(f, "  (application) handle={handle} id={member:#034x}{marker}")?,
            }
        }

        Ok(())
    }
}
