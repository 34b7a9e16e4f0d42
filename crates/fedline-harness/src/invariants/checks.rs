//! Standard invariant checks.
//!
//! These hold at every instant on every live process. [`ManifestConvergence`]
//! is the exception: it only holds once the channel is quiescent, so it is
//! not part of the standard registry.

use std::collections::HashMap;

use fedline_core::Manifest;
use fedline_proto::{Handle, ManifestSnapshot, MemberId};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// No two members of a manifest share a handle.
///
/// Handles are never reused, so every handle is also at most the manifest's
/// highest handle.
pub struct UniqueHandles;

impl Invariant for UniqueHandles {
    fn name(&self) -> &'static str {
        "unique_handles"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (process, manifest) in state.manifests() {
            let mut seen: HashMap<Handle, MemberId> = HashMap::new();
            for (member, handle) in manifest.members() {
                if handle > manifest.highest_handle() {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "process {process}: member {member} has handle {handle} above highest {}",
                            manifest.highest_handle()
                        ),
                    });
                }
                if let Some(other) = seen.insert(handle, member) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "process {process}: handle {handle} held by {other} and {member}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every joined federate is hosted by a current member and carries that
/// member's handle.
pub struct FederatesAreMembers;

impl Invariant for FederatesAreMembers {
    fn name(&self) -> &'static str {
        "federates_are_members"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (process, manifest) in state.manifests() {
            let mut federates = 0;
            for (member, handle) in manifest.members() {
                let Some(info) = manifest.federate(member) else {
                    continue;
                };
                federates += 1;
                if info.handle != handle {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "process {process}: federate {} has handle {} but member {member} has {handle}",
                            info.name, info.handle
                        ),
                    });
                }
            }

            if federates != manifest.federate_count() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "process {process}: {} federates but only {federates} hosted by members",
                        manifest.federate_count()
                    ),
                });
            }

            if !manifest.contains_federation() && manifest.federate_count() > 0 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("process {process}: federates joined without a federation"),
                });
            }
        }
        Ok(())
    }
}

/// The coordinator is a member of the manifest that names it.
pub struct CoordinatorIsMember;

impl Invariant for CoordinatorIsMember {
    fn name(&self) -> &'static str {
        "coordinator_is_member"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (process, manifest) in state.manifests() {
            if manifest.member_count() > 0 && manifest.member_handle(manifest.coordinator()).is_none() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "process {process}: coordinator {} is not a member",
                        manifest.coordinator()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A member has the same handle in every manifest that knows it.
pub struct HandleAgreement;

impl Invariant for HandleAgreement {
    fn name(&self) -> &'static str {
        "handle_agreement"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut assigned: HashMap<MemberId, (MemberId, Handle)> = HashMap::new();

        for (process, manifest) in state.manifests() {
            for (member, handle) in manifest.members() {
                match assigned.get(&member) {
                    Some((seen_by, seen)) if *seen != handle => {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "member {member}: handle {seen} at process {seen_by}, {handle} at process {process}"
                            ),
                        });
                    },
                    Some(_) => {},
                    None => {
                        assigned.insert(member, (process, handle));
                    },
                }
            }
        }
        Ok(())
    }
}

/// Manifest versions never go backwards on a process.
pub struct VersionMonotonicity;

impl Invariant for VersionMonotonicity {
    fn name(&self) -> &'static str {
        "version_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for process in &state.processes {
            for window in process.version_history.windows(2) {
                if window[1] < window[0] {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "process {}: version decreased {} → {}",
                            process.member, window[0], window[1]
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every process holds the same manifest, apart from its own identity.
///
/// Only meaningful once all traffic has been delivered.
pub struct ManifestConvergence;

impl ManifestConvergence {
    /// Wire form with the version cleared; versions count local mutations.
    fn comparable(manifest: &Manifest) -> ManifestSnapshot {
        ManifestSnapshot { version: 0, ..manifest.snapshot() }
    }
}

impl Invariant for ManifestConvergence {
    fn name(&self) -> &'static str {
        "manifest_convergence"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut manifests = state.manifests();
        let Some((first, reference)) = manifests.next() else {
            return Ok(());
        };
        let expected = Self::comparable(reference);

        for (process, manifest) in manifests {
            if Self::comparable(manifest) != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "process {process} diverges from process {first}:\n{manifest}\nvs\n{reference}"
                    ),
                });
            }
        }

        Ok(())
    }
}
