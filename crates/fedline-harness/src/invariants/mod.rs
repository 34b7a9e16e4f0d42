//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during system execution.
//! Unlike example-based tests that check specific scenarios, invariants
//! verify behavioral properties across all possible execution paths.
//!
//! # Architecture
//!
//! The cluster copies every live process's manifest into a
//! [`SystemSnapshot`], then runs registered [`Invariant`] checks against it.
//! Violations carry enough context to find the diverging process.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.check_all(&cluster.snapshot())?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    CoordinatorIsMember, FederatesAreMembers, HandleAgreement, ManifestConvergence,
    UniqueHandles, VersionMonotonicity,
};
pub use snapshot::{ProcessSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against system state.
///
/// Invariants are behavioral properties that must always hold.
/// They capture WHAT must be true, not specific test scenarios.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    ///
    /// Returns `Ok(())` if the invariant holds, or a [`Violation`]
    /// describing what went wrong.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
///
/// Collects multiple invariants and runs them all against system state.
/// Use [`InvariantRegistry::standard()`] for the manifest invariants that
/// hold at every instant.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the standard manifest invariants.
    ///
    /// Includes:
    /// - [`UniqueHandles`]: no handle is held twice
    /// - [`FederatesAreMembers`]: federates are a subset of members
    /// - [`CoordinatorIsMember`]: the coordinator is on the channel
    /// - [`HandleAgreement`]: processes agree on every member's handle
    /// - [`VersionMonotonicity`]: versions never decrease
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(UniqueHandles);
        registry.add(FederatesAreMembers);
        registry.add(CoordinatorIsMember);
        registry.add(HandleAgreement);
        registry.add(VersionMonotonicity);
        registry
    }

    /// Standard invariants plus [`ManifestConvergence`], for quiescent
    /// channels.
    pub fn quiescent() -> Self {
        let mut registry = Self::standard();
        registry.add(ManifestConvergence);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking on first violation.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(|v| v.to_string()).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use fedline_core::Manifest;

    use super::*;

    fn process(manifest: Manifest) -> ProcessSnapshot {
        ProcessSnapshot::new(manifest.local(), Some(manifest))
    }

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 5);
        assert_eq!(InvariantRegistry::quiescent().len(), 6);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::quiescent();
        let snapshot = SystemSnapshot::empty();
        assert!(registry.check_all(&snapshot).is_ok());
    }

    #[test]
    fn replicas_of_one_manifest_pass() {
        let mut coordinator = Manifest::new("chan", 10);
        coordinator.record_member_joined_channel(20);
        coordinator.record_federation_created(b"fom".to_vec());
        coordinator.record_federate_joined(20, "alpha");

        let replica = Manifest::from_snapshot(20, coordinator.snapshot());
        let snapshot = SystemSnapshot::from_processes(vec![process(coordinator), process(replica)]);

        assert!(InvariantRegistry::quiescent().check_all(&snapshot).is_ok());
    }

    #[test]
    fn disagreeing_handles_are_reported() {
        let mut a = Manifest::new("chan", 10);
        a.record_member_joined_channel(20);
        a.record_member_joined_channel(30);

        let mut b = Manifest::new("chan", 10);
        b.record_member_joined_channel(30);
        b.record_member_joined_channel(20);

        let snapshot = SystemSnapshot::from_processes(vec![process(a), process(b)]);
        let violations = InvariantRegistry::standard().check_all(&snapshot).unwrap_err();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "handle_agreement");
    }

    #[test]
    fn version_regression_is_reported() {
        let snapshot = SystemSnapshot::from_processes(vec![
            ProcessSnapshot::new(1, None).with_history(vec![1, 3, 2]),
        ]);

        let violations = InvariantRegistry::standard().check_all(&snapshot).unwrap_err();
        assert_eq!(violations[0].invariant, "version_monotonicity");
    }

    #[test]
    fn divergent_models_break_convergence_only() {
        let mut a = Manifest::new("chan", 10);
        a.record_member_joined_channel(20);
        let b = Manifest::from_snapshot(20, a.snapshot());
        a.record_federation_created(b"fom".to_vec());

        let snapshot = SystemSnapshot::from_processes(vec![process(a), process(b)]);

        assert!(InvariantRegistry::standard().check_all(&snapshot).is_ok());
        let violations = InvariantRegistry::quiescent().check_all(&snapshot).unwrap_err();
        assert_eq!(violations[0].invariant, "manifest_convergence");
    }
}
