//! Observable state snapshots for invariant checking.
//!
//! Invariants run against copies of the manifests rather than live state so
//! one check sees every process at the same instant.

use fedline_core::Manifest;
use fedline_proto::MemberId;

/// Manifests of every live process on a channel.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-process state.
    pub processes: Vec<ProcessSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no processes).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot from per-process state.
    pub fn from_processes(processes: Vec<ProcessSnapshot>) -> Self {
        Self { processes }
    }

    /// Add a process snapshot.
    pub fn add_process(&mut self, process: ProcessSnapshot) {
        self.processes.push(process);
    }

    /// Processes that hold a manifest.
    pub fn manifests(&self) -> impl Iterator<Item = (MemberId, &Manifest)> {
        self.processes
            .iter()
            .filter_map(|process| process.manifest.as_ref().map(|manifest| (process.member, manifest)))
    }
}

/// One process's observable state.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    /// Member identity.
    pub member: MemberId,
    /// Installed manifest, `None` before discovery finished.
    pub manifest: Option<Manifest>,
    /// Every manifest version this process was observed at, oldest first.
    pub version_history: Vec<u64>,
}

impl ProcessSnapshot {
    /// Snapshot of `member` holding `manifest`.
    pub fn new(member: MemberId, manifest: Option<Manifest>) -> Self {
        let version_history = manifest.iter().map(Manifest::version).collect();
        Self { member, manifest, version_history }
    }

    /// Replace the observed version history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<u64>) -> Self {
        self.version_history = history;
        self
    }
}
