//! Deterministic simulation harness for Fedline.
//!
//! In-memory implementations of the group transport and environment, so
//! whole federations run inside one tokio runtime with a paused clock:
//! discovery waits and broadcast timeouts cost no wall time and a seed fixes
//! every member identity.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks manifests across every live process.
//! Use [`InvariantRegistry::standard()`] for properties that hold at every
//! instant and [`InvariantRegistry::quiescent()`] once the channel has
//! settled.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod recording;
pub mod sim_env;
pub mod sim_transport;

pub use cluster::{ClusterProcess, TestCluster};
pub use invariants::{
    CoordinatorIsMember, FederatesAreMembers, HandleAgreement, Invariant, InvariantRegistry,
    InvariantResult, ManifestConvergence, ProcessSnapshot, SystemSnapshot, UniqueHandles,
    VersionMonotonicity, Violation,
};
pub use recording::RecordingHandler;
pub use sim_env::SimEnv;
pub use sim_transport::{SimNetwork, SimTransport};
