//! Test cluster of federation processes on one simulated channel.
//!
//! Every process gets its own [`SimTransport`] on a shared [`SimNetwork`],
//! a [`RecordingHandler`] and a [`SharedTimeStatus`]. Operations run one at a
//! time and [`TestCluster::settle`] lets every delivery task drain, so the
//! cluster is quiescent between steps and manifests can be compared.

use std::{sync::Arc, time::Duration};

use fedline_core::{FederationConfig, FederationError, SharedTimeStatus};
use fedline_federation::{Federation, JoinedFederate};
use fedline_proto::{Handle, MemberId, Message, ResignAction};

use crate::{
    ProcessSnapshot, RecordingHandler, SimEnv, SimNetwork, SimTransport, SystemSnapshot,
};

/// Virtual time given to the delivery tasks to drain between steps.
const SETTLE: Duration = Duration::from_millis(5);

/// One simulated process.
pub struct ClusterProcess {
    /// Coordination endpoint.
    pub federation: Federation<SimEnv>,
    /// The process's attachment to the network.
    pub transport: Arc<SimTransport>,
    /// Where the local federate's messages end up.
    pub handler: Arc<RecordingHandler>,
    /// Time state gating the local federate's queue.
    pub time: SharedTimeStatus,
    /// Session of the local federate, while joined.
    pub session: Option<JoinedFederate>,
    crashed: bool,
    versions: Vec<u64>,
}

impl ClusterProcess {
    /// Member identity.
    pub fn id(&self) -> MemberId {
        self.federation.local_id()
    }

    /// Whether the process is still on the channel.
    pub fn is_live(&self) -> bool {
        !self.crashed && self.federation.is_connected()
    }

    fn observe(&mut self) {
        if let Some(version) = self.federation.with_manifest(fedline_core::Manifest::version) {
            self.versions.push(version);
        }
    }
}

/// Simulated cluster of federation processes.
pub struct TestCluster {
    /// Shared medium.
    pub network: SimNetwork,
    /// Processes in creation order.
    pub processes: Vec<ClusterProcess>,
}

impl TestCluster {
    /// Cluster of `size` unconnected processes on channel `channel`.
    ///
    /// Member identities are drawn from one environment seeded with `seed`.
    pub fn new(
        seed: u64,
        size: usize,
        channel: &str,
        config: &FederationConfig,
    ) -> Result<Self, FederationError> {
        let env = SimEnv::with_seed(seed);
        let network = SimNetwork::new();

        let processes = (0..size)
            .map(|_| {
                let transport = network.transport();
                let federation =
                    Federation::new(channel, env.clone(), transport.clone(), config.clone())?;
                Ok(ClusterProcess {
                    federation,
                    transport,
                    handler: Arc::new(RecordingHandler::new()),
                    time: SharedTimeStatus::default(),
                    session: None,
                    crashed: false,
                    versions: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, FederationError>>()?;

        Ok(Self { network, processes })
    }

    /// Process `index`.
    pub fn process(&self, index: usize) -> &ClusterProcess {
        &self.processes[index]
    }

    /// Let every delivery task drain, then record manifest versions.
    pub async fn settle(&mut self) {
        tokio::time::sleep(SETTLE).await;
        for process in self.processes.iter_mut().filter(|process| process.is_live()) {
            process.observe();
        }
    }

    /// Connect processes one at a time, in creation order.
    pub async fn connect_all(&mut self) -> Result<(), FederationError> {
        for index in 0..self.processes.len() {
            self.connect(index).await?;
        }
        Ok(())
    }

    /// Connect process `index`.
    pub async fn connect(&mut self, index: usize) -> Result<(), FederationError> {
        self.processes[index].federation.connect().await?;
        self.settle().await;
        Ok(())
    }

    /// Create the federation from process `index`.
    pub async fn create(&mut self, index: usize, model: &[u8]) -> Result<(), FederationError> {
        let result = self.processes[index].federation.create_federation(model.to_vec()).await;
        self.settle().await;
        result
    }

    /// Join the local federate of process `index` as `name`.
    pub async fn join(&mut self, index: usize, name: &str) -> Result<Handle, FederationError> {
        let process = &mut self.processes[index];
        let result = process
            .federation
            .join_federation(name, process.handler.clone(), Arc::new(process.time.clone()))
            .await;

        let result = result.map(|session| {
            let handle = session.handle();
            process.session = Some(session);
            handle
        });
        self.settle().await;
        result
    }

    /// Resign the local federate of process `index`.
    pub async fn resign(&mut self, index: usize, action: ResignAction) -> Result<(), FederationError> {
        let process = &mut self.processes[index];
        let result = process.federation.resign_federation(action).await;
        if result.is_ok() {
            process.session = None;
        }
        self.settle().await;
        result
    }

    /// Destroy the federation from process `index`.
    pub async fn destroy(&mut self, index: usize) -> Result<(), FederationError> {
        let result = self.processes[index].federation.destroy_federation().await;
        self.settle().await;
        result
    }

    /// Broadcast `message` from the federate of process `index`.
    pub async fn send(&mut self, index: usize, message: Message) -> Result<(), FederationError> {
        let result = self.processes[index].federation.send(message);
        self.settle().await;
        result
    }

    /// Disconnect process `index` gracefully.
    pub async fn disconnect(&mut self, index: usize) {
        let process = &mut self.processes[index];
        process.federation.disconnect().await;
        process.session = None;
        self.settle().await;
    }

    /// Kill process `index` without a Goodbye.
    pub async fn crash(&mut self, index: usize) {
        let process = &mut self.processes[index];
        process.transport.crash();
        process.crashed = true;
        process.session = None;
        self.settle().await;
    }

    /// Kill every process in `indices` at once, without Goodbyes.
    pub async fn crash_together(&mut self, indices: &[usize]) {
        let transports: Vec<&SimTransport> =
            indices.iter().map(|index| self.processes[*index].transport.as_ref()).collect();
        self.network.crash_together(&transports);

        for index in indices {
            let process = &mut self.processes[*index];
            process.crashed = true;
            process.session = None;
        }
        self.settle().await;
    }

    /// Indices of processes still on the channel.
    pub fn live(&self) -> Vec<usize> {
        (0..self.processes.len()).filter(|index| self.processes[*index].is_live()).collect()
    }

    /// Indices of live processes that consider themselves coordinator.
    pub fn coordinators(&self) -> Vec<usize> {
        self.live()
            .into_iter()
            .filter(|index| self.processes[*index].federation.is_coordinator())
            .collect()
    }

    /// Manifests of every live process.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_processes(
            self.processes
                .iter()
                .filter(|process| process.is_live())
                .map(|process| {
                    ProcessSnapshot::new(process.id(), process.federation.manifest())
                        .with_history(process.versions.clone())
                })
                .collect(),
        )
    }
}
