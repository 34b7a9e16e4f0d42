//! In-memory group transport.
//!
//! [`SimNetwork`] is the shared medium: every channel is an ordered list of
//! endpoints, each with its own inbox drained by a delivery task. Broadcasts
//! are fanned out under the network lock, so every member sees views and
//! messages in the same total order. [`SimTransport`] is one process's
//! attachment to the network.
//!
//! # Faults
//!
//! - [`SimTransport::crash`] leaves the channel without anyone on it saying
//!   Goodbye. Survivors only learn of it from the next view.
//! - [`SimNetwork::crash_together`] does the same for several processes at
//!   once; survivors see one view without any of them.
//! - [`SimNetwork::stall`] holds back everything addressed to a member until
//!   [`SimNetwork::resume`]. A stalled member never acknowledges, so reliable
//!   broadcasts time out while it stays stalled.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use fedline_federation::{ChannelHandler, GroupTransport, TransportError};
use fedline_proto::MemberId;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

/// Something the network hands to a member's delivery task.
enum Delivery {
    View(Vec<MemberId>),
    Message {
        source: MemberId,
        bytes: Bytes,
        /// Present for reliable broadcasts; receives our id after delivery.
        ack: Option<mpsc::UnboundedSender<MemberId>>,
    },
}

struct Endpoint {
    id: MemberId,
    inbox: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct NetworkState {
    channels: HashMap<String, Vec<Endpoint>>,
    stalled: HashSet<MemberId>,
    held: HashMap<MemberId, Vec<Delivery>>,
    broadcasts: u64,
}

impl NetworkState {
    fn view(&self, channel: &str) -> Vec<MemberId> {
        self.channels
            .get(channel)
            .map(|endpoints| endpoints.iter().map(|endpoint| endpoint.id).collect())
            .unwrap_or_default()
    }

    /// Hand `make()` to every member of `channel`, holding it for stalled ones.
    fn fan_out(&mut self, channel: &str, mut make: impl FnMut() -> Delivery) -> Vec<MemberId> {
        let Some(endpoints) = self.channels.get(channel) else {
            return Vec::new();
        };

        let mut recipients = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            recipients.push(endpoint.id);
            let delivery = make();
            if self.stalled.contains(&endpoint.id) {
                self.held.entry(endpoint.id).or_default().push(delivery);
            } else if endpoint.inbox.send(delivery).is_err() {
                tracing::trace!(member = %endpoint.id, "delivery task gone");
            }
        }
        recipients
    }

    fn remove(&mut self, channel: &str, id: MemberId) {
        if let Some(endpoints) = self.channels.get_mut(channel) {
            endpoints.retain(|endpoint| endpoint.id != id);
        }
        self.held.remove(&id);
        self.stalled.remove(&id);
    }

    fn install_view(&mut self, channel: &str) {
        let view = self.view(channel);
        self.fan_out(channel, || Delivery::View(view.clone()));
    }
}

/// Shared in-memory medium that [`SimTransport`]s attach to.
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// New unattached transport on this network.
    pub fn transport(&self) -> Arc<SimTransport> {
        Arc::new(SimTransport { network: self.clone(), session: Mutex::new(None) })
    }

    /// Current view of `channel`, in join order.
    pub fn view(&self, channel: &str) -> Vec<MemberId> {
        self.state.lock().view(channel)
    }

    /// Hold back every delivery addressed to `member`.
    pub fn stall(&self, member: MemberId) {
        self.state.lock().stalled.insert(member);
    }

    /// Release `member` and hand it everything held back, in order.
    pub fn resume(&self, member: MemberId) {
        let mut state = self.state.lock();
        state.stalled.remove(&member);
        let held = state.held.remove(&member).unwrap_or_default();

        let inbox = state
            .channels
            .values()
            .flat_map(|endpoints| endpoints.iter())
            .find(|endpoint| endpoint.id == member)
            .map(|endpoint| endpoint.inbox.clone());

        if let Some(inbox) = inbox {
            for delivery in held {
                if inbox.send(delivery).is_err() {
                    break;
                }
            }
        }
    }

    /// Number of broadcasts accepted so far, views excluded.
    pub fn broadcasts(&self) -> u64 {
        self.state.lock().broadcasts
    }

    fn join(&self, channel: &str, id: MemberId, inbox: mpsc::UnboundedSender<Delivery>) {
        let mut state = self.state.lock();
        state.channels.entry(channel.to_string()).or_default().push(Endpoint { id, inbox });
        state.install_view(channel);
    }

    /// Crash every transport in `transports` in a single view change.
    pub fn crash_together(&self, transports: &[&SimTransport]) {
        let detached: Vec<(String, MemberId)> = transports
            .iter()
            .filter_map(|transport| transport.detach())
            .map(|session| (session.channel, session.local))
            .collect();

        let mut state = self.state.lock();
        let mut channels = BTreeSet::new();
        for (channel, id) in &detached {
            state.remove(channel, *id);
            channels.insert(channel.as_str());
        }
        for channel in channels {
            state.install_view(channel);
        }

        tracing::info!(crashed = detached.len(), "crashed together");
    }

    fn leave(&self, channel: &str, id: MemberId) {
        let mut state = self.state.lock();
        state.remove(channel, id);
        state.install_view(channel);
    }

    fn broadcast(
        &self,
        channel: &str,
        source: MemberId,
        bytes: &Bytes,
        ack: Option<&mpsc::UnboundedSender<MemberId>>,
    ) -> Vec<MemberId> {
        let mut state = self.state.lock();
        state.broadcasts += 1;
        state.fan_out(channel, || Delivery::Message {
            source,
            bytes: bytes.clone(),
            ack: ack.cloned(),
        })
    }
}

impl std::fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimNetwork")
            .field("channels", &state.channels.len())
            .field("stalled", &state.stalled)
            .field("broadcasts", &state.broadcasts)
            .finish()
    }
}

struct Session {
    channel: String,
    local: MemberId,
    delivery: JoinHandle<()>,
}

/// One process's attachment to a [`SimNetwork`].
pub struct SimTransport {
    network: SimNetwork,
    session: Mutex<Option<Session>>,
}

impl SimTransport {
    /// Drop off the channel as if the process died.
    ///
    /// Nothing is sent first. Anything still queued for us is discarded.
    pub fn crash(&self) {
        if let Some(session) = self.leave() {
            tracing::info!(channel = %session.0, member = %session.1, "crashed");
        }
    }

    /// Member identity while connected.
    pub fn local(&self) -> Option<MemberId> {
        self.session.lock().as_ref().map(|session| session.local)
    }

    fn leave(&self) -> Option<(String, MemberId)> {
        let session = self.detach()?;
        self.network.leave(&session.channel, session.local);
        Some((session.channel, session.local))
    }

    /// Forget the session and stop delivering, without touching the network.
    fn detach(&self) -> Option<Session> {
        let session = self.session.lock().take()?;
        session.delivery.abort();
        Some(session)
    }

    fn attached(&self) -> Result<(String, MemberId), TransportError> {
        self.session
            .lock()
            .as_ref()
            .map(|session| (session.channel.clone(), session.local))
            .ok_or(TransportError::NotConnected)
    }
}

/// Drain `inbox` into `handler` until the network drops us.
async fn run_delivery(
    local: MemberId,
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    handler: Arc<dyn ChannelHandler>,
) {
    while let Some(delivery) = inbox.recv().await {
        match delivery {
            Delivery::View(members) => handler.view_accepted(&members),
            Delivery::Message { source, bytes, ack } => {
                handler.receive(source, bytes);
                if let Some(ack) = ack {
                    let _ = ack.send(local);
                }
            },
        }
    }
}

#[async_trait]
impl GroupTransport for SimTransport {
    async fn connect(
        &self,
        channel: &str,
        local: MemberId,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), TransportError> {
        let mut session = self.session.lock();
        if let Some(existing) = session.as_ref() {
            return Err(TransportError::AlreadyConnected(existing.channel.clone()));
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let delivery = tokio::spawn(run_delivery(local, inbox_rx, handler));
        self.network.join(channel, local, inbox_tx);

        *session = Some(Session { channel: channel.to_string(), local, delivery });
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some((channel, member)) = self.leave() {
            tracing::debug!(channel = %channel, member = %member, "left channel");
        }
    }

    fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        let (channel, local) = self.attached()?;
        self.network.broadcast(&channel, local, &bytes, None);
        Ok(())
    }

    async fn send_reliable(&self, bytes: Bytes, timeout: Duration) -> Result<(), TransportError> {
        let (channel, local) = self.attached()?;
        let deadline = tokio::time::Instant::now() + timeout;

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let mut missing: BTreeSet<MemberId> =
            self.network.broadcast(&channel, local, &bytes, Some(&ack_tx)).into_iter().collect();
        drop(ack_tx);

        while !missing.is_empty() {
            match tokio::time::timeout_at(deadline, ack_rx.recv()).await {
                Ok(Some(member)) => {
                    missing.remove(&member);
                },
                Ok(None) | Err(_) => break,
            }
        }

        // Members that left while we waited are no longer owed the message
        let view = self.network.view(&channel);
        missing.retain(|member| view.contains(member));

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Timeout { elapsed: timeout, missing: missing.len() })
        }
    }

    fn view(&self) -> Vec<MemberId> {
        match self.attached() {
            Ok((channel, _)) => self.network.view(&channel),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        views: Mutex<Vec<Vec<MemberId>>>,
        messages: Mutex<Vec<(MemberId, Bytes)>>,
    }

    impl ChannelHandler for Recorder {
        fn view_accepted(&self, members: &[MemberId]) {
            self.views.lock().push(members.to_vec());
        }

        fn receive(&self, source: MemberId, bytes: Bytes) {
            self.messages.lock().push((source, bytes));
        }
    }

    async fn attach(network: &SimNetwork, id: MemberId) -> (Arc<SimTransport>, Arc<Recorder>) {
        let transport = network.transport();
        let recorder = Arc::new(Recorder::default());
        transport.connect("chan", id, recorder.clone()).await.expect("connects");
        (transport, recorder)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn views_precede_newcomer_traffic() {
        let network = SimNetwork::new();
        let (_a, rec_a) = attach(&network, 1).await;
        let (b, _rec_b) = attach(&network, 2).await;

        b.send(Bytes::from_static(b"hello")).expect("sends");
        settle().await;

        assert_eq!(*rec_a.views.lock(), vec![vec![1], vec![1, 2]]);
        assert_eq!(rec_a.messages.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_reaches_sender() {
        let network = SimNetwork::new();
        let (a, rec_a) = attach(&network, 1).await;

        a.send(Bytes::from_static(b"echo")).expect("sends");
        settle().await;

        assert_eq!(*rec_a.messages.lock(), vec![(1, Bytes::from_static(b"echo"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn reliable_send_waits_for_everyone() {
        let network = SimNetwork::new();
        let (a, _) = attach(&network, 1).await;
        let (_b, rec_b) = attach(&network, 2).await;

        a.send_reliable(Bytes::from_static(b"r"), Duration::from_secs(1)).await.expect("acked");

        assert_eq!(rec_b.messages.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_member_times_out_reliable_send() {
        let network = SimNetwork::new();
        let (a, _) = attach(&network, 1).await;
        let (_b, rec_b) = attach(&network, 2).await;
        settle().await;

        network.stall(2);
        let result = a.send_reliable(Bytes::from_static(b"r"), Duration::from_millis(50)).await;

        assert!(matches!(result, Err(TransportError::Timeout { missing: 1, .. })));
        assert!(rec_b.messages.lock().is_empty());

        network.resume(2);
        settle().await;
        assert_eq!(rec_b.messages.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_shrinks_view_for_survivors() {
        let network = SimNetwork::new();
        let (_a, rec_a) = attach(&network, 1).await;
        let (b, _) = attach(&network, 2).await;

        b.crash();
        settle().await;

        assert_eq!(network.view("chan"), vec![1]);
        assert_eq!(rec_a.views.lock().last(), Some(&vec![1]));
        assert!(matches!(b.send(Bytes::new()), Err(TransportError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn crash_together_installs_one_view() {
        let network = SimNetwork::new();
        let (_a, rec_a) = attach(&network, 1).await;
        let (b, _) = attach(&network, 2).await;
        let (c, _) = attach(&network, 3).await;
        settle().await;
        let views_before = rec_a.views.lock().len();

        network.crash_together(&[b.as_ref(), c.as_ref()]);
        settle().await;

        let views = rec_a.views.lock();
        assert_eq!(views.len(), views_before + 1);
        assert_eq!(views.last(), Some(&vec![1]));
        assert!(b.local().is_none());
        assert!(c.local().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_is_rejected() {
        let network = SimNetwork::new();
        let (a, _) = attach(&network, 1).await;

        let again = a.connect("other", 1, Arc::new(Recorder::default())).await;

        assert!(matches!(again, Err(TransportError::AlreadyConnected(channel)) if channel == "chan"));
    }
}
