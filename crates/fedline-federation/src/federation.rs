//! Federation coordination protocol.
//!
//! One [`Federation`] per process and channel. It keeps the process's
//! [`Manifest`] in step with everyone else's and drives the lifecycle:
//!
//! ```text
//! connect ──> FindCoordinator ──┬─> SetManifest received ──> install
//!                               └─> discovery timeout ─────> self-appoint
//!
//! create ──> CreateFederation (reliable) ──> every member records the model
//! join ────> JoinFederation   (reliable) ──> every member records the federate
//! resign ──> ResignFederation (reliable) ──> every member queues the notice,
//!                                            then forgets the federate
//! destroy ─> DestroyFederation (reliable) ─> every member drops the model
//! ```
//!
//! Preconditions are checked against the local manifest before anything is
//! broadcast. A reliable broadcast that times out surfaces as
//! [`FederationError::Communication`]; some members may have applied it, so
//! callers re-read the manifest before retrying.
//!
//! # Crash handling
//!
//! When a member leaves the view (or says Goodbye) while hosting a joined
//! federate, every surviving process synthesizes a resignation on its behalf
//! and feeds it through the ordinary resign path. The member is then removed
//! from the manifest, so a later view change finds nothing left to resign.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use fedline_core::{
    DeliveryScheduler, Environment, FederationConfig, FederationError, IncomingHandler,
    Manifest, MessageQueue, TimeSource, TransportError,
};
use fedline_proto::{
    CreateFederation, DestroyFederation, Handle, JoinRequest, ManifestSnapshot, MemberId, Message,
    Payload, ResignAction, ResignNotice,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    channel::{Channel, ChannelEvents, ChannelListener},
    transport::GroupTransport,
};

/// Session of the local federate, returned by a successful join.
pub struct JoinedFederate {
    name: String,
    handle: Handle,
    queue: Arc<MessageQueue>,
    scheduler: Arc<DeliveryScheduler>,
}

impl JoinedFederate {
    /// Name the federate joined with (possibly suffixed).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Federate handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Queue incoming messages land in.
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Scheduler delivering from the queue.
    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }
}

impl fmt::Debug for JoinedFederate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinedFederate")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Delivery path into the local federate's session.
struct Link {
    queue: Arc<MessageQueue>,
    scheduler: Arc<DeliveryScheduler>,
}

/// State shared between the caller-facing handle and the channel listener.
struct Shared {
    local: MemberId,
    config: FederationConfig,
    channel: Channel,
    connected: AtomicBool,
    manifest: Mutex<Option<Manifest>>,
    /// Present while the local federate is joined.
    link: Mutex<Option<Link>>,
    installed: Notify,
}

/// Coordination protocol endpoint for one channel.
pub struct Federation<E: Environment> {
    shared: Arc<Shared>,
    env: E,
    /// Serializes local lifecycle operations.
    lifecycle: tokio::sync::Mutex<()>,
}

impl<E: Environment> Federation<E> {
    /// Endpoint for channel `name` over `transport`.
    ///
    /// The member identity is drawn from `env` once and kept across
    /// reconnects.
    pub fn new(
        name: impl Into<String>,
        env: E,
        transport: Arc<dyn GroupTransport>,
        config: FederationConfig,
    ) -> Result<Self, FederationError> {
        config.validate()?;

        let local = env.random_u128();
        let shared = Arc::new(Shared {
            local,
            config,
            channel: Channel::new(name.into(), local, transport),
            connected: AtomicBool::new(false),
            manifest: Mutex::new(None),
            link: Mutex::new(None),
            installed: Notify::new(),
        });

        Ok(Self { shared, env, lifecycle: tokio::sync::Mutex::new(()) })
    }

    /// Channel (and federation) name.
    pub fn name(&self) -> &str {
        self.shared.channel.name()
    }

    /// Member identity of this process.
    pub fn local_id(&self) -> MemberId {
        self.shared.local
    }

    /// Configuration in use.
    pub fn config(&self) -> &FederationConfig {
        &self.shared.config
    }

    /// Whether [`Self::connect`] has completed.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Copy of the current manifest.
    pub fn manifest(&self) -> Option<Manifest> {
        self.shared.manifest.lock().clone()
    }

    /// Run `f` against the current manifest without copying it.
    pub fn with_manifest<R>(&self, f: impl FnOnce(&Manifest) -> R) -> Option<R> {
        self.shared.manifest.lock().as_ref().map(f)
    }

    /// Whether this process currently coordinates the channel.
    pub fn is_coordinator(&self) -> bool {
        self.with_manifest(Manifest::is_coordinator).unwrap_or(false)
    }

    /// Join the channel and obtain a manifest.
    ///
    /// Asks for the coordinator, then waits up to the discovery timeout for
    /// its manifest. If nobody answers this process appoints itself. A second
    /// call while connected does nothing. Fails with a transient
    /// communication error if the transport does not admit us within the
    /// join timeout.
    pub async fn connect(&self) -> Result<(), FederationError> {
        let _op = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let shared = &self.shared;
        let name = shared.channel.name().to_string();
        let listener = Arc::new(ChannelListener::new(name.clone(), Arc::downgrade(shared)));

        let installed = shared.installed.notified();
        tokio::pin!(installed);

        let join_timeout = shared.config.join_timeout;
        tokio::select! {
            joined = shared.channel.transport().connect(&name, shared.local, listener) => joined?,
            () = self.env.sleep(join_timeout) => {
                tracing::error!(channel = %name, timeout = ?join_timeout, "channel did not admit us");
                shared.channel.transport().disconnect().await;
                return Err(TransportError::Timeout { elapsed: join_timeout, missing: 0 }.into());
            },
        }
        shared.connected.store(true, Ordering::Release);

        tracing::debug!(channel = %name, local = %shared.local, "looking for coordinator");
        if let Err(e) = shared.channel.broadcast(Payload::FindCoordinator, 0) {
            shared.connected.store(false, Ordering::Release);
            shared.channel.transport().disconnect().await;
            return Err(e);
        }

        tokio::select! {
            () = &mut installed => {},
            () = self.env.sleep(shared.config.discovery_timeout) => {},
        }

        let mut manifest = shared.manifest.lock();
        match manifest.as_ref() {
            Some(installed) => {
                tracing::info!(
                    channel = %name,
                    coordinator = %installed.coordinator(),
                    version = installed.version(),
                    "found coordinator"
                );
            },
            None => {
                tracing::warn!(channel = %name, local = %shared.local, "no coordinator found, appointing self");
                *manifest = Some(Manifest::new(name, shared.local));
            },
        }

        Ok(())
    }

    /// Create the federation on this channel with `model`.
    pub async fn create_federation(&self, model: Vec<u8>) -> Result<(), FederationError> {
        let _op = self.lifecycle.lock().await;
        let shared = &self.shared;
        let name = shared.channel.name();

        let version = shared.with_connected_manifest(|manifest| {
            if manifest.contains_federation() {
                tracing::error!(federation = %name, "create failed, federation already exists");
                return Err(FederationError::FederationAlreadyExists(name.to_string()));
            }
            Ok(manifest.version())
        })?;

        tracing::debug!(federation = %name, model_size = model.len(), "creating federation");
        let payload = Payload::CreateFederation(CreateFederation {
            federation: name.to_string(),
            model,
        });
        shared
            .channel
            .broadcast_reliable(payload, version, shared.config.response_timeout)
            .await?;

        tracing::info!(federation = %name, "federation created");
        Ok(())
    }

    /// Join the federation as `federate_name`.
    ///
    /// Incoming messages are gated by `time` and delivered to `handler`. If
    /// the name is taken and unique names are not required, the federate
    /// joins as `"name (handle)"` instead.
    pub async fn join_federation(
        &self,
        federate_name: &str,
        handler: Arc<dyn IncomingHandler>,
        time: Arc<dyn TimeSource>,
    ) -> Result<JoinedFederate, FederationError> {
        let _op = self.lifecycle.lock().await;
        let shared = &self.shared;
        let federation = shared.channel.name();

        let (name, version) = shared.with_connected_manifest(|manifest| {
            if !manifest.contains_federation() {
                tracing::info!(federation = %federation, federate = %federate_name, "join failed, federation does not exist");
                return Err(FederationError::FederationDoesNotExist(federation.to_string()));
            }

            if let Some(existing) = manifest.federate_name(shared.local) {
                return Err(FederationError::AlreadyJoined(existing.to_string()));
            }

            if !manifest.contains_federate(federate_name) {
                return Ok((federate_name.to_string(), manifest.version()));
            }

            if shared.config.unique_federate_names {
                tracing::info!(federation = %federation, federate = %federate_name, "join failed, name in use");
                return Err(FederationError::FederateNameInUse(federate_name.to_string()));
            }

            let renamed = format!("{federate_name} ({})", manifest.local_handle().unwrap_or(0));
            if manifest.contains_federate(&renamed) {
                tracing::info!(federation = %federation, federate = %renamed, "join failed, suffixed name in use");
                return Err(FederationError::FederateNameInUse(renamed));
            }

            tracing::warn!(federation = %federation, federate = %federate_name, renamed = %renamed, "name in use, renamed");
            Ok((renamed, manifest.version()))
        })?;

        // Link before broadcasting so nothing addressed to us after the join
        // is applied can slip past the queue
        let queue = Arc::new(MessageQueue::new(time, handler));
        let scheduler =
            Arc::new(DeliveryScheduler::new(Arc::clone(&queue), shared.config.clone()));
        *shared.link.lock() =
            Some(Link { queue: Arc::clone(&queue), scheduler: Arc::clone(&scheduler) });

        let payload = Payload::JoinFederation(JoinRequest { federate_name: name.clone() });
        if let Err(e) =
            shared.channel.broadcast_reliable(payload, version, shared.config.response_timeout).await
        {
            shared.link.lock().take();
            return Err(e);
        }

        let handle = shared
            .manifest
            .lock()
            .as_ref()
            .and_then(|manifest| manifest.federate_handle(shared.local));

        let Some(handle) = handle else {
            shared.link.lock().take();
            tracing::error!(federation = %federation, federate = %name, "join never acknowledged");
            return Err(FederationError::Internal(format!(
                "coordinator never acknowledged join of {name}"
            )));
        };

        tracing::info!(federation = %federation, federate = %name, handle, "joined federation");

        Ok(JoinedFederate { name, handle, queue, scheduler })
    }

    /// Resign the local federate with `action`.
    ///
    /// Once every member has the notice the session is shut down: immediate
    /// delivery stops and whatever is still queued is discarded.
    pub async fn resign_federation(&self, action: ResignAction) -> Result<(), FederationError> {
        let _op = self.lifecycle.lock().await;
        let shared = &self.shared;
        let federation = shared.channel.name();

        let (notice, version) = shared.with_connected_manifest(|manifest| {
            let info = manifest.federate(shared.local).ok_or(FederationError::NotJoined)?;
            let notice = ResignNotice {
                federate: info.handle,
                federate_name: info.name.clone(),
                federation: federation.to_string(),
                action,
                synthesized: false,
            };
            Ok((notice, manifest.version()))
        })?;

        tracing::debug!(federation = %federation, federate = %notice.federate_name, ?action, "resigning");
        let federate_name = notice.federate_name.clone();
        shared
            .channel
            .broadcast_reliable(
                Payload::ResignFederation(notice),
                version,
                shared.config.response_timeout,
            )
            .await?;

        shared.unlink().await;
        tracing::info!(federation = %federation, federate = %federate_name, "resigned");
        Ok(())
    }

    /// Destroy the federation.
    ///
    /// Destroying a federation that does not exist is logged and ignored.
    pub async fn destroy_federation(&self) -> Result<(), FederationError> {
        let _op = self.lifecycle.lock().await;
        let shared = &self.shared;
        let federation = shared.channel.name();

        let version = shared.with_connected_manifest(|manifest| {
            if !manifest.contains_federation() {
                return Ok(None);
            }

            let handles = manifest.federate_handles();
            if !handles.is_empty() {
                tracing::info!(federation = %federation, ?handles, "destroy failed, federates still joined");
                return Err(FederationError::FederatesCurrentlyJoined {
                    federation: federation.to_string(),
                    handles,
                });
            }

            Ok(Some(manifest.version()))
        })?;

        let Some(version) = version else {
            tracing::warn!(federation = %federation, "destroy ignored, federation does not exist");
            return Ok(());
        };

        let payload =
            Payload::DestroyFederation(DestroyFederation { federation: federation.to_string() });
        shared
            .channel
            .broadcast_reliable(payload, version, shared.config.response_timeout)
            .await?;

        tracing::info!(federation = %federation, "federation destroyed");
        Ok(())
    }

    /// Broadcast an application message from the local federate.
    ///
    /// Best-effort. The source is overwritten with the local handle.
    pub fn send(&self, mut message: Message) -> Result<(), FederationError> {
        let shared = &self.shared;
        let version = shared.with_connected_manifest(|manifest| {
            message.source =
                manifest.federate_handle(shared.local).ok_or(FederationError::NotJoined)?;
            Ok(manifest.version())
        })?;

        shared.channel.broadcast(Payload::Data(message), version)
    }

    /// Say goodbye and leave the channel. Idempotent.
    pub async fn disconnect(&self) {
        let _op = self.lifecycle.lock().await;
        let shared = &self.shared;
        if !shared.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        let version = shared.manifest.lock().as_ref().map_or(0, Manifest::version);
        if let Err(e) = shared.channel.broadcast(Payload::Goodbye, version) {
            tracing::debug!(channel = %shared.channel.name(), error = %e, "goodbye not sent");
        }

        shared.channel.transport().disconnect().await;
        shared.manifest.lock().take();
        shared.unlink().await;

        tracing::info!(channel = %shared.channel.name(), "disconnected");
    }
}

impl<E: Environment> fmt::Debug for Federation<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Federation")
            .field("name", &self.name())
            .field("local", &self.shared.local)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn with_connected_manifest<R>(
        &self,
        f: impl FnOnce(&Manifest) -> Result<R, FederationError>,
    ) -> Result<R, FederationError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(FederationError::NotConnected);
        }

        let manifest = self.manifest.lock();
        let manifest = manifest.as_ref().ok_or(FederationError::NotConnected)?;
        f(manifest)
    }

    fn local_queue(&self) -> Option<Arc<MessageQueue>> {
        self.link.lock().as_ref().map(|link| Arc::clone(&link.queue))
    }

    /// Detach the local session and stop it delivering.
    async fn unlink(&self) {
        let link = self.link.lock().take();
        let Some(link) = link else {
            return;
        };

        link.scheduler.disable_immediate_delivery().await;
        let discarded = link.queue.len();
        link.queue.clear();
        if discarded > 0 {
            tracing::debug!(channel = %self.channel.name(), discarded, "discarded undelivered messages");
        }
    }

    fn receive_find_coordinator(&self, sender: MemberId) {
        let snapshot = {
            let mut manifest = self.manifest.lock();
            let Some(manifest) = manifest.as_mut() else {
                return;
            };
            if !manifest.is_coordinator() {
                return;
            }

            manifest.record_member_joined_channel(sender);
            tracing::debug!(channel = %self.channel.name(), requester = %sender, "answering coordinator request");
            manifest.snapshot()
        };

        let version = snapshot.version;
        if let Err(e) = self.channel.broadcast(Payload::SetManifest(snapshot), version) {
            tracing::error!(channel = %self.channel.name(), error = %e, "failed to send manifest");
        }
    }

    fn receive_set_manifest(&self, sender: MemberId, snapshot: ManifestSnapshot) {
        {
            let mut manifest = self.manifest.lock();
            if let Some(current) = manifest.as_ref() {
                if current.is_coordinator() {
                    return;
                }

                if snapshot.version < current.version() {
                    tracing::warn!(
                        channel = %self.channel.name(),
                        sender = %sender,
                        current = current.version(),
                        incoming = snapshot.version,
                        incoming_coordinator = %snapshot.coordinator,
                        "discarding stale manifest"
                    );
                    return;
                }
            }

            let installed = Manifest::from_snapshot(self.local, snapshot);
            tracing::debug!(channel = %self.channel.name(), version = installed.version(), "installed manifest\n{installed}");
            *manifest = Some(installed);
        }

        self.installed.notify_waiters();
    }

    fn receive_create(&self, sender: MemberId, create: CreateFederation) {
        let mut manifest = self.manifest.lock();
        let Some(manifest) = manifest.as_mut() else {
            tracing::debug!(channel = %self.channel.name(), sender = %sender, "create before manifest, ignoring");
            return;
        };

        manifest.record_federation_created(create.model);
        tracing::info!(federation = %create.federation, creator = %sender, "federation has been created");
    }

    fn receive_join(&self, sender: MemberId, request: JoinRequest) {
        let mut manifest = self.manifest.lock();
        let Some(manifest) = manifest.as_mut() else {
            return;
        };

        match manifest.record_federate_joined(sender, request.federate_name.as_str()) {
            Some(handle) => tracing::info!(
                federation = %self.channel.name(),
                federate = %request.federate_name,
                handle,
                "federate joined"
            ),
            None => tracing::error!(
                federation = %self.channel.name(),
                federate = %request.federate_name,
                "join for a federation we do not know, ignoring"
            ),
        }
    }

    /// Queue the notice for the local federate, then forget the resigner.
    fn receive_resign(&self, sender: MemberId, notice: ResignNotice) {
        if let Some(queue) = self.local_queue() {
            let immediate = notice.synthesized;
            queue.offer(Message::resign(notice.clone(), immediate));
        }

        let mut manifest = self.manifest.lock();
        if let Some(manifest) = manifest.as_mut()
            && manifest.record_federate_resigned(sender).is_some()
        {
            tracing::info!(
                federation = %notice.federation,
                federate = %notice.federate_name,
                synthesized = notice.synthesized,
                "federate resigned"
            );
        }
    }

    fn receive_destroy(&self, sender: MemberId, destroy: DestroyFederation) {
        let mut manifest = self.manifest.lock();
        let Some(manifest) = manifest.as_mut() else {
            return;
        };

        if !manifest.contains_federation() {
            tracing::error!(federation = %destroy.federation, sender = %sender, "destroy for a federation we did not know existed, ignoring");
        } else if manifest.federate_count() > 0 {
            tracing::error!(
                federation = %destroy.federation,
                sender = %sender,
                handles = ?manifest.federate_handles(),
                "destroy while federates are still joined, ignoring"
            );
        } else {
            manifest.record_federation_destroyed();
            tracing::info!(federation = %destroy.federation, "federation has been destroyed");
        }
    }

    /// `member` left the channel, by Goodbye or by dropping out of the view.
    fn member_departed(&self, member: MemberId) {
        if member == self.local {
            return;
        }

        let synthesized = {
            let manifest = self.manifest.lock();
            let Some(manifest) = manifest.as_ref() else {
                return;
            };
            if manifest.member_handle(member).is_none() {
                return;
            }

            manifest.federate(member).map(|info| ResignNotice {
                federate: info.handle,
                federate_name: info.name.clone(),
                federation: self.channel.name().to_string(),
                action: ResignAction::DeleteObjectsAndReleaseAttributes,
                synthesized: true,
            })
        };

        match synthesized {
            Some(notice) => {
                tracing::warn!(
                    federation = %notice.federation,
                    federate = %notice.federate_name,
                    handle = notice.federate,
                    "federate left without resigning, synthesizing resignation"
                );
                self.receive_resign(member, notice);
            },
            None => {
                tracing::warn!(channel = %self.channel.name(), member = %member, "member left channel");
            },
        }

        let mut manifest = self.manifest.lock();
        let Some(manifest) = manifest.as_mut() else {
            return;
        };

        let was_coordinator = manifest.coordinator() == member;
        manifest.record_member_left_channel(member);
        if was_coordinator {
            tracing::info!(
                channel = %self.channel.name(),
                coordinator = %manifest.coordinator(),
                local = manifest.is_coordinator(),
                "coordinator role moved"
            );
        }
    }
}

impl ChannelEvents for Shared {
    fn view_changed(&self, members: &[MemberId]) {
        let departed = match self.manifest.lock().as_mut() {
            Some(manifest) => manifest.apply_view(members),
            None => return,
        };

        for member in departed {
            self.member_departed(member);
        }
    }

    fn control(&self, sender: MemberId, payload: Payload) {
        match payload {
            Payload::FindCoordinator => self.receive_find_coordinator(sender),
            Payload::SetManifest(snapshot) => self.receive_set_manifest(sender, snapshot),
            Payload::CreateFederation(create) => self.receive_create(sender, create),
            Payload::JoinFederation(request) => self.receive_join(sender, request),
            Payload::ResignFederation(notice) => self.receive_resign(sender, notice),
            Payload::DestroyFederation(destroy) => self.receive_destroy(sender, destroy),
            Payload::Goodbye => self.member_departed(sender),
            Payload::Data(message) => self.data(sender, message),
        }
    }

    fn data(&self, sender: MemberId, message: Message) {
        match self.local_queue() {
            Some(queue) => {
                queue.offer(message);
            },
            None => {
                tracing::trace!(channel = %self.channel.name(), sender = %sender, "no joined federate, dropping data");
            },
        }
    }
}
