//! Version / Verack / Ack handshake.
//!
//! The initiator goes `new -> awaiting_verack -> connected`, the responder
//! `new -> awaiting_ack -> connected`. State changes happen under the peer
//! lock; sends happen after the lock is released.
//!
//! When both sides dial each other at once, each side receives a `Version`
//! while waiting for a `Verack`. That first `Version` is answered with a
//! `Verack` and the peer keeps waiting; both sides then complete on the
//! other's `Verack`, and the trailing `Ack` is ignored.

use crate::hub::ObserverHub;
use crate::message::Message;
use crate::peer::PeerState;
use crate::registry::AddressRegistry;
use crate::transport::Transport;
use crate::types::{Direction, PeerId, ServiceSet, ServiceType, VersionInfo};
use crate::{NetworkError, NetworkResult, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What this node advertises in its own `Version` / `Verack`.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub version: String,
    pub services: ServiceSet,
    pub listening_endpoint: SocketAddr,
}

impl LocalNode {
    /// Full service set, current protocol version.
    pub fn new(listening_endpoint: SocketAddr) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            services: ServiceType::full_set(),
            listening_endpoint,
        }
    }

    pub fn version_info(&self) -> VersionInfo {
        VersionInfo {
            version: self.version.clone(),
            services: self.services.clone(),
            listening_endpoint: self.listening_endpoint,
        }
    }
}

/// Outcome of a version check on a peer.
enum VersionRole {
    /// Plain responder: `new -> awaiting_ack`.
    Responder,
    /// Simultaneous open: stay in `awaiting_verack`.
    CrossedInitiator,
}

/// Drives the handshake state machine for every peer.
pub struct HandshakeEngine {
    registry: Arc<AddressRegistry>,
    transport: Arc<dyn Transport>,
    hub: Arc<ObserverHub>,
    local: LocalNode,
}

impl HandshakeEngine {
    pub fn new(
        registry: Arc<AddressRegistry>,
        transport: Arc<dyn Transport>,
        hub: Arc<ObserverHub>,
        local: LocalNode,
    ) -> Self {
        Self {
            registry,
            transport,
            hub,
            local,
        }
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    /// Dial `addr` unless we already know a peer there.
    ///
    /// Returns the new peer id, or `None` when the request collapsed onto an
    /// existing peer.
    pub async fn initiate(&self, addr: SocketAddr) -> NetworkResult<Option<PeerId>> {
        let (peer, created) = self.registry.get_or_create_outbound(addr);
        if !created {
            info!(peer = %peer, addr = %addr, "Already connecting or connected, ignoring");
            return Ok(None);
        }

        info!(peer = %peer, addr = %addr, "Initiating handshake");
        self.start(&peer).await?;
        Ok(Some(peer))
    }

    /// Send our `Version` to a peer still in state `new`.
    ///
    /// Used for fresh dials and for candidates learnt through gossip.
    pub async fn start(&self, peer: &PeerId) -> NetworkResult<()> {
        {
            let shared = self.shared(peer)?;
            let mut record = shared.lock();
            if record.state() != PeerState::New {
                return Err(NetworkError::OutOfSequence {
                    message: "version",
                    state: record.state().as_str(),
                });
            }
            record.transition(PeerState::AwaitingVerack)?;
            // Candidates can sit in `new` for a while; time out from the dial.
            record.touch();
        }

        let info = self.local.version_info();
        if let Err(e) = self.transport.send(peer, Message::Version(info)).await {
            warn!(peer = %peer, error = %e, "Failed to send version");
            self.teardown(peer);
            return Err(e);
        }
        Ok(())
    }

    /// Responder side: a peer introduced itself.
    pub async fn on_version(&self, peer: &PeerId, info: VersionInfo) -> NetworkResult<()> {
        self.version_role(peer)?;

        let target = match self
            .registry
            .set_listening_endpoint(peer, info.listening_endpoint)
        {
            Ok(()) => peer.clone(),
            Err(NetworkError::EndpointConflict { endpoint, owner }) => {
                // Only a handshake still waiting on that node can take over
                // this session; a settled owner is never handed the socket.
                if !self.accepts_version(&owner) {
                    return Err(NetworkError::EndpointConflict { endpoint, owner });
                }
                // The endpoint belongs to a peer we dialed; this inbound
                // session is the same node.
                self.registry.absorb(peer, &owner);
                owner
            }
            Err(e) => return Err(e),
        };

        let role = {
            let shared = self.shared(&target)?;
            let mut record = shared.lock();
            let role = check_version_role(record.state(), record.direction(), record.has_services())
                .ok_or(NetworkError::OutOfSequence {
                    message: "version",
                    state: record.state().as_str(),
                })?;
            record.set_version(info.version.clone());
            record.add_services(&info.services);
            if let VersionRole::Responder = role {
                record.transition(PeerState::AwaitingAck)?;
            }
            role
        };

        info!(
            peer = %target,
            version = %info.version,
            endpoint = %info.listening_endpoint,
            crossed = matches!(role, VersionRole::CrossedInitiator),
            "Received version"
        );

        let reply = Message::Verack(self.local.version_info());
        if let Err(e) = self.transport.send(&target, reply).await {
            warn!(peer = %target, error = %e, "Failed to send verack");
            self.teardown(&target);
            return Err(e);
        }
        Ok(())
    }

    /// Initiator side: our `Version` was accepted.
    pub async fn on_verack(&self, peer: &PeerId, info: VersionInfo) -> NetworkResult<()> {
        let direction = {
            let shared = self.shared(peer)?;
            let mut record = shared.lock();
            if record.state() != PeerState::AwaitingVerack {
                return Err(NetworkError::OutOfSequence {
                    message: "verack",
                    state: record.state().as_str(),
                });
            }
            record.set_version(info.version.clone());
            record.add_services(&info.services);
            record.transition(PeerState::Connected)?;
            record.direction()
        };

        if self.registry.listening_endpoint(peer) != Some(info.listening_endpoint) {
            debug!(
                peer = %peer,
                advertised = %info.listening_endpoint,
                "Verack endpoint differs from dialed address"
            );
        }

        if let Err(e) = self.transport.send(peer, Message::Ack).await {
            warn!(peer = %peer, error = %e, "Failed to send ack");
            self.teardown(peer);
            return Err(e);
        }

        info!(peer = %peer, version = %info.version, "Handshake complete");
        self.hub.notify_connected(peer, direction.is_outbound());
        Ok(())
    }

    /// Responder side: the initiator confirmed our `Verack`.
    pub async fn on_ack(&self, peer: &PeerId) -> NetworkResult<()> {
        let direction = {
            let shared = self.shared(peer)?;
            let mut record = shared.lock();
            match record.state() {
                PeerState::AwaitingAck => {}
                PeerState::Connected => {
                    debug!(peer = %peer, "Ignoring ack on connected peer");
                    return Ok(());
                }
                state => {
                    return Err(NetworkError::OutOfSequence {
                        message: "ack",
                        state: state.as_str(),
                    })
                }
            }
            record.transition(PeerState::Connected)?;
            record.direction()
        };

        info!(peer = %peer, "Handshake complete");
        self.hub.notify_connected(peer, direction.is_outbound());
        Ok(())
    }

    /// Close a peer and drop every registry mapping it had.
    pub fn close(&self, peer: &PeerId, reason: &str) {
        let was_connected = self
            .registry
            .store()
            .snapshot(peer)
            .map(|p| p.is_connected())
            .unwrap_or(false);
        info!(peer = %peer, reason = reason, "Closing peer");
        self.registry.remove_peer(peer);
        if was_connected {
            self.hub.notify_disconnected(peer);
        }
    }

    fn version_role(&self, peer: &PeerId) -> NetworkResult<VersionRole> {
        let record = self
            .registry
            .store()
            .snapshot(peer)
            .ok_or_else(|| NetworkError::PeerNotFound(peer.clone()))?;
        check_version_role(record.state(), record.direction(), record.has_services()).ok_or(
            NetworkError::OutOfSequence {
                message: "version",
                state: record.state().as_str(),
            },
        )
    }

    fn accepts_version(&self, peer: &PeerId) -> bool {
        self.version_role(peer).is_ok()
    }

    fn shared(&self, peer: &PeerId) -> NetworkResult<crate::peer::SharedPeer> {
        self.registry
            .store()
            .get_peer(peer)
            .ok_or_else(|| NetworkError::PeerNotFound(peer.clone()))
    }

    /// Forget a peer whose handshake could not be sent, so a later dial can
    /// start over.
    fn teardown(&self, peer: &PeerId) {
        self.registry.remove_peer(peer);
    }
}

fn check_version_role(
    state: PeerState,
    direction: Direction,
    has_services: bool,
) -> Option<VersionRole> {
    match state {
        PeerState::New => Some(VersionRole::Responder),
        PeerState::AwaitingVerack if direction.is_outbound() && !has_services => {
            Some(VersionRole::CrossedInitiator)
        }
        _ => None,
    }
}
