//! Local admin RPC.
//!
//! Request/reply over the same framing as peer traffic, one request per
//! frame. The node serves it through [`AdminServer`]; the crawler talks to
//! it through [`AdminClient`].

use crate::codec::FrameCodec;
use crate::handshake::HandshakeEngine;
use crate::peer::PeerState;
use crate::{NetworkError, NetworkResult, ADMIN_MAGIC};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum AdminRequest {
    ConnectTo { ip: Vec<u8>, port: u32 },
    GetInternalPeerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectToResponse {
    pub success: bool,
    pub error_message: String,
}

impl ConnectToResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error_message: String::new(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureData {
    /// `ip:port`, empty when unknown.
    pub listening_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalPeerInfo {
    pub peer_id: String,
    pub infrastructure_data: InfrastructureData,
    pub version: String,
    pub connection_state: String,
    pub direction: String,
    pub supported_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "body", rename_all = "snake_case")]
pub enum AdminResponse {
    ConnectTo(ConnectToResponse),
    PeerInfo(Vec<InternalPeerInfo>),
    Error(String),
}

/// Node-side implementation of the admin calls.
pub struct AdminService {
    engine: Arc<HandshakeEngine>,
}

impl AdminService {
    pub fn new(engine: Arc<HandshakeEngine>) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, request: AdminRequest) -> AdminResponse {
        match request {
            AdminRequest::ConnectTo { ip, port } => {
                AdminResponse::ConnectTo(self.connect_to(&ip, port).await)
            }
            AdminRequest::GetInternalPeerInfo => AdminResponse::PeerInfo(self.internal_peer_info()),
        }
    }

    /// Start a handshake with `ip:port`.
    pub async fn connect_to(&self, ip: &[u8], port: u32) -> ConnectToResponse {
        let addr = match endpoint_from_parts(ip, port) {
            Some(addr) => addr,
            None => return ConnectToResponse::failed("invalid endpoint"),
        };

        match self.engine.initiate(addr).await {
            Ok(Some(peer)) => {
                debug!(peer = %peer, addr = %addr, "Admin connect started");
                ConnectToResponse::ok()
            }
            Ok(None) => self.connect_existing(&addr).await,
            Err(e) => ConnectToResponse::failed(e.to_string()),
        }
    }

    /// The address is already registered: dial it if it is a candidate we
    /// never contacted, otherwise report where the peer stands.
    async fn connect_existing(&self, addr: &SocketAddr) -> ConnectToResponse {
        let registry = self.engine.registry();
        let Some(id) = registry.lookup_by_address(addr) else {
            return ConnectToResponse::failed(format!("peer at {} already known", addr));
        };
        match registry.store().snapshot(&id).map(|p| p.state()) {
            Some(PeerState::New) if registry.listening_endpoint(&id) == Some(*addr) => {
                match self.engine.start(&id).await {
                    Ok(()) => ConnectToResponse::ok(),
                    Err(e) => ConnectToResponse::failed(e.to_string()),
                }
            }
            Some(PeerState::Connected) => {
                ConnectToResponse::failed(format!("peer {} already connected", id))
            }
            Some(state) => ConnectToResponse::failed(format!(
                "handshake with {} in progress (state {})",
                id, state
            )),
            None => ConnectToResponse::failed(format!("peer {} already known", id)),
        }
    }

    /// Every registry entry joined with its peer record.
    pub fn internal_peer_info(&self) -> Vec<InternalPeerInfo> {
        let registry = self.engine.registry();
        registry
            .enumerate()
            .into_iter()
            .filter_map(|entry| {
                let peer = registry.store().snapshot(&entry.peer_id)?;
                Some(InternalPeerInfo {
                    peer_id: entry.peer_id.to_string(),
                    infrastructure_data: InfrastructureData {
                        listening_endpoint: entry
                            .listening_endpoint
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                    },
                    version: peer.version().to_string(),
                    connection_state: peer.state().as_str().to_string(),
                    direction: peer.direction().as_str().to_string(),
                    supported_services: peer
                        .supported_services()
                        .iter()
                        .map(|s| s.as_str().to_string())
                        .collect(),
                })
            })
            .collect()
    }
}

/// Build a socket address from raw IP bytes and a port.
pub fn endpoint_from_parts(ip: &[u8], port: u32) -> Option<SocketAddr> {
    let port = u16::try_from(port).ok().filter(|p| *p != 0)?;
    let ip = match ip.len() {
        4 => IpAddr::V4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(ip);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

/// Raw IP bytes for [`AdminRequest::ConnectTo`].
pub fn ip_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Serves [`AdminService`] on a TCP listener.
pub struct AdminServer {
    service: Arc<AdminService>,
}

impl AdminServer {
    pub fn new(service: Arc<AdminService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> NetworkResult<()> {
        info!(addr = %listener.local_addr()?, "Admin listener started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Admin listener shutting down");
                    break;
                }
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let service = Arc::clone(&self.service);
                        tokio::spawn(serve_connection(service, stream, addr));
                    }
                    Err(e) => error!("Admin accept error: {}", e),
                }
            }
        }
        Ok(())
    }
}

async fn serve_connection(service: Arc<AdminService>, stream: TcpStream, addr: SocketAddr) {
    let mut framed = Framed::new(stream, FrameCodec::<AdminRequest>::with_magic(ADMIN_MAGIC));
    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(request) => {
                debug!(addr = %addr, request = ?request, "Admin request");
                service.handle(request).await
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "Bad admin request");
                let _ = framed.send(AdminResponse::Error(e.to_string())).await;
                break;
            }
        };
        if let Err(e) = framed.send(response).await {
            warn!(addr = %addr, error = %e, "Failed to answer admin request");
            break;
        }
    }
}

/// Client for the node's admin RPC.
#[derive(Debug, Clone)]
pub struct AdminClient {
    addr: SocketAddr,
    deadline: Duration,
}

impl AdminClient {
    pub fn new(addr: SocketAddr, deadline: Duration) -> Self {
        Self { addr, deadline }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// One request, one reply, bounded by the client deadline.
    pub async fn call(&self, request: AdminRequest) -> NetworkResult<AdminResponse> {
        tokio::time::timeout(self.deadline, self.exchange(request))
            .await
            .map_err(|_| NetworkError::Timeout(format!("admin call to {}", self.addr)))?
    }

    async fn exchange(&self, request: AdminRequest) -> NetworkResult<AdminResponse> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", self.addr, e)))?;
        let mut framed = Framed::new(stream, FrameCodec::<AdminResponse>::with_magic(ADMIN_MAGIC));
        framed.send(request).await?;
        match framed.next().await {
            Some(Ok(AdminResponse::Error(message))) => Err(NetworkError::ConnectionFailed(message)),
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(e),
            None => Err(NetworkError::ConnectionClosed),
        }
    }

    pub async fn connect_to(&self, addr: SocketAddr) -> NetworkResult<ConnectToResponse> {
        let request = AdminRequest::ConnectTo {
            ip: ip_bytes(addr.ip()),
            port: u32::from(addr.port()),
        };
        match self.call(request).await? {
            AdminResponse::ConnectTo(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn internal_peer_info(&self) -> NetworkResult<Vec<InternalPeerInfo>> {
        match self.call(AdminRequest::GetInternalPeerInfo).await? {
            AdminResponse::PeerInfo(peers) => Ok(peers),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &AdminResponse) -> NetworkError {
    NetworkError::Serialization(format!("unexpected admin response: {:?}", response))
}
