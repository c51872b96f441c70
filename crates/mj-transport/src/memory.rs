//! # In-Memory Transport
//!
//! Named in-process endpoints backed by `tokio::sync::mpsc` pipes.
//!
//! - ROUTER prefixes every inbound message with the sending DEALER's
//!   identity (a uuid assigned on connect) and routes outbound messages by
//!   that identity.
//! - PUB/XPUB fan out to each subscriber pipe whose prefixes match the
//!   first frame. A full pipe drops the message, like a PUB at its high
//!   water mark.
//! - ROUTER never blocks on a slow DEALER: a reply to a full pipe is
//!   dropped.
//! - XSUB control frames reach the XPUB tagged with the sending pipe; the
//!   XPUB owner decides whether to apply them via `apply_subscription`.
//!
//! Dropping a bound socket releases its address.

use crate::error::TransportError;
use crate::socket::{Multipart, PeerId, Socket, SocketType, Transport};
use crate::DEFAULT_HIGH_WATER_MARK;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

type Registry = Mutex<HashMap<String, Endpoint>>;

#[derive(Clone)]
enum Endpoint {
    Router(Arc<RouterHub>),
    Publisher(Arc<PubHub>),
}

impl Endpoint {
    fn socket_type(&self) -> SocketType {
        match self {
            Endpoint::Router(_) => SocketType::Router,
            Endpoint::Publisher(hub) => hub.kind,
        }
    }
}

/// In-process transport. Clones share the same endpoint namespace.
#[derive(Clone)]
pub struct InMemoryTransport {
    endpoints: Arc<Registry>,
    high_water_mark: usize,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_high_water_mark(DEFAULT_HIGH_WATER_MARK)
    }

    #[must_use]
    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            high_water_mark: high_water_mark.max(1),
        }
    }

    /// Addresses that currently have a bound socket.
    #[must_use]
    pub fn bound_addresses(&self) -> Vec<String> {
        let mut addrs: Vec<_> = self.endpoints.lock().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    fn lookup(&self, address: &str) -> Result<Endpoint, TransportError> {
        self.endpoints
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionRefused(address.to_string()))
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn bind(
        &self,
        socket_type: SocketType,
        address: &str,
    ) -> Result<Box<dyn Socket>, TransportError> {
        if !socket_type.is_server() {
            return Err(TransportError::Unsupported(socket_type));
        }

        let mut endpoints = self.endpoints.lock();
        if endpoints.contains_key(address) {
            return Err(TransportError::AddressInUse(address.to_string()));
        }

        let guard = || BindGuard {
            registry: Arc::downgrade(&self.endpoints),
            address: address.to_string(),
        };

        let socket: Box<dyn Socket> = match socket_type {
            SocketType::Router => {
                let (tx, rx) = mpsc::channel(self.high_water_mark);
                let hub = Arc::new(RouterHub {
                    inbound: tx,
                    peers: RwLock::new(HashMap::new()),
                });
                endpoints.insert(address.to_string(), Endpoint::Router(hub.clone()));
                Box::new(RouterSocket {
                    hub,
                    inbound: AsyncMutex::new(rx),
                    _guard: guard(),
                })
            }
            SocketType::Pub | SocketType::XPub => {
                let (upstream, upstream_rx) = if socket_type == SocketType::XPub {
                    let (tx, rx) = mpsc::channel(self.high_water_mark);
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };
                let hub = Arc::new(PubHub {
                    kind: socket_type,
                    pipes: RwLock::new(Vec::new()),
                    upstream,
                    next_pipe: AtomicU64::new(1),
                    high_water_mark: self.high_water_mark,
                });
                endpoints.insert(address.to_string(), Endpoint::Publisher(hub.clone()));
                Box::new(PubSocket {
                    hub,
                    upstream: upstream_rx.map(AsyncMutex::new),
                    _guard: guard(),
                })
            }
            _ => return Err(TransportError::Unsupported(socket_type)),
        };
        drop(endpoints);

        debug!(address, socket_type = ?socket_type, "Socket bound");
        Ok(socket)
    }

    async fn connect(
        &self,
        socket_type: SocketType,
        address: &str,
    ) -> Result<Box<dyn Socket>, TransportError> {
        if socket_type.is_server() {
            return Err(TransportError::Unsupported(socket_type));
        }

        let endpoint = self.lookup(address)?;
        let bound = endpoint.socket_type();
        if !bound.accepts(socket_type) {
            return Err(TransportError::Incompatible {
                bound,
                peer: socket_type,
            });
        }

        let socket: Box<dyn Socket> = match endpoint {
            Endpoint::Router(hub) => {
                let identity = Bytes::copy_from_slice(Uuid::new_v4().as_bytes());
                let (tx, rx) = mpsc::channel(self.high_water_mark);
                hub.peers.write().insert(identity.clone(), tx);
                Box::new(DealerSocket {
                    identity,
                    hub,
                    inbound: AsyncMutex::new(rx),
                })
            }
            Endpoint::Publisher(hub) => {
                let (tx, rx) = mpsc::channel(hub.high_water_mark);
                let pipe = Arc::new(SubscriberPipe {
                    id: hub.next_pipe.fetch_add(1, Ordering::Relaxed),
                    sender: tx,
                    prefixes: Mutex::new(Vec::new()),
                });
                hub.pipes.write().push(pipe.clone());
                Box::new(SubSocket {
                    kind: socket_type,
                    pipe,
                    hub,
                    inbound: AsyncMutex::new(rx),
                })
            }
        };

        debug!(address, socket_type = ?socket_type, "Socket connected");
        Ok(socket)
    }
}

/// Releases the bound address when the owning socket is dropped.
struct BindGuard {
    registry: Weak<Registry>,
    address: String,
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.address);
            debug!(address = %self.address, "Socket unbound");
        }
    }
}

// =============================================================================
// ROUTER / DEALER
// =============================================================================

struct RouterHub {
    inbound: mpsc::Sender<Multipart>,
    peers: RwLock<HashMap<Bytes, mpsc::Sender<Multipart>>>,
}

struct RouterSocket {
    hub: Arc<RouterHub>,
    inbound: AsyncMutex<mpsc::Receiver<Multipart>>,
    _guard: BindGuard,
}

#[async_trait]
impl Socket for RouterSocket {
    fn socket_type(&self) -> SocketType {
        SocketType::Router
    }

    async fn send(&self, mut msg: Multipart) -> Result<(), TransportError> {
        if msg.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        let identity = msg.remove(0);
        let peer = self.hub.peers.read().get(&identity).cloned();
        let Some(peer) = peer else {
            return Err(TransportError::UnknownPeer(identity.len()));
        };
        match peer.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(identity_len = identity.len(), "Dealer pipe full, reply dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.hub.peers.write().remove(&identity);
                Err(TransportError::UnknownPeer(identity.len()))
            }
        }
    }

    async fn recv(&self) -> Result<Multipart, TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

struct DealerSocket {
    identity: Bytes,
    hub: Arc<RouterHub>,
    inbound: AsyncMutex<mpsc::Receiver<Multipart>>,
}

#[async_trait]
impl Socket for DealerSocket {
    fn socket_type(&self) -> SocketType {
        SocketType::Dealer
    }

    async fn send(&self, msg: Multipart) -> Result<(), TransportError> {
        if msg.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        let mut routed = Vec::with_capacity(msg.len() + 1);
        routed.push(self.identity.clone());
        routed.extend(msg);
        self.hub
            .inbound
            .send(routed)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Multipart, TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        self.hub.peers.write().remove(&self.identity);
    }
}

// =============================================================================
// PUB / SUB / XPUB / XSUB
// =============================================================================

struct SubscriberPipe {
    id: PeerId,
    sender: mpsc::Sender<Multipart>,
    prefixes: Mutex<Vec<Bytes>>,
}

impl SubscriberPipe {
    fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes
            .lock()
            .iter()
            .any(|p| topic.starts_with(p))
    }

    fn add(&self, prefix: &[u8]) {
        self.prefixes.lock().push(Bytes::copy_from_slice(prefix));
    }

    // Subscriptions are counted: remove a single occurrence.
    fn remove(&self, prefix: &[u8]) {
        let mut prefixes = self.prefixes.lock();
        if let Some(pos) = prefixes.iter().position(|p| p.as_ref() == prefix) {
            prefixes.remove(pos);
        }
    }
}

struct PubHub {
    kind: SocketType,
    pipes: RwLock<Vec<Arc<SubscriberPipe>>>,
    upstream: Option<mpsc::Sender<(PeerId, Multipart)>>,
    next_pipe: AtomicU64,
    high_water_mark: usize,
}

impl PubHub {
    fn pipe(&self, id: PeerId) -> Option<Arc<SubscriberPipe>> {
        self.pipes.read().iter().find(|p| p.id == id).cloned()
    }

    fn detach(&self, id: PeerId) {
        self.pipes.write().retain(|p| p.id != id);
    }
}

struct PubSocket {
    hub: Arc<PubHub>,
    upstream: Option<AsyncMutex<mpsc::Receiver<(PeerId, Multipart)>>>,
    _guard: BindGuard,
}

#[async_trait]
impl Socket for PubSocket {
    fn socket_type(&self) -> SocketType {
        self.hub.kind
    }

    async fn send(&self, msg: Multipart) -> Result<(), TransportError> {
        let Some(topic) = msg.first() else {
            return Err(TransportError::EmptyMessage);
        };

        let pipes: Vec<_> = self.hub.pipes.read().clone();
        let mut closed = Vec::new();
        for pipe in pipes.iter().filter(|p| p.matches(topic)) {
            match pipe.sender.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(pipe = pipe.id, "Subscriber pipe full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(pipe.id),
            }
        }
        for id in closed {
            self.hub.detach(id);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Multipart, TransportError> {
        self.recv_control().await.map(|(_, msg)| msg)
    }

    async fn recv_control(&self) -> Result<(PeerId, Multipart), TransportError> {
        let Some(upstream) = &self.upstream else {
            return Err(TransportError::Unsupported(self.hub.kind));
        };
        upstream
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    fn apply_subscription(
        &self,
        peer: PeerId,
        subscribe: bool,
        prefix: &[u8],
    ) -> Result<(), TransportError> {
        if self.hub.kind != SocketType::XPub {
            return Err(TransportError::Unsupported(self.hub.kind));
        }
        let pipe = self
            .hub
            .pipe(peer)
            .ok_or(TransportError::UnknownPeer(0))?;
        if subscribe {
            pipe.add(prefix);
        } else {
            pipe.remove(prefix);
        }
        trace!(peer, subscribe, "Subscription applied");
        Ok(())
    }
}

struct SubSocket {
    kind: SocketType,
    pipe: Arc<SubscriberPipe>,
    hub: Arc<PubHub>,
    inbound: AsyncMutex<mpsc::Receiver<Multipart>>,
}

#[async_trait]
impl Socket for SubSocket {
    fn socket_type(&self) -> SocketType {
        self.kind
    }

    async fn send(&self, msg: Multipart) -> Result<(), TransportError> {
        if self.kind == SocketType::Sub {
            return Err(TransportError::Unsupported(SocketType::Sub));
        }
        if msg.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        match &self.hub.upstream {
            Some(upstream) => upstream
                .send((self.pipe.id, msg))
                .await
                .map_err(|_| TransportError::Closed),
            // A plain PUB applies control frames itself.
            None => {
                if let [frame] = msg.as_slice() {
                    match frame.first() {
                        Some(1) => self.pipe.add(&frame[1..]),
                        Some(0) => self.pipe.remove(&frame[1..]),
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }

    async fn recv(&self) -> Result<Multipart, TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    fn subscribe(&self, prefix: &[u8]) -> Result<(), TransportError> {
        if self.kind != SocketType::Sub {
            return Err(TransportError::Unsupported(self.kind));
        }
        self.pipe.add(prefix);
        Ok(())
    }

    fn unsubscribe(&self, prefix: &[u8]) -> Result<(), TransportError> {
        if self.kind != SocketType::Sub {
            return Err(TransportError::Unsupported(self.kind));
        }
        self.pipe.remove(prefix);
        Ok(())
    }
}

impl Drop for SubSocket {
    fn drop(&mut self) {
        self.hub.detach(self.pipe.id);
    }
}
