//! # Client Bridge
//!
//! Fans kernel output out to external clients (browser sessions behind a
//! gateway, for example). The gateway owns the client connections; this
//! module only tracks one outbound queue per client.
//!
//! ```text
//! kernel PUB ──▶ IopubBridge (SUB "") ──▶ ClientRegistry ──▶ client queues
//! ```
//!
//! A client whose queue is full or closed is dropped on the next broadcast.

use bytes::Bytes;
use mj_patterns::{PatternError, SubscriberNode};
use mj_telemetry::CLIENTS_CONNECTED;
use mj_transport::Transport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queue depth per client.
pub const DEFAULT_CLIENT_QUEUE: usize = 256;

pub type ClientId = u64;

pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_CLIENT_QUEUE)
    }

    #[must_use]
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a client; messages for it arrive on the returned receiver.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut clients = self.clients.write();
        clients.insert(id, tx);
        CLIENTS_CONNECTED.set(clients.len() as f64);
        debug!(client_id = id, "Client registered");
        (id, rx)
    }

    /// Returns false when the client was not registered.
    pub fn unregister(&self, id: ClientId) -> bool {
        let mut clients = self.clients.write();
        let removed = clients.remove(&id).is_some();
        CLIENTS_CONNECTED.set(clients.len() as f64);
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Queue `payload` for every client. Returns how many accepted it.
    pub fn broadcast(&self, payload: Bytes) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let clients = self.clients.read();
            for (id, tx) in clients.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(client_id = id, "Client queue full, disconnecting");
                        dropped.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }
        if !dropped.is_empty() {
            let mut clients = self.clients.write();
            for id in dropped {
                clients.remove(&id);
            }
            CLIENTS_CONNECTED.set(clients.len() as f64);
        }
        delivered
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribes to everything on the kernel's IOPub socket and broadcasts it
/// to the registry.
pub struct IopubBridge {
    subscriber: SubscriberNode,
    clients: Arc<ClientRegistry>,
}

impl IopubBridge {
    pub async fn connect(
        transport: &dyn Transport,
        address: &str,
        clients: Arc<ClientRegistry>,
    ) -> Result<Self, PatternError> {
        let subscriber = SubscriberNode::connect(transport, address).await?;
        subscriber.subscribe("")?;
        Ok(Self {
            subscriber,
            clients,
        })
    }

    /// Forward until the socket closes.
    pub async fn run(&self) -> Result<(), PatternError> {
        info!("IOPub bridge running");
        loop {
            match self.subscriber.receive().await {
                Ok((topic, payload)) => {
                    let delivered = self.clients.broadcast(payload);
                    debug!(%topic, delivered, "Forwarded to clients");
                }
                Err(e) if e.is_closed() => return Ok(()),
                Err(e) => warn!(error = %e, "Dropping IOPub message"),
            }
        }
    }
}
