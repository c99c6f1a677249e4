//! Observer hub: fan-out of inbound blockchain events and connection
//! notifications to in-process subscribers.
//!
//! Every attached observer gets its own worker task draining a bounded
//! queue, so a slow observer never blocks the transport or its siblings.
//! When an observer's queue is full the event is dropped for that observer
//! and a warning is logged. A panicking callback is logged and the worker
//! carries on with the next event.

use crate::types::{
    Block, BlockHeader, BlockLocator, InvVector, MerkleBlock, PeerId, PubKeyHash, Transaction,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

/// Default per-observer queue capacity.
pub const DEFAULT_OBSERVER_QUEUE: usize = 1024;

/// Blockchain-layer event received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainEvent {
    Inv(Vec<InvVector>),
    GetData(Vec<InvVector>),
    Block(Block),
    MerkleBlock(MerkleBlock),
    Tx(Transaction),
    GetHeaders(BlockLocator),
    Headers(Vec<BlockHeader>),
    SetFilter(Vec<PubKeyHash>),
    Mempool,
}

impl BlockchainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BlockchainEvent::Inv(_) => "inv",
            BlockchainEvent::GetData(_) => "getdata",
            BlockchainEvent::Block(_) => "block",
            BlockchainEvent::MerkleBlock(_) => "merkleblock",
            BlockchainEvent::Tx(_) => "tx",
            BlockchainEvent::GetHeaders(_) => "getheaders",
            BlockchainEvent::Headers(_) => "headers",
            BlockchainEvent::SetFilter(_) => "setfilter",
            BlockchainEvent::Mempool => "mempool",
        }
    }
}

/// Subscriber to blockchain events. Every handler defaults to a no-op, so an
/// observer implements only the events it cares about.
///
/// Callbacks may run concurrently with callbacks of other observers and are
/// not guaranteed to preserve per-peer ordering.
#[async_trait]
pub trait BlockchainObserver: Send + Sync {
    async fn on_inv(&self, _peer: &PeerId, _items: &[InvVector]) {}
    async fn on_get_data(&self, _peer: &PeerId, _items: &[InvVector]) {}
    async fn on_block(&self, _peer: &PeerId, _block: &Block) {}
    async fn on_merkle_block(&self, _peer: &PeerId, _block: &MerkleBlock) {}
    async fn on_tx(&self, _peer: &PeerId, _tx: &Transaction) {}
    async fn on_get_headers(&self, _peer: &PeerId, _locator: &BlockLocator) {}
    async fn on_headers(&self, _peer: &PeerId, _headers: &[BlockHeader]) {}
    async fn on_set_filter(&self, _peer: &PeerId, _pub_key_hashes: &[PubKeyHash]) {}
    async fn on_mempool(&self, _peer: &PeerId) {}
}

/// Subscriber to peer lifecycle notifications.
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// Handshake completed.
    async fn on_peer_connected(&self, peer: &PeerId, is_outbound: bool);

    /// Peer closed or timed out.
    async fn on_peer_disconnected(&self, _peer: &PeerId) {}
}

async fn deliver(observer: &dyn BlockchainObserver, peer: &PeerId, event: &BlockchainEvent) {
    match event {
        BlockchainEvent::Inv(items) => observer.on_inv(peer, items).await,
        BlockchainEvent::GetData(items) => observer.on_get_data(peer, items).await,
        BlockchainEvent::Block(block) => observer.on_block(peer, block).await,
        BlockchainEvent::MerkleBlock(block) => observer.on_merkle_block(peer, block).await,
        BlockchainEvent::Tx(tx) => observer.on_tx(peer, tx).await,
        BlockchainEvent::GetHeaders(locator) => observer.on_get_headers(peer, locator).await,
        BlockchainEvent::Headers(headers) => observer.on_headers(peer, headers).await,
        BlockchainEvent::SetFilter(hashes) => observer.on_set_filter(peer, hashes).await,
        BlockchainEvent::Mempool => observer.on_mempool(peer).await,
    }
}

/// Unit of work queued for one observer.
pub type Job<T> = Box<dyn FnOnce(Arc<T>) -> BoxFuture<'static, ()> + Send>;

struct Slot<T: ?Sized> {
    observer: Arc<T>,
    queue: mpsc::Sender<Job<T>>,
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            observer: Arc::clone(&self.observer),
            queue: self.queue.clone(),
        }
    }
}

fn same_observer<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    // Compare data pointers only; vtables of the same type may differ.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Attach-once set of observers with a worker per observer.
///
/// Attaching spawns a tokio task, so it must happen inside a runtime.
pub struct ObserverSet<T: ?Sized + Send + Sync + 'static> {
    name: &'static str,
    capacity: usize,
    slots: RwLock<Vec<Slot<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ObserverSet<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Attach an observer. Returns `false` if it was already attached.
    pub fn attach(&self, observer: Arc<T>) -> bool {
        let mut slots = self.slots.write();
        if slots.iter().any(|s| same_observer(&s.observer, &observer)) {
            return false;
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        tokio::spawn(observer_worker(self.name, Arc::clone(&observer), rx));
        slots.push(Slot {
            observer,
            queue: tx,
        });
        debug!(set = self.name, count = slots.len(), "Observer attached");
        true
    }

    /// Detach an observer. Returns `false` if it was not attached.
    ///
    /// Events already queued for it are still delivered.
    pub fn detach(&self, observer: &Arc<T>) -> bool {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|s| !same_observer(&s.observer, observer));
        before != slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a job for every observer attached right now.
    ///
    /// Returns how many observers accepted the job.
    pub fn dispatch<F>(&self, make_job: F) -> usize
    where
        F: Fn() -> Job<T>,
    {
        // Snapshot, then release the lock before touching any queue.
        let slots: Vec<Slot<T>> = self.slots.read().clone();
        let mut delivered = 0;
        for slot in slots {
            match slot.queue.try_send(make_job()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(set = self.name, "Observer queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(set = self.name, "Observer worker gone, dropping event");
                }
            }
        }
        delivered
    }
}

async fn observer_worker<T: ?Sized + Send + Sync + 'static>(
    set: &'static str,
    observer: Arc<T>,
    mut rx: mpsc::Receiver<Job<T>>,
) {
    while let Some(job) = rx.recv().await {
        let fut = job(Arc::clone(&observer));
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            error!(set = set, "Observer callback panicked");
        }
    }
}

/// Pub/sub hub for blockchain events and connection notifications.
pub struct ObserverHub {
    blockchain: ObserverSet<dyn BlockchainObserver>,
    connections: ObserverSet<dyn ConnectionObserver>,
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_QUEUE)
    }
}

impl ObserverHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            blockchain: ObserverSet::new("blockchain", queue_capacity),
            connections: ObserverSet::new("connection", queue_capacity),
        }
    }

    pub fn attach(&self, observer: Arc<dyn BlockchainObserver>) -> bool {
        self.blockchain.attach(observer)
    }

    pub fn detach(&self, observer: &Arc<dyn BlockchainObserver>) -> bool {
        self.blockchain.detach(observer)
    }

    pub fn attach_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) -> bool {
        self.connections.attach(observer)
    }

    pub fn detach_connection_observer(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        self.connections.detach(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.blockchain.len()
    }

    /// Fan an event out to every attached blockchain observer.
    pub fn dispatch(&self, peer: &PeerId, event: BlockchainEvent) -> usize {
        debug!(peer = %peer, event = event.name(), "Dispatching event");
        let shared = Arc::new((peer.clone(), event));
        self.blockchain.dispatch(|| {
            let shared = Arc::clone(&shared);
            Box::new(move |observer: Arc<dyn BlockchainObserver>| {
                async move {
                    let (peer, event) = &*shared;
                    deliver(observer.as_ref(), peer, event).await;
                }
                .boxed()
            })
        })
    }

    /// Tell connection observers that a handshake completed.
    pub fn notify_connected(&self, peer: &PeerId, is_outbound: bool) -> usize {
        let peer = peer.clone();
        self.connections.dispatch(|| {
            let peer = peer.clone();
            Box::new(move |observer: Arc<dyn ConnectionObserver>| {
                async move { observer.on_peer_connected(&peer, is_outbound).await }.boxed()
            })
        })
    }

    /// Tell connection observers that a peer went away.
    pub fn notify_disconnected(&self, peer: &PeerId) -> usize {
        let peer = peer.clone();
        self.connections.dispatch(|| {
            let peer = peer.clone();
            Box::new(move |observer: Arc<dyn ConnectionObserver>| {
                async move { observer.on_peer_disconnected(&peer).await }.boxed()
            })
        })
    }
}
