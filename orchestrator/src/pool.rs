use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use comms::{
    UnitRegistry,
    msg::SessionTag,
    packet::PacketError,
    unit::{AnyUnit, encode_unit},
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io,
    net::TcpStream,
    sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch},
    task::JoinHandle,
    time,
};
use worker::Worker;

use crate::{
    PoolError, Promise,
    dispatch,
    link::Link,
    promise::Snapshot,
};

/// Buffer size of the in-process links.
const LOCAL_LINK_CAPACITY: usize = 64 * 1024;

/// Unique identity of a node: the communicator of its pool and its rank in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub comm: u64,
    pub rank: usize,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{}", self.comm, self.rank)
    }
}

/// Static description of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub rank: usize,
    /// Whether the node runs inside the dispatching process.
    pub master: bool,
}

/// A snapshot of the pool occupancy, always with `free + busy == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub free: usize,
    pub busy: usize,
}

struct Slot {
    info: NodeInfo,
    link: Arc<AsyncMutex<Link>>,
}

struct PoolInner {
    comm: u64,
    slots: Vec<Slot>,
    free: Mutex<VecDeque<usize>>,
    /// One permit per node in `free`. Waiting for availability happens here, outside
    /// the list lock; picking the node happens under it.
    available: Semaphore,
    next_job: AtomicU32,
    dispatched: AtomicU64,
    workers: Mutex<Vec<JoinHandle<worker::Result<()>>>>,
}

impl PoolInner {
    /// Hands out `count` nodes whose permits were already taken.
    fn take(self: &Arc<Self>, count: usize) -> Vec<Node> {
        let mut free = self.free.lock();

        // SAFETY: every permit taken matches a node in the free list.
        let ranks: Vec<_> = free.drain(..count).collect();
        drop(free);

        ranks
            .into_iter()
            .map(|rank| {
                debug!(comm = self.comm, rank = rank; "node acquired");
                Node {
                    lease: Arc::new(Lease {
                        pool: Arc::clone(self),
                        rank,
                    }),
                }
            })
            .collect()
    }

    fn give_back(&self, rank: usize) {
        self.free.lock().push_back(rank);
        self.available.add_permits(1);
        debug!(comm = self.comm, rank = rank; "node released");
    }
}

/// A fixed collection of compute nodes handed out one job at a time.
///
/// Nodes are leased through `acquire` and its variants, and rejoin the free list
/// when the last handle of their lease is dropped. A node that is running a job
/// stays busy until that job is over.
#[derive(Clone)]
pub struct NodePool {
    inner: Arc<PoolInner>,
}

impl NodePool {
    /// Creates a pool of `size` nodes running inside this process.
    ///
    /// Must be called from within a tokio runtime, each node is a spawned worker
    /// task connected through an in-memory pipe.
    ///
    /// # Arguments
    /// * `size` - The amount of nodes.
    /// * `registry` - The unit types the nodes are able to run.
    ///
    /// # Returns
    /// A new `NodePool` instance.
    pub fn local(size: usize, registry: Arc<UnitRegistry>) -> Self {
        let comm = rand::random();
        let mut slots = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);

        for rank in 0..size {
            let (ours, theirs) = io::duplex(LOCAL_LINK_CAPACITY);
            let (rx, tx) = io::split(theirs);
            let (wk_rx, wk_tx) = comms::channel(rx, tx);

            let worker = Worker::new(rank, Arc::clone(&registry));
            workers.push(tokio::spawn(worker.serve(wk_rx, wk_tx)));

            let (rx, tx) = io::split(ours);
            slots.push(Slot {
                info: NodeInfo {
                    id: NodeId { comm, rank },
                    rank,
                    master: true,
                },
                link: Arc::new(AsyncMutex::new(Link::open(rank, rx, tx))),
            });
        }

        info!(comm = comm, size = size; "local node pool ready");
        Self::from_slots(comm, slots, workers)
    }

    /// Creates a pool out of remote nodes, one per address.
    ///
    /// # Arguments
    /// * `addrs` - The network addresses of the nodes.
    ///
    /// # Returns
    /// A new `NodePool` instance.
    ///
    /// # Errors
    /// `PoolError::ConnectionFailed` if any node can't be reached.
    pub async fn connect<A: AsRef<str>>(addrs: &[A]) -> Result<Self, PoolError> {
        let comm = rand::random();
        let mut slots = Vec::with_capacity(addrs.len());

        for (rank, addr) in addrs.iter().enumerate() {
            let addr = addr.as_ref();
            let connection_failed = |source: io::Error| PoolError::ConnectionFailed {
                addr: addr.to_owned(),
                source,
            };

            let stream = TcpStream::connect(addr).await.map_err(connection_failed)?;
            stream.set_nodelay(true).map_err(connection_failed)?;
            debug!(comm = comm, rank = rank, addr = addr; "connected to node");

            let (rx, tx) = stream.into_split();
            slots.push(Slot {
                info: NodeInfo {
                    id: NodeId { comm, rank },
                    rank,
                    master: false,
                },
                link: Arc::new(AsyncMutex::new(Link::open(rank, rx, tx))),
            });
        }

        info!(comm = comm, size = slots.len(); "remote node pool ready");
        Ok(Self::from_slots(comm, slots, Vec::new()))
    }

    fn from_slots(
        comm: u64,
        slots: Vec<Slot>,
        workers: Vec<JoinHandle<worker::Result<()>>>,
    ) -> Self {
        let size = slots.len();

        Self {
            inner: Arc::new(PoolInner {
                comm,
                free: Mutex::new((0..size).collect()),
                available: Semaphore::new(size),
                slots,
                next_job: AtomicU32::new(1),
                dispatched: AtomicU64::new(0),
                workers: Mutex::new(workers),
            }),
        }
    }

    /// The communicator id shared by every node of this pool.
    pub fn comm(&self) -> u64 {
        self.inner.comm
    }

    pub fn total(&self) -> usize {
        self.inner.slots.len()
    }

    /// Consistent occupancy counts.
    pub fn counts(&self) -> PoolCounts {
        let total = self.total();
        let free = self.inner.free.lock().len();

        PoolCounts {
            total,
            free,
            busy: total - free,
        }
    }

    /// The amount of jobs dispatched on this pool's nodes so far.
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Waits until a node is free and leases it.
    ///
    /// # Errors
    /// `PoolError::Empty` if the pool has no nodes, or `PoolError::Closed` if it
    /// was shut down.
    pub async fn acquire(&self) -> Result<Node, PoolError> {
        let mut nodes = self.acquire_n(1).await?;

        // SAFETY: exactly one node was reserved.
        Ok(nodes.pop().unwrap())
    }

    /// Like `acquire`, giving up after `timeout`.
    ///
    /// # Returns
    /// The node, or `None` if none became free in time.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Option<Node>, PoolError> {
        let nodes = self.acquire_n_timeout(1, timeout).await?;
        Ok(nodes.into_iter().next())
    }

    /// Waits until `count` nodes are free at the same time and leases all of them.
    ///
    /// No node is handed out before all of them are reserved, so concurrent callers
    /// can't starve each other with partial reservations.
    ///
    /// # Errors
    /// `PoolError::TooManyRequested` if `count` exceeds the pool size, `PoolError::Empty`
    /// if the pool has no nodes, or `PoolError::Closed` if it was shut down.
    pub async fn acquire_n(&self, count: usize) -> Result<Vec<Node>, PoolError> {
        let permits = self.check_request(count)?;
        if permits == 0 {
            return Ok(Vec::new());
        }

        self.inner
            .available
            .acquire_many(permits)
            .await
            .map_err(|_| PoolError::Closed)?
            .forget();

        Ok(self.inner.take(count))
    }

    /// Like `acquire_n`, giving up after `timeout`.
    ///
    /// # Returns
    /// All `count` nodes, or the ones that happen to be free when the time is up,
    /// which may be fewer.
    pub async fn acquire_n_timeout(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Node>, PoolError> {
        let permits = self.check_request(count)?;
        if permits == 0 {
            return Ok(Vec::new());
        }

        let available = &self.inner.available;
        match time::timeout(timeout, available.acquire_many(permits)).await {
            Ok(Ok(permit)) => {
                permit.forget();
                return Ok(self.inner.take(count));
            }
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => debug!(comm = self.comm(), count = count; "timed out waiting for nodes"),
        }

        let mut granted = 0;
        while granted < count {
            match available.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    granted += 1;
                }
                Err(_) => break,
            }
        }

        Ok(self.inner.take(granted))
    }

    /// Waits for every node to be free, then tells the workers to leave and joins
    /// the ones running in this process. Later acquisitions fail with
    /// `PoolError::Closed`.
    ///
    /// Leases that are never dropped make this wait forever.
    pub async fn shutdown(&self) {
        let total = u32::try_from(self.total()).unwrap_or(u32::MAX);

        match self.inner.available.acquire_many(total).await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }
        self.inner.available.close();

        for slot in &self.inner.slots {
            let mut link = slot.link.lock().await;
            if let Err(e) = link.shutdown(self.comm()).await {
                warn!(rank = slot.info.rank; "failed to shut node down: {e}");
            }
        }

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for handle in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(comm = self.comm(); "worker exited with error: {e}"),
                Err(e) => warn!(comm = self.comm(); "worker task failed: {e}"),
            }
        }

        info!(comm = self.comm(); "node pool shut down");
    }

    /// Validates a request for `count` nodes and turns it into semaphore permits.
    fn check_request(&self, count: usize) -> Result<u32, PoolError> {
        let total = self.total();

        if total == 0 {
            return Err(PoolError::Empty);
        }

        if count > total {
            return Err(PoolError::TooManyRequested {
                requested: count,
                total,
            });
        }

        u32::try_from(count).map_err(|_| PoolError::TooManyRequested {
            requested: count,
            total,
        })
    }
}

/// The claim on a node, returning it to its pool when dropped.
struct Lease {
    pool: Arc<PoolInner>,
    rank: usize,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.give_back(self.rank);
    }
}

/// A leased node of a `NodePool`.
///
/// Cloning shares the lease; the node rejoins the free list once every clone is
/// gone, including the one held by a job still running on it.
#[derive(Clone)]
pub struct Node {
    lease: Arc<Lease>,
}

impl Node {
    fn slot(&self) -> &Slot {
        &self.lease.pool.slots[self.lease.rank]
    }

    pub fn info(&self) -> NodeInfo {
        self.slot().info
    }

    /// Starts running the packed unit `work` on this node.
    ///
    /// If another job is still running on the node, this waits for it to be over.
    ///
    /// # Arguments
    /// * `work` - A unit packet, as produced by `encode_unit`.
    ///
    /// # Returns
    /// A promise of the job's result.
    pub async fn dispatch(&self, work: Vec<u8>) -> Promise {
        let pool = &self.lease.pool;
        let link = Arc::clone(&self.slot().link).lock_owned().await;

        let tag = SessionTag::new(pool.comm, pool.next_job.fetch_add(1, Ordering::Relaxed));
        pool.dispatched.fetch_add(1, Ordering::Relaxed);

        let work: Arc<[u8]> = Arc::from(work);
        let (state_tx, state_rx) = watch::channel(Snapshot::running());
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch::drive(
            self.clone(),
            link,
            tag,
            Arc::clone(&work),
            state_tx,
            control_rx,
        ));

        Promise::new(self.info(), tag, work, state_rx, control_tx)
    }

    /// Encodes `unit` and starts running it on this node.
    ///
    /// The unit is encoded right away, the returned future doesn't hold on to it.
    ///
    /// # Errors
    /// The codec error if the unit can't be encoded.
    pub fn dispatch_unit(
        &self,
        unit: &dyn AnyUnit,
    ) -> impl Future<Output = Result<Promise, PacketError>> + Send + '_ {
        let work = encode_unit(unit);
        async move { Ok(self.dispatch(work?).await) }
    }

    /// Drops this handle and waits for the job running on the node, if any, to be
    /// over. Other clones of the lease keep the node busy.
    pub async fn release(self) {
        let link = Arc::clone(&self.slot().link);
        drop(self);
        drop(link.lock().await);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").field("info", &self.info()).finish()
    }
}
