//! Thin façade over intra-process (threaded) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: scatter execution calls
//! `.wait()` before it trusts that a buffer is ready. Delivery between one
//! `(source, destination, tag)` triple is FIFO on every backend.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

/// Typed message tag. Plans derive per-invocation tags with [`CommTag::offset`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` slots after this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Non-blocking point-to-point communication.
///
/// A receive is matched against the messages of its `(peer, tag)` stream in
/// the order receives are *posted*, as in MPI.
pub trait Communicator: 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process in the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive; `buf.len()` is the number of bytes expected.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Next communication context of this rank: 0, 1, 2, ...
    ///
    /// Every object that needs a private tag space takes one at creation.
    /// Ranks create such objects in the same order, so contexts agree across
    /// the group. Clones of a communicator share the counter.
    fn next_context(&self) -> u16;

    /// True for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs: one rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Self::SendHandle {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {}
    fn next_context(&self) -> u16 {
        // no peers, so no tags to keep apart
        0
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Shared in-process post office.
///
/// Messages of one `(src, dst, tag)` stream are numbered as they are posted;
/// receives take a ticket from the same stream when they are posted and wait
/// for exactly that message.
#[derive(Default)]
struct Mailbox {
    slots: DashMap<(Key, u64), Bytes>,
    sent: DashMap<Key, u64>,
    claimed: DashMap<Key, u64>,
    lock: Mutex<()>,
    arrived: Condvar,
}

fn next_seq(counters: &DashMap<Key, u64>, key: Key) -> u64 {
    let mut next = counters.entry(key).or_insert(0);
    let seq = *next;
    *next += 1;
    seq
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        let seq = next_seq(&self.sent, key);
        self.slots.insert((key, seq), data);
        let _guard = self.lock.lock();
        self.arrived.notify_all();
    }

    fn claim(&self, key: Key) -> u64 {
        next_seq(&self.claimed, key)
    }

    fn take(&self, key: Key, ticket: u64) -> Bytes {
        loop {
            if let Some((_, data)) = self.slots.remove(&(key, ticket)) {
                return data;
            }
            let mut guard = self.lock.lock();
            // re-check under the lock so a post between the two checks is not lost
            if let Some((_, data)) = self.slots.remove(&(key, ticket)) {
                return data;
            }
            self.arrived.wait(&mut guard);
        }
    }
}

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Receive handle for [`RayonComm`]; blocks in `wait` until its message arrives.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    ticket: u64,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        Some(self.mailbox.take(self.key, self.ticket).to_vec())
    }
}

/// Threaded backend: each rank is a thread of the current process.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    contexts: Arc<AtomicU16>,
}

impl std::fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl RayonComm {
    /// Rank `rank` of `size`, sharing the process-wide mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: MAILBOX.clone(),
            contexts: Arc::new(AtomicU16::new(0)),
        }
    }

    /// A fresh group of `size` ranks with a private mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
                contexts: Arc::new(AtomicU16::new(0)),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        LocalHandle {
            mailbox: self.mailbox.clone(),
            key,
            ticket: self.mailbox.claim(key),
        }
    }

    fn next_context(&self) -> u16 {
        self.contexts.fetch_add(1, Ordering::Relaxed)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::{Communicator as _, SimpleCommunicator};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU16, Ordering};

    /// MPI backend over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        contexts: AtomicU16,
        // finalizes MPI on drop; must stay after `world`
        _universe: Arc<Universe>,
    }

    impl MpiComm {
        /// Initialize MPI. Returns `None` if MPI was already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                world,
                rank,
                size,
                contexts: AtomicU16::new(0),
                _universe: Arc::new(universe),
            })
        }

        pub fn world(&self) -> &SimpleCommunicator {
            &self.world
        }
    }

    /// In-flight send; owns its payload until the request completes.
    pub struct MpiSendHandle {
        request: Request<'static, [u8], StaticScope>,
        _payload: Box<[u8]>,
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let MpiSendHandle { request, _payload } = self;
            request.wait();
            None
        }
    }

    /// In-flight receive into a heap buffer sized by the caller.
    pub struct MpiRecvHandle {
        request: Request<'static, [u8], StaticScope>,
        buf: Box<[u8]>,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let MpiRecvHandle { request, buf } = self;
            request.wait();
            Some(buf.into_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let payload: Box<[u8]> = buf.into();
            // SAFETY: the boxed allocation never moves and is dropped only after
            // `request.wait()` returns in `MpiSendHandle::wait`.
            let data: &'static [u8] = unsafe { &*(payload.as_ref() as *const [u8]) };
            let request = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                i32::from(tag),
            );
            MpiSendHandle {
                request,
                _payload: payload,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let mut owned: Box<[u8]> = vec![0u8; buf.len()].into_boxed_slice();
            // SAFETY: as above; the buffer outlives the request and is only read
            // after completion.
            let data: &'static mut [u8] = unsafe { &mut *(owned.as_mut() as *mut [u8]) };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, i32::from(tag));
            MpiRecvHandle {
                request,
                buf: owned,
            }
        }

        fn next_context(&self) -> u16 {
            self.contexts.fetch_add(1, Ordering::Relaxed)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
