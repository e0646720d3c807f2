//! The message-passing contract the compositing engine is written against.
//!
//! The engine only needs ordered point-to-point delivery: within a single
//! `(source, tag)` pair messages arrive in the order they were sent, and no
//! ordering is assumed across pairs. Any transport with those guarantees
//! (MPI being the canonical one) can implement [`Communicator`];
//! [`local::LocalCommunicator`] provides an in-process reference transport.
//!
//! Transport errors are fatal for a reduction: they propagate out of the
//! engine and the whole communicator must be torn down, since a partial
//! reduction leaves peers blocked.

pub mod local;

use crate::foundation::error::FloeResult;

/// Message tags used by the binary-swap engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageTag {
    /// Image halves exchanged between partners during a swap round.
    SwapImages = 21,
    /// Partitions forwarded from the upper group into the lower group.
    Telescope = 22,
    /// Whole images folded into even ranks before a swap.
    Fold = 23,
}

/// Handle for a receive posted with [`Communicator::irecv`] and completed by
/// [`Communicator::waitall`].
#[derive(Debug)]
pub struct RecvRequest {
    pub(crate) src: usize,
    pub(crate) tag: MessageTag,
}

/// Ordered point-to-point transport over a fixed set of ranks.
///
/// All calls block the calling thread; these are the engine's only
/// suspension points. No cancellation or timeout is offered.
pub trait Communicator {
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Send `buf` to `dest`, blocking until the transport has taken it.
    fn send(&self, buf: &[u8], tag: MessageTag, dest: usize) -> FloeResult<()>;

    /// Receive the next message from `(src, tag)` into `buf`, growing it as
    /// needed; returns the received byte count. The buffer's capacity is
    /// retained across calls so callers can nominate a pooled scratch
    /// buffer.
    fn recv(&self, buf: &mut Vec<u8>, tag: MessageTag, src: usize) -> FloeResult<usize>;

    /// Combined send and receive, safe against the pairwise exchange
    /// deadlock of a naive send-then-receive on both sides.
    fn sendrecv(
        &self,
        send_buf: &[u8],
        send_tag: MessageTag,
        dest: usize,
        recv_buf: &mut Vec<u8>,
        recv_tag: MessageTag,
        src: usize,
    ) -> FloeResult<usize>;

    /// Post a receive for `(src, tag)` without waiting for it.
    fn irecv(&self, tag: MessageTag, src: usize) -> FloeResult<RecvRequest>;

    /// Complete a set of posted receives, returning their payloads in
    /// request order.
    fn waitall(&self, requests: Vec<RecvRequest>) -> FloeResult<Vec<Vec<u8>>>;
}
