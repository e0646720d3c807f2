//! In-process reference transport over standard channels.
//!
//! Each rank owns one endpoint; endpoints are connected pairwise by
//! unbounded channels, one per directed pair, so sends never block and the
//! ordered-within-a-pair contract holds trivially. Messages that arrive
//! with a different tag than the one currently awaited are stashed per
//! `(source, tag)` until asked for, which is exactly the "no cross-pair
//! ordering" allowance of the contract.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, Sender, channel};

use crate::comm::{Communicator, MessageTag, RecvRequest};
use crate::foundation::error::{FloeError, FloeResult};

struct Message {
    tag: MessageTag,
    bytes: Vec<u8>,
}

/// One rank's endpoint of an in-process communicator group.
pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receivers: Vec<Receiver<Message>>,
    stash: RefCell<HashMap<(usize, MessageTag), VecDeque<Vec<u8>>>>,
}

impl LocalCommunicator {
    /// Create a fully connected group of `size` endpoints. Move each
    /// endpoint to its own thread; an endpoint is not shareable.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let mut senders_by_src: Vec<Vec<Sender<Message>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers_by_dst: Vec<Vec<Receiver<Message>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for dst in 0..size {
            for src in 0..size {
                let (tx, rx) = channel();
                senders_by_src[src].push(tx);
                receivers_by_dst[dst].push(rx);
            }
        }
        // senders_by_src[src][dst] pairs with receivers_by_dst[dst][src].
        senders_by_src
            .into_iter()
            .zip(receivers_by_dst)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalCommunicator {
                rank,
                senders,
                receivers,
                stash: RefCell::new(HashMap::new()),
            })
            .collect()
    }

    fn check_rank(&self, rank: usize) -> FloeResult<()> {
        if rank >= self.senders.len() {
            return Err(FloeError::invalid_value(format!(
                "rank {rank} outside communicator of size {}",
                self.senders.len()
            )));
        }
        Ok(())
    }

    fn recv_message(&self, tag: MessageTag, src: usize) -> FloeResult<Vec<u8>> {
        self.check_rank(src)?;
        if let Some(bytes) = self
            .stash
            .borrow_mut()
            .get_mut(&(src, tag))
            .and_then(VecDeque::pop_front)
        {
            return Ok(bytes);
        }
        loop {
            let message = self.receivers[src]
                .recv()
                .map_err(|_| FloeError::sanity_check("peer disconnected during receive"))?;
            if message.tag == tag {
                return Ok(message.bytes);
            }
            self.stash
                .borrow_mut()
                .entry((src, message.tag))
                .or_default()
                .push_back(message.bytes);
        }
    }
}

impl Communicator for LocalCommunicator {
    fn size(&self) -> usize {
        self.senders.len()
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn send(&self, buf: &[u8], tag: MessageTag, dest: usize) -> FloeResult<()> {
        self.check_rank(dest)?;
        self.senders[dest]
            .send(Message {
                tag,
                bytes: buf.to_vec(),
            })
            .map_err(|_| FloeError::sanity_check("peer disconnected during send"))
    }

    fn recv(&self, buf: &mut Vec<u8>, tag: MessageTag, src: usize) -> FloeResult<usize> {
        let bytes = self.recv_message(tag, src)?;
        buf.clear();
        buf.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn sendrecv(
        &self,
        send_buf: &[u8],
        send_tag: MessageTag,
        dest: usize,
        recv_buf: &mut Vec<u8>,
        recv_tag: MessageTag,
        src: usize,
    ) -> FloeResult<usize> {
        // Sends are buffered, so send-then-receive cannot deadlock here.
        self.send(send_buf, send_tag, dest)?;
        self.recv(recv_buf, recv_tag, src)
    }

    fn irecv(&self, tag: MessageTag, src: usize) -> FloeResult<RecvRequest> {
        self.check_rank(src)?;
        Ok(RecvRequest { src, tag })
    }

    fn waitall(&self, requests: Vec<RecvRequest>) -> FloeResult<Vec<Vec<u8>>> {
        requests
            .into_iter()
            .map(|request| self.recv_message(request.tag, request.src))
            .collect()
    }
}
