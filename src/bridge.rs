//! Cross-thread adapter letting a foreign simulation thread answer BAR
//! reads and push outbound writes/MSIs without touching the socket.
//!
//! Grounded in `pcie_glue.c`'s `rx_fifo`/`tx_fifo`/`reply_node` design,
//! built on `crossbeam-channel` instead: the mutex-guarded linked-list
//! FIFOs become channel `Sender`/`Receiver` pairs, and the `volatile
//! is_replied` flag plus memory barrier become a one-shot `bounded(1)`
//! reply channel carried inside the read node itself — a reply sender
//! embedded in the request, same shape as this crate's other
//! cross-thread request/reply plumbing.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::warn;

use crate::bar::BarHandler;
use crate::wire::Message;

/// One BAR access handed from the EventLoop to the foreign thread.
pub enum Access {
    Read {
        bar: u8,
        addr: u64,
        size: usize,
        /// The foreign thread sends the read-back bytes here exactly
        /// once; the EventLoop blocks on this receiver.
        reply: Sender<Vec<u8>>,
    },
    Write {
        bar: u8,
        addr: u64,
        data: Vec<u8>,
    },
}

/// Handle given to the EventLoop / `BarHandler` side: pushes accesses
/// into `rx_queue` and, for reads, blocks for the foreign thread's
/// answer.
#[derive(Clone)]
pub struct BridgeFront {
    rx_tx: Sender<Access>,
}

/// Handle given to the foreign simulation thread: pulls accesses off
/// `rx_queue` in FIFO order and pushes outbound messages onto
/// `tx_queue`.
pub struct BridgeBack {
    rx_rx: Receiver<Access>,
    tx_tx: Sender<Message>,
}

/// Receiver side the EventLoop drains on a `PUSH` event-pipe key.
pub struct OutboundQueue {
    tx_rx: Receiver<Message>,
}

pub fn channel() -> (BridgeFront, BridgeBack, OutboundQueue) {
    let (rx_tx, rx_rx) = crossbeam_channel::unbounded();
    let (tx_tx, tx_rx) = crossbeam_channel::unbounded();
    (
        BridgeFront { rx_tx },
        BridgeBack { rx_rx, tx_tx },
        OutboundQueue { tx_rx },
    )
}

/// How long the EventLoop is willing to wait for a single bridge reply
/// before giving up and returning an all-ones read. The transport itself
/// has no per-operation timeout; this guards only against a wedged
/// foreign thread turning a read into a permanent stall.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

impl BridgeFront {
    /// Push a read access and block for the foreign thread's reply.
    /// Returns all-ones if the queue is gone (foreign thread exited) or
    /// the reply never arrives (`BridgeOverflow`-equivalent, logged,
    /// never fatal to the loop).
    pub fn read(&self, bar: u8, addr: u64, size: usize) -> Vec<u8> {
        let (reply_tx, reply_rx) = bounded(1);
        let access = Access::Read {
            bar,
            addr,
            size,
            reply: reply_tx,
        };
        if self.rx_tx.send(access).is_err() {
            warn!("bridge rx_queue has no consumer, dropping read access");
            return vec![0xff; size];
        }
        match reply_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(mut data) => {
                data.resize(size, 0xff);
                data
            }
            Err(_) => {
                warn!("bridge read access timed out waiting for foreign-thread reply");
                vec![0xff; size]
            }
        }
    }

    /// Push a write access; returns immediately, matching the
    /// fire-and-forget semantics of `on_bar_write` in the original.
    pub fn write(&self, bar: u8, addr: u64, data: Vec<u8>) {
        if self.rx_tx.send(Access::Write { bar, addr, data }).is_err() {
            warn!("bridge rx_queue has no consumer, dropping write access");
        }
    }
}

impl BridgeBack {
    /// Pull the next access in FIFO order, if any is queued.
    pub fn try_recv(&self) -> Option<Access> {
        match self.rx_rx.try_recv() {
            Ok(access) => Some(access),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking variant, for a foreign thread that has nothing else to do.
    pub fn recv(&self) -> Option<Access> {
        self.rx_rx.recv().ok()
    }

    /// Push an outbound message (DMA write-back, MSI, ...). The caller
    /// is responsible for also signaling the EventLoop's event pipe
    /// with the `PUSH` key so it knows to drain this queue.
    pub fn send(&self, msg: Message) {
        if self.tx_tx.send(msg).is_err() {
            warn!("bridge tx_queue has no consumer, dropping outbound message");
        }
    }
}

impl OutboundQueue {
    /// Drain every message queued since the last drain, head-first
    /// ("drains tx_queue in head-first order").
    pub fn drain(&self) -> Vec<Message> {
        self.tx_rx.try_iter().collect()
    }
}

/// A [`BarHandler`] that forwards every access across the bridge to a
/// foreign simulation thread, instead of handling it in-process. One
/// instance is registered per bridged BAR; `bar` identifies which BAR
/// index to tag outgoing [`Access`] values with.
pub struct BridgeBar {
    bar: u8,
    front: BridgeFront,
}

impl BridgeBar {
    pub fn new(bar: u8, front: BridgeFront) -> Self {
        BridgeBar { bar, front }
    }
}

impl BarHandler for BridgeBar {
    fn on_read(&mut self, addr: u64, out: &mut [u8]) {
        let data = self.front.read(self.bar, addr, out.len());
        out.copy_from_slice(&data);
    }

    fn on_write(&mut self, addr: u64, data: &[u8]) {
        self.front.write(self.bar, addr, data.to_vec());
    }
}
