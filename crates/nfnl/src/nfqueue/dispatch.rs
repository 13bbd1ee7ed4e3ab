//! Receive loop.
//!
//! One tokio task per queue reads packet notifications, decodes them into a
//! stack-allocated attribute table, copies the payload into a pooled buffer
//! and hands a [`Packet`] to the user callback. The callback runs inline, so
//! a slow callback slows the drain rate of the queue.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::netlink::error::{Error, Result};
use crate::netlink::message::{MessageIter, check_ack};
use crate::netlink::nfgen::{NFGEN_HDRLEN, NFNL_SUBSYS_QUEUE, NfGenMsg};
use crate::netlink::parse::FromNetlink;
use crate::netlink::socket::{NetlinkIo, NetlinkSocket};
use crate::netlink::table::AttrTable;
use crate::netlink::transport::Transport;

use super::controller::Queue;
use super::packet::{Packet, PacketMeta};
use super::pool::BufferPool;
use super::verdict::VerdictHandle;
use super::{NFQA_TABLE_SIZE, NFQNL_MSG_PACKET};

/// What the receive loop does after a packet callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep receiving.
    Continue,
    /// End the loop and close the socket.
    Stop,
}

/// Why a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop was requested through the [`QueueHandle`].
    Stopped,
    /// The packet callback returned [`Flow::Stop`].
    Finished,
    /// A receive failed; the socket was closed.
    Failed,
}

/// Resolves once stop is signalled or the sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

struct Dispatcher<S: NetlinkIo, F, E> {
    transport: Arc<Transport<S>>,
    verdicts: VerdictHandle<S>,
    pool: BufferPool,
    buf: BytesMut,
    on_packet: F,
    on_error: E,
    stop: watch::Receiver<bool>,
}

impl<S, F, E> Dispatcher<S, F, E>
where
    S: NetlinkIo,
    F: FnMut(Packet<S>) -> Flow + Send + 'static,
    E: FnMut(&Error) + Send + 'static,
{
    async fn run(self) -> LoopExit {
        let Self {
            transport,
            verdicts,
            pool,
            mut buf,
            mut on_packet,
            mut on_error,
            mut stop,
        } = self;
        let queue_num = verdicts.queue_num();
        info!(queue = queue_num, pool = pool.capacity(), "receive loop started");

        loop {
            let received = tokio::select! {
                biased;
                _ = stopped(&mut stop) => {
                    debug!(queue = queue_num, "receive loop stopped");
                    return LoopExit::Stopped;
                }
                r = transport.recv(&mut buf) => r,
            };

            let n = match received {
                Ok(n) => n,
                Err(Error::NoBuffers) => {
                    warn!(queue = queue_num, "kernel dropped packets (ENOBUFS)");
                    on_error(&Error::NoBuffers);
                    continue;
                }
                Err(e) => {
                    error!(queue = queue_num, error = %e, "receive failed, closing queue");
                    on_error(&e);
                    transport.close();
                    return LoopExit::Failed;
                }
            };

            // Slots borrow from `buf`, so the table lives for one datagram.
            let mut attrs = AttrTable::<NFQA_TABLE_SIZE>::new();
            for msg in MessageIter::new(&buf[..n]) {
                let (hdr, payload) = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        on_error(&e);
                        break;
                    }
                };

                if hdr.is_error() {
                    if let Err(e) = check_ack(payload) {
                        on_error(&e);
                    }
                    continue;
                }
                if hdr.subsystem() != NFNL_SUBSYS_QUEUE || hdr.op() != NFQNL_MSG_PACKET {
                    trace!(msg_type = hdr.nlmsg_type, "ignoring message");
                    continue;
                }

                let nfgen = match NfGenMsg::from_bytes(payload) {
                    Ok(nfgen) => nfgen,
                    Err(e) => {
                        on_error(&e);
                        continue;
                    }
                };
                if nfgen.res_id() != queue_num {
                    trace!(queue = nfgen.res_id(), "packet for another queue");
                    continue;
                }

                let meta = match attrs
                    .decode(&payload[NFGEN_HDRLEN..])
                    .and_then(|()| PacketMeta::from_table(&attrs))
                {
                    Ok(meta) => meta,
                    Err(e) => {
                        on_error(&e);
                        continue;
                    }
                };

                let mut lease = tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => return LoopExit::Stopped,
                    lease = pool.acquire() => lease,
                };
                lease.fill(PacketMeta::payload(&attrs));
                trace!(queue = queue_num, id = meta.id, len = lease.as_slice().len(), "packet");

                if on_packet(Packet::new(meta, lease, verdicts.clone())) == Flow::Stop {
                    debug!(queue = queue_num, "callback ended the receive loop");
                    transport.close();
                    return LoopExit::Finished;
                }
            }
        }
    }
}

impl<S: NetlinkIo> Queue<S> {
    /// Start the receive loop on a tokio task.
    ///
    /// `on_packet` gets every queued packet; `on_error` gets kernel errors,
    /// malformed notifications and receive failures. Must be called from
    /// within a tokio runtime.
    pub fn start<F, E>(self, on_packet: F, on_error: E) -> Result<QueueHandle<S>>
    where
        F: FnMut(Packet<S>) -> Flow + Send + 'static,
        E: FnMut(&Error) + Send + 'static,
    {
        let transport = self.transport()?.clone();
        let verdicts = self.verdict_handle()?;
        let config = self.config();
        let pool = BufferPool::new(config.pool_size, config.packet_buffer_capacity());
        let (stop_tx, stop_rx) = watch::channel(false);

        let dispatcher = Dispatcher {
            transport,
            verdicts: verdicts.clone(),
            pool,
            buf: BytesMut::with_capacity(config.socket.recv_buffer_size),
            on_packet,
            on_error,
            stop: stop_rx,
        };
        let task = tokio::spawn(dispatcher.run());

        Ok(QueueHandle {
            queue: self,
            verdicts,
            stop: stop_tx,
            task,
        })
    }
}

/// A running queue.
///
/// Dropping the handle stops the receive loop without unbinding the queue;
/// use [`stop_queue`](Self::stop_queue) for an orderly shutdown.
pub struct QueueHandle<S: NetlinkIo = NetlinkSocket> {
    queue: Queue<S>,
    verdicts: VerdictHandle<S>,
    stop: watch::Sender<bool>,
    task: JoinHandle<LoopExit>,
}

impl<S: NetlinkIo> QueueHandle<S> {
    /// Verdict sender for this queue.
    pub fn verdicts(&self) -> VerdictHandle<S> {
        self.verdicts.clone()
    }

    pub fn queue_num(&self) -> u16 {
        self.queue.queue_num()
    }

    /// Whether the receive loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the receive loop, unbind the queue and close the socket.
    ///
    /// The socket is closed even when the unbind fails; that error is
    /// returned.
    pub async fn stop_queue(mut self) -> Result<()> {
        let _ = self.stop.send(true);
        match (&mut self.task).await {
            Ok(exit) => debug!(queue = self.queue.queue_num(), ?exit, "receive loop joined"),
            Err(e) => warn!(queue = self.queue.queue_num(), error = %e, "receive loop panicked"),
        }

        let result = if self.queue.is_open() {
            self.queue.destroy_queue().await
        } else {
            Ok(())
        };
        self.queue.close();
        info!(queue = self.queue.queue_num(), "queue stopped");
        result
    }
}

impl<S: NetlinkIo> std::fmt::Debug for QueueHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("queue", &self.queue)
            .field("running", &self.is_running())
            .finish()
    }
}
