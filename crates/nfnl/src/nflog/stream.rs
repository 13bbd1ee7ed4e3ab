//! Stream of log entries from bound NFLOG groups.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio_stream::Stream;
use tracing::{error, trace, warn};

use crate::netlink::error::{Error, Result};
use crate::netlink::message::{MessageIter, check_ack};
use crate::netlink::nfgen::NFNL_SUBSYS_ULOG;
use crate::netlink::socket::{NetlinkIo, NetlinkSocket};
use crate::netlink::table::AttrTable;
use crate::netlink::transport::Transport;

use super::entry::LogEntry;
use super::{NFULA_TABLE_SIZE, NFULNL_MSG_PACKET};

/// Log entries, in the order the kernel sent them.
///
/// A receive buffer overflow yields `Err(Error::NoBuffers)` and the stream
/// carries on; entries were lost but the socket is fine. Any other receive
/// error is yielded once, then the socket is closed and the stream ends.
/// Malformed messages are yielded as errors without ending the stream.
///
/// # Example
///
/// ```ignore
/// use tokio_stream::StreamExt;
///
/// while let Some(entry) = logs.next().await {
///     match entry {
///         Ok(entry) => println!("{:?}", entry.prefix),
///         Err(e) if e.is_no_buffers() => continue,
///         Err(e) => return Err(e),
///     }
/// }
/// ```
pub struct LogStream<S: NetlinkIo = NetlinkSocket> {
    transport: Arc<Transport<S>>,
    buf: BytesMut,
    pending: VecDeque<Result<LogEntry>>,
    done: bool,
}

impl<S: NetlinkIo> LogStream<S> {
    pub(crate) fn new(transport: Arc<Transport<S>>, recv_buffer_size: usize) -> Self {
        Self {
            transport,
            buf: BytesMut::with_capacity(recv_buffer_size),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Close the socket. The stream ends after any entries already parsed.
    pub fn close(&mut self) {
        self.transport.close();
        self.done = true;
    }

    /// Whether the socket is still open.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    fn parse_datagram(&mut self, len: usize) {
        let mut attrs = AttrTable::<NFULA_TABLE_SIZE>::new();
        for msg in MessageIter::new(&self.buf[..len]) {
            let (hdr, payload) = match msg {
                Ok(m) => m,
                Err(e) => {
                    self.pending.push_back(Err(e));
                    break;
                }
            };

            if hdr.is_error() {
                if let Err(e) = check_ack(payload) {
                    self.pending.push_back(Err(e));
                }
                continue;
            }
            if hdr.subsystem() != NFNL_SUBSYS_ULOG || hdr.op() != NFULNL_MSG_PACKET {
                trace!(msg_type = hdr.nlmsg_type, "ignoring message");
                continue;
            }

            self.pending.push_back(LogEntry::decode(payload, &mut attrs));
        }
    }
}

impl<S: NetlinkIo> Stream for LogStream<S> {
    type Item = Result<LogEntry>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(item) = this.pending.pop_front() {
            return Poll::Ready(Some(item));
        }
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.transport.poll_recv(cx, &mut this.buf) {
                Poll::Ready(Ok(n)) => {
                    this.parse_datagram(n);
                    if let Some(item) = this.pending.pop_front() {
                        return Poll::Ready(Some(item));
                    }
                    // Nothing for us in this datagram
                    continue;
                }
                Poll::Ready(Err(Error::NoBuffers)) => {
                    warn!("log receive buffer overflowed, entries lost");
                    return Poll::Ready(Some(Err(Error::NoBuffers)));
                }
                Poll::Ready(Err(Error::NotOpen)) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Err(e)) => {
                    error!(error = %e, "log receive failed, closing socket");
                    this.close();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S: NetlinkIo> Unpin for LogStream<S> {}

impl<S: NetlinkIo> std::fmt::Debug for LogStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("open", &self.is_open())
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish()
    }
}
