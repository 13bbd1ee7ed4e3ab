//! Request/ack transport over one netlink socket.

use std::future::poll_fn;
use std::io::IoSlice;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use bytes::BytesMut;
use libc::c_int;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_ACK, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgHdr, check_ack,
};
use super::socket::NetlinkIo;

/// One netlink socket plus the state needed to talk request/ack over it.
///
/// The socket is released by [`close`](Self::close) (or when the last
/// reference to the transport is dropped). Every operation after `close`
/// fails with [`Error::NotOpen`].
pub struct Transport<S: NetlinkIo> {
    socket: RwLock<Option<Arc<S>>>,
    /// Reply buffer for `query`; the lock also keeps one request in flight.
    rx: Mutex<BytesMut>,
    seq: AtomicU32,
    pid: u32,
}

impl<S: NetlinkIo> Transport<S> {
    /// Wrap an open socket.
    pub fn new(socket: S, recv_buffer_size: usize) -> Self {
        let pid = socket.port_id();
        Self {
            socket: RwLock::new(Some(Arc::new(socket))),
            rx: Mutex::new(BytesMut::with_capacity(recv_buffer_size)),
            seq: AtomicU32::new(1),
            pid,
        }
    }

    fn socket(&self) -> Result<Arc<S>> {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotOpen)
    }

    /// Whether the socket is still open.
    pub fn is_open(&self) -> bool {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Local port id.
    pub fn port_id(&self) -> u32 {
        self.pid
    }

    /// Get the next sequence number.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one raw datagram.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        socket.send(msg).await?;
        Ok(())
    }

    /// Stamp a message with a fresh sequence number and our port id, then
    /// send it. Returns the sequence number used.
    pub async fn send_message(&self, mut builder: MessageBuilder) -> Result<u32> {
        let seq = self.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.pid);
        self.send(&builder.finish()).await?;
        Ok(seq)
    }

    /// Receive one datagram into `buf`.
    ///
    /// ENOBUFS is reported as [`Error::NoBuffers`].
    pub async fn recv(&self, buf: &mut BytesMut) -> Result<usize> {
        let socket = self.socket()?;
        poll_fn(|cx| socket.poll_recv(cx, buf))
            .await
            .map_err(Error::from_recv)
    }

    /// Poll for one datagram into `buf`.
    pub fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<Result<usize>> {
        let socket = match self.socket() {
            Ok(s) => s,
            Err(e) => return Poll::Ready(Err(e)),
        };
        socket.poll_recv(cx, buf).map_err(Error::from_recv)
    }

    /// Send the concatenation of `bufs` as a single datagram.
    pub fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> Result<usize> {
        Ok(self.socket()?.send_vectored(bufs)?)
    }

    /// Set an integer socket option.
    pub fn set_option(&self, level: c_int, name: c_int, value: c_int) -> Result<()> {
        Ok(self.socket()?.set_option(level, name, value)?)
    }

    /// Send a request and wait for its acknowledgement.
    ///
    /// Sets `NLM_F_REQUEST | NLM_F_ACK`, then reads datagrams until the
    /// `NLMSG_ERROR` carrying the request's sequence number arrives. A zero
    /// code is success; anything else is [`Error::Kernel`].
    pub async fn query(&self, mut builder: MessageBuilder) -> Result<()> {
        let mut rx = self.rx.lock().await;
        let socket = self.socket()?;

        builder.add_flags(NLM_F_REQUEST | NLM_F_ACK);
        let msg_type = builder.msg_type();
        let seq = self.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.pid);
        socket.send(&builder.finish()).await?;

        loop {
            let n = poll_fn(|cx| socket.poll_recv(cx, &mut *rx))
                .await
                .map_err(Error::from_recv)?;
            if n < NLMSG_HDRLEN {
                return Err(Error::Truncated {
                    expected: NLMSG_HDRLEN,
                    actual: n,
                });
            }

            if let Some(result) = match_ack(&rx[..], seq)? {
                debug!(msg_type, seq, ok = result.is_ok(), "query answered");
                return result;
            }
        }
    }

    /// Release the socket. Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        let socket = self
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if socket.is_some() {
            debug!(pid = self.pid, "netlink socket closed");
        }
        socket.is_some()
    }
}

/// Look for the ack of `seq` in one datagram.
///
/// A malformed message ends the scan of the datagram. It is an error only
/// when its header marks it as the ack being waited for; otherwise the
/// caller keeps reading.
fn match_ack(data: &[u8], seq: u32) -> Result<Option<Result<()>>> {
    let mut iter = MessageIter::new(data);
    loop {
        let rest = iter.remaining();
        let Some(msg) = iter.next() else {
            return Ok(None);
        };
        let (hdr, payload) = match msg {
            Ok(msg) => msg,
            Err(e) => {
                let is_ack = NlMsgHdr::from_bytes(rest)
                    .is_ok_and(|hdr| hdr.is_error() && hdr.nlmsg_seq == seq);
                if is_ack {
                    return Err(e);
                }
                warn!(error = %e, expected = seq, "dropping malformed message");
                return Ok(None);
            }
        };
        if hdr.is_error() && hdr.nlmsg_seq == seq {
            return Ok(Some(check_ack(payload)));
        }
        trace!(
            msg_type = hdr.nlmsg_type,
            seq = hdr.nlmsg_seq,
            expected = seq,
            "skipping unrelated message"
        );
    }
}

impl<S: NetlinkIo> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.is_open())
            .field("pid", &self.pid)
            .finish()
    }
}
