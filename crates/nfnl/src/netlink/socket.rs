//! Low-level async netlink socket operations.
//!
//! [`NetlinkIo`] is the seam between the protocol code and the kernel:
//! [`NetlinkSocket`] is the production implementation, tests substitute a
//! scripted socket.

use std::future::Future;
use std::io::{self, IoSlice};
use std::os::unix::io::{AsRawFd, RawFd};
use std::task::{Context, Poll, ready};

use bytes::BytesMut;
use libc::c_int;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::Result;

/// Size of one nfnetlink receive buffer (75 KiB).
pub const NFNL_BUFFSIZE: usize = 75 * 1024;

/// Socket-level tuning applied when a handle is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SocketConfig {
    /// Size of the user-space receive buffer, one datagram at a time.
    pub recv_buffer_size: usize,
    /// Requested `SO_RCVBUF`/`SO_SNDBUF` size.
    pub socket_buffer_size: usize,
    /// Set `NETLINK_NO_ENOBUFS` so the kernel stops reporting overruns.
    pub no_enobufs: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: NFNL_BUFFSIZE,
            socket_buffer_size: 500 * NFNL_BUFFSIZE,
            no_enobufs: true,
        }
    }
}

impl SocketConfig {
    /// Set the user-space receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Set the kernel socket buffer size.
    pub fn socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }

    /// Enable or disable `NETLINK_NO_ENOBUFS`.
    pub fn no_enobufs(mut self, enabled: bool) -> Self {
        self.no_enobufs = enabled;
        self
    }

    /// Socket options to apply, as `(level, name, value, label)`.
    pub(crate) fn options(&self) -> Vec<(c_int, c_int, c_int, &'static str)> {
        let size = c_int::try_from(self.socket_buffer_size).unwrap_or(c_int::MAX);
        let mut opts = Vec::with_capacity(3);
        if self.no_enobufs {
            opts.push((libc::SOL_NETLINK, libc::NETLINK_NO_ENOBUFS, 1, "NETLINK_NO_ENOBUFS"));
        }
        opts.push((libc::SOL_SOCKET, libc::SO_RCVBUF, size, "SO_RCVBUF"));
        opts.push((libc::SOL_SOCKET, libc::SO_SNDBUF, size, "SO_SNDBUF"));
        opts
    }
}

/// Datagram I/O on a bound netlink socket.
///
/// Closing is dropping: the descriptor is released when the value is dropped.
pub trait NetlinkIo: Send + Sync + 'static {
    /// Send one datagram to the kernel.
    fn send(&self, msg: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Poll for one datagram; on success `buf` holds exactly its bytes.
    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<io::Result<usize>>;

    /// Send the concatenation of `bufs` as one datagram.
    fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Set an integer socket option.
    fn set_option(&self, level: c_int, name: c_int, value: c_int) -> io::Result<()>;

    /// Local port id assigned at bind time.
    fn port_id(&self) -> u32;
}

/// Async `NETLINK_NETFILTER` socket.
pub struct NetlinkSocket {
    /// The underlying async file descriptor.
    fd: AsyncFd<Socket>,
    /// Local port ID (assigned by kernel).
    pid: u32,
}

impl NetlinkSocket {
    /// Open and bind a netfilter netlink socket.
    pub fn open() -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_NETFILTER)?;
        socket.set_non_blocking(true)?;

        // Bind to get a port ID
        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        let fd = AsyncFd::new(socket)?;
        Ok(Self { fd, pid })
    }
}

impl NetlinkIo for NetlinkSocket {
    async fn send(&self, msg: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            buf.clear();

            match guard.try_io(|inner| inner.get_ref().recv(&mut *buf, 0)) {
                // buf has been advanced by recv, so buf[..] holds the datagram
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        // SAFETY: msghdr is plain old data; all-zero is a valid empty header.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        // IoSlice is ABI compatible with iovec; sendmsg does not write through it.
        msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;

        // SAFETY: the descriptor is open for the lifetime of self and msg
        // points at `bufs`, which outlives the call.
        let ret = unsafe { libc::sendmsg(self.as_raw_fd(), &msg, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn set_option(&self, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
        // SAFETY: value lives on the stack for the duration of the call and
        // the length passed matches its size.
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                level,
                name,
                &value as *const c_int as *const libc::c_void,
                std::mem::size_of::<c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn port_id(&self) -> u32 {
        self.pid
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl std::fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSocket")
            .field("fd", &self.as_raw_fd())
            .field("pid", &self.pid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SocketConfig::default();
        assert_eq!(config.recv_buffer_size, 76_800);
        assert_eq!(config.socket_buffer_size, 500 * 76_800);
        assert!(config.no_enobufs);
    }

    #[test]
    fn test_options() {
        let opts = SocketConfig::default().options();
        assert_eq!(opts.len(), 3);
        assert_eq!(opts[0].0, libc::SOL_NETLINK);
        assert_eq!(opts[0].1, libc::NETLINK_NO_ENOBUFS);

        let opts = SocketConfig::default().no_enobufs(false).options();
        assert!(opts.iter().all(|o| o.1 != libc::NETLINK_NO_ENOBUFS));
    }

    #[test]
    fn test_options_clamp_size() {
        let opts = SocketConfig::default()
            .socket_buffer_size(usize::MAX)
            .options();
        assert_eq!(opts[1].2, c_int::MAX);
    }
}
