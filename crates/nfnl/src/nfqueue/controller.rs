//! Queue configuration over NFNL_SUBSYS_QUEUE.
//!
//! Each step of the bind/configure handshake is a single acknowledged
//! `NFQNL_MSG_CONFIG` request. A failed step leaves [`Queue::state`] where
//! it was; the caller is expected to tear down rather than retry.

use std::sync::Arc;

use tracing::{debug, warn};
use zerocopy::byteorder::network_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::netlink::builder::MessageBuilder;
use crate::netlink::error::{Error, Result};
use crate::netlink::nfgen::NFNL_SUBSYS_QUEUE;
use crate::netlink::socket::{NetlinkIo, NetlinkSocket};
use crate::netlink::transport::Transport;

use super::config::{CopyMode, QueueConfig};
use super::verdict::VerdictHandle;
use super::{
    NFQA_CFG_CMD, NFQA_CFG_FLAGS, NFQA_CFG_MASK, NFQA_CFG_PARAMS, NFQA_CFG_QUEUE_MAXLEN,
    NFQNL_CFG_CMD_BIND, NFQNL_CFG_CMD_PF_BIND, NFQNL_CFG_CMD_PF_UNBIND, NFQNL_CFG_CMD_UNBIND,
    NFQNL_MSG_CONFIG,
};

/// `struct nfqnl_msg_config_cmd`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct ConfigCmd {
    command: u8,
    pad: u8,
    pf: U16,
}

impl ConfigCmd {
    fn new(command: u8, pf: u16) -> Self {
        Self {
            command,
            pad: 0,
            pf: U16::new(pf),
        }
    }
}

/// `struct nfqnl_msg_config_params` (packed, 5 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct ConfigParams {
    copy_range: U32,
    copy_mode: u8,
}

/// Where a queue is in its bind/configure handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// No socket.
    Closed,
    /// Socket open, nothing sent yet.
    Opened,
    /// Family registration reset.
    Unbound,
    /// Registered for the protocol family.
    BoundToFamily,
    /// Bound to the queue number.
    QueueBound,
    /// Copy mode and queue length both set.
    Configured,
}

/// Control handle for one NFQUEUE queue.
///
/// # Example
///
/// ```ignore
/// use nfnl::nfqueue::{Queue, QueueConfig};
///
/// let mut queue = Queue::new(QueueConfig::new(7).max_queue_len(100));
/// queue.open()?;
/// queue.bring_up().await?;
/// ```
pub struct Queue<S: NetlinkIo = NetlinkSocket> {
    config: QueueConfig,
    transport: Option<Arc<Transport<S>>>,
    state: QueueState,
    mode_set: bool,
    max_len_set: bool,
}

impl<S: NetlinkIo> Queue<S> {
    /// A closed queue handle.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            transport: None,
            state: QueueState::Closed,
            mode_set: false,
            max_len_set: false,
        }
    }

    /// Open over an already-created socket, applying the configured socket
    /// options. Option failures are logged and ignored.
    pub fn open_with(&mut self, socket: S) -> Result<()> {
        let transport = Transport::new(socket, self.config.socket.recv_buffer_size);
        for (level, name, value, label) in self.config.socket.options() {
            if let Err(e) = transport.set_option(level, name, value) {
                warn!(option = label, value, error = %e, "failed to set socket option");
            }
        }

        if let Some(old) = self.transport.replace(Arc::new(transport)) {
            old.close();
        }
        self.state = QueueState::Opened;
        self.mode_set = false;
        self.max_len_set = false;
        debug!(queue = self.config.queue_num, "queue socket opened");
        Ok(())
    }

    /// Current handshake state.
    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Queue number this handle is bound (or will bind) to.
    pub fn queue_num(&self) -> u16 {
        self.config.queue_num
    }

    /// The configuration in use.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Whether a socket is open.
    pub fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    pub(crate) fn transport(&self) -> Result<&Arc<Transport<S>>> {
        self.transport
            .as_ref()
            .filter(|t| t.is_open())
            .ok_or(Error::NotOpen)
    }

    /// A verdict sender for this queue.
    pub fn verdict_handle(&self) -> Result<VerdictHandle<S>> {
        Ok(VerdictHandle::new(
            self.transport()?.clone(),
            self.config.queue_num,
        ))
    }

    fn config_request(res_id: u16) -> MessageBuilder {
        MessageBuilder::nfnetlink(
            NFNL_SUBSYS_QUEUE,
            NFQNL_MSG_CONFIG,
            0,
            libc::AF_UNSPEC as u8,
            res_id,
        )
    }

    async fn send_command(&self, command: u8, pf: u16, res_id: u16, op: &str) -> Result<()> {
        let transport = self.transport()?;
        let mut msg = Self::config_request(res_id);
        msg.append_attr_struct(NFQA_CFG_CMD, &ConfigCmd::new(command, pf));
        transport.query(msg).await.map_err(|e| e.with_context(op))
    }

    /// Drop any existing handler registration for the protocol family.
    pub async fn unbind_pf(&mut self) -> Result<()> {
        self.send_command(
            NFQNL_CFG_CMD_PF_UNBIND,
            self.config.family,
            0,
            "unbind protocol family",
        )
        .await?;
        self.state = QueueState::Unbound;
        Ok(())
    }

    /// Register as the handler for the protocol family.
    pub async fn bind_pf(&mut self) -> Result<()> {
        self.send_command(
            NFQNL_CFG_CMD_PF_BIND,
            self.config.family,
            0,
            "bind protocol family",
        )
        .await?;
        self.state = QueueState::BoundToFamily;
        Ok(())
    }

    /// Bind to queue `num`. Later requests and verdicts address this queue.
    pub async fn create_queue(&mut self, num: u16) -> Result<()> {
        self.send_command(
            NFQNL_CFG_CMD_BIND,
            libc::AF_UNSPEC as u16,
            num,
            "bind queue",
        )
        .await?;
        self.config.queue_num = num;
        self.state = QueueState::QueueBound;
        self.mode_set = false;
        self.max_len_set = false;
        debug!(queue = num, "queue bound");
        Ok(())
    }

    /// Set how much of each packet is copied to user space.
    pub async fn set_mode(&mut self, mode: CopyMode, range: u32) -> Result<()> {
        let transport = self.transport()?;
        let mut msg = Self::config_request(self.config.queue_num);
        let params = ConfigParams {
            copy_range: U32::new(range),
            copy_mode: mode.as_raw(),
        };
        msg.append_attr_struct(NFQA_CFG_PARAMS, &params);
        transport
            .query(msg)
            .await
            .map_err(|e| e.with_context("set copy mode"))?;

        self.config.copy_mode = mode;
        self.config.copy_range = range;
        self.mode_set = true;
        self.update_configured();
        Ok(())
    }

    /// Set the number of packets the kernel queues before dropping (or
    /// accepting, with `FAIL_OPEN`).
    pub async fn set_max_len(&mut self, len: u32) -> Result<()> {
        let transport = self.transport()?;
        let mut msg = Self::config_request(self.config.queue_num);
        msg.append_attr_u32_be(NFQA_CFG_QUEUE_MAXLEN, len);
        transport
            .query(msg)
            .await
            .map_err(|e| e.with_context("set queue length"))?;

        self.config.max_queue_len = len;
        self.max_len_set = true;
        self.update_configured();
        Ok(())
    }

    /// Change the `NFQA_CFG_F_*` bits selected by `mask` to `flags`.
    pub async fn set_flags(&mut self, mask: u32, flags: u32) -> Result<()> {
        let transport = self.transport()?;
        let mut msg = Self::config_request(self.config.queue_num);
        msg.append_attr_u32_be(NFQA_CFG_MASK, mask);
        msg.append_attr_u32_be(NFQA_CFG_FLAGS, flags);
        transport
            .query(msg)
            .await
            .map_err(|e| e.with_context("set queue flags"))?;

        let current = self.config.flags.unwrap_or(0);
        self.config.flags = Some((current & !mask) | (flags & mask));
        Ok(())
    }

    /// Unbind from the queue. The kernel stops delivering its packets.
    pub async fn destroy_queue(&mut self) -> Result<()> {
        self.send_command(
            NFQNL_CFG_CMD_UNBIND,
            libc::AF_UNSPEC as u16,
            self.config.queue_num,
            "unbind queue",
        )
        .await?;
        self.state = QueueState::BoundToFamily;
        self.mode_set = false;
        self.max_len_set = false;
        debug!(queue = self.config.queue_num, "queue unbound");
        Ok(())
    }

    /// Release the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.state = QueueState::Closed;
    }

    /// Run the whole handshake: unbind and bind the family, bind the queue,
    /// set copy mode and queue length, then the flags if configured.
    ///
    /// On failure the queue is unbound (if it was bound), the socket closed,
    /// and the first error returned.
    pub async fn bring_up(&mut self) -> Result<()> {
        if let Err(e) = self.configure().await {
            if matches!(self.state, QueueState::QueueBound | QueueState::Configured)
                && let Err(destroy) = self.destroy_queue().await
            {
                debug!(error = %destroy, "unbind during unwind failed");
            }
            self.close();
            warn!(queue = self.config.queue_num, error = %e, "queue setup failed");
            return Err(e);
        }
        Ok(())
    }

    async fn configure(&mut self) -> Result<()> {
        self.transport()?;
        self.unbind_pf().await?;
        self.bind_pf().await?;
        self.create_queue(self.config.queue_num).await?;
        self.set_mode(self.config.copy_mode, self.config.copy_range)
            .await?;
        self.set_max_len(self.config.max_queue_len).await?;
        if let Some(flags) = self.config.flags {
            self.set_flags(flags, flags).await?;
        }
        Ok(())
    }

    fn update_configured(&mut self) {
        if self.mode_set && self.max_len_set {
            self.state = QueueState::Configured;
        }
    }
}

impl Queue<NetlinkSocket> {
    /// Open a netfilter netlink socket.
    pub fn open(&mut self) -> Result<()> {
        let socket = NetlinkSocket::open()?;
        self.open_with(socket)
    }
}

impl<S: NetlinkIo> std::fmt::Debug for Queue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("queue_num", &self.config.queue_num)
            .field("state", &self.state)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{AttrIter, get};
    use crate::netlink::message::{NLM_F_ACK, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgHdr};
    use crate::netlink::nfgen::{NFGEN_HDRLEN, NfGenMsg, nfnl_msg_type};
    use crate::netlink::parse::FromNetlink;
    use crate::nfqueue::NFQA_CFG_F_FAIL_OPEN;
    use crate::testing::{MockHandle, MockSocket};

    /// One decoded config request: (res_id, [(attr type, value)]).
    fn decode(msg: &[u8]) -> (u16, Vec<(u16, Vec<u8>)>) {
        let hdr = NlMsgHdr::from_bytes(msg).unwrap();
        assert_eq!(hdr.nlmsg_type, nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_CONFIG));
        assert_eq!(hdr.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(hdr.nlmsg_len as usize, msg.len());
        let nfgen = NfGenMsg::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(nfgen.family, libc::AF_UNSPEC as u8);
        let attrs = AttrIter::new(&msg[NLMSG_HDRLEN + NFGEN_HDRLEN..])
            .map(|a| a.map(|(h, v)| (h.kind(), v.to_vec())))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        (nfgen.res_id(), attrs)
    }

    fn opened(config: QueueConfig) -> (Queue<MockSocket>, MockHandle) {
        let (socket, mock) = MockSocket::new();
        let mut queue = Queue::new(config);
        queue.open_with(socket).unwrap();
        (queue, mock)
    }

    #[tokio::test]
    async fn test_bring_up_sequence() {
        let config = QueueConfig::new(7).max_queue_len(100).copy_range(0xffff);
        let (mut queue, mock) = opened(config);

        queue.bring_up().await.unwrap();
        assert_eq!(queue.state(), QueueState::Configured);

        let sent: Vec<_> = mock.sent().iter().map(|m| decode(m)).collect();
        assert_eq!(sent.len(), 5);

        // unbind then bind the family
        let cmd = |(_, attrs): &(u16, Vec<(u16, Vec<u8>)>)| {
            assert_eq!(attrs[0].0, NFQA_CFG_CMD);
            attrs[0].1.clone()
        };
        assert_eq!(cmd(&sent[0]), vec![NFQNL_CFG_CMD_PF_UNBIND, 0, 0, 2]);
        assert_eq!(cmd(&sent[1]), vec![NFQNL_CFG_CMD_PF_BIND, 0, 0, 2]);
        assert_eq!(sent[0].0, 0);

        // bind queue 7
        assert_eq!(sent[2].0, 7);
        assert_eq!(cmd(&sent[2]), vec![NFQNL_CFG_CMD_BIND, 0, 0, 0]);

        // copy packet, range 0xffff
        assert_eq!(sent[3].0, 7);
        assert_eq!(sent[3].1[0].0, NFQA_CFG_PARAMS);
        assert_eq!(sent[3].1[0].1, vec![0, 0, 0xff, 0xff, 2]);

        // max len 100
        assert_eq!(sent[4].1[0].0, NFQA_CFG_QUEUE_MAXLEN);
        assert_eq!(get::u32_be(&sent[4].1[0].1).unwrap(), 100);
    }

    #[tokio::test]
    async fn test_bring_up_with_flags() {
        let config = QueueConfig::new(1).flags(NFQA_CFG_F_FAIL_OPEN);
        let (mut queue, mock) = opened(config);

        queue.bring_up().await.unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 6);
        let (_, attrs) = decode(&sent[5]);
        assert_eq!(attrs[0].0, NFQA_CFG_MASK);
        assert_eq!(get::u32_be(&attrs[0].1).unwrap(), 1);
        assert_eq!(attrs[1].0, NFQA_CFG_FLAGS);
        assert_eq!(get::u32_be(&attrs[1].1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_configured_needs_mode_and_len() {
        let (mut queue, _mock) = opened(QueueConfig::new(2));
        queue.unbind_pf().await.unwrap();
        assert_eq!(queue.state(), QueueState::Unbound);
        queue.bind_pf().await.unwrap();
        assert_eq!(queue.state(), QueueState::BoundToFamily);
        queue.create_queue(2).await.unwrap();
        assert_eq!(queue.state(), QueueState::QueueBound);

        // Either order works
        queue.set_max_len(10).await.unwrap();
        assert_eq!(queue.state(), QueueState::QueueBound);
        queue.set_mode(CopyMode::Meta, 0).await.unwrap();
        assert_eq!(queue.state(), QueueState::Configured);

        queue.destroy_queue().await.unwrap();
        assert_eq!(queue.state(), QueueState::BoundToFamily);
    }

    #[tokio::test]
    async fn test_failed_step_keeps_state() {
        let (mut queue, mock) = opened(QueueConfig::new(3));
        queue.unbind_pf().await.unwrap();

        mock.fail_next(-libc::EBUSY);
        let err = queue.bind_pf().await.unwrap_err();
        assert!(err.is_busy());
        assert_eq!(queue.state(), QueueState::Unbound);
    }

    #[tokio::test]
    async fn test_bring_up_unwinds() {
        let (mut queue, mock) = opened(QueueConfig::new(4));

        // unbind, bind, create succeed; set_mode is refused
        mock.script_acks(&[0, 0, 0, -libc::EPERM]);
        let err = queue.bring_up().await.unwrap_err();
        assert_eq!(err.errno(), Some(libc::EPERM));
        assert_eq!(queue.state(), QueueState::Closed);
        assert!(!queue.is_open());
        assert_eq!(mock.closes(), 1);

        // The queue was bound, so an unbind went out before closing
        let sent = mock.sent();
        assert_eq!(sent.len(), 5);
        let (res_id, attrs) = decode(&sent[4]);
        assert_eq!(res_id, 4);
        assert_eq!(attrs[0].1[0], NFQNL_CFG_CMD_UNBIND);
    }

    #[tokio::test]
    async fn test_bring_up_unwinds_before_bind() {
        let (mut queue, mock) = opened(QueueConfig::new(4));

        mock.script_acks(&[0, -libc::EPERM]);
        queue.bring_up().await.unwrap_err();
        assert_eq!(mock.sent().len(), 2);
        assert_eq!(mock.closes(), 1);
    }

    #[tokio::test]
    async fn test_not_open() {
        let mut queue: Queue<MockSocket> = Queue::new(QueueConfig::new(0));
        assert!(queue.unbind_pf().await.unwrap_err().is_not_open());
        assert!(queue.set_max_len(1).await.unwrap_err().is_not_open());
        assert!(queue.verdict_handle().unwrap_err().is_not_open());
        assert!(queue.bring_up().await.unwrap_err().is_not_open());
        assert_eq!(queue.state(), QueueState::Closed);

        let (mut queue, _mock) = opened(QueueConfig::new(0));
        queue.close();
        queue.close();
        assert!(queue.create_queue(1).await.unwrap_err().is_not_open());
    }

    #[test]
    fn test_open_applies_socket_options() {
        let (queue, mock) = opened(QueueConfig::new(0));
        assert_eq!(queue.state(), QueueState::Opened);

        let options = mock.options();
        assert_eq!(options.len(), 3);
        assert!(options.contains(&(libc::SOL_NETLINK, libc::NETLINK_NO_ENOBUFS, 1)));
        assert!(options.iter().any(|&(level, name, _)| {
            level == libc::SOL_SOCKET && name == libc::SO_RCVBUF
        }));
    }

    #[test]
    fn test_wire_structs() {
        assert_eq!(ConfigCmd::new(NFQNL_CFG_CMD_PF_BIND, 2).as_bytes(), &[3, 0, 0, 2]);
        let params = ConfigParams {
            copy_range: U32::new(0x0102_0304),
            copy_mode: 1,
        };
        assert_eq!(params.as_bytes(), &[1, 2, 3, 4, 1]);
    }
}
