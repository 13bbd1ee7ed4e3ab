//! Log group configuration over NFNL_SUBSYS_ULOG.

use std::sync::Arc;

use tracing::{debug, warn};
use zerocopy::byteorder::network_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::netlink::builder::MessageBuilder;
use crate::netlink::error::{Error, Result};
use crate::netlink::nfgen::NFNL_SUBSYS_ULOG;
use crate::netlink::socket::{NetlinkIo, NetlinkSocket};
use crate::netlink::transport::Transport;

use super::config::{LogConfig, LogCopyMode};
use super::stream::LogStream;
use super::{
    NFULA_CFG_CMD, NFULA_CFG_FLAGS, NFULA_CFG_MODE, NFULA_CFG_NLBUFSIZ, NFULA_CFG_QTHRESH,
    NFULA_CFG_TIMEOUT, NFULNL_CFG_CMD_BIND, NFULNL_CFG_CMD_PF_BIND, NFULNL_CFG_CMD_PF_UNBIND,
    NFULNL_CFG_CMD_UNBIND, NFULNL_MSG_CONFIG,
};

/// `struct nfulnl_msg_config_mode`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct ConfigMode {
    copy_range: U32,
    copy_mode: u8,
    pad: u8,
}

/// Control handle for a set of NFLOG groups sharing one socket.
pub struct LogGroup<S: NetlinkIo = NetlinkSocket> {
    config: LogConfig,
    transport: Option<Arc<Transport<S>>>,
}

impl<S: NetlinkIo> LogGroup<S> {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Open over an already-created socket, applying the socket options.
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
        Ok(())
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    fn transport(&self) -> Result<&Arc<Transport<S>>> {
        self.transport
            .as_ref()
            .filter(|t| t.is_open())
            .ok_or(Error::NotOpen)
    }

    async fn request(
        &self,
        family: u16,
        group: u16,
        build: impl FnOnce(&mut MessageBuilder),
        op: &str,
    ) -> Result<()> {
        let transport = self.transport()?;
        let mut msg =
            MessageBuilder::nfnetlink(NFNL_SUBSYS_ULOG, NFULNL_MSG_CONFIG, 0, family as u8, group);
        build(&mut msg);
        transport.query(msg).await.map_err(|e| e.with_context(op))
    }

    async fn command(&self, command: u8, family: u16, group: u16, op: &str) -> Result<()> {
        self.request(
            family,
            group,
            |msg| msg.append_attr_u8(NFULA_CFG_CMD, command),
            op,
        )
        .await
    }

    /// Drop any existing log handler for the protocol family.
    pub async fn unbind_pf(&self) -> Result<()> {
        self.command(
            NFULNL_CFG_CMD_PF_UNBIND,
            self.config.family,
            0,
            "unbind protocol family",
        )
        .await
    }

    /// Register as the log handler for the protocol family.
    pub async fn bind_pf(&self) -> Result<()> {
        self.command(
            NFULNL_CFG_CMD_PF_BIND,
            self.config.family,
            0,
            "bind protocol family",
        )
        .await
    }

    /// Bind every configured group.
    pub async fn bind_groups(&self) -> Result<()> {
        for &group in &self.config.groups {
            self.command(NFULNL_CFG_CMD_BIND, self.config.family, group, "bind log group")
                .await?;
            debug!(group, "log group bound");
        }
        Ok(())
    }

    /// Unbind every configured group.
    pub async fn unbind_groups(&self) -> Result<()> {
        for &group in &self.config.groups {
            self.command(
                NFULNL_CFG_CMD_UNBIND,
                libc::AF_UNSPEC as u16,
                group,
                "unbind log group",
            )
            .await?;
        }
        Ok(())
    }

    /// Set the copy mode of every configured group.
    pub async fn set_mode(&mut self, mode: LogCopyMode, range: u32) -> Result<()> {
        let params = ConfigMode {
            copy_range: U32::new(range),
            copy_mode: mode.as_raw(),
            pad: 0,
        };
        for &group in &self.config.groups {
            self.request(
                libc::AF_UNSPEC as u16,
                group,
                |msg| msg.append_attr_struct(NFULA_CFG_MODE, &params),
                "set log copy mode",
            )
            .await?;
        }
        self.config.copy_mode = mode;
        self.config.copy_range = range;
        Ok(())
    }

    async fn set_u32(&self, attr: u16, value: u32, op: &str) -> Result<()> {
        for &group in &self.config.groups {
            self.request(
                libc::AF_UNSPEC as u16,
                group,
                |msg| msg.append_attr_u32_be(attr, value),
                op,
            )
            .await?;
        }
        Ok(())
    }

    /// Set the kernel batching buffer size, in bytes.
    pub async fn set_buffer_size(&mut self, size: u32) -> Result<()> {
        self.set_u32(NFULA_CFG_NLBUFSIZ, size, "set log buffer size")
            .await?;
        self.config.buffer_size = Some(size);
        Ok(())
    }

    /// Set the flush timeout, in 1/100 s.
    pub async fn set_timeout(&mut self, hundredths: u32) -> Result<()> {
        self.set_u32(NFULA_CFG_TIMEOUT, hundredths, "set log timeout")
            .await?;
        self.config.timeout = Some(hundredths);
        Ok(())
    }

    /// Set the number of messages batched before a flush.
    pub async fn set_queue_threshold(&mut self, count: u32) -> Result<()> {
        self.set_u32(NFULA_CFG_QTHRESH, count, "set log queue threshold")
            .await?;
        self.config.queue_threshold = Some(count);
        Ok(())
    }

    /// Set `NFULNL_CFG_F_*` flags on every group.
    pub async fn set_flags(&mut self, flags: u16) -> Result<()> {
        for &group in &self.config.groups {
            self.request(
                libc::AF_UNSPEC as u16,
                group,
                |msg| msg.append_attr_u16_be(NFULA_CFG_FLAGS, flags),
                "set log flags",
            )
            .await?;
        }
        self.config.flags = Some(flags);
        Ok(())
    }

    /// Unbind and bind the family, bind the groups, set the copy mode, then
    /// apply whichever tunables are configured. Closes the socket on failure.
    pub async fn bring_up(&mut self) -> Result<()> {
        if let Err(e) = self.configure().await {
            self.close();
            warn!(groups = ?self.config.groups, error = %e, "log group setup failed");
            return Err(e);
        }
        Ok(())
    }

    async fn configure(&mut self) -> Result<()> {
        self.transport()?;
        self.unbind_pf().await?;
        self.bind_pf().await?;
        self.bind_groups().await?;
        self.set_mode(self.config.copy_mode, self.config.copy_range)
            .await?;
        if let Some(size) = self.config.buffer_size {
            self.set_buffer_size(size).await?;
        }
        if let Some(timeout) = self.config.timeout {
            self.set_timeout(timeout).await?;
        }
        if let Some(count) = self.config.queue_threshold {
            self.set_queue_threshold(count).await?;
        }
        if let Some(flags) = self.config.flags {
            self.set_flags(flags).await?;
        }
        Ok(())
    }

    /// Release the socket.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Turn the handle into a stream of log entries.
    pub fn into_stream(self) -> Result<LogStream<S>> {
        let transport = self.transport()?.clone();
        Ok(LogStream::new(transport, self.config.socket.recv_buffer_size))
    }
}

impl LogGroup<NetlinkSocket> {
    /// Open a netfilter netlink socket.
    pub fn open(&mut self) -> Result<()> {
        let socket = NetlinkSocket::open()?;
        self.open_with(socket)
    }
}

impl<S: NetlinkIo> std::fmt::Debug for LogGroup<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogGroup")
            .field("groups", &self.config.groups)
            .field("open", &self.is_open())
            .finish()
    }
}
