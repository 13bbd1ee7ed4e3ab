//! Queue configuration.

use crate::netlink::socket::SocketConfig;

use super::{NFQNL_COPY_META, NFQNL_COPY_NONE, NFQNL_COPY_PACKET};

/// Largest packet the kernel will copy to user space. Larger copy
/// ranges are clamped to this by the kernel.
pub const MAX_COPY_RANGE: u32 = 0xffff;

/// Copy range used when none is configured.
pub const DEFAULT_COPY_RANGE: u32 = MAX_COPY_RANGE;

/// Kernel default for the queue length (`NFQNL_QMAX_DEFAULT`).
pub const DEFAULT_MAX_QUEUE_LEN: u32 = 1024;

/// Number of packet buffers kept by a running queue.
pub const DEFAULT_POOL_SIZE: usize = 100;

/// How much of each packet the kernel copies into a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CopyMode {
    /// No packet data.
    None,
    /// Metadata only.
    Meta,
    /// Metadata plus up to `copy_range` bytes of the packet.
    #[default]
    Packet,
}

impl CopyMode {
    /// Wire value (`NFQNL_COPY_*`).
    pub fn as_raw(self) -> u8 {
        match self {
            Self::None => NFQNL_COPY_NONE,
            Self::Meta => NFQNL_COPY_META,
            Self::Packet => NFQNL_COPY_PACKET,
        }
    }
}

/// Configuration for one NFQUEUE queue.
///
/// # Example
///
/// ```ignore
/// use nfnl::nfqueue::{CopyMode, QueueConfig};
///
/// let config = QueueConfig::new(7)
///     .max_queue_len(100)
///     .copy_mode(CopyMode::Packet)
///     .copy_range(0xffff);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QueueConfig {
    /// Queue number (the `--queue-num` of the iptables/nftables rule).
    pub queue_num: u16,
    /// Maximum number of packets the kernel holds waiting for a verdict.
    pub max_queue_len: u32,
    /// Copy mode.
    pub copy_mode: CopyMode,
    /// Bytes of each packet to copy in [`CopyMode::Packet`].
    pub copy_range: u32,
    /// Protocol family for the PF bind/unbind commands.
    pub family: u16,
    /// `NFQA_CFG_F_*` flags to enable, if any.
    pub flags: Option<u32>,
    /// Number of packet buffers the receive loop may hand out at once.
    pub pool_size: usize,
    /// Socket tuning.
    pub socket: SocketConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_num: 0,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            copy_mode: CopyMode::Packet,
            copy_range: DEFAULT_COPY_RANGE,
            family: libc::AF_INET as u16,
            flags: None,
            pool_size: DEFAULT_POOL_SIZE,
            socket: SocketConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Configuration for queue `queue_num` with default settings.
    pub fn new(queue_num: u16) -> Self {
        Self {
            queue_num,
            ..Self::default()
        }
    }

    /// Set the maximum queue length.
    pub fn max_queue_len(mut self, len: u32) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Set the copy mode.
    pub fn copy_mode(mut self, mode: CopyMode) -> Self {
        self.copy_mode = mode;
        self
    }

    /// Set the copy range (maximum packet size delivered).
    pub fn copy_range(mut self, range: u32) -> Self {
        self.copy_range = range;
        self
    }

    /// Set the protocol family used for PF bind/unbind.
    pub fn family(mut self, family: u16) -> Self {
        self.family = family;
        self
    }

    /// Enable `NFQA_CFG_F_*` flags.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Set the number of pooled packet buffers.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the socket tuning.
    pub fn socket(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }

    /// Capacity of each pooled buffer: the copy range, capped at
    /// [`MAX_COPY_RANGE`], plus room for attribute padding.
    pub(crate) fn packet_buffer_capacity(&self) -> usize {
        match self.copy_mode {
            CopyMode::Packet => self.copy_range.min(MAX_COPY_RANGE) as usize + 3,
            _ => 0,
        }
    }
}
