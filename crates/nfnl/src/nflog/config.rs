//! Log group configuration.

use crate::netlink::socket::SocketConfig;

use super::{NFULNL_COPY_META, NFULNL_COPY_NONE, NFULNL_COPY_PACKET};

/// Default number of packet bytes copied into each log message.
pub const DEFAULT_LOG_COPY_RANGE: u32 = 0xffff;

/// How much of each packet the kernel copies into a log message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogCopyMode {
    None,
    Meta,
    #[default]
    Packet,
}

impl LogCopyMode {
    /// Wire value (`NFULNL_COPY_*`).
    pub fn as_raw(self) -> u8 {
        match self {
            Self::None => NFULNL_COPY_NONE,
            Self::Meta => NFULNL_COPY_META,
            Self::Packet => NFULNL_COPY_PACKET,
        }
    }
}

/// Configuration for an NFLOG listener.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LogConfig {
    /// Groups to bind (the `--nflog-group` of the rule).
    pub groups: Vec<u16>,
    /// Copy mode applied to every group.
    pub copy_mode: LogCopyMode,
    /// Bytes of each packet to copy.
    pub copy_range: u32,
    /// Protocol family for the bind commands.
    pub family: u16,
    /// Kernel-side batching buffer (`NFULA_CFG_NLBUFSIZ`), in bytes.
    pub buffer_size: Option<u32>,
    /// Flush timeout (`NFULA_CFG_TIMEOUT`), in 1/100 s.
    pub timeout: Option<u32>,
    /// Messages batched before a flush (`NFULA_CFG_QTHRESH`).
    pub queue_threshold: Option<u32>,
    /// `NFULNL_CFG_F_*` flags.
    pub flags: Option<u16>,
    /// Socket tuning.
    pub socket: SocketConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            copy_mode: LogCopyMode::Packet,
            copy_range: DEFAULT_LOG_COPY_RANGE,
            family: libc::AF_INET as u16,
            buffer_size: None,
            timeout: None,
            queue_threshold: None,
            flags: None,
            socket: SocketConfig::default(),
        }
    }
}

impl LogConfig {
    /// Listen on `groups` with default settings.
    pub fn new(groups: impl IntoIterator<Item = u16>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn copy_mode(mut self, mode: LogCopyMode) -> Self {
        self.copy_mode = mode;
        self
    }

    pub fn copy_range(mut self, range: u32) -> Self {
        self.copy_range = range;
        self
    }

    pub fn family(mut self, family: u16) -> Self {
        self.family = family;
        self
    }

    /// Set the kernel batching buffer size.
    pub fn buffer_size(mut self, size: u32) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Set the flush timeout in 1/100 s.
    pub fn timeout(mut self, hundredths: u32) -> Self {
        self.timeout = Some(hundredths);
        self
    }

    /// Set the number of messages batched before a flush.
    pub fn queue_threshold(mut self, count: u32) -> Self {
        self.queue_threshold = Some(count);
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn socket(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }
}
