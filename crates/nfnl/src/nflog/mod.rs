//! NFLOG: packets copied to user space by `NFLOG` rules.
//!
//! Unlike NFQUEUE there is no verdict: the kernel keeps forwarding the
//! packet and sends a copy to every listener bound to the rule's group.
//!
//! # Example
//!
//! ```ignore
//! use nfnl::nflog::{self, LogConfig};
//! use tokio_stream::StreamExt;
//!
//! let mut logs = nflog::listen(LogConfig::new([10, 11])).await?;
//! while let Some(entry) = logs.next().await {
//!     let entry = entry?;
//!     println!("{:?} {:?}", entry.prefix, entry.ipv4());
//! }
//! ```

mod config;
mod entry;
mod group;
mod stream;

pub use config::{DEFAULT_LOG_COPY_RANGE, LogConfig, LogCopyMode};
pub use entry::{Ipv4Summary, LogEntry};
pub use group::LogGroup;
pub use stream::LogStream;

use crate::netlink::error::Result;
use crate::netlink::socket::NetlinkSocket;

// Message types (linux/netfilter/nfnetlink_log.h)
pub const NFULNL_MSG_PACKET: u8 = 0;
pub const NFULNL_MSG_CONFIG: u8 = 1;

// Config commands
pub const NFULNL_CFG_CMD_NONE: u8 = 0;
pub const NFULNL_CFG_CMD_BIND: u8 = 1;
pub const NFULNL_CFG_CMD_UNBIND: u8 = 2;
pub const NFULNL_CFG_CMD_PF_BIND: u8 = 3;
pub const NFULNL_CFG_CMD_PF_UNBIND: u8 = 4;

// Copy modes
pub const NFULNL_COPY_NONE: u8 = 0;
pub const NFULNL_COPY_META: u8 = 1;
pub const NFULNL_COPY_PACKET: u8 = 2;

// Config attributes
pub const NFULA_CFG_UNSPEC: u16 = 0;
pub const NFULA_CFG_CMD: u16 = 1;
pub const NFULA_CFG_MODE: u16 = 2;
pub const NFULA_CFG_NLBUFSIZ: u16 = 3;
pub const NFULA_CFG_TIMEOUT: u16 = 4;
pub const NFULA_CFG_QTHRESH: u16 = 5;
pub const NFULA_CFG_FLAGS: u16 = 6;

// Config flags (NFULA_CFG_FLAGS)
pub const NFULNL_CFG_F_SEQ: u16 = 0x0001;
pub const NFULNL_CFG_F_SEQ_GLOBAL: u16 = 0x0002;
pub const NFULNL_CFG_F_CONNTRACK: u16 = 0x0004;

// Packet attributes
pub const NFULA_UNSPEC: u16 = 0;
pub const NFULA_PACKET_HDR: u16 = 1;
pub const NFULA_MARK: u16 = 2;
pub const NFULA_TIMESTAMP: u16 = 3;
pub const NFULA_IFINDEX_INDEV: u16 = 4;
pub const NFULA_IFINDEX_OUTDEV: u16 = 5;
pub const NFULA_IFINDEX_PHYSINDEV: u16 = 6;
pub const NFULA_IFINDEX_PHYSOUTDEV: u16 = 7;
pub const NFULA_HWADDR: u16 = 8;
pub const NFULA_PAYLOAD: u16 = 9;
pub const NFULA_PREFIX: u16 = 10;
pub const NFULA_UID: u16 = 11;
pub const NFULA_SEQ: u16 = 12;
pub const NFULA_SEQ_GLOBAL: u16 = 13;
pub const NFULA_GID: u16 = 14;
pub const NFULA_HWTYPE: u16 = 15;
pub const NFULA_HWHEADER: u16 = 16;
pub const NFULA_HWLEN: u16 = 17;
pub const NFULA_CT: u16 = 18;
pub const NFULA_CT_INFO: u16 = 19;

/// Slots in a log attribute table.
pub const NFULA_TABLE_SIZE: usize = NFULA_CT_INFO as usize + 1;

/// Open a socket, bind the configured groups and stream their log entries.
///
/// The socket is closed if any setup step fails.
pub async fn listen(config: LogConfig) -> Result<LogStream<NetlinkSocket>> {
    let mut group: LogGroup = LogGroup::new(config);
    group.open()?;
    group.bring_up().await?;
    group.into_stream()
}
