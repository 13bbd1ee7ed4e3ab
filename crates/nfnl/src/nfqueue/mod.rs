//! NFQUEUE: user-space packet verdicts.
//!
//! The kernel diverts packets matched by an `NFQUEUE` rule to a numbered
//! queue; a process bound to that queue receives each packet and must
//! answer with a verdict.
//!
//! # Example
//!
//! ```ignore
//! use nfnl::nfqueue::{self, Flow, QueueConfig};
//!
//! #[tokio::main]
//! async fn main() -> nfnl::Result<()> {
//!     let handle = nfqueue::create_and_start(
//!         QueueConfig::new(0),
//!         |packet| {
//!             let _ = packet.accept();
//!             Flow::Continue
//!         },
//!         |err| eprintln!("queue error: {err}"),
//!     )
//!     .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop_queue().await
//! }
//! ```

mod config;
mod controller;
mod dispatch;
mod packet;
mod pool;
mod verdict;

pub use config::{
    CopyMode, DEFAULT_COPY_RANGE, DEFAULT_MAX_QUEUE_LEN, DEFAULT_POOL_SIZE, MAX_COPY_RANGE,
    QueueConfig,
};
pub use controller::{Queue, QueueState};
pub use dispatch::{Flow, LoopExit, QueueHandle};
pub use packet::{Packet, PacketHdr};
pub use pool::{BufferPool, PooledBuf};
pub use verdict::{
    Disposition, MAX_VERDICT_PAYLOAD, NF_ACCEPT, NF_DROP, NF_QUEUE, NF_REPEAT, NF_STOLEN,
    NF_STOP, VERDICT_HEADER_MAX, Verdict, VerdictHandle,
};

use crate::netlink::error::{Error, Result};
use crate::netlink::socket::NetlinkSocket;

// Message types (linux/netfilter/nfnetlink_queue.h)
pub const NFQNL_MSG_PACKET: u8 = 0;
pub const NFQNL_MSG_VERDICT: u8 = 1;
pub const NFQNL_MSG_CONFIG: u8 = 2;
pub const NFQNL_MSG_VERDICT_BATCH: u8 = 3;

// Packet attributes
pub const NFQA_UNSPEC: u16 = 0;
pub const NFQA_PACKET_HDR: u16 = 1;
pub const NFQA_VERDICT_HDR: u16 = 2;
pub const NFQA_MARK: u16 = 3;
pub const NFQA_TIMESTAMP: u16 = 4;
pub const NFQA_IFINDEX_INDEV: u16 = 5;
pub const NFQA_IFINDEX_OUTDEV: u16 = 6;
pub const NFQA_IFINDEX_PHYSINDEV: u16 = 7;
pub const NFQA_IFINDEX_PHYSOUTDEV: u16 = 8;
pub const NFQA_HWADDR: u16 = 9;
pub const NFQA_PAYLOAD: u16 = 10;
pub const NFQA_CT: u16 = 11;
pub const NFQA_CT_INFO: u16 = 12;
pub const NFQA_CAP_LEN: u16 = 13;
pub const NFQA_SKB_INFO: u16 = 14;
pub const NFQA_EXP: u16 = 15;
pub const NFQA_UID: u16 = 16;
pub const NFQA_GID: u16 = 17;
pub const NFQA_SECCTX: u16 = 18;
pub const NFQA_VLAN: u16 = 19;
pub const NFQA_L2HDR: u16 = 20;
pub const NFQA_PRIORITY: u16 = 21;
pub const NFQA_CGROUP_CLASSID: u16 = 22;

/// Slots in a packet attribute table.
pub const NFQA_TABLE_SIZE: usize = NFQA_CGROUP_CLASSID as usize + 1;

// Config attributes
pub const NFQA_CFG_UNSPEC: u16 = 0;
pub const NFQA_CFG_CMD: u16 = 1;
pub const NFQA_CFG_PARAMS: u16 = 2;
pub const NFQA_CFG_QUEUE_MAXLEN: u16 = 3;
pub const NFQA_CFG_MASK: u16 = 4;
pub const NFQA_CFG_FLAGS: u16 = 5;

// Config commands
pub const NFQNL_CFG_CMD_NONE: u8 = 0;
pub const NFQNL_CFG_CMD_BIND: u8 = 1;
pub const NFQNL_CFG_CMD_UNBIND: u8 = 2;
pub const NFQNL_CFG_CMD_PF_BIND: u8 = 3;
pub const NFQNL_CFG_CMD_PF_UNBIND: u8 = 4;

// Copy modes
pub const NFQNL_COPY_NONE: u8 = 0;
pub const NFQNL_COPY_META: u8 = 1;
pub const NFQNL_COPY_PACKET: u8 = 2;

// Queue flags (NFQA_CFG_FLAGS)
pub const NFQA_CFG_F_FAIL_OPEN: u32 = 1 << 0;
pub const NFQA_CFG_F_CONNTRACK: u32 = 1 << 1;
pub const NFQA_CFG_F_GSO: u32 = 1 << 2;
pub const NFQA_CFG_F_UID_GID: u32 = 1 << 3;
pub const NFQA_CFG_F_SECCTX: u32 = 1 << 4;

/// Open a queue, configure it, and start its receive loop.
///
/// Runs [`Queue::bring_up`] and [`Queue::start`]; on any configuration
/// failure the socket is closed and the first error returned.
pub async fn create_and_start<F, E>(
    config: QueueConfig,
    on_packet: F,
    on_error: E,
) -> Result<QueueHandle<NetlinkSocket>>
where
    F: FnMut(Packet<NetlinkSocket>) -> Flow + Send + 'static,
    E: FnMut(&Error) + Send + 'static,
{
    let mut queue: Queue = Queue::new(config);
    queue.open()?;
    queue.bring_up().await?;
    queue.start(on_packet, on_error)
}
