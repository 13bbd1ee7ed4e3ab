//! Netlink plumbing shared by the netfilter subsystems.
//!
//! This module covers the wire format (message headers, attributes, the
//! nfnetlink generic header), a fixed-size attribute table for decoding
//! notifications, and the socket/transport pair that sends requests and
//! waits for their acknowledgements.
//!
//! Everything here is subsystem-agnostic; [`crate::nfqueue`] and
//! [`crate::nflog`] build their messages on top of it.

pub mod attr;
pub mod builder;
pub(crate) mod error;
pub mod message;
pub mod nfgen;
pub mod parse;
pub mod socket;
pub mod table;
pub mod transport;

pub use attr::{AttrIter, NlAttr};
pub use builder::{MessageBuilder, NestToken};
pub use error::{Error, Result};
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgHdr, NlMsgType};
pub use nfgen::{NFGEN_HDRLEN, NfGenMsg, nfnl_msg_type};
pub use parse::FromNetlink;
pub use socket::{NFNL_BUFFSIZE, NetlinkIo, NetlinkSocket, SocketConfig};
pub use table::AttrTable;
pub use transport::Transport;
