//! nfnetlink generic family header and subsystem ids.

use winnow::binary::{be_u16, le_u8};
use winnow::prelude::*;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::parse::{FromNetlink, PResult};

/// nfnetlink protocol version.
pub const NFNETLINK_V0: u8 = 0;

/// Size of the nfgenmsg header.
pub const NFGEN_HDRLEN: usize = std::mem::size_of::<NfGenMsg>();

// nfnetlink subsystems
pub const NFNL_SUBSYS_NONE: u8 = 0;
pub const NFNL_SUBSYS_CTNETLINK: u8 = 1;
pub const NFNL_SUBSYS_CTNETLINK_EXP: u8 = 2;
pub const NFNL_SUBSYS_QUEUE: u8 = 3;
pub const NFNL_SUBSYS_ULOG: u8 = 4;

/// Build an nfnetlink message type from subsystem and operation.
#[inline]
pub const fn nfnl_msg_type(subsys: u8, op: u8) -> u16 {
    ((subsys as u16) << 8) | op as u16
}

/// nfgenmsg header (4 bytes).
///
/// `res_id` is big-endian on the wire: it carries the queue number for
/// NFQUEUE and the group number for NFLOG.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NfGenMsg {
    /// Address family (`AF_INET`, `AF_UNSPEC`, ...).
    pub family: u8,
    /// nfnetlink version, always [`NFNETLINK_V0`].
    pub version: u8,
    res_id: U16,
}

impl NfGenMsg {
    /// Create a header for `family` addressing resource `res_id`.
    pub fn new(family: u8, res_id: u16) -> Self {
        Self {
            family,
            version: NFNETLINK_V0,
            res_id: U16::new(res_id),
        }
    }

    /// Resource id (queue or group number) in host order.
    pub fn res_id(&self) -> u16 {
        self.res_id.get()
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

impl std::fmt::Debug for NfGenMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfGenMsg")
            .field("family", &self.family)
            .field("version", &self.version)
            .field("res_id", &self.res_id())
            .finish()
    }
}

impl FromNetlink for NfGenMsg {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let family = le_u8.parse_next(input)?;
        let version = le_u8.parse_next(input)?;
        let res_id = be_u16.parse_next(input)?;
        Ok(Self {
            family,
            version,
            res_id: U16::new(res_id),
        })
    }
}
