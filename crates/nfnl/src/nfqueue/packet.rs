//! Queued packets.

use std::fmt;

use winnow::Parser;
use winnow::binary::{be_u16, be_u32, le_u8};

use crate::netlink::attr::get;
use crate::netlink::error::{Error, Result};
use crate::netlink::parse::{FromNetlink, PResult};
use crate::netlink::socket::{NetlinkIo, NetlinkSocket};
use crate::netlink::table::AttrTable;

use super::pool::PooledBuf;
use super::verdict::{Disposition, Verdict, VerdictHandle};
use super::{
    NFQA_CAP_LEN, NFQA_GID, NFQA_IFINDEX_INDEV, NFQA_IFINDEX_OUTDEV, NFQA_IFINDEX_PHYSINDEV,
    NFQA_IFINDEX_PHYSOUTDEV, NFQA_MARK, NFQA_PACKET_HDR, NFQA_PAYLOAD, NFQA_UID,
};

/// `struct nfqnl_msg_packet_hdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHdr {
    /// Kernel-assigned packet id, echoed back in the verdict.
    pub packet_id: u32,
    /// Link-layer protocol (ethertype).
    pub hw_protocol: u16,
    /// Netfilter hook the packet was queued from.
    pub hook: u8,
}

impl FromNetlink for PacketHdr {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let packet_id = be_u32.parse_next(input)?;
        let hw_protocol = be_u16.parse_next(input)?;
        let hook = le_u8.parse_next(input)?;
        Ok(Self {
            packet_id,
            hw_protocol,
            hook,
        })
    }
}

/// Packet metadata decoded from one notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PacketMeta {
    pub id: u32,
    pub hw_protocol: u16,
    pub hook: u8,
    pub mark: Option<u32>,
    pub indev: Option<u32>,
    pub outdev: Option<u32>,
    pub physindev: Option<u32>,
    pub physoutdev: Option<u32>,
    pub cap_len: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl PacketMeta {
    /// Pull the metadata out of a decoded attribute table.
    ///
    /// The packet header is required; everything else is optional.
    pub(crate) fn from_table<const N: usize>(attrs: &AttrTable<'_, N>) -> Result<Self> {
        let hdr = attrs
            .get(NFQA_PACKET_HDR)
            .ok_or_else(|| Error::InvalidMessage("packet without NFQA_PACKET_HDR".into()))?;
        let hdr = PacketHdr::from_bytes(hdr)?;

        let u32_attr = |kind| attrs.get(kind).map(get::u32_be).transpose();
        Ok(Self {
            id: hdr.packet_id,
            hw_protocol: hdr.hw_protocol,
            hook: hdr.hook,
            mark: u32_attr(NFQA_MARK)?,
            indev: u32_attr(NFQA_IFINDEX_INDEV)?,
            outdev: u32_attr(NFQA_IFINDEX_OUTDEV)?,
            physindev: u32_attr(NFQA_IFINDEX_PHYSINDEV)?,
            physoutdev: u32_attr(NFQA_IFINDEX_PHYSOUTDEV)?,
            cap_len: u32_attr(NFQA_CAP_LEN)?,
            uid: u32_attr(NFQA_UID)?,
            gid: u32_attr(NFQA_GID)?,
        })
    }

    /// The raw payload attribute, if any.
    pub(crate) fn payload<'a, const N: usize>(attrs: &AttrTable<'a, N>) -> &'a [u8] {
        attrs.get(NFQA_PAYLOAD).unwrap_or_default()
    }
}

/// A packet waiting for a verdict.
///
/// The payload lives in a pooled buffer that goes back to the pool when
/// the packet is dropped or [`free`](Self::free)d. The verdict methods
/// consume the packet and release the buffer once the verdict is written;
/// use [`verdict_handle`](Self::verdict_handle) to answer later instead.
pub struct Packet<S: NetlinkIo = NetlinkSocket> {
    meta: PacketMeta,
    buf: PooledBuf,
    verdicts: VerdictHandle<S>,
}

impl<S: NetlinkIo> Packet<S> {
    pub(crate) fn new(meta: PacketMeta, buf: PooledBuf, verdicts: VerdictHandle<S>) -> Self {
        Self {
            meta,
            buf,
            verdicts,
        }
    }

    /// Kernel-assigned packet id.
    pub fn id(&self) -> u32 {
        self.meta.id
    }

    /// Packet mark, if the kernel sent one.
    pub fn mark(&self) -> Option<u32> {
        self.meta.mark
    }

    /// Link-layer protocol (ethertype).
    pub fn hw_protocol(&self) -> u16 {
        self.meta.hw_protocol
    }

    /// Netfilter hook number.
    pub fn hook(&self) -> u8 {
        self.meta.hook
    }

    /// Input interface index.
    pub fn indev(&self) -> Option<u32> {
        self.meta.indev
    }

    /// Output interface index.
    pub fn outdev(&self) -> Option<u32> {
        self.meta.outdev
    }

    /// Physical input interface index (bridged traffic).
    pub fn physindev(&self) -> Option<u32> {
        self.meta.physindev
    }

    /// Physical output interface index (bridged traffic).
    pub fn physoutdev(&self) -> Option<u32> {
        self.meta.physoutdev
    }

    /// Original packet length when the payload was truncated to the copy range.
    pub fn cap_len(&self) -> Option<u32> {
        self.meta.cap_len
    }

    pub fn uid(&self) -> Option<u32> {
        self.meta.uid
    }

    pub fn gid(&self) -> Option<u32> {
        self.meta.gid
    }

    /// Queue this packet came from.
    pub fn queue_num(&self) -> u16 {
        self.verdicts.queue_num()
    }

    /// Packet contents (empty unless the copy mode is `Packet`).
    pub fn payload(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Mutable packet contents, for rewriting before
    /// [`set_verdict_with_payload`](Self::set_verdict_with_payload).
    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut_vec()
    }

    /// Handle that can send verdicts for this packet's queue.
    pub fn verdict_handle(&self) -> &VerdictHandle<S> {
        &self.verdicts
    }

    /// Let the packet through.
    pub fn accept(self) -> Result<()> {
        self.set_verdict(Disposition::Accept)
    }

    /// Discard the packet.
    pub fn drop_packet(self) -> Result<()> {
        self.set_verdict(Disposition::Drop)
    }

    /// Set a verdict without touching the packet contents.
    pub fn set_verdict(self, disposition: Disposition) -> Result<()> {
        self.verdicts
            .send_verdict(&Verdict::new(self.meta.id, disposition), None)
    }

    /// Set a verdict and a new mark.
    pub fn set_verdict_with_mark(self, disposition: Disposition, mark: u32) -> Result<()> {
        self.verdicts
            .send_verdict(&Verdict::new(self.meta.id, disposition).mark(mark), None)
    }

    /// Set a verdict, re-injecting the (possibly modified) payload.
    pub fn set_verdict_with_payload(mut self, disposition: Disposition) -> Result<()> {
        let verdict = Verdict::new(self.meta.id, disposition);
        self.verdicts
            .send_verdict(&verdict, Some(self.buf.as_mut_vec()))
    }

    /// Return the payload buffer to the pool.
    pub fn free(self) {
        drop(self)
    }
}

impl<S: NetlinkIo> fmt::Debug for Packet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.meta.id)
            .field("queue", &self.queue_num())
            .field("hw_protocol", &format_args!("{:#06x}", self.meta.hw_protocol))
            .field("hook", &self.meta.hook)
            .field("mark", &self.meta.mark)
            .field("indev", &self.meta.indev)
            .field("payload_len", &self.buf.as_slice().len())
            .finish()
    }
}
