//! Verdict messages.
//!
//! A verdict is sent as a single vectored write of three segments:
//!
//! 1. netlink header + nfgenmsg + `NFQA_VERDICT_HDR` [+ `NFQA_MARK`],
//!    encoded into a stack buffer;
//! 2. the 4-byte header of the `NFQA_PAYLOAD` attribute, whose `nla_len`
//!    is the unpadded payload length plus 4;
//! 3. the payload itself, zero-padded to a 4-byte boundary in place.
//!
//! The netlink length in segment 1 is the number of bytes written:
//! `len(segment 1) + nla_align(4 + payload_len)`.

use std::io::IoSlice;
use std::sync::Arc;

use zerocopy::byteorder::network_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::netlink::attr::{MAX_ATTR_PAYLOAD, NLA_HDRLEN, NlAttr, nla_align};
use crate::netlink::error::{Error, Result};
use crate::netlink::message::{NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgHdr};
use crate::netlink::nfgen::{NFGEN_HDRLEN, NFNL_SUBSYS_QUEUE, NfGenMsg, nfnl_msg_type};
use crate::netlink::socket::{NetlinkIo, NetlinkSocket};
use crate::netlink::transport::Transport;

use super::{NFQA_MARK, NFQA_PAYLOAD, NFQA_VERDICT_HDR, NFQNL_MSG_VERDICT};

// Netfilter verdicts (linux/netfilter.h)
pub const NF_DROP: u32 = 0;
pub const NF_ACCEPT: u32 = 1;
pub const NF_STOLEN: u32 = 2;
pub const NF_QUEUE: u32 = 3;
pub const NF_REPEAT: u32 = 4;
pub const NF_STOP: u32 = 5;

/// Size of segment 1 with both the verdict and mark attributes.
pub const VERDICT_HEADER_MAX: usize =
    NLMSG_HDRLEN + NFGEN_HDRLEN + nla_align(NLA_HDRLEN + 8) + nla_align(NLA_HDRLEN + 4);

/// Largest payload an `NFQA_PAYLOAD` attribute can describe.
pub const MAX_VERDICT_PAYLOAD: usize = MAX_ATTR_PAYLOAD;

/// What the kernel should do with a queued packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Discard the packet.
    Drop,
    /// Let the packet continue through the stack.
    Accept,
    /// The packet was taken over; forget about it.
    Stolen,
    /// Re-queue the packet to another queue number.
    Queue(u16),
    /// Re-inject at the start of the current hook.
    Repeat,
    /// Accept and stop traversing the current hook.
    Stop,
}

impl Disposition {
    /// Wire value; `Queue(n)` carries the target queue in the upper 16 bits.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Drop => NF_DROP,
            Self::Accept => NF_ACCEPT,
            Self::Stolen => NF_STOLEN,
            Self::Queue(num) => NF_QUEUE | (u32::from(num) << 16),
            Self::Repeat => NF_REPEAT,
            Self::Stop => NF_STOP,
        }
    }

    /// Decode a wire value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw & 0xffff {
            NF_DROP => Some(Self::Drop),
            NF_ACCEPT => Some(Self::Accept),
            NF_STOLEN => Some(Self::Stolen),
            NF_QUEUE => Some(Self::Queue((raw >> 16) as u16)),
            NF_REPEAT => Some(Self::Repeat),
            NF_STOP => Some(Self::Stop),
            _ => None,
        }
    }
}

/// A verdict for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Kernel-assigned packet id.
    pub packet_id: u32,
    /// What to do with the packet.
    pub disposition: Disposition,
    /// New packet mark, if it should change.
    pub mark: Option<u32>,
}

impl Verdict {
    /// Verdict for `packet_id`.
    pub fn new(packet_id: u32, disposition: Disposition) -> Self {
        Self {
            packet_id,
            disposition,
            mark: None,
        }
    }

    /// Accept `packet_id`.
    pub fn accept(packet_id: u32) -> Self {
        Self::new(packet_id, Disposition::Accept)
    }

    /// Drop `packet_id`.
    pub fn drop(packet_id: u32) -> Self {
        Self::new(packet_id, Disposition::Drop)
    }

    /// Also set the packet mark.
    pub fn mark(mut self, mark: u32) -> Self {
        self.mark = Some(mark);
        self
    }
}

/// `struct nfqnl_msg_verdict_hdr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct VerdictHdr {
    verdict: U32,
    id: U32,
}

/// Segment 1 of a verdict message, built on the stack.
struct VerdictHeader {
    buf: [u8; VERDICT_HEADER_MAX],
    len: usize,
}

impl VerdictHeader {
    fn encode(queue_num: u16, verdict: &Verdict, payload_len: usize, seq: u32) -> Result<Self> {
        let mut header = Self {
            buf: [0; VERDICT_HEADER_MAX],
            len: NLMSG_HDRLEN,
        };

        header.push(NfGenMsg::new(libc::AF_UNSPEC as u8, queue_num).as_bytes());
        let hdr = VerdictHdr {
            verdict: U32::new(verdict.disposition.as_raw()),
            id: U32::new(verdict.packet_id),
        };
        header.push_attr(NFQA_VERDICT_HDR, hdr.as_bytes())?;
        if let Some(mark) = verdict.mark {
            header.push_attr(NFQA_MARK, &mark.to_be_bytes())?;
        }

        let payload_space = if payload_len > 0 {
            nla_align(NLA_HDRLEN + payload_len)
        } else {
            0
        };
        let nlh = NlMsgHdr {
            nlmsg_len: (header.len + payload_space) as u32,
            nlmsg_type: nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_VERDICT),
            nlmsg_flags: NLM_F_REQUEST,
            nlmsg_seq: seq,
            nlmsg_pid: 0,
        };
        header.buf[..NLMSG_HDRLEN].copy_from_slice(nlh.as_bytes());
        Ok(header)
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len = nla_align(self.len + bytes.len());
    }

    fn push_attr(&mut self, attr_type: u16, value: &[u8]) -> Result<()> {
        self.push(NlAttr::new(attr_type, value.len())?.as_bytes());
        self.push(value);
        Ok(())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Sends verdicts for one queue. Cheap to clone and usable from any task.
pub struct VerdictHandle<S: NetlinkIo = NetlinkSocket> {
    transport: Arc<Transport<S>>,
    queue_num: u16,
}

impl<S: NetlinkIo> Clone for VerdictHandle<S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            queue_num: self.queue_num,
        }
    }
}

impl<S: NetlinkIo> std::fmt::Debug for VerdictHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictHandle")
            .field("queue_num", &self.queue_num)
            .field("open", &self.transport.is_open())
            .finish()
    }
}

impl<S: NetlinkIo> VerdictHandle<S> {
    pub(crate) fn new(transport: Arc<Transport<S>>, queue_num: u16) -> Self {
        Self {
            transport,
            queue_num,
        }
    }

    /// Queue number verdicts are addressed to.
    pub fn queue_num(&self) -> u16 {
        self.queue_num
    }

    /// Set the verdict for `packet_id`, re-injecting `payload`.
    ///
    /// `payload` is padded in place for the write and truncated back to its
    /// original length afterwards.
    pub fn set_verdict(
        &self,
        disposition: Disposition,
        packet_id: u32,
        payload: &mut Vec<u8>,
    ) -> Result<()> {
        self.send_verdict(&Verdict::new(packet_id, disposition), Some(payload))
    }

    /// Like [`set_verdict`](Self::set_verdict), also setting the packet mark.
    pub fn set_verdict_with_mark(
        &self,
        disposition: Disposition,
        mark: u32,
        packet_id: u32,
        payload: &mut Vec<u8>,
    ) -> Result<()> {
        self.send_verdict(
            &Verdict::new(packet_id, disposition).mark(mark),
            Some(payload),
        )
    }

    /// Send `verdict`, optionally replacing the packet contents with `payload`.
    ///
    /// Without a payload (or with an empty one) only segment 1 is written.
    pub fn send_verdict(&self, verdict: &Verdict, payload: Option<&mut Vec<u8>>) -> Result<()> {
        let seq = self.transport.next_seq();
        let payload = payload.filter(|p| !p.is_empty());

        let Some(payload) = payload else {
            let header = VerdictHeader::encode(self.queue_num, verdict, 0, seq)?;
            self.transport
                .send_vectored(&[IoSlice::new(header.as_bytes())])?;
            return Ok(());
        };

        let packet_len = payload.len();
        if packet_len > MAX_VERDICT_PAYLOAD {
            return Err(Error::InvalidAttribute(format!(
                "verdict payload of {} bytes exceeds {}",
                packet_len, MAX_VERDICT_PAYLOAD
            )));
        }

        let header = VerdictHeader::encode(self.queue_num, verdict, packet_len, seq)?;
        let payload_attr = NlAttr::new(NFQA_PAYLOAD, packet_len)?;

        payload.resize(nla_align(packet_len), 0);
        let result = self.transport.send_vectored(&[
            IoSlice::new(header.as_bytes()),
            IoSlice::new(payload_attr.as_bytes()),
            IoSlice::new(payload.as_slice()),
        ]);
        payload.truncate(packet_len);

        result.map(|_| ())
    }
}
