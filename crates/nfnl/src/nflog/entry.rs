//! Decoded log messages.

use std::net::Ipv4Addr;
use std::time::Duration;

use winnow::Parser;
use winnow::binary::{be_u16, be_u32, be_u64, le_u8};
use winnow::error::{ContextError, ErrMode};
use winnow::token::take;

use crate::netlink::attr::get;
use crate::netlink::error::{Error, Result};
use crate::netlink::nfgen::{NFGEN_HDRLEN, NfGenMsg};
use crate::netlink::parse::{FromNetlink, PResult};
use crate::netlink::table::AttrTable;

use super::{
    NFULA_GID, NFULA_HWADDR, NFULA_IFINDEX_INDEV, NFULA_IFINDEX_OUTDEV, NFULA_IFINDEX_PHYSINDEV,
    NFULA_IFINDEX_PHYSOUTDEV, NFULA_MARK, NFULA_PACKET_HDR, NFULA_PAYLOAD, NFULA_PREFIX,
    NFULA_SEQ, NFULA_SEQ_GLOBAL, NFULA_TIMESTAMP, NFULA_UID,
};

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// `struct nfulnl_msg_packet_hdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogPacketHdr {
    hw_protocol: u16,
    hook: u8,
}

impl FromNetlink for LogPacketHdr {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let hw_protocol = be_u16.parse_next(input)?;
        let hook = le_u8.parse_next(input)?;
        Ok(Self { hw_protocol, hook })
    }
}

/// `struct nfulnl_msg_packet_timestamp`.
struct Timestamp(Duration);

impl FromNetlink for Timestamp {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let sec = be_u64.parse_next(input)?;
        let usec = be_u64.parse_next(input)?;
        Ok(Self(
            Duration::from_secs(sec) + Duration::from_micros(usec % 1_000_000),
        ))
    }
}

/// `struct nfulnl_msg_packet_hw`: be16 length, 2 bytes padding, 8 address bytes.
struct HwAddr(Vec<u8>);

impl FromNetlink for HwAddr {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let len = be_u16.parse_next(input)?;
        let _pad = be_u16.parse_next(input)?;
        let addr: &[u8] = take(8usize).parse_next(input)?;
        Ok(Self(addr[..usize::from(len).min(8)].to_vec()))
    }
}

/// One packet logged by an `NFLOG` rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LogEntry {
    /// Log group the entry arrived on.
    pub group: u16,
    /// Address family of the packet.
    pub family: u8,
    /// Link-layer protocol (ethertype).
    pub hw_protocol: u16,
    /// Netfilter hook number.
    pub hook: u8,
    pub mark: Option<u32>,
    /// Time since the Unix epoch, when the kernel stamped the packet.
    pub timestamp: Option<Duration>,
    pub indev: Option<u32>,
    pub outdev: Option<u32>,
    pub physindev: Option<u32>,
    pub physoutdev: Option<u32>,
    /// Source hardware address.
    pub hwaddr: Option<Vec<u8>>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Per-instance sequence number (`NFULNL_CFG_F_SEQ`).
    pub seq: Option<u32>,
    /// Global sequence number (`NFULNL_CFG_F_SEQ_GLOBAL`).
    pub seq_global: Option<u32>,
    /// The rule's `--nflog-prefix`.
    pub prefix: Option<String>,
    /// Copied packet bytes (network header first).
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Decode one `NFULNL_MSG_PACKET` payload (nfgenmsg + attributes).
    pub(crate) fn decode<'a, const N: usize>(
        payload: &'a [u8],
        attrs: &mut AttrTable<'a, N>,
    ) -> Result<Self> {
        let nfgen = NfGenMsg::from_bytes(payload)?;
        attrs.decode(&payload[NFGEN_HDRLEN..])?;

        let hdr = attrs
            .get(NFULA_PACKET_HDR)
            .ok_or_else(|| Error::InvalidMessage("log entry without NFULA_PACKET_HDR".into()))?;
        let hdr = LogPacketHdr::from_bytes(hdr)?;

        let u32_attr = |kind| attrs.get(kind).map(get::u32_be).transpose();
        Ok(Self {
            group: nfgen.res_id(),
            family: nfgen.family,
            hw_protocol: hdr.hw_protocol,
            hook: hdr.hook,
            mark: u32_attr(NFULA_MARK)?,
            timestamp: attrs
                .get(NFULA_TIMESTAMP)
                .map(Timestamp::from_bytes)
                .transpose()?
                .map(|t| t.0),
            indev: u32_attr(NFULA_IFINDEX_INDEV)?,
            outdev: u32_attr(NFULA_IFINDEX_OUTDEV)?,
            physindev: u32_attr(NFULA_IFINDEX_PHYSINDEV)?,
            physoutdev: u32_attr(NFULA_IFINDEX_PHYSOUTDEV)?,
            hwaddr: attrs
                .get(NFULA_HWADDR)
                .map(HwAddr::from_bytes)
                .transpose()?
                .map(|h| h.0),
            uid: u32_attr(NFULA_UID)?,
            gid: u32_attr(NFULA_GID)?,
            seq: u32_attr(NFULA_SEQ)?,
            seq_global: u32_attr(NFULA_SEQ_GLOBAL)?,
            prefix: attrs
                .get(NFULA_PREFIX)
                .map(|p| get::string(p).map(str::to_owned))
                .transpose()?,
            payload: attrs.get(NFULA_PAYLOAD).unwrap_or_default().to_vec(),
        })
    }

    /// Summarize the payload as an IPv4 packet, if it is one.
    pub fn ipv4(&self) -> Option<Ipv4Summary> {
        Ipv4Summary::parse(&self.payload)
    }
}

/// Addresses, protocol and ports of an IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Ipv4Summary {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// IP protocol number.
    pub protocol: u8,
    /// Total length from the IP header.
    pub total_len: u16,
    /// Source port for TCP and UDP.
    pub src_port: Option<u16>,
    /// Destination port for TCP and UDP.
    pub dst_port: Option<u16>,
}

impl Ipv4Summary {
    /// Parse the IPv4 header (and the first transport header bytes) of `packet`.
    ///
    /// Ports are only read from the first fragment.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let mut input = packet;
        ipv4_header(&mut input).ok()?.finish(packet)
    }
}

struct Ipv4Header {
    header_len: usize,
    total_len: u16,
    fragment_offset: u16,
    protocol: u8,
    src: u32,
    dst: u32,
}

impl Ipv4Header {
    fn finish(self, packet: &[u8]) -> Option<Ipv4Summary> {
        let ports = match self.protocol {
            IPPROTO_TCP | IPPROTO_UDP if self.fragment_offset == 0 => packet
                .get(self.header_len..self.header_len + 4)
                .map(|p| {
                    (
                        u16::from_be_bytes([p[0], p[1]]),
                        u16::from_be_bytes([p[2], p[3]]),
                    )
                }),
            _ => None,
        };
        Some(Ipv4Summary {
            src: Ipv4Addr::from(self.src),
            dst: Ipv4Addr::from(self.dst),
            protocol: self.protocol,
            total_len: self.total_len,
            src_port: ports.map(|p| p.0),
            dst_port: ports.map(|p| p.1),
        })
    }
}

fn ipv4_header(input: &mut &[u8]) -> PResult<Ipv4Header> {
    let version_ihl = le_u8.parse_next(input)?;
    if version_ihl >> 4 != 4 || version_ihl & 0x0f < 5 {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    let _tos = le_u8.parse_next(input)?;
    let total_len = be_u16.parse_next(input)?;
    let _id = be_u16.parse_next(input)?;
    let flags_fragment = be_u16.parse_next(input)?;
    let _ttl = le_u8.parse_next(input)?;
    let protocol = le_u8.parse_next(input)?;
    let _checksum = be_u16.parse_next(input)?;
    let src = be_u32.parse_next(input)?;
    let dst = be_u32.parse_next(input)?;
    Ok(Ipv4Header {
        header_len: usize::from(version_ihl & 0x0f) * 4,
        total_len,
        fragment_offset: flags_fragment & 0x1fff,
        protocol,
        src,
        dst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::builder::MessageBuilder;
    use crate::netlink::message::NLMSG_HDRLEN;
    use crate::netlink::nfgen::NFNL_SUBSYS_ULOG;
    use crate::nflog::{NFULA_TABLE_SIZE, NFULNL_MSG_PACKET};

    fn udp_packet() -> Vec<u8> {
        let mut p = vec![
            0x45, 0, 0, 32, // version/ihl, tos, total length
            0, 1, 0x40, 0, // id, flags (DF)
            64, IPPROTO_UDP, 0, 0, // ttl, protocol, checksum
            10, 0, 0, 1, // src
            10, 0, 0, 2, // dst
        ];
        p.extend_from_slice(&[0x30, 0x39, 0, 53, 0, 12, 0, 0]);
        p.extend_from_slice(b"ping");
        p
    }

    fn log_message(group: u16) -> Vec<u8> {
        let mut msg = MessageBuilder::nfnetlink(NFNL_SUBSYS_ULOG, NFULNL_MSG_PACKET, 0, 2, group);
        msg.append_attr(NFULA_PACKET_HDR, &[0x08, 0x00, 3, 0])
            .unwrap();
        msg.append_attr_u32_be(NFULA_MARK, 7);
        let mut ts = Vec::new();
        ts.extend_from_slice(&1_700_000_000u64.to_be_bytes());
        ts.extend_from_slice(&250_000u64.to_be_bytes());
        msg.append_attr(NFULA_TIMESTAMP, &ts).unwrap();
        msg.append_attr(
            NFULA_HWADDR,
            &[0, 6, 0, 0, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0, 0],
        )
        .unwrap();
        msg.append_attr_str(NFULA_PREFIX, "dropped: ").unwrap();
        msg.append_attr_u32_be(NFULA_SEQ, 12);
        msg.append_attr(NFULA_PAYLOAD, &udp_packet()).unwrap();
        msg.finish()
    }

    #[test]
    fn test_decode_entry() {
        let msg = log_message(10);
        let mut attrs = AttrTable::<NFULA_TABLE_SIZE>::new();
        let entry = LogEntry::decode(&msg[NLMSG_HDRLEN..], &mut attrs).unwrap();

        assert_eq!(entry.group, 10);
        assert_eq!(entry.family, 2);
        assert_eq!(entry.hw_protocol, 0x0800);
        assert_eq!(entry.hook, 3);
        assert_eq!(entry.mark, Some(7));
        assert_eq!(
            entry.timestamp,
            Some(Duration::from_secs(1_700_000_000) + Duration::from_millis(250))
        );
        assert_eq!(entry.hwaddr.as_deref(), Some(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff][..]));
        assert_eq!(entry.prefix.as_deref(), Some("dropped: "));
        assert_eq!(entry.seq, Some(12));
        assert_eq!(entry.seq_global, None);
        assert_eq!(entry.indev, None);
        assert_eq!(entry.payload, udp_packet());
    }

    #[test]
    fn test_decode_requires_header() {
        let mut msg = MessageBuilder::nfnetlink(NFNL_SUBSYS_ULOG, NFULNL_MSG_PACKET, 0, 2, 1);
        msg.append_attr_u32_be(NFULA_MARK, 7);
        let msg = msg.finish();
        let mut attrs = AttrTable::<NFULA_TABLE_SIZE>::new();
        assert!(matches!(
            LogEntry::decode(&msg[NLMSG_HDRLEN..], &mut attrs),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_ipv4_udp_summary() {
        let summary = Ipv4Summary::parse(&udp_packet()).unwrap();
        assert_eq!(summary.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(summary.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(summary.protocol, IPPROTO_UDP);
        assert_eq!(summary.total_len, 32);
        assert_eq!(summary.src_port, Some(12345));
        assert_eq!(summary.dst_port, Some(53));
    }

    #[test]
    fn test_ipv4_non_first_fragment_has_no_ports() {
        let mut packet = udp_packet();
        packet[6] = 0x00;
        packet[7] = 0x10;
        let summary = Ipv4Summary::parse(&packet).unwrap();
        assert_eq!(summary.src_port, None);
    }

    #[test]
    fn test_ipv4_rejects_other_packets() {
        assert!(Ipv4Summary::parse(&[]).is_none());
        assert!(Ipv4Summary::parse(&[0x60; 40]).is_none());
        assert!(Ipv4Summary::parse(&udp_packet()[..12]).is_none());

        // ICMP: addresses but no ports
        let mut icmp = udp_packet();
        icmp[9] = 1;
        let summary = Ipv4Summary::parse(&icmp).unwrap();
        assert_eq!(summary.protocol, 1);
        assert_eq!(summary.dst_port, None);
    }
}
