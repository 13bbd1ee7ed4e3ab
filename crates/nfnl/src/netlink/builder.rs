//! Message builder for constructing netlink messages.

use zerocopy::{Immutable, IntoBytes};

use super::attr::{MAX_ATTR_PAYLOAD, NLA_F_NESTED, NLA_HDRLEN, NlAttr, nla_align};
use super::error::{Error, Result};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};
use super::nfgen::{NfGenMsg, nfnl_msg_type};

/// Token returned when starting a nested attribute.
/// Used to finalize the nested attribute length.
#[derive(Debug, Clone, Copy)]
pub struct NestToken {
    /// Offset of the nested attribute header in the buffer.
    offset: usize,
}

/// Builder for constructing netlink messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    /// Create a new message builder with the given type and flags.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        let header = NlMsgHdr::new(msg_type, flags);
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(header.as_bytes());
        Self { buf }
    }

    /// Create an nfnetlink message: header followed by the nfgenmsg sub-header.
    pub fn nfnetlink(subsys: u8, op: u8, flags: u16, family: u8, res_id: u16) -> Self {
        let mut builder = Self::new(nfnl_msg_type(subsys, op), flags);
        builder.append_header(&NfGenMsg::new(family, res_id));
        builder
    }

    /// Get the current message length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the message is empty (header only).
    pub fn is_empty(&self) -> bool {
        self.buf.len() == NLMSG_HDRLEN
    }

    /// Message type this builder was created with.
    pub fn msg_type(&self) -> u16 {
        u16::from_ne_bytes([self.buf[4], self.buf[5]])
    }

    /// Append raw bytes to the message (with alignment padding).
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        let aligned = nlmsg_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }

    /// Append a fixed-size wire struct to the message.
    pub fn append_header<T: IntoBytes + Immutable>(&mut self, data: &T) {
        self.append_bytes(data.as_bytes());
    }

    /// Append an attribute with the given type and data.
    ///
    /// Fails with [`Error::InvalidAttribute`] when `data` is longer than
    /// [`MAX_ATTR_PAYLOAD`]; the message is left unchanged.
    pub fn append_attr(&mut self, attr_type: u16, data: &[u8]) -> Result<()> {
        let attr = NlAttr::new(attr_type, data.len())?;
        self.push_attr(attr, &[data]);
        Ok(())
    }

    /// Append a wire struct as an attribute value.
    pub fn append_attr_struct<T: IntoBytes + Immutable>(&mut self, attr_type: u16, value: &T) {
        const { assert!(std::mem::size_of::<T>() <= MAX_ATTR_PAYLOAD) };
        self.push_fixed(attr_type, value.as_bytes());
    }

    /// Append a u8 attribute.
    pub fn append_attr_u8(&mut self, attr_type: u16, value: u8) {
        self.push_fixed(attr_type, &[value]);
    }

    /// Append a u16 attribute (big endian / network order).
    pub fn append_attr_u16_be(&mut self, attr_type: u16, value: u16) {
        self.push_fixed(attr_type, &value.to_be_bytes());
    }

    /// Append a u32 attribute (big endian / network order).
    pub fn append_attr_u32_be(&mut self, attr_type: u16, value: u32) {
        self.push_fixed(attr_type, &value.to_be_bytes());
    }

    /// Append a null-terminated string attribute.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) -> Result<()> {
        let attr = NlAttr::new(attr_type, value.len() + 1)?;
        self.push_attr(attr, &[value.as_bytes(), &[0]]);
        Ok(())
    }

    /// Start a nested attribute. Returns a token to finalize it.
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        let offset = self.buf.len();
        // Placeholder header with nested flag, length patched in nest_end
        let attr = NlAttr {
            nla_len: 0,
            nla_type: attr_type | NLA_F_NESTED,
        };
        self.buf.extend_from_slice(attr.as_bytes());
        NestToken { offset }
    }

    /// End a nested attribute started with `nest_start`.
    ///
    /// The nested length covers the header and every child, children's
    /// padding included. Children totalling more than [`MAX_ATTR_PAYLOAD`]
    /// bytes fail with [`Error::InvalidAttribute`].
    pub fn nest_end(&mut self, token: NestToken) -> Result<()> {
        let len = self.buf.len() - token.offset;
        let len = u16::try_from(len).map_err(|_| {
            Error::InvalidAttribute(format!(
                "nested attribute of {} bytes exceeds {}",
                len,
                u16::MAX
            ))
        })?;
        self.buf[token.offset..token.offset + 2].copy_from_slice(&len.to_ne_bytes());
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
        Ok(())
    }

    /// Append a value whose length is known to fit in `nla_len`.
    fn push_fixed(&mut self, attr_type: u16, data: &[u8]) {
        debug_assert!(data.len() <= MAX_ATTR_PAYLOAD);
        let attr = NlAttr {
            nla_len: (NLA_HDRLEN + data.len()) as u16,
            nla_type: attr_type,
        };
        self.push_attr(attr, &[data]);
    }

    fn push_attr(&mut self, attr: NlAttr, parts: &[&[u8]]) {
        self.buf.extend_from_slice(attr.as_bytes());
        for part in parts {
            self.buf.extend_from_slice(part);
        }
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }

    /// Set the flags.
    pub fn set_flags(&mut self, flags: u16) {
        self.buf[6..8].copy_from_slice(&flags.to_ne_bytes());
    }

    /// Add flags to those already set.
    pub fn add_flags(&mut self, flags: u16) {
        let current = u16::from_ne_bytes([self.buf[6], self.buf[7]]);
        self.set_flags(current | flags);
    }

    /// Set the sequence number.
    pub fn set_seq(&mut self, seq: u32) {
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
    }

    /// Set the port ID.
    pub fn set_pid(&mut self, pid: u32) {
        self.buf[12..16].copy_from_slice(&pid.to_ne_bytes());
    }

    /// Finalize and return the message bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }

    /// Get the current buffer for inspection.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{AttrIter, NLA_HDRLEN, get};
    use crate::netlink::message::{MessageIter, NLM_F_ACK, NLM_F_REQUEST};
    use crate::netlink::nfgen::{NFGEN_HDRLEN, NFNL_SUBSYS_QUEUE};
    use crate::netlink::parse::FromNetlink;

    #[test]
    fn test_simple_message() {
        let msg = MessageBuilder::new(16, NLM_F_REQUEST).finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN);
        assert_eq!(header.nlmsg_type, 16);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
    }

    #[test]
    fn test_framing_length() {
        let cases: [&[usize]; 5] = [&[], &[0], &[1, 2, 3], &[4, 5, 6, 7, 8, 9], &[11, 0, 13]];
        for lens in cases {
            let mut builder =
                MessageBuilder::nfnetlink(NFNL_SUBSYS_QUEUE, 2, NLM_F_REQUEST, 0, 7);
            for (i, &n) in lens.iter().enumerate() {
                builder.append_attr(i as u16 + 1, &vec![0xaa; n]).unwrap();
            }
            let msg = builder.finish();

            let expected = NLMSG_HDRLEN
                + NFGEN_HDRLEN
                + lens.iter().map(|&n| nla_align(NLA_HDRLEN + n)).sum::<usize>();
            assert_eq!(msg.len(), expected);
            let header = NlMsgHdr::from_bytes(&msg).unwrap();
            assert_eq!(header.nlmsg_len as usize, expected);
        }
    }

    #[test]
    fn test_nfnetlink_header() {
        let mut builder = MessageBuilder::nfnetlink(NFNL_SUBSYS_QUEUE, 2, NLM_F_REQUEST, 2, 7);
        builder.add_flags(NLM_F_ACK);
        builder.set_seq(5);
        builder.set_pid(99);
        assert_eq!(builder.msg_type(), 0x0302);
        let msg = builder.finish();

        let (hdr, payload) = MessageIter::new(&msg).next().unwrap().unwrap();
        assert_eq!(hdr.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(hdr.nlmsg_seq, 5);
        assert_eq!(hdr.nlmsg_pid, 99);
        let nfgen = NfGenMsg::from_bytes(payload).unwrap();
        assert_eq!(nfgen.family, 2);
        assert_eq!(nfgen.res_id(), 7);
    }

    #[test]
    fn test_nested_attribute() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        let nest = builder.nest_start(1);
        builder.append_attr_u32_be(2, 100);
        builder.append_attr_u8(3, 1);
        builder.nest_end(nest).unwrap();
        let msg = builder.finish();

        let (outer, inner) = AttrIter::new(&msg[NLMSG_HDRLEN..])
            .next()
            .unwrap()
            .unwrap();
        assert!(outer.is_nested());
        assert_eq!(outer.kind(), 1);
        assert_eq!(outer.nla_len as usize, NLA_HDRLEN + 8 + 8);

        let children: Vec<_> = AttrIter::new(inner).collect::<crate::Result<_>>().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(get::u32_be(children[0].1).unwrap(), 100);
        assert_eq!(get::u8(children[1].1).unwrap(), 1);
    }

    #[test]
    fn test_string_attribute() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.append_attr_str(10, "abc").unwrap();
        let msg = builder.finish();
        let (hdr, value) = AttrIter::new(&msg[NLMSG_HDRLEN..])
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(hdr.nla_len, 8);
        assert_eq!(get::string(value).unwrap(), "abc");
    }

    #[test]
    fn test_oversized_attribute_rejected() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        let err = builder
            .append_attr(1, &vec![0; MAX_ATTR_PAYLOAD + 1])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute(_)));
        assert!(builder.is_empty());

        builder.append_attr(1, &vec![0; MAX_ATTR_PAYLOAD]).unwrap();
        let (hdr, value) = AttrIter::new(&builder.as_bytes()[NLMSG_HDRLEN..])
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(hdr.nla_len, u16::MAX);
        assert_eq!(value.len(), MAX_ATTR_PAYLOAD);
    }

    #[test]
    fn test_oversized_nest_rejected() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        let nest = builder.nest_start(1);
        builder.append_attr(2, &vec![0; 40_000]).unwrap();
        builder.append_attr(3, &vec![0; 40_000]).unwrap();
        let err = builder.nest_end(nest).unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute(_)));
    }
}
