//! Parser trait for kernel structs carried in netlink payloads.

use winnow::error::ContextError;

use super::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, winnow::error::ErrMode<ContextError>>;

/// Types that can be parsed from netlink wire format.
pub trait FromNetlink: Sized {
    /// Parse from a mutable byte slice reference.
    /// The slice is advanced past the consumed bytes.
    fn parse(input: &mut &[u8]) -> PResult<Self>;

    /// Parse from the front of a byte slice; trailing bytes are ignored.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = data;
        Self::parse(&mut input).map_err(|e| {
            Error::Parse(format!(
                "{}: {:?} ({} bytes)",
                std::any::type_name::<Self>(),
                e,
                data.len()
            ))
        })
    }
}
