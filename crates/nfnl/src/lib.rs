//! Async netfilter netlink for Linux.
//!
//! This crate talks to the kernel's nfnetlink subsystems over a
//! `NETLINK_NETFILTER` socket:
//!
//! - [`nfqueue`] - receive packets diverted by `NFQUEUE` rules and answer
//!   each with a verdict
//! - [`nflog`] - stream packet copies from `NFLOG` rule groups
//! - [`netlink`] - the message/attribute codec and request transport both
//!   are built on
//!
//! # Features
//!
//! - `serde` - Serialize/deserialize configs and log entries
//! - `integration` - Build the root-only integration tests
//!
//! # Example
//!
//! ```ignore
//! use nfnl::nfqueue::{self, Disposition, Flow, QueueConfig};
//!
//! #[tokio::main]
//! async fn main() -> nfnl::Result<()> {
//!     let handle = nfqueue::create_and_start(
//!         QueueConfig::new(0).max_queue_len(1024),
//!         |packet| {
//!             let verdict = if packet.payload().len() > 1400 {
//!                 Disposition::Drop
//!             } else {
//!                 Disposition::Accept
//!             };
//!             if let Err(e) = packet.set_verdict(verdict) {
//!                 eprintln!("verdict failed: {e}");
//!             }
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

pub mod netlink;
pub mod nflog;
pub mod nfqueue;

#[cfg(test)]
mod testing;

pub use netlink::{Error, Result};
