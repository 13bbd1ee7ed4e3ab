//! Common test utilities for integration tests.
//!
//! The tests bind real queues and log groups, so they need CAP_NET_ADMIN
//! and the `nfnetlink_queue` / `nfnetlink_log` modules.

use std::sync::atomic::{AtomicU16, Ordering};

/// Queue and group numbers handed out to tests, far from anything a
/// firewall on the test host is likely to use.
static NEXT_ID: AtomicU16 = AtomicU16::new(31000);

/// A queue/group number no other test in this run uses.
pub fn unique_id() -> u16 {
    NEXT_ID.fetch_add(1, Ordering::SeqCst)
}

/// Check if running as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root.
///
/// Use this at the beginning of integration tests that require root privileges.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return Ok(());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id() {
        let a = unique_id();
        let b = unique_id();
        assert_ne!(a, b);
    }
}
