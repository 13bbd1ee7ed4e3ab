//! NFQUEUE integration tests.

use nfnl::Result;
use nfnl::nfqueue::{self, CopyMode, Flow, NFQA_CFG_F_FAIL_OPEN, Queue, QueueConfig, QueueState};

use crate::common::unique_id;

#[tokio::test]
async fn test_queue_bring_up() -> Result<()> {
    require_root!();

    let num = unique_id();
    let mut queue: Queue = Queue::new(QueueConfig::new(num).max_queue_len(64));
    queue.open()?;
    queue.bring_up().await?;
    assert_eq!(queue.state(), QueueState::Configured);

    queue.set_mode(CopyMode::Meta, 0).await?;
    queue.set_flags(NFQA_CFG_F_FAIL_OPEN, NFQA_CFG_F_FAIL_OPEN).await?;
    assert_eq!(queue.config().flags, Some(NFQA_CFG_F_FAIL_OPEN));

    queue.destroy_queue().await?;
    assert_eq!(queue.state(), QueueState::BoundToFamily);
    queue.close();
    assert!(!queue.is_open());
    Ok(())
}

#[tokio::test]
async fn test_start_and_stop() -> Result<()> {
    require_root!();

    let handle = nfqueue::create_and_start(
        QueueConfig::new(unique_id()),
        |packet| {
            let _ = packet.accept();
            Flow::Continue
        },
        |_| {},
    )
    .await?;
    assert!(handle.is_running());

    // Verdicts for unknown ids are accepted by the socket; the kernel
    // reports them asynchronously, if at all.
    handle.verdicts().set_verdict(nfqueue::Disposition::Accept, 1, &mut Vec::new())?;

    handle.stop_queue().await
}

#[tokio::test]
async fn test_queue_taken_by_another_socket() -> Result<()> {
    require_root!();

    let num = unique_id();
    let mut first: Queue = Queue::new(QueueConfig::new(num));
    first.open()?;
    first.bring_up().await?;

    let mut second: Queue = Queue::new(QueueConfig::new(num));
    second.open()?;
    let err = second.bring_up().await.unwrap_err();
    assert!(err.is_busy() || err.is_permission_denied(), "{err}");
    assert!(!second.is_open());

    first.destroy_queue().await?;
    first.close();
    Ok(())
}
