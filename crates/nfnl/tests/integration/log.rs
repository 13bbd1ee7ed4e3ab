//! NFLOG integration tests.

use std::time::Duration;

use nfnl::Result;
use nfnl::nflog::{self, LogConfig, LogCopyMode, LogGroup, NFULNL_CFG_F_SEQ};
use tokio_stream::StreamExt;

use crate::common::unique_id;

#[tokio::test]
async fn test_log_group_bring_up() -> Result<()> {
    require_root!();

    let config = LogConfig::new([unique_id(), unique_id()])
        .copy_mode(LogCopyMode::Meta)
        .timeout(10)
        .queue_threshold(1)
        .flags(NFULNL_CFG_F_SEQ);
    let mut group: LogGroup = LogGroup::new(config);
    group.open()?;
    group.bring_up().await?;
    assert!(group.is_open());

    group.unbind_groups().await?;
    group.close();
    Ok(())
}

#[tokio::test]
async fn test_listen_idle_group() -> Result<()> {
    require_root!();

    let mut logs = nflog::listen(LogConfig::new([unique_id()])).await?;

    // Nothing logs to this group, so the stream just waits.
    let next = tokio::time::timeout(Duration::from_millis(200), logs.next()).await;
    assert!(next.is_err());

    logs.close();
    assert!(logs.next().await.is_none());
    Ok(())
}
