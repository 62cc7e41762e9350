//! 后台巡检：运行期间按固定间隔做掉线检测并保存快照

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::orchestrator::CycleRunner;
use super::session_supervisor::sleep_interruptibly;

pub(crate) async fn run_housekeeping(runner: Arc<CycleRunner>, interval: Duration, token: CancellationToken) {
    tracing::debug!(interval_secs = interval.as_secs(), "Housekeeping started");
    while sleep_interruptibly(&token, interval).await {
        runner.detect_all().await;
        if token.is_cancelled() {
            break;
        }
        runner.save_snapshot().await;
    }
    tracing::debug!("Housekeeping stopped");
}
