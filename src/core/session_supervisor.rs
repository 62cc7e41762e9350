//! 运行监管：取消令牌与可中断睡眠
//!
//! 每次 `start()` 创建新的 CancellationToken；周期任务与巡检任务持有子 token，`stop()` 时一并取消。
//! 所有等待都切成 ≤1 秒的片段，并与取消信号竞争。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 单个睡眠片段的上限
pub const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// 一次运行的生命周期：取消令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（stop / Ctrl+C）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个后台任务）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 按 ≤1 秒的片段睡眠；睡满返回 true，被取消返回 false
pub async fn sleep_interruptibly(token: &CancellationToken, duration: Duration) -> bool {
    let mut remaining = duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let slice = remaining.min(SLEEP_SLICE);
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(slice) => {}
        }
        remaining -= slice;
    }
}
