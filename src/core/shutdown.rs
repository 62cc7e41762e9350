//! 优雅关闭
//!
//! 监听 Ctrl+C / SIGTERM；周期自然结束或收到信号后执行一次收尾：
//! - 停掉波形控制器（取消周期与巡检任务）
//! - 按配置让所有机器人停止游戏
//! - 清除会话快照（正常退出不再续跑）

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use super::orchestrator::WaveController;
use crate::session::SessionStore;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("ctrl-c"),
            ShutdownReason::Terminate => f.write_str("sigterm"),
        }
    }
}

/// 关闭信号：第一次触发的原因生效
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!(%reason, "Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// 安装系统信号处理 (Ctrl+C, SIGTERM)
    pub fn listen(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.trigger(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let signal = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal as unix_signal, SignalKind};
                if let Ok(mut sigterm) = unix_signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    signal.trigger(ShutdownReason::Terminate);
                }
            });
        }
    }
}

/// 退出收尾：停止控制器，按配置让所有机器人停下，清除会话快照
pub struct ControllerCleanup {
    controller: Arc<WaveController>,
    store: Arc<dyn SessionStore>,
    reset_on_exit: bool,
    timeout: Duration,
}

impl ControllerCleanup {
    pub fn new(controller: Arc<WaveController>, store: Arc<dyn SessionStore>, reset_on_exit: bool) -> Self {
        Self {
            controller,
            store,
            reset_on_exit,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.controller.stop().await;
        if self.reset_on_exit {
            let n = self.controller.deactivate_all().await;
            tracing::info!("Sent reset ASF to {} endpoints", n);
        }
        self.store.clear().await.context("clear session snapshot")?;
        Ok(())
    }

    /// 执行收尾；失败或超时只告警
    pub async fn run(&self) {
        match tokio::time::timeout(self.timeout, self.cleanup()).await {
            Ok(Ok(())) => tracing::info!("Cleanup finished"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Cleanup failed"),
            Err(_) => tracing::warn!("Cleanup timed out after {}s", self.timeout.as_secs()),
        }
    }
}

/// 运行 `app` 直到其结束或收到关闭信号，然后收尾；返回信号原因（自然结束为 None）
pub async fn run_until_shutdown<F>(signal: &ShutdownSignal, app: F, cleanup: &ControllerCleanup) -> Option<ShutdownReason>
where
    F: Future<Output = ()>,
{
    signal.listen();

    tokio::select! {
        _ = app => {
            tracing::info!("Wave cycle finished");
        }
        _ = signal.triggered() => {}
    }

    cleanup.run().await;
    signal.reason()
}
