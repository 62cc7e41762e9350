//! 命令词汇与 reset 回退
//!
//! 只有 reset 有传输层重试：失败后按 backoff 重试若干次，仍失败则 stop → 停顿 → start，并报告失败。

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::traits::AgentGateway;
use crate::core::session_supervisor::sleep_interruptibly;

/// 发往 ASF 的文本命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Play { agent: String, game_id: u32 },
    Reset(String),
    Stop(String),
    Start(String),
    /// 让实例上全部机器人停止游戏
    ResetAll,
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentCommand::Play { agent, game_id } => write!(f, "play {} {}", agent, game_id),
            AgentCommand::Reset(agent) => write!(f, "reset {}", agent),
            AgentCommand::Stop(agent) => write!(f, "stop {}", agent),
            AgentCommand::Start(agent) => write!(f, "start {}", agent),
            AgentCommand::ResetAll => write!(f, "reset ASF"),
        }
    }
}

/// reset 重试参数
#[derive(Debug, Clone, Copy)]
pub struct CommandPolicy {
    pub reset_retries: u32,
    pub reset_backoff: Duration,
    /// stop 与 start 之间的停顿
    pub restart_pause: Duration,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            reset_retries: 2,
            reset_backoff: Duration::from_secs(10),
            restart_pause: Duration::from_secs(2),
        }
    }
}

impl From<&crate::config::RecoverySection> for CommandPolicy {
    fn from(cfg: &crate::config::RecoverySection) -> Self {
        Self {
            reset_retries: cfg.reset_retries,
            reset_backoff: Duration::from_secs(cfg.reset_backoff_secs),
            restart_pause: Duration::from_secs(cfg.restart_pause_secs),
        }
    }
}

/// 发送一条命令，记录结果，返回是否成功
pub async fn send(gateway: &dyn AgentGateway, url: &str, command: &AgentCommand) -> bool {
    let text = command.to_string();
    match gateway.send_command(url, &text).await {
        Ok(diag) => {
            tracing::debug!(endpoint = %url, command = %text, "{}", diag);
            true
        }
        Err(e) => {
            tracing::debug!(endpoint = %url, command = %text, error = %e, "Command failed");
            false
        }
    }
}

/// `play <agent> <game_id>`
pub async fn activate(gateway: &dyn AgentGateway, url: &str, agent: &str, game_id: u32) -> bool {
    let cmd = AgentCommand::Play {
        agent: agent.to_string(),
        game_id,
    };
    send(gateway, url, &cmd).await
}

/// `reset <agent>`，失败时重试；全部失败则 stop + start 并返回 false
///
/// 取消时立即返回 false；已发出的 stop 之后总会补发 start。
pub async fn reset_with_fallback(
    gateway: &dyn AgentGateway,
    url: &str,
    agent: &str,
    policy: &CommandPolicy,
    cancel: &CancellationToken,
) -> bool {
    let reset = AgentCommand::Reset(agent.to_string());
    if send(gateway, url, &reset).await {
        return true;
    }
    for attempt in 1..=policy.reset_retries {
        if !sleep_interruptibly(cancel, policy.reset_backoff).await {
            return false;
        }
        tracing::debug!(endpoint = %url, agent, attempt, "Retrying reset");
        if send(gateway, url, &reset).await {
            return true;
        }
    }
    tracing::warn!(endpoint = %url, agent, "Reset failed after retries, restarting bot");
    send(gateway, url, &AgentCommand::Stop(agent.to_string())).await;
    // stop 之后不论是否取消都要 start，避免机器人停在关闭状态
    tokio::time::sleep(policy.restart_pause).await;
    send(gateway, url, &AgentCommand::Start(agent.to_string())).await;
    false
}

/// 对若干实例发送 `reset ASF`，返回成功的实例数
pub async fn reset_all<'a, I>(gateway: &dyn AgentGateway, urls: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ok = 0;
    for url in urls {
        if send(gateway, url, &AgentCommand::ResetAll).await {
            tracing::info!(endpoint = %url, "All bots reset");
            ok += 1;
        } else {
            tracing::warn!(endpoint = %url, "Reset ASF failed");
        }
    }
    ok
}
