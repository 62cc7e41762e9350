//! 机器人网关抽象
//!
//! 所有后端（ASF HTTP / Mock）实现 AgentGateway：list_agents（拉取机器人表）、send_command（发送文本命令）。

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use super::record::AgentMap;

/// 网关错误：前三类为传输层问题（该实例本轮视为 0 在线），`Rejected` 为命令被拒
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid JSON (HTTP {status}): {body}")]
    InvalidJson { status: u16, body: String },

    #[error("Unexpected response format: {0}")]
    UnexpectedFormat(String),

    #[error("Command rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// 是否为传输层问题（而非命令本身被拒）
    pub fn is_transport(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_))
    }
}

/// 机器人网关 trait：查询与命令
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// 拉取实例上全部机器人并归一化
    async fn list_agents(&self, url: &str) -> Result<AgentMap, GatewayError>;

    /// 发送一条命令；成功返回诊断文本，失败返回 `Rejected` 或传输错误
    async fn send_command(&self, url: &str, command: &str) -> Result<String, GatewayError>;

    async fn online_agent_ids(&self, url: &str) -> Result<BTreeSet<String>, GatewayError> {
        let agents = self.list_agents(url).await?;
        Ok(agents
            .into_iter()
            .filter(|(_, r)| r.is_online())
            .map(|(name, _)| name)
            .collect())
    }

    /// 离线 = 非在线（包括在线状态未知的）
    async fn offline_agent_ids(&self, url: &str) -> Result<BTreeSet<String>, GatewayError> {
        let agents = self.list_agents(url).await?;
        Ok(agents
            .into_iter()
            .filter(|(_, r)| !r.is_online())
            .map(|(name, _)| name)
            .collect())
    }
}
