//! Mock 网关：内存中模拟若干 ASF 实例，用于测试与离线演示
//!
//! 命令语义：`play` 设置在玩的游戏，`reset` 清除，`stop`/`start` 切换在线，`reset ASF` 清除整个实例。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::record::{ActivityId, AgentMap, AgentRecord};
use super::traits::{AgentGateway, GatewayError};

#[derive(Debug, Clone, Copy, Default)]
struct MockAgent {
    online: bool,
    playing: Option<u32>,
}

#[derive(Debug)]
struct MockEndpoint {
    reachable: bool,
    agents: BTreeMap<String, MockAgent>,
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self {
            reachable: true,
            agents: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: BTreeMap<String, MockEndpoint>,
    failing: BTreeSet<String>,
    commands: Vec<(String, String)>,
}

/// 内存网关
#[derive(Debug, Default)]
pub struct MockGateway {
    inner: Mutex<Inner>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 在实例上添加机器人（不在玩）
    pub fn add_agents<I, S>(&self, url: &str, names: I, online: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        let ep = inner.endpoints.entry(url.to_string()).or_default();
        for name in names {
            ep.agents.insert(name.into(), MockAgent { online, playing: None });
        }
    }

    /// 切换在线；掉线同时清除在玩状态
    pub fn set_online(&self, url: &str, agent: &str, online: bool) {
        let mut inner = self.lock();
        if let Some(a) = inner
            .endpoints
            .get_mut(url)
            .and_then(|ep| ep.agents.get_mut(agent))
        {
            a.online = online;
            if !online {
                a.playing = None;
            }
        }
    }

    /// 直接设置在玩的游戏（不经过命令）
    pub fn set_playing(&self, url: &str, agent: &str, game_id: Option<u32>) {
        let mut inner = self.lock();
        if let Some(a) = inner
            .endpoints
            .get_mut(url)
            .and_then(|ep| ep.agents.get_mut(agent))
        {
            a.playing = game_id;
        }
    }

    /// 不可达的实例：查询与命令都返回连接错误
    pub fn set_reachable(&self, url: &str, reachable: bool) {
        self.lock().endpoints.entry(url.to_string()).or_default().reachable = reachable;
    }

    /// 针对该机器人的命令一律被拒
    pub fn fail_commands_for(&self, agent: &str) {
        self.lock().failing.insert(agent.to_string());
    }

    /// 已发送的全部命令 `(url, command)`，包括失败的
    pub fn commands(&self) -> Vec<(String, String)> {
        self.lock().commands.clone()
    }

    /// 以某个动词开头的命令数
    pub fn count_commands(&self, verb: &str) -> usize {
        let prefix = format!("{} ", verb);
        self.lock()
            .commands
            .iter()
            .filter(|(_, c)| c.starts_with(&prefix))
            .count()
    }

    pub fn playing(&self, url: &str, agent: &str) -> Option<u32> {
        self.lock()
            .endpoints
            .get(url)
            .and_then(|ep| ep.agents.get(agent))
            .and_then(|a| a.playing)
    }

    /// 所有实例上正在玩的机器人数
    pub fn playing_count(&self) -> usize {
        self.lock()
            .endpoints
            .values()
            .flat_map(|ep| ep.agents.values())
            .filter(|a| a.playing.is_some())
            .count()
    }
}

#[async_trait]
impl AgentGateway for MockGateway {
    async fn list_agents(&self, url: &str) -> Result<AgentMap, GatewayError> {
        let inner = self.lock();
        let ep = inner
            .endpoints
            .get(url)
            .ok_or_else(|| GatewayError::Connection(format!("unknown endpoint {}", url)))?;
        if !ep.reachable {
            return Err(GatewayError::Connection(format!("{} unreachable", url)));
        }
        Ok(ep
            .agents
            .iter()
            .map(|(name, a)| {
                let record = AgentRecord {
                    online: Some(a.online),
                    playing: Some(a.playing.is_some()),
                    activity_id: a.playing.map(|g| ActivityId::Known(u64::from(g))),
                    activity_name: None,
                };
                (name.clone(), record)
            })
            .collect())
    }

    async fn send_command(&self, url: &str, command: &str) -> Result<String, GatewayError> {
        let mut inner = self.lock();
        inner.commands.push((url.to_string(), command.to_string()));

        let mut parts = command.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let target = parts.next().unwrap_or_default().to_string();
        let game_id = parts.next().and_then(|g| g.parse::<u32>().ok());
        let rejected = inner.failing.contains(&target);

        let ep = inner
            .endpoints
            .get_mut(url)
            .ok_or_else(|| GatewayError::Connection(format!("unknown endpoint {}", url)))?;
        if !ep.reachable {
            return Err(GatewayError::Connection(format!("{} unreachable", url)));
        }
        if rejected {
            return Err(GatewayError::Rejected(format!("HTTP 200 | <{}> failed", target)));
        }

        if verb == "reset" && target == "ASF" {
            for a in ep.agents.values_mut() {
                a.playing = None;
            }
            return Ok("HTTP 200 | OK".to_string());
        }

        let agent = ep
            .agents
            .get_mut(&target)
            .ok_or_else(|| GatewayError::Rejected(format!("HTTP 200 | Couldn't find any bot named {}", target)))?;
        match verb {
            "play" => {
                if !agent.online {
                    return Err(GatewayError::Rejected(format!("HTTP 200 | <{}> Not connected", target)));
                }
                agent.playing = game_id;
            }
            "reset" => agent.playing = None,
            "stop" => {
                agent.online = false;
                agent.playing = None;
            }
            "start" => agent.online = true,
            other => {
                return Err(GatewayError::Rejected(format!("HTTP 200 | Unknown command {}", other)));
            }
        }
        Ok(format!("HTTP 200 | OK | <{}> Done", target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{compute_counts, PlayState};

    #[tokio::test]
    async fn test_mock_play_and_reset() {
        let gw = MockGateway::new();
        gw.add_agents("u", ["a", "b"], true);
        gw.send_command("u", "play a 730").await.unwrap();
        assert_eq!(gw.playing("u", "a"), Some(730));

        let agents = gw.list_agents("u").await.unwrap();
        assert_eq!(agents["a"].play_state(730), PlayState::Yes);
        assert_eq!(agents["b"].play_state(730), PlayState::No);

        gw.send_command("u", "reset a").await.unwrap();
        assert_eq!(gw.playing_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_offline_and_unreachable() {
        let gw = MockGateway::new();
        gw.add_agents("u", ["a", "b", "c"], true);
        gw.set_online("u", "c", false);
        assert_eq!(compute_counts(&gw.list_agents("u").await.unwrap()).online, 2);
        assert!(gw.send_command("u", "play c 730").await.is_err());

        gw.set_reachable("u", false);
        assert!(matches!(gw.list_agents("u").await, Err(GatewayError::Connection(_))));
        assert_eq!(gw.count_commands("play"), 1);
    }
}
