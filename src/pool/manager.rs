//! 机器人池：每个实例的机器人全集与「在玩」栈
//!
//! - 全集在每次运行开始时发现一次
//! - 在玩栈有序：最后激活的最先停下（LIFO）
//! - 选择只给出候选，命令成功后才 `commit`

use std::collections::{BTreeMap, HashSet};

use crate::config::EndpointConfig;
use crate::gateway::AgentGateway;

/// 单个实例的机器人池
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointPool {
    pub url: String,
    /// 发现时的顺序
    pub all: Vec<String>,
    /// 在玩栈（末尾为最近激活）
    pub active: Vec<String>,
}

impl EndpointPool {
    pub fn new(url: impl Into<String>, all: Vec<String>) -> Self {
        Self {
            url: url.into(),
            all,
            active: Vec::new(),
        }
    }

    fn headroom(&self) -> usize {
        self.all.len().saturating_sub(self.active.len())
    }

    fn is_known(&self, agent: &str) -> bool {
        self.all.iter().any(|a| a == agent)
    }

    fn is_active(&self, agent: &str) -> bool {
        self.active.iter().any(|a| a == agent)
    }
}

/// 跨实例的机器人池管理（按配置顺序轮询）
#[derive(Debug, Clone, Default)]
pub struct BotPoolManager {
    pools: Vec<EndpointPool>,
}

impl BotPoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接用已知全集构造（测试 / 恢复用）
    pub fn from_pools(pools: Vec<EndpointPool>) -> Self {
        Self { pools }
    }

    /// 查询每个启用实例的机器人全集；查询失败的实例记为空并告警
    pub async fn discover(endpoints: &[EndpointConfig], gateway: &dyn AgentGateway) -> Self {
        let mut pools = Vec::new();
        for ep in endpoints.iter().filter(|e| e.active) {
            let all = match gateway.list_agents(&ep.url).await {
                Ok(agents) => agents.into_keys().collect(),
                Err(e) => {
                    tracing::warn!(endpoint = %ep.label(), error = %e, "Could not list bots, endpoint gets no bots this run");
                    Vec::new()
                }
            };
            tracing::info!(endpoint = %ep.label(), bots = all.len(), "Discovered bots");
            pools.push(EndpointPool::new(ep.url.clone(), all));
        }
        Self { pools }
    }

    pub fn pools(&self) -> &[EndpointPool] {
        &self.pools
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.pools.iter().map(|p| p.url.as_str())
    }

    fn pool(&self, url: &str) -> Option<&EndpointPool> {
        self.pools.iter().find(|p| p.url == url)
    }

    fn pool_mut(&mut self, url: &str) -> Option<&mut EndpointPool> {
        self.pools.iter_mut().find(|p| p.url == url)
    }

    /// 选出最多 `count` 个待激活机器人：每轮每实例一个，按发现顺序（即机器人名排序）
    pub fn select_to_activate(&self, count: usize) -> Vec<(String, String)> {
        let available: Vec<(&str, Vec<&str>)> = self
            .pools
            .iter()
            .map(|p| {
                let active: HashSet<&str> = p.active.iter().map(String::as_str).collect();
                let free = p
                    .all
                    .iter()
                    .map(String::as_str)
                    .filter(|a| !active.contains(a))
                    .collect();
                (p.url.as_str(), free)
            })
            .collect();

        let mut out = Vec::new();
        let mut cursor = vec![0usize; available.len()];
        while out.len() < count {
            let mut progressed = false;
            for (i, (url, free)) in available.iter().enumerate() {
                if out.len() >= count {
                    break;
                }
                if let Some(agent) = free.get(cursor[i]) {
                    out.push((url.to_string(), agent.to_string()));
                    cursor[i] += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        out
    }

    /// 选出最多 `count` 个待停止机器人：每轮每实例取栈顶往下的一个
    pub fn select_to_deactivate(&self, count: usize) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut taken = vec![0usize; self.pools.len()];
        while out.len() < count {
            let mut progressed = false;
            for (i, pool) in self.pools.iter().enumerate() {
                if out.len() >= count {
                    break;
                }
                if taken[i] < pool.active.len() {
                    let agent = &pool.active[pool.active.len() - 1 - taken[i]];
                    out.push((pool.url.clone(), agent.clone()));
                    taken[i] += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        out
    }

    /// 命令成功后记账；返回是否实际改变了在玩栈
    pub fn commit(&mut self, url: &str, agent: &str, activating: bool) -> bool {
        let Some(pool) = self.pool_mut(url) else {
            return false;
        };
        if activating {
            if !pool.is_known(agent) || pool.is_active(agent) {
                return false;
            }
            pool.active.push(agent.to_string());
            true
        } else {
            let before = pool.active.len();
            pool.active.retain(|a| a != agent);
            pool.active.len() != before
        }
    }

    /// 从快照恢复在玩栈；未知实例、未知或重复的机器人被丢弃
    pub fn restore_active(&mut self, active: &BTreeMap<String, Vec<String>>) -> usize {
        let mut restored = 0;
        for pool in &mut self.pools {
            pool.active.clear();
            let Some(saved) = active.get(&pool.url) else {
                continue;
            };
            for agent in saved {
                if pool.is_known(agent) && !pool.is_active(agent) {
                    pool.active.push(agent.clone());
                    restored += 1;
                } else {
                    tracing::debug!(endpoint = %pool.url, agent = %agent, "Dropping unknown bot from saved session");
                }
            }
        }
        restored
    }

    pub fn active_total(&self) -> usize {
        self.pools.iter().map(|p| p.active.len()).sum()
    }

    pub fn total_agents(&self) -> usize {
        self.pools.iter().map(|p| p.all.len()).sum()
    }

    /// 还能激活的机器人数
    pub fn headroom(&self) -> usize {
        self.pools.iter().map(EndpointPool::headroom).sum()
    }

    pub fn active_agents(&self, url: &str) -> &[String] {
        self.pool(url).map(|p| p.active.as_slice()).unwrap_or(&[])
    }

    pub fn is_active(&self, url: &str, agent: &str) -> bool {
        self.pool(url).is_some_and(|p| p.is_active(agent))
    }

    /// 在玩栈快照（持久化用）
    pub fn snapshot_active(&self) -> BTreeMap<String, Vec<String>> {
        self.pools
            .iter()
            .map(|p| (p.url.clone(), p.active.clone()))
            .collect()
    }
}
