//! 实例健康巡检：每个实例的机器人总数 / 在线 / 离线与状态

use std::fmt;

use serde::Serialize;

use super::record::compute_counts;
use super::traits::AgentGateway;
use crate::config::EndpointConfig;

/// 实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    /// 配置中未启用
    Disabled,
    /// 查询失败
    Unreachable,
    /// 可达但没有在线机器人
    Idle,
    Online,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointStatus::Disabled => "disabled",
            EndpointStatus::Unreachable => "unreachable",
            EndpointStatus::Idle => "idle",
            EndpointStatus::Online => "online",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub url: String,
    pub status: EndpointStatus,
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    /// 查询失败时的诊断
    pub detail: Option<String>,
}

/// 逐个查询实例；未启用的实例不发请求
pub async fn survey(gateway: &dyn AgentGateway, endpoints: &[EndpointConfig]) -> Vec<EndpointHealth> {
    let mut out = Vec::with_capacity(endpoints.len());
    for ep in endpoints {
        let mut health = EndpointHealth {
            name: ep.label().to_string(),
            url: ep.url.clone(),
            status: EndpointStatus::Disabled,
            total: 0,
            online: 0,
            offline: 0,
            detail: None,
        };
        if ep.active {
            match gateway.list_agents(&ep.url).await {
                Ok(agents) => {
                    let counts = compute_counts(&agents);
                    health.total = counts.total;
                    health.online = counts.online;
                    health.offline = counts.offline;
                    health.status = if counts.online > 0 {
                        EndpointStatus::Online
                    } else {
                        EndpointStatus::Idle
                    };
                }
                Err(e) => {
                    tracing::warn!(endpoint = %ep.label(), error = %e, "Endpoint unreachable");
                    health.status = EndpointStatus::Unreachable;
                    health.detail = Some(e.to_string());
                }
            }
        }
        out.push(health);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;

    fn ep(name: &str, url: &str, active: bool) -> EndpointConfig {
        EndpointConfig {
            name: name.into(),
            url: url.into(),
            active,
        }
    }

    #[tokio::test]
    async fn test_survey_statuses() {
        let gw = MockGateway::new();
        gw.add_agents("u1", ["a", "b", "c"], true);
        gw.set_online("u1", "c", false);
        gw.add_agents("u2", ["d"], false);
        gw.add_agents("u3", ["e"], true);
        gw.set_reachable("u3", false);

        let endpoints = vec![
            ep("one", "u1", true),
            ep("two", "u2", true),
            ep("three", "u3", true),
            ep("", "u4", false),
        ];
        let report = survey(&gw, &endpoints).await;
        let statuses: Vec<_> = report.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                EndpointStatus::Online,
                EndpointStatus::Idle,
                EndpointStatus::Unreachable,
                EndpointStatus::Disabled
            ]
        );
        assert_eq!((report[0].total, report[0].online, report[0].offline), (3, 2, 1));
        assert!(report[2].detail.is_some());
        assert_eq!(report[3].name, "u4");
    }
}
