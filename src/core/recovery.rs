//! 掉线恢复
//!
//! 每个（实例, 机器人）的状态：未跟踪 → 掉线(0) → {已恢复（删除记录）| 掉线(k < max) | 用尽（终态，保留记录）}。
//! 只对「本应在玩、却不在线」后又重新上线的机器人重发 `play`，并受次数上限与冷却约束。

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::context::WaveContext;
use super::events::WaveEvent;
use crate::config::RecoverySection;
use crate::gateway::{activate, PlayState};
use crate::pool::BotPoolManager;
use crate::session::RestoreAttempt;

/// 告警里最多列出的名字数
const ALERT_NAME_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl From<&RecoverySection> for RecoveryPolicy {
    fn from(cfg: &RecoverySection) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            cooldown: Duration::from_secs(cfg.cooldown_secs),
        }
    }
}

/// 单个掉线机器人的恢复记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallenRecord {
    pub attempts: u32,
    /// Unix 毫秒；0 表示从未尝试
    pub last_attempt_ms: i64,
    /// 到达上限的那一刻置位，之后不再尝试也不再告警
    pub exhausted: bool,
}

impl From<RestoreAttempt> for FallenRecord {
    fn from(a: RestoreAttempt) -> Self {
        Self {
            attempts: a.count,
            last_attempt_ms: a.last_attempt_ms,
            exhausted: a.exhausted,
        }
    }
}

impl From<FallenRecord> for RestoreAttempt {
    fn from(r: FallenRecord) -> Self {
        Self {
            count: r.attempts,
            last_attempt_ms: r.last_attempt_ms,
            exhausted: r.exhausted,
        }
    }
}

/// 一次检测的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub newly_fallen: Vec<String>,
    /// 重新上线且已在玩，直接清除记录
    pub already_playing: Vec<String>,
    pub restored: Vec<String>,
    pub failed: Vec<String>,
    /// 本轮进入用尽状态的
    pub exhausted: Vec<String>,
    /// 查询失败，本轮未改变任何状态
    pub unreachable: bool,
}

/// 告警文本：最多列出 10 个名字，其余以 `(+N more)` 表示
pub fn summarize_names(names: &[String]) -> String {
    let shown = names
        .iter()
        .take(ALERT_NAME_LIMIT)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > ALERT_NAME_LIMIT {
        format!("{} (+{} more)", shown, names.len() - ALERT_NAME_LIMIT)
    } else {
        shown
    }
}

/// 掉线跟踪与有界恢复
#[derive(Debug, Clone, Default)]
pub struct FallenBotRecovery {
    policy: RecoveryPolicy,
    /// url -> agent -> record
    tracked: BTreeMap<String, BTreeMap<String, FallenRecord>>,
}

impl FallenBotRecovery {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            tracked: BTreeMap::new(),
        }
    }

    pub fn record(&self, url: &str, agent: &str) -> Option<&FallenRecord> {
        self.tracked.get(url).and_then(|m| m.get(agent))
    }

    pub fn is_tracked(&self, url: &str, agent: &str) -> bool {
        self.record(url, agent).is_some()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.values().map(BTreeMap::len).sum()
    }

    /// 机器人离开在玩集合时丢弃其记录
    pub fn forget(&mut self, url: &str, agent: &str) {
        if let Some(m) = self.tracked.get_mut(url) {
            m.remove(agent);
            if m.is_empty() {
                self.tracked.remove(url);
            }
        }
    }

    /// 删除不在在玩集合里的记录
    fn prune(&mut self, url: &str, should_be: &BTreeSet<&str>) {
        if let Some(m) = self.tracked.get_mut(url) {
            m.retain(|agent, _| should_be.contains(agent.as_str()));
            if m.is_empty() {
                self.tracked.remove(url);
            }
        }
    }

    /// 检测一个实例的掉线机器人并尝试恢复
    pub async fn detect(&mut self, ctx: &WaveContext, url: &str, pool: &BotPoolManager) -> DetectionReport {
        let mut report = DetectionReport::default();
        let should_be: BTreeSet<&str> = pool.active_agents(url).iter().map(String::as_str).collect();
        self.prune(url, &should_be);
        if should_be.is_empty() {
            return report;
        }

        let label = ctx.endpoint_label(url).to_string();
        let agents = match ctx.gateway.list_agents(url).await {
            Ok(agents) => agents,
            Err(e) => {
                tracing::warn!(endpoint = %label, error = %e, "Fallen-bot check skipped, endpoint unreachable");
                report.unreachable = true;
                return report;
            }
        };
        let online: BTreeSet<&str> = agents
            .iter()
            .filter(|(_, r)| r.is_online())
            .map(|(name, _)| name.as_str())
            .collect();

        let tracked = self.tracked.entry(url.to_string()).or_default();
        report.newly_fallen = should_be
            .iter()
            .filter(|a| !online.contains(*a) && !tracked.contains_key(**a))
            .map(|a| a.to_string())
            .collect();
        for agent in &report.newly_fallen {
            tracked.insert(agent.clone(), FallenRecord::default());
        }
        if !report.newly_fallen.is_empty() {
            tracing::warn!(
                endpoint = %label,
                count = report.newly_fallen.len(),
                "Bots fell out of game: {}",
                summarize_names(&report.newly_fallen)
            );
            ctx.emit(WaveEvent::FallenDetected {
                endpoint: url.to_string(),
                agents: report.newly_fallen.clone(),
            });
        }

        let returned: Vec<&str> = should_be
            .iter()
            .copied()
            .filter(|a| online.contains(a) && tracked.contains_key(*a))
            .collect();
        let max = self.policy.max_attempts;
        let cooldown_ms = i64::try_from(self.policy.cooldown.as_millis()).unwrap_or(i64::MAX);

        for agent in returned {
            let Some(record) = tracked.get_mut(agent) else {
                continue;
            };
            let state = agents
                .get(agent)
                .map_or(PlayState::Unknown, |r| r.play_state(ctx.config.game_id));
            if state == PlayState::Yes {
                tracked.remove(agent);
                tracing::info!(endpoint = %label, agent, "Fallen bot is back in game");
                report.already_playing.push(agent.to_string());
                ctx.emit(WaveEvent::Restored {
                    endpoint: url.to_string(),
                    agent: agent.to_string(),
                });
                continue;
            }
            if record.exhausted {
                continue;
            }
            if record.attempts >= max {
                record.exhausted = true;
                tracing::warn!(endpoint = %label, agent, attempts = record.attempts, "Restore attempts exhausted");
                report.exhausted.push(agent.to_string());
                ctx.emit(WaveEvent::RestoreExhausted {
                    endpoint: url.to_string(),
                    agent: agent.to_string(),
                    attempts: record.attempts,
                });
                continue;
            }
            let now = ctx.clock.now_millis();
            if record.last_attempt_ms != 0 && now - record.last_attempt_ms < cooldown_ms {
                continue;
            }
            if ctx.is_cancelled() {
                break;
            }

            if activate(ctx.gateway.as_ref(), url, agent, ctx.config.game_id).await {
                tracked.remove(agent);
                tracing::info!(endpoint = %label, agent, "Fallen bot restored");
                report.restored.push(agent.to_string());
                ctx.emit(WaveEvent::Restored {
                    endpoint: url.to_string(),
                    agent: agent.to_string(),
                });
                continue;
            }
            record.attempts += 1;
            record.last_attempt_ms = ctx.clock.now_millis();
            tracing::warn!(endpoint = %label, agent, "Restore failed (attempt {}/{})", record.attempts, max);
            report.failed.push(agent.to_string());
            if record.attempts >= max {
                record.exhausted = true;
                tracing::warn!(endpoint = %label, agent, attempts = record.attempts, "Restore attempts exhausted");
                report.exhausted.push(agent.to_string());
                ctx.emit(WaveEvent::RestoreExhausted {
                    endpoint: url.to_string(),
                    agent: agent.to_string(),
                    attempts: record.attempts,
                });
            }
        }

        if tracked.is_empty() {
            self.tracked.remove(url);
        }
        report
    }

    /// 导出为快照格式：(fallen_tracked, restore_attempts)
    pub fn export(
        &self,
    ) -> (
        BTreeMap<String, Vec<String>>,
        BTreeMap<String, BTreeMap<String, RestoreAttempt>>,
    ) {
        let fallen = self
            .tracked
            .iter()
            .map(|(url, m)| (url.clone(), m.keys().cloned().collect()))
            .collect();
        let attempts = self
            .tracked
            .iter()
            .map(|(url, m)| {
                let inner = m
                    .iter()
                    .map(|(agent, r)| (agent.clone(), RestoreAttempt::from(*r)))
                    .collect();
                (url.clone(), inner)
            })
            .collect();
        (fallen, attempts)
    }

    /// 从快照恢复；只保留仍在在玩集合中的机器人
    pub fn restore(
        &mut self,
        fallen: &BTreeMap<String, Vec<String>>,
        attempts: &BTreeMap<String, BTreeMap<String, RestoreAttempt>>,
        pool: &BotPoolManager,
    ) {
        self.tracked.clear();
        for (url, agents) in fallen {
            for agent in agents {
                if !pool.is_active(url, agent) {
                    continue;
                }
                let record = attempts
                    .get(url)
                    .and_then(|m| m.get(agent))
                    .copied()
                    .map(FallenRecord::from)
                    .unwrap_or_default();
                let record = FallenRecord {
                    attempts: record.attempts.min(self.policy.max_attempts),
                    ..record
                };
                self.tracked
                    .entry(url.clone())
                    .or_default()
                    .insert(agent.clone(), record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::config::{EndpointConfig, WaveConfig};
    use crate::core::EventSink;
    use crate::gateway::{CommandPolicy, MockGateway};
    use crate::pool::EndpointPool;
    use crate::schedule::{Clock, ManualClock};

    const URL: &str = "http://asf-1";

    struct Harness {
        gw: Arc<MockGateway>,
        clock: ManualClock,
        ctx: WaveContext,
        pool: BotPoolManager,
    }

    fn harness(n: usize) -> Harness {
        let names: Vec<String> = (1..=n).map(|i| format!("bot{i:02}")).collect();
        let gw = Arc::new(MockGateway::new());
        gw.add_agents(URL, names.clone(), true);
        let mut pool = BotPoolManager::from_pools(vec![EndpointPool::new(URL, names.clone())]);
        for name in &names {
            pool.commit(URL, name, true);
            gw.set_playing(URL, name, Some(730));
        }
        let clock = ManualClock::at(12, 0, 0);
        let config = WaveConfig {
            endpoints: vec![EndpointConfig {
                name: "GAME_1".into(),
                url: URL.into(),
                active: true,
            }],
            ..WaveConfig::default()
        };
        let ctx = WaveContext {
            config: Arc::new(config),
            gateway: gw.clone(),
            clock: Arc::new(clock.clone()),
            events: EventSink::default(),
            cancel: CancellationToken::new(),
            commands: CommandPolicy::default(),
        };
        Harness { gw, clock, ctx, pool }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<WaveEvent>) -> Vec<WaveEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_three_fallen_one_alert() {
        let h = harness(10);
        let mut rx = h.ctx.events.subscribe();
        for name in ["bot03", "bot07", "bot09"] {
            h.gw.set_online(URL, name, false);
        }
        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());

        let report = rec.detect(&h.ctx, URL, &h.pool).await;
        assert_eq!(report.newly_fallen, vec!["bot03", "bot07", "bot09"]);
        let alerts: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, WaveEvent::FallenDetected { .. }))
            .collect();
        assert_eq!(alerts.len(), 1);

        let again = rec.detect(&h.ctx, URL, &h.pool).await;
        assert!(again.newly_fallen.is_empty());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(rec.tracked_count(), 3);
        assert_eq!(h.gw.count_commands("play"), 0);
    }

    #[tokio::test]
    async fn test_returned_and_playing_clears_without_command() {
        let h = harness(2);
        h.gw.set_online(URL, "bot01", false);
        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());
        rec.detect(&h.ctx, URL, &h.pool).await;

        h.gw.set_online(URL, "bot01", true);
        h.gw.set_playing(URL, "bot01", Some(730));
        let report = rec.detect(&h.ctx, URL, &h.pool).await;
        assert_eq!(report.already_playing, vec!["bot01"]);
        assert!(!rec.is_tracked(URL, "bot01"));
        assert_eq!(h.gw.count_commands("play"), 0);
    }

    #[tokio::test]
    async fn test_returned_bot_is_restored() {
        let h = harness(2);
        h.gw.set_online(URL, "bot02", false);
        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());
        rec.detect(&h.ctx, URL, &h.pool).await;

        h.gw.set_online(URL, "bot02", true);
        let report = rec.detect(&h.ctx, URL, &h.pool).await;
        assert_eq!(report.restored, vec!["bot02"]);
        assert_eq!(h.gw.playing(URL, "bot02"), Some(730));
        assert_eq!(rec.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_attempts_bounded_with_cooldown_and_single_exhausted_log() {
        let h = harness(1);
        let mut rx = h.ctx.events.subscribe();
        let policy = RecoveryPolicy {
            max_attempts: 3,
            cooldown: Duration::from_secs(60),
        };
        let mut rec = FallenBotRecovery::new(policy);

        h.gw.set_online(URL, "bot01", false);
        rec.detect(&h.ctx, URL, &h.pool).await;
        h.gw.set_online(URL, "bot01", true);
        h.gw.fail_commands_for("bot01");

        // 第一次尝试
        let r = rec.detect(&h.ctx, URL, &h.pool).await;
        assert_eq!(r.failed, vec!["bot01"]);
        // 冷却中
        h.clock.advance(Duration::from_secs(30));
        assert!(rec.detect(&h.ctx, URL, &h.pool).await.failed.is_empty());
        // 第二次
        h.clock.advance(Duration::from_secs(31));
        assert_eq!(rec.detect(&h.ctx, URL, &h.pool).await.failed.len(), 1);
        assert_eq!(rec.record(URL, "bot01").unwrap().attempts, 2);
        // 第三次：到达上限，同时标记用尽
        h.clock.advance(Duration::from_secs(61));
        let r = rec.detect(&h.ctx, URL, &h.pool).await;
        assert_eq!(r.exhausted, vec!["bot01"]);
        assert!(rec.record(URL, "bot01").unwrap().exhausted);

        for _ in 0..5 {
            h.clock.advance(Duration::from_secs(120));
            let r = rec.detect(&h.ctx, URL, &h.pool).await;
            assert!(r.failed.is_empty() && r.exhausted.is_empty());
        }
        assert_eq!(h.gw.count_commands("play"), 3);
        let exhausted_events = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, WaveEvent::RestoreExhausted { .. }))
            .count();
        assert_eq!(exhausted_events, 1);
        assert!(rec.record(URL, "bot01").unwrap().attempts <= policy.max_attempts);
    }

    #[tokio::test]
    async fn test_default_policy_two_attempts() {
        let h = harness(1);
        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());
        h.gw.set_online(URL, "bot01", false);
        rec.detect(&h.ctx, URL, &h.pool).await;
        h.gw.set_online(URL, "bot01", true);
        h.gw.fail_commands_for("bot01");
        for _ in 0..6 {
            rec.detect(&h.ctx, URL, &h.pool).await;
            h.clock.advance(Duration::from_secs(61));
        }
        assert_eq!(h.gw.count_commands("play"), 2);
        assert!(h.clock.now_millis() > 0);
    }

    #[tokio::test]
    async fn test_unreachable_changes_nothing() {
        let h = harness(3);
        h.gw.set_online(URL, "bot01", false);
        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());
        h.gw.set_reachable(URL, false);
        let report = rec.detect(&h.ctx, URL, &h.pool).await;
        assert!(report.unreachable);
        assert_eq!(rec.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_records_pruned_when_agent_leaves_active_set() {
        let mut h = harness(2);
        h.gw.set_online(URL, "bot02", false);
        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());
        rec.detect(&h.ctx, URL, &h.pool).await;
        assert!(rec.is_tracked(URL, "bot02"));

        h.pool.commit(URL, "bot02", false);
        rec.detect(&h.ctx, URL, &h.pool).await;
        assert!(!rec.is_tracked(URL, "bot02"));
    }

    #[test]
    fn test_summarize_names_caps_at_ten() {
        let names: Vec<String> = (1..=13).map(|i| format!("b{i}")).collect();
        let text = summarize_names(&names);
        assert!(text.ends_with("b10 (+3 more)"));
        assert_eq!(summarize_names(&names[..2]), "b1, b2");
    }

    #[test]
    fn test_export_restore_roundtrip_filters_inactive() {
        let mut pool = BotPoolManager::from_pools(vec![EndpointPool::new(URL, vec!["a".into(), "b".into()])]);
        pool.commit(URL, "a", true);
        let mut fallen = BTreeMap::new();
        fallen.insert(URL.to_string(), vec!["a".to_string(), "b".to_string()]);
        let mut attempts = BTreeMap::new();
        let mut inner = BTreeMap::new();
        inner.insert("a".to_string(), RestoreAttempt { count: 9, last_attempt_ms: 5, exhausted: true });
        attempts.insert(URL.to_string(), inner);

        let mut rec = FallenBotRecovery::new(RecoveryPolicy::default());
        rec.restore(&fallen, &attempts, &pool);
        assert_eq!(rec.tracked_count(), 1);
        let r = rec.record(URL, "a").unwrap();
        assert_eq!((r.attempts, r.last_attempt_ms, r.exhausted), (2, 5, true));

        let (f, a) = rec.export();
        assert_eq!(f[URL], vec!["a"]);
        assert_eq!(a[URL]["a"].count, 2);
    }
}
