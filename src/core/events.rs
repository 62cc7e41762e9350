//! 波形过程事件：阶段切换、激活 / 停止、掉线告警与恢复
//!
//! 通过 broadcast 通道发出，可序列化为 JSON 供外部展示。

use serde::Serialize;
use tokio::sync::broadcast;

use super::state::CyclePhase;

/// 单个事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaveEvent {
    /// 周期开始（新启动或续跑）
    Started { day: u32, resumed: bool },
    /// 阶段切换
    PhaseChanged { phase: CyclePhase, day: u32, peak: u32, floor: u32 },
    /// 成功激活一个机器人
    Activated { endpoint: String, agent: String, online: usize },
    /// 成功停止一个机器人
    Deactivated { endpoint: String, agent: String, online: usize },
    /// 命令失败（未改变池）
    CommandFailed { endpoint: String, agent: String, command: String },
    /// 新发现的掉线机器人（一次检测一条）
    FallenDetected { endpoint: String, agents: Vec<String> },
    /// 掉线机器人已恢复
    Restored { endpoint: String, agent: String },
    /// 恢复次数用尽
    RestoreExhausted { endpoint: String, agent: String, attempts: u32 },
    /// 无可用机器人，峰值不可达
    PeakUnreachable { online: usize, peak: u32 },
    /// 衰减表走完，周期自然结束
    Completed { day: u32 },
    /// 被外部停止
    Stopped,
}

/// 事件发送端；没有订阅者时静默丢弃
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<WaveEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: WaveEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WaveEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}
