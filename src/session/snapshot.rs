//! 会话快照：足以在进程重启后恢复等价的运行周期

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::CyclePhase;

/// 单个掉线机器人的恢复记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreAttempt {
    pub count: u32,
    /// Unix 毫秒；0 表示从未尝试
    #[serde(default)]
    pub last_attempt_ms: i64,
    #[serde(default)]
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub running: bool,
    pub phase: CyclePhase,
    pub day: u32,
    pub online_count: usize,
    /// url -> 在玩栈（顺序即激活顺序）
    #[serde(default)]
    pub active_agents: BTreeMap<String, Vec<String>>,
    /// url -> 正在跟踪的掉线机器人
    #[serde(default)]
    pub fallen_tracked: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub restore_attempts: BTreeMap<String, BTreeMap<String, RestoreAttempt>>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// 是否需要续跑
    pub fn is_resumable(&self) -> bool {
        self.running
    }
}
