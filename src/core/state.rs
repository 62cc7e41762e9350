//! 状态定义：CycleState（引擎内部）与 WaveStatus 投影
//!
//! 外部只看轻量的 WaveStatus（阶段、天数、目标、计数、下一个截止时刻）；完整状态由 WaveController 持有并投影。

use serde::{Deserialize, Serialize};

use crate::schedule::{fmt_duration, seconds_until, DailyTime, DayTargets};

/// 波形阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Ascending,
    HoldAtPeak,
    Descending,
    HoldAtFloor,
}

impl CyclePhase {
    /// 续跑时从哪个方向进入：峰值前的阶段从上升开始，其余从下降开始
    pub fn resumes_descending(self) -> bool {
        matches!(
            self,
            CyclePhase::HoldAtPeak | CyclePhase::Descending | CyclePhase::HoldAtFloor
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Ascending => "ascending",
            CyclePhase::HoldAtPeak => "hold_at_peak",
            CyclePhase::Descending => "descending",
            CyclePhase::HoldAtFloor => "hold_at_floor",
        }
    }
}

/// 引擎内部的周期状态
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleState {
    pub phase: CyclePhase,
    /// 从 1 开始
    pub day: u32,
    pub online_count: usize,
    pub running: bool,
}

impl Default for CycleState {
    fn default() -> Self {
        Self {
            phase: CyclePhase::Idle,
            day: 1,
            online_count: 0,
            running: false,
        }
    }
}

/// 下一个截止时刻（峰值或谷值）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Deadline {
    pub label: &'static str,
    pub at: DailyTime,
    pub remaining_secs: u32,
}

impl Deadline {
    /// `peak 20:00 (in 1h 05m)`
    pub fn describe(&self) -> String {
        format!(
            "{} {} (in {})",
            self.label,
            self.at,
            fmt_duration(u64::from(self.remaining_secs))
        )
    }
}

/// 对外可见的投影状态
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WaveStatus {
    pub running: bool,
    pub phase: CyclePhase,
    pub day: u32,
    pub peak: u32,
    pub floor: u32,
    /// 引擎记账的在玩数
    pub online: usize,
    /// 已发现但未在玩
    pub offline: usize,
    pub total: usize,
    pub next_deadline: Option<Deadline>,
}

impl CycleState {
    /// 与当日目标、池规模、当前时刻合并出对外状态
    pub fn project(
        &self,
        targets: DayTargets,
        total_agents: usize,
        time_peak: DailyTime,
        time_floor: DailyTime,
        now_seconds_of_day: u32,
    ) -> WaveStatus {
        let next_deadline = match self.phase {
            CyclePhase::Ascending | CyclePhase::HoldAtFloor => Some(Deadline {
                label: "peak",
                at: time_peak,
                remaining_secs: seconds_until(time_peak, now_seconds_of_day),
            }),
            CyclePhase::Descending | CyclePhase::HoldAtPeak => Some(Deadline {
                label: "floor",
                at: time_floor,
                remaining_secs: seconds_until(time_floor, now_seconds_of_day),
            }),
            CyclePhase::Idle => None,
        };
        WaveStatus {
            running: self.running,
            phase: self.phase,
            day: self.day,
            peak: targets.peak,
            floor: targets.floor,
            online: self.online_count,
            offline: total_agents.saturating_sub(self.online_count),
            total: total_agents,
            next_deadline,
        }
    }
}
