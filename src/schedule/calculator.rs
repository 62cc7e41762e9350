//! 波形计算：每日峰谷目标、单步节奏间隔、步长抖动
//!
//! 全部为纯函数，随机源由调用方传入，便于测试。

use rand::Rng;

use crate::config::{JitterMode, Randomize, WaveConfig};

/// 某一天的峰谷目标；默认值即 (0, 0)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayTargets {
    pub peak: u32,
    pub floor: u32,
}

impl DayTargets {
    pub const COMPLETE: Self = Self { peak: 0, floor: 0 };

    /// (0, 0) 表示衰减表已走完，引擎应结束
    pub fn is_complete(&self) -> bool {
        *self == Self::COMPLETE
    }
}

/// 第 `day` 天（从 1 开始）的峰谷目标
pub fn targets_for_day(day: u32, config: &WaveConfig) -> DayTargets {
    let base = DayTargets {
        peak: config.peak,
        floor: config.floor,
    };
    if !config.gradual_decay.enabled || day <= config.base_days {
        return base;
    }
    let index = (day - config.base_days - 1) as usize;
    match config.gradual_decay.additional_days.get(index) {
        Some(entry) => DayTargets {
            peak: entry.peak.unwrap_or(base.peak),
            floor: entry.floor.unwrap_or(base.floor),
        },
        None => DayTargets::COMPLETE,
    }
}

/// 每走一个机器人需要的秒数；无需移动或没有可用时间时为无穷大
pub fn step_interval(current: u32, target: u32, seconds_available: i64) -> f64 {
    let steps = current.abs_diff(target);
    if steps == 0 || seconds_available <= 0 {
        f64::INFINITY
    } else {
        seconds_available as f64 / f64::from(steps)
    }
}

/// 实际等待的整秒数：至少 1 秒，保证循环总在前进；无穷大返回 None（已在目标处）
pub fn pacing_secs(interval: f64) -> Option<u64> {
    if interval.is_finite() {
        Some(interval.max(1.0) as u64)
    } else {
        None
    }
}

/// 对单步目标加抖动；未启用时原样返回
pub fn apply_jitter<R: Rng + ?Sized>(value: i64, randomize: &Randomize, rng: &mut R) -> i64 {
    if !randomize.enabled {
        return value;
    }
    let (lo, hi) = if randomize.min <= randomize.max {
        (randomize.min, randomize.max)
    } else {
        (randomize.max, randomize.min)
    };
    match randomize.mode {
        JitterMode::Percentage => {
            let (lo, hi) = (1.0 + lo as f64 / 100.0, 1.0 + hi as f64 / 100.0);
            let factor = if lo == hi { lo } else { rng.gen_range(lo..=hi) };
            (value as f64 * factor).trunc() as i64
        }
        JitterMode::Absolute => {
            let offset = if lo == hi { lo } else { rng.gen_range(lo..=hi) };
            value + offset
        }
    }
}
