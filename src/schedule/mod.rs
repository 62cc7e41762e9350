//! 调度层：每日峰谷目标、节奏间隔、抖动与墙上时钟

pub mod calculator;
pub mod clock;

pub use calculator::{apply_jitter, pacing_secs, step_interval, targets_for_day, DayTargets};
pub use clock::{
    fmt_duration, parse_hhmm, seconds_until, Clock, DailyTime, HoldDuration, ManualClock,
    SystemClock, SECONDS_PER_DAY,
};
