//! 时钟与时间工具
//!
//! - `Clock`：引擎读取墙上时间的唯一入口，生产用 `SystemClock`，测试用 `ManualClock`
//! - `DailyTime` / `HoldDuration`：配置里的 `HH:MM`（每日时刻 / 时长）
//! - `seconds_until`：距离下一个每日时刻的秒数（已过则跨到次日）

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// 墙上时间来源（本地时区）
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    /// Unix 毫秒时间戳（恢复冷却计时用）
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// 当天已过去的秒数
    fn seconds_of_day(&self) -> u32 {
        self.now().num_seconds_from_midnight()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// 手动时钟：时间只在调用 `set` / `advance` 时变化
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// 固定日期（2024-01-15）上的某个本地时刻
    pub fn at(hour: u32, minute: u32, second: u32) -> Self {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(hour % 24, minute % 60, second % 60))
            .unwrap_or_default();
        Self::new(local_from_naive(naive))
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: std::time::Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = *guard + step;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn local_from_naive(naive: NaiveDateTime) -> DateTime<Local> {
    naive
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or_else(Local::now)
}

/// 解析 `HH:MM` 为秒数；小时不设上限（时长字段可超过 23 小时），分钟须小于 60
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let (h, m) = (h.trim(), m.trim());
    if h.is_empty()
        || m.is_empty()
        || !h.chars().all(|c| c.is_ascii_digit())
        || !m.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let hh: u32 = h.parse().ok()?;
    let mm: u32 = m.parse().ok()?;
    if mm >= 60 {
        return None;
    }
    hh.checked_mul(3600)?.checked_add(mm * 60)
}

/// 距离下一次 `target`（当天秒数）还有多少秒；已到或已过则算到次日同一时刻
pub fn seconds_until(target: DailyTime, now_seconds_of_day: u32) -> u32 {
    let target = target.seconds();
    if target > now_seconds_of_day {
        target - now_seconds_of_day
    } else {
        SECONDS_PER_DAY - now_seconds_of_day + target
    }
}

/// 人类可读时长：>= 1 小时为 `1h 05m`，否则 `4m 09s`
pub fn fmt_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}m {:02}s", seconds / 60, seconds % 60)
    }
}

/// 每日时刻（`HH:MM`，00:00–23:59）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DailyTime(u32);

impl DailyTime {
    pub const MIDNIGHT: Self = Self(0);

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self(hour * 3600 + minute * 60))
    }

    /// 当天的秒数
    pub fn seconds(self) -> u32 {
        self.0
    }
}

impl TryFrom<String> for DailyTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match parse_hhmm(&value) {
            Some(secs) if secs < SECONDS_PER_DAY => Ok(Self(secs)),
            _ => Err(format!("invalid time of day '{value}', expected HH:MM (00:00-23:59)")),
        }
    }
}

impl From<DailyTime> for String {
    fn from(value: DailyTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DailyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 3600, (self.0 % 3600) / 60)
    }
}

/// 保持时长（`HH:MM`，小时可超过 23）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HoldDuration(u32);

impl HoldDuration {
    pub fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<String> for HoldDuration {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_hhmm(&value)
            .map(Self)
            .ok_or_else(|| format!("invalid duration '{value}', expected HH:MM"))
    }
}

impl From<HoldDuration> for String {
    fn from(value: HoldDuration) -> Self {
        format!("{:02}:{:02}", value.0 / 3600, (value.0 % 3600) / 60)
    }
}
