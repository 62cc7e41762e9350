//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CCU__*` 覆盖（双下划线表示嵌套，如 `CCU__WAVE__PEAK=300`）。
//! `[wave]` 段即波形参数，每次 `start()` 时读取；运行中重新加载只影响下一次启动。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::WaveError;
use crate::schedule::{DailyTime, HoldDuration};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub gateway: GatewaySection,
    pub recovery: RecoverySection,
    pub wave: WaveConfig,
}

/// [app] 段：会话快照位置、后台巡检周期、启动/退出策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub session_path: PathBuf,
    /// 后台巡检（掉线检测 + 快照）间隔（秒）
    pub housekeeping_interval_secs: u64,
    /// 启动时发现未完成会话是否自动续跑（否则清除快照）
    pub resume_on_start: bool,
    /// 退出时是否对所有实例发送 `reset ASF`
    pub reset_on_exit: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            session_path: PathBuf::from("settings/ccu_session_state.json"),
            housekeeping_interval_secs: 10,
            resume_on_start: true,
            reset_on_exit: false,
        }
    }
}

/// [gateway] 段：IPC 密码与请求超时
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// 以 `Authentication` 头发送；为空则不带
    pub ipc_password: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            ipc_password: None,
            request_timeout_secs: 10,
        }
    }
}

/// [recovery] 段：掉线恢复的次数上限与冷却，以及 reset 命令的传输层重试
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub max_attempts: u32,
    pub cooldown_secs: u64,
    pub reset_retries: u32,
    pub reset_backoff_secs: u64,
    /// reset 彻底失败后 stop 与 start 之间的停顿
    pub restart_pause_secs: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            cooldown_secs: 60,
            reset_retries: 2,
            reset_backoff_secs: 10,
            restart_pause_secs: 2,
        }
    }
}

/// [wave] 段：每日波形参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub game_id: u32,
    pub peak: u32,
    #[serde(alias = "bottom")]
    pub floor: u32,
    pub time_peak: DailyTime,
    #[serde(alias = "time_bottom")]
    pub time_floor: DailyTime,
    /// 前 N 天使用基础峰谷，之后才进入衰减表
    pub base_days: u32,
    pub randomize: Randomize,
    pub delay: HoldDelay,
    pub gradual_decay: GradualDecay,
    pub endpoints: Vec<EndpointConfig>,
    /// 同一批次内两条命令之间的间隔（毫秒）
    pub settle_delay_ms: u64,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            game_id: 730,
            peak: 500,
            floor: 150,
            time_peak: DailyTime::new(20, 0).unwrap_or(DailyTime::MIDNIGHT),
            time_floor: DailyTime::new(6, 0).unwrap_or(DailyTime::MIDNIGHT),
            base_days: 7,
            randomize: Randomize::default(),
            delay: HoldDelay::default(),
            gradual_decay: GradualDecay::default(),
            endpoints: vec![EndpointConfig {
                name: "GAME_1".into(),
                url: "localhost:1001".into(),
                active: true,
            }],
            settle_delay_ms: 500,
        }
    }
}

impl WaveConfig {
    /// 参与发现、调度与恢复的实例（`active = true`）
    pub fn active_endpoints(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(|e| e.active)
    }

    /// 启动前置检查：游戏 ID 必须为正，且至少一个启用的实例
    pub fn validate(&self) -> Result<(), WaveError> {
        if self.game_id == 0 {
            return Err(WaveError::InvalidGameId);
        }
        if self.active_endpoints().next().is_none() {
            return Err(WaveError::NoActiveEndpoints);
        }
        Ok(())
    }

    /// 峰值后的保持时长；未启用或为 0 时返回 None
    pub fn hold_after_peak(&self) -> Option<Duration> {
        self.delay.hold(self.delay.after_peak)
    }

    pub fn hold_after_floor(&self) -> Option<Duration> {
        self.delay.hold(self.delay.after_floor)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// 按 URL 找实例
    pub fn endpoint(&self, url: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.url == url)
    }
}

/// 单个 ASF 实例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl EndpointConfig {
    /// 日志里显示的名字：没有名字就用 URL
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

fn default_true() -> bool {
    true
}

/// 抖动方式：按百分比缩放或加绝对偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    #[default]
    Percentage,
    Absolute,
}

/// [wave.randomize] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Randomize {
    pub enabled: bool,
    #[serde(alias = "type")]
    pub mode: JitterMode,
    pub min: i64,
    pub max: i64,
}

impl Default for Randomize {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: JitterMode::Percentage,
            min: -15,
            max: 15,
        }
    }
}

/// [wave.delay] 段：峰值 / 谷值后的保持
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldDelay {
    pub enabled: bool,
    #[serde(alias = "delay_after_peak")]
    pub after_peak: HoldDuration,
    #[serde(alias = "delay_after_bottom", alias = "after_bottom")]
    pub after_floor: HoldDuration,
}

impl HoldDelay {
    fn hold(&self, duration: HoldDuration) -> Option<Duration> {
        (self.enabled && !duration.is_zero()).then(|| Duration::from_secs(u64::from(duration.as_secs())))
    }
}

/// [wave.gradual_decay] 段：基础天数之后逐日的峰谷表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GradualDecay {
    pub enabled: bool,
    pub additional_days: Vec<DayOverride>,
}

/// 衰减表中的一天；缺省字段沿用基础值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOverride {
    #[serde(default)]
    pub peak: Option<u32>,
    #[serde(default, alias = "bottom")]
    pub floor: Option<u32>,
}

/// 从 config 目录加载配置，环境变量 CCU__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CCU__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CCU")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
