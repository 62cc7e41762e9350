//! 机器人记录归一化
//!
//! ASF 不同版本返回的结构不一（`Result.Bots` 映射 / 直接映射 / 列表，布尔字段名也各不相同），
//! 这里在网关边界一次性转成 `{agentId -> AgentRecord}`，引擎内部只看这一种形状。

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// 规范化后的机器人表（按名字排序，保证选择顺序确定）
pub type AgentMap = BTreeMap<String, AgentRecord>;

/// 在线判定字段，按优先级排列
const ONLINE_KEYS: &[&str] = &[
    "IsConnectedAndLoggedOn",
    "IsConnectedAndLoggedOnToSteam",
    "IsConnected",
    "Connected",
    "IsRunning",
    "Running",
    "KeepRunning",
];

const PLAYING_KEYS: &[&str] = &["IsPlaying", "IsInGame", "Playing"];
const ACTIVITY_ID_KEYS: &[&str] = &["GameID", "AppID", "PlayingGameID"];
const ACTIVITY_NAME_KEYS: &[&str] = &["Game", "PlayingGameName", "GameName"];

/// 正在运行的游戏标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityId {
    Known(u64),
    /// 有值但无法解析成数字
    Opaque(String),
}

/// 「是否已在运行目标游戏」的三态判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Yes,
    No,
    Unknown,
}

/// 单个机器人的规范化记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRecord {
    pub online: Option<bool>,
    pub playing: Option<bool>,
    pub activity_id: Option<ActivityId>,
    /// 游戏名字段；非字符串的值记为空串
    pub activity_name: Option<String>,
}

impl AgentRecord {
    /// 从 ASF 返回的单个机器人对象构造
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            online: get_bool(obj, ONLINE_KEYS),
            playing: get_bool(obj, PLAYING_KEYS),
            activity_id: first_truthy(obj, ACTIVITY_ID_KEYS).map(parse_activity_id),
            activity_name: first_truthy(obj, ACTIVITY_NAME_KEYS)
                .map(|v| v.as_str().map(str::to_string).unwrap_or_default()),
        }
    }

    pub fn online(online: bool) -> Self {
        Self {
            online: Some(online),
            ..Self::default()
        }
    }

    pub fn is_online(&self) -> bool {
        self.online == Some(true)
    }

    /// 依次尝试：显式 playing 标志 → 游戏 ID → 游戏名；都没有则 Unknown
    pub fn play_state(&self, expected_game_id: u32) -> PlayState {
        match self.playing {
            Some(true) => {
                return self
                    .activity_id
                    .as_ref()
                    .map_or(PlayState::Yes, |id| id.matches(expected_game_id));
            }
            Some(false) => return PlayState::No,
            None => {}
        }
        if let Some(id) = &self.activity_id {
            return id.matches(expected_game_id);
        }
        match self.activity_name.as_deref().map(str::trim) {
            // 任何非空名字（包括占位的 "-"）都算在玩
            Some(name) if !name.is_empty() => PlayState::Yes,
            Some(_) => PlayState::No,
            None => PlayState::Unknown,
        }
    }
}

impl ActivityId {
    /// 无法解析的 ID 宽松地视为「在玩」
    fn matches(&self, expected_game_id: u32) -> PlayState {
        match self {
            ActivityId::Known(id) if *id == u64::from(expected_game_id) => PlayState::Yes,
            ActivityId::Known(_) => PlayState::No,
            ActivityId::Opaque(_) => PlayState::Yes,
        }
    }
}

/// 在线 / 离线 / 总数统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

/// 统计机器人数量；离线数以 `total - online` 为准
pub fn compute_counts(agents: &AgentMap) -> AgentCounts {
    let total = agents.len();
    let online = agents.values().filter(|r| r.is_online()).count();
    AgentCounts {
        total,
        online,
        offline: total.saturating_sub(online),
    }
}

/// 从 API 顶层对象中取出机器人表；无法识别时返回 None
pub fn extract_agent_map(api: &Value) -> Option<AgentMap> {
    match api.get("Result")? {
        Value::Object(result) => {
            if let Some(Value::Object(bots)) = result.get("Bots") {
                return Some(normalize_map(bots));
            }
            if !result.is_empty() && result.values().all(Value::is_object) {
                return Some(normalize_map(result));
            }
            None
        }
        Value::Array(items) => {
            let out: AgentMap = items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.is_object())
                .map(|(i, item)| {
                    let name = ["BotName", "Name"]
                        .iter()
                        .find_map(|k| item.get(*k).filter(|v| is_truthy(v)))
                        .map(value_to_name)
                        .unwrap_or_else(|| format!("Bot_{}", i + 1));
                    (name, AgentRecord::from_value(item))
                })
                .collect();
            (!out.is_empty()).then_some(out)
        }
        _ => None,
    }
}

fn normalize_map(raw: &Map<String, Value>) -> AgentMap {
    raw.iter()
        .map(|(name, v)| (name.clone(), AgentRecord::from_value(v)))
        .collect()
}

fn value_to_name(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 按键顺序找第一个能解析成布尔的字段（bool、0/1、true/yes/1/false/no/0）
fn get_bool(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 0.0 => Some(false),
            Some(x) if x == 1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn first_truthy<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| is_truthy(v))
}

fn parse_activity_id(v: &Value) -> ActivityId {
    let parsed = match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|x| *x >= 0.0).map(|x| x.trunc() as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(id) => ActivityId::Known(id),
        None => ActivityId::Opaque(value_to_name(v)),
    }
}
