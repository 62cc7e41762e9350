//! ASF IPC 的 HTTP 实现
//!
//! - 机器人表：`GET /Api/Bots/ASF`，失败再试 `GET /Api/Bot/ASF`
//! - 命令：`POST /Api/Command`，body `{"Command": "..."}`
//! - `Success` 字段缺失时以 HTTP 状态为准

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use super::record::{extract_agent_map, AgentMap};
use super::traits::{AgentGateway, GatewayError};

const ROSTER_PATHS: [&str; 2] = ["/Api/Bots/ASF", "/Api/Bot/ASF"];

static SCHEME_RE: OnceLock<Regex> = OnceLock::new();

/// 补全协议并去掉末尾 `/`：`localhost:1001` → `http://localhost:1001`
pub fn ensure_http(url: &str) -> String {
    let url = url.trim();
    let re = SCHEME_RE.get_or_init(|| Regex::new(r"(?i)^https?://").unwrap());
    let full = if re.is_match(url) {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    full.trim_end_matches('/').to_string()
}

/// 把 JSON 值转成诊断用文本（字符串不带引号）
fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// 命令响应诊断：`HTTP <code> | <message> | <result 前 200 字>`
pub fn command_diagnostic(status: u16, data: &Value) -> String {
    let mut parts = vec![format!("HTTP {}", status)];
    if let Some(msg) = data.get("Message").filter(|m| !m.is_null()) {
        let msg = value_text(msg);
        if !msg.is_empty() {
            parts.push(msg);
        }
    }
    if let Some(result) = data.get("Result").filter(|r| !r.is_null()) {
        let result = value_text(result);
        if !result.is_empty() {
            parts.push(truncate(&result, 200));
        }
    }
    if parts.len() == 1 {
        parts.push(truncate(&data.to_string(), 200));
    }
    parts.join(" | ")
}

/// 响应里的 `Success`；缺失或非布尔时退回 HTTP 状态
fn success_flag(data: &Value, http_ok: bool) -> bool {
    data.get("Success").and_then(Value::as_bool).unwrap_or(http_ok)
}

/// 基于 reqwest 的 ASF 网关
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    /// `ipc_password` 非空时以 `Authentication` 头发送
    pub fn new(ipc_password: Option<&str>, timeout_secs: u64) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        if let Some(password) = ipc_password.filter(|p| !p.is_empty()) {
            match HeaderValue::from_str(password) {
                Ok(v) => {
                    headers.insert("Authentication", v);
                }
                Err(e) => tracing::warn!("IPC password is not a valid header value, sending without it: {}", e),
            }
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// GET 一个路径并解析 JSON
    async fn get_json(&self, url: &str, path: &str) -> Result<(u16, bool, Value), GatewayError> {
        let full = format!("{}{}", ensure_http(url), path);
        let resp = self
            .client
            .get(&full)
            .send()
            .await
            .map_err(|e| GatewayError::Connection(format!("{}: {}", path, e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Connection(format!("{}: read body: {}", path, e)))?;
        let data: Value = serde_json::from_str(&body).map_err(|_| GatewayError::InvalidJson {
            status: status.as_u16(),
            body: truncate(&body, 200),
        })?;
        Ok((status.as_u16(), status.is_success(), data))
    }
}

#[async_trait]
impl AgentGateway for HttpGateway {
    async fn list_agents(&self, url: &str) -> Result<AgentMap, GatewayError> {
        let mut last_err = GatewayError::UnexpectedFormat("no roster path tried".to_string());
        for path in ROSTER_PATHS {
            match self.get_json(url, path).await {
                Ok((status, http_ok, data)) => {
                    if !data.is_object() {
                        last_err = GatewayError::UnexpectedFormat(format!(
                            "{}: HTTP {} (unexpected format)",
                            path, status
                        ));
                        continue;
                    }
                    if !success_flag(&data, http_ok) {
                        let msg = data.get("Message").map(value_text).unwrap_or_default();
                        last_err = GatewayError::UnexpectedFormat(format!(
                            "{}: HTTP {} | {}",
                            path, status, msg
                        ));
                        continue;
                    }
                    match extract_agent_map(&data) {
                        Some(map) => return Ok(map),
                        None => {
                            last_err = GatewayError::UnexpectedFormat(format!(
                                "{}: HTTP {} (no bots in response)",
                                path, status
                            ));
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(endpoint = %url, path, error = %e, "Roster request failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn send_command(&self, url: &str, command: &str) -> Result<String, GatewayError> {
        let full = format!("{}/Api/Command", ensure_http(url));
        let resp = self
            .client
            .post(&full)
            .json(&json!({ "Command": command }))
            .send()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Connection(format!("read body: {}", e)))?;
        let data: Value = serde_json::from_str(&body).map_err(|_| GatewayError::InvalidJson {
            status: status.as_u16(),
            body: truncate(&body, 300),
        })?;
        let diagnostic = command_diagnostic(status.as_u16(), &data);
        if success_flag(&data, status.is_success()) {
            Ok(diagnostic)
        } else {
            Err(GatewayError::Rejected(diagnostic))
        }
    }
}
