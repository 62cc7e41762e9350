//! 网关层：与 ASF 实例通信
//!
//! - **traits**: AgentGateway 抽象与错误类型
//! - **record**: 响应归一化（在线 / 在玩判定）
//! - **http**: 基于 reqwest 的 IPC 实现
//! - **commands**: 命令词汇与 reset 回退
//! - **health**: 实例健康巡检
//! - **mock**: 内存实现（测试 / 演示）

pub mod commands;
pub mod health;
pub mod http;
pub mod mock;
pub mod record;
pub mod traits;

pub use commands::{activate, reset_all, reset_with_fallback, AgentCommand, CommandPolicy};
pub use health::{survey, EndpointHealth, EndpointStatus};
pub use http::{ensure_http, HttpGateway};
pub use mock::MockGateway;
pub use record::{compute_counts, extract_agent_map, ActivityId, AgentCounts, AgentMap, AgentRecord, PlayState};
pub use traits::{AgentGateway, GatewayError};
