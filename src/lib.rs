//! CCU - ASF 机器人在线数波形控制器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 主控循环、掉线恢复、状态投影、事件、运行监管、优雅关闭
//! - **gateway**: ASF IPC 网关抽象与实现（HTTP / Mock）、响应归一化、命令与健康巡检
//! - **observability**: tracing 日志初始化
//! - **pool**: 机器人池（全集、在玩栈、选择与记账）
//! - **schedule**: 每日峰谷目标、节奏间隔、抖动、时钟
//! - **session**: 可续跑的会话快照与存储

pub mod config;
pub mod core;
pub mod gateway;
pub mod observability;
pub mod pool;
pub mod schedule;
pub mod session;

pub use crate::core::{WaveController, WaveError, WaveEvent, WaveStatus};
