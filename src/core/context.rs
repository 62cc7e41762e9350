//! 一次运行的显式上下文：配置、网关、时钟、事件、取消令牌
//!
//! 每个组件调用都显式传入，不使用进程级单例。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::events::{EventSink, WaveEvent};
use crate::config::WaveConfig;
use crate::gateway::{AgentGateway, CommandPolicy};
use crate::schedule::Clock;

#[derive(Clone)]
pub struct WaveContext {
    /// 本次运行冻结的波形参数
    pub config: Arc<WaveConfig>,
    pub gateway: Arc<dyn AgentGateway>,
    pub clock: Arc<dyn Clock>,
    pub events: EventSink,
    pub cancel: CancellationToken,
    pub commands: CommandPolicy,
}

impl WaveContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn emit(&self, event: WaveEvent) {
        self.events.emit(event);
    }

    /// 日志里的实例名
    pub fn endpoint_label<'a>(&'a self, url: &'a str) -> &'a str {
        self.config.endpoint(url).map_or(url, |e| e.label())
    }
}
