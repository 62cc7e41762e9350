//! 机器人池：全集发现、激活 / 停止候选选择、在玩栈记账

pub mod manager;

pub use manager::{BotPoolManager, EndpointPool};
