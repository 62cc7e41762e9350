//! 引擎错误类型
//!
//! 只有启动前置条件会让 `start()` / `resume()` 失败；运行中的传输与命令错误都在原地记录后继续。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaveError {
    #[error("Game ID must be a positive integer")]
    InvalidGameId,

    #[error("No active endpoints configured")]
    NoActiveEndpoints,

    #[error("Wave cycle is already running")]
    AlreadyRunning,

    #[error("Session persistence error: {0}")]
    Persistence(String),
}
