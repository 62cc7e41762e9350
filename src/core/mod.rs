//! 核心编排层：错误、状态投影、事件、运行监管、掉线恢复、主控循环、后台巡检、优雅关闭

pub mod context;
pub mod error;
pub mod events;
mod housekeeping;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use context::WaveContext;
pub use error::WaveError;
pub use events::{EventSink, WaveEvent};
pub use orchestrator::{EngineState, WaveController};
pub use recovery::{summarize_names, DetectionReport, FallenBotRecovery, FallenRecord, RecoveryPolicy};
pub use session_supervisor::{sleep_interruptibly, SessionSupervisor};
pub use shutdown::{run_until_shutdown, ControllerCleanup, ShutdownReason, ShutdownSignal};
pub use state::{CyclePhase, CycleState, Deadline, WaveStatus};
