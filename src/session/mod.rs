//! 会话持久化：可续跑快照及其存储

pub mod snapshot;
pub mod store;

pub use snapshot::{RestoreAttempt, SessionSnapshot};
pub use store::{JsonFileSessionStore, MemorySessionStore, SessionStore};
