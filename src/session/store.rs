//! 会话存储：保存 / 读取 / 清除单个可续跑快照
//!
//! - `JsonFileSessionStore`：写临时文件后 rename；损坏的文件移到 `<file>.broken_<时间戳>.bak`
//! - `MemorySessionStore`：测试用

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::snapshot::SessionSnapshot;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 覆盖保存
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// 读取；没有快照或快照损坏时返回 None
    async fn load(&self) -> Result<Option<SessionSnapshot>>;

    async fn clear(&self) -> Result<()>;
}

/// JSON 文件存储
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// 把无法解析的快照移开，避免下次启动再次失败
    async fn quarantine(&self) -> Result<PathBuf> {
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".broken_{}.bak", ts));
        let backup = PathBuf::from(name);
        tokio::fs::rename(&self.path, &backup)
            .await
            .with_context(|| format!("move broken session file to {}", backup.display()))?;
        Ok(backup)
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .context("create session dir")?;
        }
        let payload = serde_json::to_vec_pretty(snapshot).context("serialize session snapshot")?;
        let tmp = self.tmp_path();
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .context("create session tmp")?;
            file.write_all(&payload).await.context("write session tmp")?;
            file.sync_all().await.context("sync session tmp")?;
        }
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
                let _ = tokio::fs::remove_file(&self.path).await;
                tokio::fs::rename(&tmp, &self.path)
                    .await
                    .context("replace session file")?;
            } else {
                return Err(err).context("rename session tmp");
            }
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionSnapshot>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("read session file"),
        };
        match serde_json::from_slice::<SessionSnapshot>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                let backup = self.quarantine().await?;
                tracing::warn!(
                    error = %e,
                    backup = %backup.display(),
                    "Session file is broken, moved aside"
                );
                Ok(None)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("remove session file"),
        }
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<SessionSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        *self.slot.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionSnapshot>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CyclePhase;
    use std::collections::BTreeMap;

    fn sample() -> SessionSnapshot {
        let mut active = BTreeMap::new();
        active.insert("http://a".to_string(), vec!["x".to_string(), "y".to_string()]);
        SessionSnapshot {
            running: true,
            phase: CyclePhase::Ascending,
            day: 2,
            online_count: 2,
            active_agents: active,
            fallen_tracked: BTreeMap::new(),
            restore_attempts: BTreeMap::new(),
            saved_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_file_store_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::new(dir.path().join("nested").join("session.json"));
        assert!(store.load().await.unwrap().is_none());

        let snap = sample();
        store.save(&snap).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snap.clone()));
        assert!(!store.tmp_path().exists());

        let mut later = snap;
        later.day = 3;
        store.save(&later).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().day, 3);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_broken_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = JsonFileSessionStore::new(&path);

        assert!(store.load().await.unwrap().is_none());
        assert!(!path.exists());
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("session.json.broken_") && n.ends_with(".bak"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&sample()).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
