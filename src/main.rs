//! ccu - CCU 波形控制器
//!
//! 入口：初始化日志、加载配置、创建 ASF 网关与波形控制器，运行到自然结束或收到关闭信号。
//!
//! 运行方式：
//! ```bash
//! ccu            # 同 ccu run：续跑或新启动一个波形周期
//! ccu status     # 查看各实例在线情况与遗留会话
//! ccu reset      # 对所有启用实例发送 `reset ASF`
//! ```
//! 配置文件路径可由 `CCU_CONFIG` 指定，键值可由 `CCU__*` 环境变量覆盖。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use ccu::config::{load_config, AppConfig};
use ccu::core::{run_until_shutdown, ControllerCleanup, ShutdownSignal, WaveController};
use ccu::gateway::{reset_all, survey, AgentGateway, HttpGateway};
use ccu::observability;
use ccu::schedule::SystemClock;
use ccu::session::{JsonFileSessionStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var("CCU_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let gateway: Arc<dyn AgentGateway> = Arc::new(HttpGateway::new(
        cfg.gateway.ipc_password.as_deref(),
        cfg.gateway.request_timeout_secs,
    ));

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());
    match command.as_str() {
        "run" => run(cfg, gateway).await,
        "status" => status(&cfg, gateway.as_ref()).await,
        "reset" => {
            let urls: Vec<&str> = cfg.wave.active_endpoints().map(|e| e.url.as_str()).collect();
            let ok = reset_all(gateway.as_ref(), urls.iter().copied()).await;
            println!("reset ASF sent to {}/{} endpoints", ok, urls.len());
            Ok(())
        }
        other => bail!("unknown command '{}', expected run | status | reset", other),
    }
}

async fn run(cfg: AppConfig, gateway: Arc<dyn AgentGateway>) -> anyhow::Result<()> {
    let store: Arc<dyn SessionStore> = Arc::new(JsonFileSessionStore::new(&cfg.app.session_path));
    let controller = Arc::new(WaveController::new(
        &cfg,
        gateway,
        Arc::new(SystemClock),
        store.clone(),
    ));

    let resumed = controller
        .recover_session(cfg.app.resume_on_start)
        .await
        .context("Failed to recover previous session")?;
    if !resumed {
        controller.start().await.context("Failed to start wave cycle")?;
    }

    let cleanup = ControllerCleanup::new(controller.clone(), store, cfg.app.reset_on_exit).with_timeout(60);
    let signal = ShutdownSignal::new();

    tracing::info!("Press Ctrl+C to stop");
    let app = {
        let controller = controller.clone();
        async move {
            let reporter = tokio::spawn(report_status(controller.clone()));
            controller.wait().await;
            reporter.abort();
        }
    };
    if let Some(reason) = run_until_shutdown(&signal, app, &cleanup).await {
        tracing::info!(%reason, "Stopped by signal");
    }

    Ok(())
}

/// 每分钟输出一行状态
async fn report_status(controller: Arc<WaveController>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let s = controller.status();
        let next = s
            .next_deadline
            .as_ref()
            .map(|d| d.describe())
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(
            "Day {} {} | online {}/{} (peak {}, floor {}) | offline {} | next {}",
            s.day,
            s.phase.as_str(),
            s.online,
            s.total,
            s.peak,
            s.floor,
            s.offline,
            next
        );
    }
}

async fn status(cfg: &AppConfig, gateway: &dyn AgentGateway) -> anyhow::Result<()> {
    for h in survey(gateway, &cfg.wave.endpoints).await {
        println!(
            "{:<16} {:<28} {:<12} total {:>4}  online {:>4}  offline {:>4}",
            h.name, h.url, h.status, h.total, h.online, h.offline
        );
        if let Some(detail) = h.detail {
            println!("    {}", detail);
        }
    }

    let store = JsonFileSessionStore::new(&cfg.app.session_path);
    match store.load().await? {
        Some(snap) => println!(
            "saved session: running={} day={} phase={} online={} (saved {})",
            snap.running,
            snap.day,
            snap.phase.as_str(),
            snap.online_count,
            snap.saved_at.to_rfc3339()
        ),
        None => println!("no saved session"),
    }
    Ok(())
}
