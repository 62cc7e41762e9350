//! 波形控制器：主控循环
//!
//! 负责：校验配置、发现机器人、建立 status(watch) / events(broadcast) 两个对外通道，
//! 并在后台任务中驱动 上升 → [峰值保持] → 下降 → [谷值保持] → 次日 … 的状态机；
//! 另起巡检任务周期性做掉线检测与快照。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::context::WaveContext;
use super::error::WaveError;
use super::events::{EventSink, WaveEvent};
use super::housekeeping::run_housekeeping;
use super::recovery::{FallenBotRecovery, RecoveryPolicy};
use super::session_supervisor::{sleep_interruptibly, SessionSupervisor, SLEEP_SLICE};
use super::state::{CyclePhase, CycleState, WaveStatus};
use crate::config::{AppConfig, WaveConfig};
use crate::gateway::{activate, reset_all, reset_with_fallback, AgentGateway, CommandPolicy};
use crate::pool::BotPoolManager;
use crate::schedule::{
    apply_jitter, fmt_duration, pacing_secs, seconds_until, step_interval, targets_for_day, Clock, DailyTime,
    DayTargets,
};
use crate::session::{SessionSnapshot, SessionStore};

/// 引擎完整状态；周期任务与巡检任务都只在锁内修改
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub cycle: CycleState,
    pub targets: DayTargets,
    pub pool: BotPoolManager,
    pub recovery: FallenBotRecovery,
}

impl EngineState {
    fn snapshot(&self, clock: &dyn Clock) -> SessionSnapshot {
        let (fallen_tracked, restore_attempts) = self.recovery.export();
        SessionSnapshot {
            running: self.cycle.running,
            phase: self.cycle.phase,
            day: self.cycle.day,
            online_count: self.cycle.online_count,
            active_agents: self.pool.snapshot_active(),
            fallen_tracked,
            restore_attempts,
            saved_at: clock.now().with_timezone(&chrono::Utc),
        }
    }

    fn sync_online(&mut self) {
        self.cycle.online_count = self.pool.active_total();
    }
}

/// 进入周期时的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Ascend,
    Descend,
}

/// 一次运行的共享部分：周期任务与巡检任务各持一份 Arc
pub(crate) struct CycleRunner {
    ctx: WaveContext,
    state: Arc<Mutex<EngineState>>,
    status_tx: Arc<watch::Sender<WaveStatus>>,
    store: Arc<dyn SessionStore>,
    /// 自然结束时单独停掉巡检
    housekeeping_token: CancellationToken,
}

impl CycleRunner {
    async fn publish(&self) {
        let state = self.state.lock().await;
        publish_locked(&self.status_tx, &state, &self.ctx.config, self.ctx.clock.as_ref());
    }

    async fn set_phase(&self, phase: CyclePhase) {
        let (day, targets) = {
            let mut state = self.state.lock().await;
            state.cycle.phase = phase;
            (state.cycle.day, state.targets)
        };
        tracing::info!(day, peak = targets.peak, floor = targets.floor, "Phase: {}", phase.as_str());
        self.ctx.emit(WaveEvent::PhaseChanged {
            phase,
            day,
            peak: targets.peak,
            floor: targets.floor,
        });
        self.publish().await;
        self.save_snapshot().await;
    }

    /// 对所有实例做一次掉线检测
    pub(crate) async fn detect_all(&self) {
        let mut guard = self.state.lock().await;
        let EngineState { pool, recovery, .. } = &mut *guard;
        let urls: Vec<String> = pool.urls().map(String::from).collect();
        for url in urls {
            if self.ctx.is_cancelled() {
                break;
            }
            recovery.detect(&self.ctx, &url, pool).await;
        }
    }

    /// 保存快照；失败只告警，下个周期再试
    pub(crate) async fn save_snapshot(&self) {
        let snapshot = self.state.lock().await.snapshot(self.ctx.clock.as_ref());
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(error = %e, "Failed to save session snapshot");
        }
    }

    async fn run(self: Arc<Self>, entry: Entry) {
        let mut entry = entry;
        let cfg = self.ctx.config.clone();
        loop {
            if self.ctx.is_cancelled() {
                return;
            }
            let day = self.state.lock().await.cycle.day;
            let targets = targets_for_day(day, &cfg);
            if targets.is_complete() {
                tracing::info!(day, "Gradual decay finished, wave cycle complete");
                self.finish(day).await;
                return;
            }
            self.state.lock().await.targets = targets;

            // 一整天既没有走步也没有保持时，等到下一个峰值窗口再进入次日
            let mut progressed = false;
            if entry == Entry::Ascend {
                progressed |= self.ascend(targets).await;
                if self.ctx.is_cancelled() {
                    return;
                }
                if let Some(hold) = cfg.hold_after_peak() {
                    self.hold(CyclePhase::HoldAtPeak, hold).await;
                    progressed = true;
                    if self.ctx.is_cancelled() {
                        return;
                    }
                }
            }
            entry = Entry::Ascend;

            progressed |= self.descend(targets).await;
            if self.ctx.is_cancelled() {
                return;
            }
            if let Some(hold) = cfg.hold_after_floor() {
                self.hold(CyclePhase::HoldAtFloor, hold).await;
                progressed = true;
                if self.ctx.is_cancelled() {
                    return;
                }
            }
            if !progressed {
                let wait = seconds_until(cfg.time_peak, self.ctx.clock.seconds_of_day());
                tracing::info!(wait = %fmt_duration(u64::from(wait)), "Nothing to do today, waiting for the next peak window");
                if !sleep_interruptibly(&self.ctx.cancel, Duration::from_secs(u64::from(wait))).await {
                    return;
                }
            }

            let next_day = {
                let mut state = self.state.lock().await;
                state.cycle.day += 1;
                state.cycle.day
            };
            tracing::info!(day = next_day, "Starting next day");
        }
    }

    /// 自然结束：状态回到 idle，清除快照，停掉巡检
    async fn finish(&self, day: u32) {
        {
            let mut state = self.state.lock().await;
            state.cycle.running = false;
            state.cycle.phase = CyclePhase::Idle;
        }
        self.housekeeping_token.cancel();
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "Failed to clear session snapshot");
        }
        self.ctx.emit(WaveEvent::Completed { day });
        self.publish().await;
    }

    /// 上升到峰值；返回是否至少走了一步
    async fn ascend(&self, targets: DayTargets) -> bool {
        self.set_phase(CyclePhase::Ascending).await;
        let cfg = &self.ctx.config;
        let peak = targets.peak as usize;
        let wait = self.phase_pacing(cfg.time_peak, targets.peak).await;
        let mut stepped = false;
        while !self.ctx.is_cancelled() {
            let (online, headroom) = {
                let state = self.state.lock().await;
                (state.cycle.online_count, state.pool.headroom())
            };
            if online >= peak {
                tracing::info!(online, peak, "Peak reached");
                break;
            }
            if headroom == 0 {
                tracing::warn!(online, peak, "No more bots available, peak unreachable");
                self.ctx.emit(WaveEvent::PeakUnreachable { online, peak: targets.peak });
                break;
            }

            let jittered = apply_jitter(online as i64 + 1, &cfg.randomize, &mut rand::thread_rng());
            let want = usize::try_from(jittered.min(peak as i64) - online as i64).unwrap_or(0);
            if want > 0 {
                self.activate_batch(want).await;
            }
            stepped = true;
            self.detect_all().await;
            self.publish().await;

            let online = self.state.lock().await.cycle.online_count;
            if online >= peak {
                continue;
            }
            tracing::debug!(online, peak, wait, "Ascending, next step");
            sleep_interruptibly(&self.ctx.cancel, Duration::from_secs(wait)).await;
        }
        stepped
    }

    /// 下降到谷值；返回是否至少走了一步
    async fn descend(&self, targets: DayTargets) -> bool {
        self.set_phase(CyclePhase::Descending).await;
        let cfg = &self.ctx.config;
        let floor = targets.floor as usize;
        let wait = self.phase_pacing(cfg.time_floor, targets.floor).await;
        let mut stepped = false;
        while !self.ctx.is_cancelled() {
            let (online, active) = {
                let state = self.state.lock().await;
                (state.cycle.online_count, state.pool.active_total())
            };
            if online <= floor {
                tracing::info!(online, floor, "Floor reached");
                break;
            }
            if active == 0 {
                tracing::warn!(online, floor, "No active bots left to stop");
                break;
            }

            let jittered = apply_jitter(online as i64 - 1, &cfg.randomize, &mut rand::thread_rng());
            let want = usize::try_from(online as i64 - jittered.max(floor as i64)).unwrap_or(0);
            if want > 0 {
                self.deactivate_batch(want).await;
            }
            stepped = true;
            self.detect_all().await;
            self.publish().await;

            let online = self.state.lock().await.cycle.online_count;
            if online <= floor {
                continue;
            }
            tracing::debug!(online, floor, wait, "Descending, next step");
            sleep_interruptibly(&self.ctx.cancel, Duration::from_secs(wait)).await;
        }
        stepped
    }

    /// 进入上升 / 下降时按整段差距算一次单步等待（秒），整段复用；已在目标处为 1
    async fn phase_pacing(&self, deadline: DailyTime, target: u32) -> u64 {
        let online = self.state.lock().await.cycle.online_count;
        let secs = seconds_until(deadline, self.ctx.clock.seconds_of_day());
        let Some(wait) = pacing_secs(step_interval(online as u32, target, i64::from(secs))) else {
            return 1;
        };
        tracing::info!(
            online,
            target,
            deadline = %deadline,
            remaining = %fmt_duration(u64::from(secs)),
            "Pacing one bot every {}s",
            wait
        );
        wait
    }

    /// 保持阶段：每秒一次掉线检测
    async fn hold(&self, phase: CyclePhase, duration: Duration) {
        self.set_phase(phase).await;
        tracing::info!(secs = duration.as_secs(), "Holding");
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return;
            }
            let slice = (deadline - now).min(SLEEP_SLICE);
            if !sleep_interruptibly(&self.ctx.cancel, slice).await {
                return;
            }
            self.detect_all().await;
            self.publish().await;
        }
    }

    async fn activate_batch(&self, count: usize) {
        let picks = self.state.lock().await.pool.select_to_activate(count);
        let game_id = self.ctx.config.game_id;
        for (url, agent) in picks {
            if self.ctx.is_cancelled() {
                return;
            }
            if activate(self.ctx.gateway.as_ref(), &url, &agent, game_id).await {
                let online = {
                    let mut state = self.state.lock().await;
                    state.pool.commit(&url, &agent, true);
                    state.sync_online();
                    state.cycle.online_count
                };
                tracing::info!(endpoint = %self.ctx.endpoint_label(&url), agent = %agent, online, "Bot started playing");
                self.ctx.emit(WaveEvent::Activated { endpoint: url, agent, online });
            } else {
                tracing::warn!(endpoint = %self.ctx.endpoint_label(&url), agent = %agent, "Play command failed");
                self.ctx.emit(WaveEvent::CommandFailed {
                    endpoint: url,
                    agent: agent.clone(),
                    command: format!("play {} {}", agent, game_id),
                });
            }
            if !sleep_interruptibly(&self.ctx.cancel, self.ctx.config.settle_delay()).await {
                return;
            }
        }
    }

    async fn deactivate_batch(&self, count: usize) {
        let picks = self.state.lock().await.pool.select_to_deactivate(count);
        for (url, agent) in picks {
            if self.ctx.is_cancelled() {
                return;
            }
            let ok = reset_with_fallback(
                self.ctx.gateway.as_ref(),
                &url,
                &agent,
                &self.ctx.commands,
                &self.ctx.cancel,
            )
            .await;
            if ok {
                let online = {
                    let mut state = self.state.lock().await;
                    state.pool.commit(&url, &agent, false);
                    state.recovery.forget(&url, &agent);
                    state.sync_online();
                    state.cycle.online_count
                };
                tracing::info!(endpoint = %self.ctx.endpoint_label(&url), agent = %agent, online, "Bot stopped playing");
                self.ctx.emit(WaveEvent::Deactivated { endpoint: url, agent, online });
            } else {
                tracing::warn!(endpoint = %self.ctx.endpoint_label(&url), agent = %agent, "Reset command failed");
                self.ctx.emit(WaveEvent::CommandFailed {
                    endpoint: url,
                    agent: agent.clone(),
                    command: format!("reset {}", agent),
                });
            }
            if !sleep_interruptibly(&self.ctx.cancel, self.ctx.config.settle_delay()).await {
                return;
            }
        }
    }
}

fn publish_locked(
    tx: &watch::Sender<WaveStatus>,
    state: &EngineState,
    cfg: &WaveConfig,
    clock: &dyn Clock,
) {
    let status = state.cycle.project(
        state.targets,
        state.pool.total_agents(),
        cfg.time_peak,
        cfg.time_floor,
        clock.seconds_of_day(),
    );
    tx.send_replace(status);
}

/// 正在运行的任务句柄
struct RunHandle {
    supervisor: SessionSupervisor,
    runner: Arc<CycleRunner>,
    cycle: JoinHandle<()>,
    housekeeping: JoinHandle<()>,
}

/// 波形控制器
pub struct WaveController {
    wave: RwLock<Arc<WaveConfig>>,
    recovery_policy: RecoveryPolicy,
    commands: CommandPolicy,
    housekeeping_interval: Duration,
    gateway: Arc<dyn AgentGateway>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SessionStore>,
    events: EventSink,
    state: Arc<Mutex<EngineState>>,
    status_tx: Arc<watch::Sender<WaveStatus>>,
    run: Mutex<Option<RunHandle>>,
}

impl WaveController {
    pub fn new(
        app: &AppConfig,
        gateway: Arc<dyn AgentGateway>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(WaveStatus::default());
        let recovery_policy = RecoveryPolicy::from(&app.recovery);
        Self {
            wave: RwLock::new(Arc::new(app.wave.clone())),
            recovery_policy,
            commands: CommandPolicy::from(&app.recovery),
            housekeeping_interval: Duration::from_secs(app.app.housekeeping_interval_secs.max(1)),
            gateway,
            clock,
            store,
            events: EventSink::default(),
            state: Arc::new(Mutex::new(EngineState {
                recovery: FallenBotRecovery::new(recovery_policy),
                ..EngineState::default()
            })),
            status_tx: Arc::new(status_tx),
            run: Mutex::new(None),
        }
    }

    /// 当前波形参数（下一次启动使用）
    pub async fn wave_config(&self) -> Arc<WaveConfig> {
        self.wave.read().await.clone()
    }

    /// 替换波形参数；运行中的周期不受影响
    pub async fn reload_config(&self, wave: WaveConfig) {
        *self.wave.write().await = Arc::new(wave);
        tracing::info!("Wave config reloaded, applies to the next start");
    }

    pub fn status(&self) -> WaveStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<WaveStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WaveEvent> {
        self.events.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.cycle.running
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot(self.clock.as_ref())
    }

    /// 新启动：发现机器人，从第 1 天、0 在线开始上升
    pub async fn start(&self) -> Result<(), WaveError> {
        let mut run = self.run.lock().await;
        let cfg = self.prepare().await?;
        let pool = BotPoolManager::discover(&cfg.endpoints, self.gateway.as_ref()).await;
        {
            let mut state = self.state.lock().await;
            *state = EngineState {
                cycle: CycleState {
                    phase: CyclePhase::Idle,
                    day: 1,
                    online_count: 0,
                    running: true,
                },
                targets: targets_for_day(1, &cfg),
                pool,
                recovery: FallenBotRecovery::new(self.recovery_policy),
            };
        }
        tracing::info!(game_id = cfg.game_id, "Wave cycle started");
        self.events.emit(WaveEvent::Started { day: 1, resumed: false });
        *run = Some(self.spawn(cfg, Entry::Ascend).await);
        Ok(())
    }

    /// 从快照续跑：同一天、同一在玩集合与恢复记录
    pub async fn resume(&self, snapshot: SessionSnapshot) -> Result<(), WaveError> {
        let mut run = self.run.lock().await;
        let cfg = self.prepare().await?;
        let mut pool = BotPoolManager::discover(&cfg.endpoints, self.gateway.as_ref()).await;
        let restored = pool.restore_active(&snapshot.active_agents);
        let mut recovery = FallenBotRecovery::new(self.recovery_policy);
        recovery.restore(&snapshot.fallen_tracked, &snapshot.restore_attempts, &pool);
        let day = snapshot.day.max(1);
        let entry = if snapshot.phase.resumes_descending() {
            Entry::Descend
        } else {
            Entry::Ascend
        };
        {
            let mut state = self.state.lock().await;
            *state = EngineState {
                cycle: CycleState {
                    phase: snapshot.phase,
                    day,
                    online_count: pool.active_total(),
                    running: true,
                },
                targets: targets_for_day(day, &cfg),
                pool,
                recovery,
            };
        }
        tracing::info!(day, restored, phase = snapshot.phase.as_str(), "Wave cycle resumed");
        self.events.emit(WaveEvent::Started { day, resumed: true });
        *run = Some(self.spawn(cfg, entry).await);
        Ok(())
    }

    /// 启动时处理遗留快照：`running` 且允许续跑则续跑，否则清除；返回是否续跑
    pub async fn recover_session(&self, resume: bool) -> Result<bool, WaveError> {
        let snapshot = self
            .store
            .load()
            .await
            .map_err(|e| WaveError::Persistence(e.to_string()))?;
        match snapshot {
            Some(snap) if snap.is_resumable() && resume => {
                self.resume(snap).await?;
                Ok(true)
            }
            Some(_) => {
                tracing::info!("Discarding previous session snapshot");
                self.store
                    .clear()
                    .await
                    .map_err(|e| WaveError::Persistence(e.to_string()))?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// 停止运行（不停止机器人）；保存 `running = false` 的快照。返回是否确有运行中的周期
    pub async fn stop(&self) -> bool {
        let Some(handle) = self.run.lock().await.take() else {
            return false;
        };
        handle.supervisor.cancel();
        if let Err(e) = handle.cycle.await {
            tracing::warn!(error = %e, "Cycle task ended abnormally");
        }
        if let Err(e) = handle.housekeeping.await {
            tracing::warn!(error = %e, "Housekeeping task ended abnormally");
        }
        let was_running = {
            let mut state = self.state.lock().await;
            let was_running = state.cycle.running;
            state.cycle.running = false;
            state.cycle.phase = CyclePhase::Idle;
            was_running
        };
        if was_running {
            handle.runner.save_snapshot().await;
            tracing::info!("Wave cycle stopped");
            self.events.emit(WaveEvent::Stopped);
        }
        handle.runner.publish().await;
        was_running
    }

    /// 等待周期结束（自然结束或被停止）
    pub async fn wait(&self) {
        let mut rx = self.status_tx.subscribe();
        let _ = rx.wait_for(|s| !s.running).await;
    }

    /// 对每个启用实例发送 `reset ASF`，成功的实例清空在玩栈；返回成功的实例数
    pub async fn deactivate_all(&self) -> usize {
        let cfg = self.wave_config().await;
        let mut ok = 0;
        for ep in cfg.active_endpoints() {
            if reset_all(self.gateway.as_ref(), [ep.url.as_str()]).await == 0 {
                continue;
            }
            ok += 1;
            let mut state = self.state.lock().await;
            let agents: Vec<String> = state.pool.active_agents(&ep.url).to_vec();
            for agent in agents {
                state.pool.commit(&ep.url, &agent, false);
                state.recovery.forget(&ep.url, &agent);
            }
            state.sync_online();
        }
        let state = self.state.lock().await;
        publish_locked(&self.status_tx, &state, &cfg, self.clock.as_ref());
        ok
    }

    /// 校验前置条件；已在运行返回 AlreadyRunning
    async fn prepare(&self) -> Result<Arc<WaveConfig>, WaveError> {
        if self.state.lock().await.cycle.running {
            return Err(WaveError::AlreadyRunning);
        }
        let cfg = self.wave_config().await;
        cfg.validate()?;
        Ok(cfg)
    }

    async fn spawn(&self, cfg: Arc<WaveConfig>, entry: Entry) -> RunHandle {
        let supervisor = SessionSupervisor::new();
        let ctx = WaveContext {
            config: cfg,
            gateway: self.gateway.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            cancel: supervisor.cancel_token(),
            commands: self.commands,
        };
        let runner = Arc::new(CycleRunner {
            ctx,
            state: self.state.clone(),
            status_tx: self.status_tx.clone(),
            store: self.store.clone(),
            housekeeping_token: supervisor.child_token(),
        });
        runner.publish().await;
        runner.save_snapshot().await;

        let housekeeping = tokio::spawn(run_housekeeping(
            runner.clone(),
            self.housekeeping_interval,
            runner.housekeeping_token.clone(),
        ));
        let cycle = tokio::spawn(runner.clone().run(entry));
        RunHandle {
            supervisor,
            runner,
            cycle,
            housekeeping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::gateway::MockGateway;
    use crate::schedule::{DailyTime, ManualClock};
    use crate::session::MemorySessionStore;

    const URL: &str = "http://asf-1";

    fn app_config(peak: u32, floor: u32) -> AppConfig {
        let mut app = AppConfig::default();
        app.wave.peak = peak;
        app.wave.floor = floor;
        app.wave.base_days = 1;
        app.wave.gradual_decay.enabled = true;
        app.wave.time_peak = DailyTime::new(10, 1).unwrap();
        app.wave.time_floor = DailyTime::new(10, 2).unwrap();
        app.wave.endpoints = vec![EndpointConfig {
            name: "GAME_1".into(),
            url: URL.into(),
            active: true,
        }];
        app
    }

    fn controller(app: &AppConfig, gw: Arc<MockGateway>, store: Arc<MemorySessionStore>) -> WaveController {
        WaveController::new(app, gw, Arc::new(ManualClock::at(10, 0, 0)), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_bad_config() {
        let gw = Arc::new(MockGateway::new());
        let store = Arc::new(MemorySessionStore::new());
        let mut app = app_config(5, 2);
        app.wave.game_id = 0;
        let ctl = controller(&app, gw.clone(), store.clone());
        assert!(matches!(ctl.start().await, Err(WaveError::InvalidGameId)));

        app.wave.game_id = 730;
        app.wave.endpoints[0].active = false;
        ctl.reload_config(app.wave.clone()).await;
        assert!(matches!(ctl.start().await, Err(WaveError::NoActiveEndpoints)));
        assert!(!ctl.is_running().await);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected_and_stop_keeps_bots() {
        let gw = Arc::new(MockGateway::new());
        gw.add_agents(URL, (1..=10).map(|i| format!("bot{i:02}")), true);
        let store = Arc::new(MemorySessionStore::new());
        let app = app_config(5, 2);
        let ctl = controller(&app, gw.clone(), store.clone());

        ctl.start().await.unwrap();
        assert!(matches!(ctl.start().await, Err(WaveError::AlreadyRunning)));
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(ctl.stop().await);
        assert!(!ctl.stop().await);

        let playing = gw.playing_count();
        assert!(playing > 0);
        assert_eq!(gw.count_commands("reset"), 0);
        let snap = store.load().await.unwrap().unwrap();
        assert!(!snap.running);
        assert_eq!(snap.active_agents[URL].len(), playing);
        assert_eq!(ctl.status().phase, CyclePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_all_clears_pool() {
        let gw = Arc::new(MockGateway::new());
        gw.add_agents(URL, ["a", "b", "c"], true);
        let store = Arc::new(MemorySessionStore::new());
        let ctl = controller(&app_config(3, 0), gw.clone(), store);
        ctl.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        ctl.stop().await;
        assert!(gw.playing_count() > 0);

        assert_eq!(ctl.deactivate_all().await, 1);
        assert_eq!(gw.playing_count(), 0);
        assert_eq!(ctl.snapshot().await.online_count, 0);
        assert!(gw.commands().iter().any(|(_, c)| c == "reset ASF"));
    }
}
