//! 波形周期集成测试：MockGateway + ManualClock + 暂停的 tokio 时间

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ccu::config::{AppConfig, DayOverride, EndpointConfig};
    use ccu::core::{CyclePhase, WaveController, WaveEvent};
    use ccu::gateway::MockGateway;
    use ccu::schedule::{Clock, DailyTime, HoldDuration, ManualClock};
    use ccu::session::{MemorySessionStore, SessionStore};
    use chrono::{DateTime, Local};
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    const URL: &str = "http://asf-1";

    fn app_config() -> AppConfig {
        let mut app = AppConfig::default();
        app.wave.peak = 5;
        app.wave.floor = 2;
        app.wave.base_days = 1;
        app.wave.time_peak = DailyTime::new(10, 1).unwrap();
        app.wave.time_floor = DailyTime::new(10, 2).unwrap();
        app.wave.gradual_decay.enabled = true;
        app.wave.gradual_decay.additional_days = vec![DayOverride {
            peak: Some(3),
            floor: Some(1),
        }];
        app.wave.endpoints = vec![EndpointConfig {
            name: "GAME_1".into(),
            url: URL.into(),
            active: true,
        }];
        app
    }

    fn gateway_with_bots(n: usize) -> Arc<MockGateway> {
        let gw = Arc::new(MockGateway::new());
        gw.add_agents(URL, (1..=n).map(|i| format!("bot{i:02}")), true);
        gw
    }

    /// 随暂停的 tokio 时间一起走的墙上时钟
    struct TokioClock {
        base: DateTime<Local>,
        started: Instant,
    }

    impl TokioClock {
        fn at(hour: u32, minute: u32, second: u32) -> Self {
            Self {
                base: ManualClock::at(hour, minute, second).now(),
                started: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Local> {
            let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
            self.base + elapsed
        }
    }

    fn drain(rx: &mut broadcast::Receiver<WaveEvent>) -> Vec<WaveEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_day_cycle_runs_to_completion() {
        let gw = gateway_with_bots(10);
        let store = Arc::new(MemorySessionStore::new());
        let ctl = WaveController::new(
            &app_config(),
            gw.clone(),
            Arc::new(ManualClock::at(10, 0, 0)),
            store.clone(),
        );
        let mut events = ctl.subscribe();

        ctl.start().await.unwrap();
        assert!(ctl.is_running().await);
        ctl.wait().await;

        // 第 1 天 0 → 5 → 2，第 2 天 2 → 3 → 1，第 3 天衰减表走完
        assert_eq!(gw.count_commands("play"), 6);
        assert_eq!(gw.count_commands("reset"), 5);
        assert_eq!(gw.playing_count(), 1);

        let status = ctl.status();
        assert!(!status.running);
        assert_eq!(status.phase, CyclePhase::Idle);
        assert_eq!(status.online, 1);
        assert!(store.load().await.unwrap().is_none());

        let events = drain(&mut events);
        assert!(matches!(events.first(), Some(WaveEvent::Started { day: 1, resumed: false })));
        assert!(events.iter().any(|e| matches!(e, WaveEvent::Completed { day: 3 })));
        let peaks: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                WaveEvent::PhaseChanged {
                    phase: CyclePhase::Ascending,
                    peak,
                    ..
                } => Some(*peak),
                _ => None,
            })
            .collect();
        assert_eq!(peaks, vec![5, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_unreachable_with_few_bots() {
        let gw = gateway_with_bots(3);
        let store = Arc::new(MemorySessionStore::new());
        let ctl = WaveController::new(
            &app_config(),
            gw.clone(),
            Arc::new(ManualClock::at(10, 0, 0)),
            store,
        );
        let mut events = ctl.subscribe();

        ctl.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(90)).await;
        ctl.stop().await;

        let events = drain(&mut events);
        let pos = events
            .iter()
            .position(|e| matches!(e, WaveEvent::PeakUnreachable { online: 3, peak: 5 }))
            .expect("peak unreachable event");
        let activated = events[..pos]
            .iter()
            .filter(|e| matches!(e, WaveEvent::Activated { .. }))
            .count();
        assert_eq!(activated, 3);
        assert!(gw.playing_count() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallen_bot_restored_during_hold() {
        let gw = gateway_with_bots(10);
        let store = Arc::new(MemorySessionStore::new());
        let mut app = app_config();
        app.wave.delay.enabled = true;
        app.wave.delay.after_peak = HoldDuration::from_secs(600);
        let ctl = WaveController::new(&app, gw.clone(), Arc::new(ManualClock::at(10, 0, 0)), store);
        let mut events = ctl.subscribe();

        ctl.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ctl.status().phase, CyclePhase::HoldAtPeak);
        assert_eq!(gw.playing_count(), 5);

        let snap = ctl.snapshot().await;
        let victim = snap.active_agents[URL][0].clone();
        gw.set_online(URL, &victim, false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ctl.snapshot().await.fallen_tracked[URL], vec![victim.clone()]);

        gw.set_online(URL, &victim, true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(gw.playing(URL, &victim), Some(730));
        assert!(ctl.snapshot().await.fallen_tracked.is_empty());
        // 掉线期间在线数（记账口径）不变
        assert_eq!(ctl.status().online, 5);
        ctl.stop().await;

        let events = drain(&mut events);
        let fallen = events
            .iter()
            .filter(|e| matches!(e, WaveEvent::FallenDetected { .. }))
            .count();
        assert_eq!(fallen, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, WaveEvent::Restored { agent, .. } if *agent == victim)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_gives_up_after_max_attempts() {
        let gw = gateway_with_bots(10);
        let store = Arc::new(MemorySessionStore::new());
        let mut app = app_config();
        app.wave.delay.enabled = true;
        app.wave.delay.after_peak = HoldDuration::from_secs(600);
        let clock = Arc::new(ManualClock::at(10, 0, 0));
        let ctl = WaveController::new(&app, gw.clone(), clock.clone(), store);
        let mut events = ctl.subscribe();

        ctl.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        let victim = ctl.snapshot().await.active_agents[URL][0].clone();
        gw.fail_commands_for(&victim);
        gw.set_online(URL, &victim, false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        gw.set_online(URL, &victim, true);

        // 第一次尝试立即进行，之后每次都要等冷却
        tokio::time::sleep(Duration::from_secs(2)).await;
        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_secs(2)).await;
        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_secs(2)).await;
        ctl.stop().await;

        let tries = gw
            .commands()
            .iter()
            .filter(|(_, c)| *c == format!("play {} 730", victim))
            .count();
        // 激活 1 次 + 恢复 2 次
        assert_eq!(tries, 3);
        let exhausted = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, WaveEvent::RestoreExhausted { attempts: 2, .. }))
            .count();
        assert_eq!(exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_tracks_wall_clock_deadlines() {
        let gw = gateway_with_bots(20);
        let store = Arc::new(MemorySessionStore::new());
        let mut app = app_config();
        app.wave.peak = 10;
        app.wave.floor = 2;
        app.wave.time_peak = DailyTime::new(10, 0).unwrap();
        app.wave.time_floor = DailyTime::new(10, 1).unwrap();
        app.wave.gradual_decay.additional_days.clear();
        let ctl = WaveController::new(&app, gw.clone(), Arc::new(TokioClock::at(9, 59, 50)), store);

        let started = Instant::now();
        ctl.start().await.unwrap();

        // 10 秒内 10 步：每步 1 秒等待加命令间隔，略超过峰值时刻但不会拖到次日
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(gw.count_commands("play"), 10);
        assert_eq!(ctl.status().phase, CyclePhase::Descending);

        // 下降途中
        tokio::time::sleep(Duration::from_secs(20)).await;
        let online = ctl.status().online;
        assert!(online > 2 && online < 10, "online {online} at 10:00:30");

        // 谷值在 10:01 前后到达，第 2 天衰减表为空，周期结束
        ctl.wait().await;
        let elapsed = started.elapsed().as_secs();
        assert!((55..=80).contains(&elapsed), "floor reached after {elapsed}s");
        assert_eq!(gw.playing_count(), 2);
        assert_eq!(gw.count_commands("play"), 10);
        assert_eq!(gw.count_commands("reset"), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_past_deadline_keeps_pacing() {
        let gw = gateway_with_bots(20);
        let store = Arc::new(MemorySessionStore::new());
        let mut app = app_config();
        app.wave.peak = 10;
        app.wave.time_peak = DailyTime::new(10, 0).unwrap();
        let ctl = WaveController::new(&app, gw.clone(), Arc::new(TokioClock::at(9, 59, 58)), store);

        // 只剩 2 秒：间隔下限 1 秒，过了峰值时刻后仍按同一节奏继续
        ctl.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(gw.count_commands("play"), 10);
        assert_eq!(ctl.status().phase, CyclePhase::Descending);
        ctl.stop().await;
    }
}
