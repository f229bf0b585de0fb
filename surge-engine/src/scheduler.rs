//! User scheduler: ramps virtual users up at the spawn rate, holds them for the
//! run time, then winds them down.

use crate::error::{EngineError, EngineResult};
use crate::scenario::class_mix;
use crate::user::{UserContext, VirtualUser};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_config::{TestProfile, UserClassWeights};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Ramping,
    Steady,
    WindingDown,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Ramping => "ramping",
            SchedulerState::Steady => "steady",
            SchedulerState::WindingDown => "winding_down",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Published on every state change and every user start or exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub active: usize,
    pub spawned: usize,
}

/// Ramp and stop parameters
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub users: u32,
    /// Users started per second
    pub spawn_rate: f64,
    pub run_time: Duration,
    /// How long stopping users may take before they are aborted
    pub stop_timeout: Duration,
    pub class_weights: UserClassWeights,
    pub seed: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_profile(profile: &TestProfile, stop_timeout: Duration) -> Self {
        Self {
            users: profile.users,
            spawn_rate: profile.spawn_rate.per_second(),
            run_time: profile.run_time.as_duration(),
            stop_timeout,
            class_weights: profile.class_weights.clone(),
            seed: None,
        }
    }

    fn spawn_interval(&self) -> EngineResult<Duration> {
        if !(self.spawn_rate.is_finite() && self.spawn_rate > 0.0) {
            return Err(EngineError::Scenario(format!(
                "spawn rate must be positive, got {}",
                self.spawn_rate
            )));
        }
        Duration::try_from_secs_f64(1.0 / self.spawn_rate)
            .map_err(|e| EngineError::Scenario(format!("invalid spawn rate: {}", e)))
    }
}

/// Outcome of the scheduling phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub spawned: usize,
    pub peak_users: usize,
    /// Users still running at the stop timeout
    pub aborted: usize,
    /// Run time ran out (or the run was cancelled) before every user started
    pub ramp_incomplete: bool,
}

/// Decrements the active count when a user task ends, however it ends
struct ActiveGuard {
    active: Arc<AtomicUsize>,
    status: Arc<watch::Sender<SchedulerStatus>>,
}

impl ActiveGuard {
    fn enter(active: Arc<AtomicUsize>, status: Arc<watch::Sender<SchedulerStatus>>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        status.send_modify(|s| s.active = now);
        Self { active, status }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.status.send_modify(|s| s.active = now);
    }
}

pub struct Scheduler {
    settings: SchedulerSettings,
    context: Arc<UserContext>,
    status: Arc<watch::Sender<SchedulerStatus>>,
    active: Arc<AtomicUsize>,
    cancel: CancellationToken,
    wind_down: CancellationToken,
}

impl Scheduler {
    /// `cancel` stops the run early, as if the run time had expired
    pub fn new(
        settings: SchedulerSettings,
        context: Arc<UserContext>,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus {
            state: SchedulerState::Idle,
            active: 0,
            spawned: 0,
        });
        Self {
            settings,
            context,
            status: Arc::new(status),
            active: Arc::new(AtomicUsize::new(0)),
            cancel,
            wind_down: CancellationToken::new(),
        }
    }

    /// Token cancelled when winding down starts. Users stop on its child
    /// tokens; sharing it lets in-flight work such as retries stop too.
    pub fn with_wind_down(mut self, token: CancellationToken) -> Self {
        self.wind_down = token;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    pub fn active_users(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn enter(&self, state: SchedulerState) {
        debug!("Scheduler entering {}", state);
        self.status.send_modify(|s| s.state = state);
    }

    /// Drive the run to `Stopped`
    pub async fn run(self) -> EngineResult<SchedulerSummary> {
        let interval = self.settings.spawn_interval()?;
        let mix = class_mix(&self.settings.class_weights)
            .ok_or_else(|| EngineError::Scenario("all user class weights are zero".to_string()))?;
        let mut rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let target = self.settings.users as usize;
        let deadline = Instant::now() + self.settings.run_time;
        let mut users = JoinSet::new();
        let mut spawned = 0;
        let mut next_spawn = Instant::now();

        info!(
            "Ramping to {} users at {}/s for {:?}",
            target, self.settings.spawn_rate, self.settings.run_time
        );
        self.enter(SchedulerState::Ramping);

        let ramp_incomplete = loop {
            if spawned >= target {
                break false;
            }
            tokio::select! {
                _ = sleep_until(deadline) => break true,
                _ = self.cancel.cancelled() => break true,
                _ = sleep_until(next_spawn) => {
                    let class = *mix.choose(&mut rng);
                    spawned += 1;
                    let user = VirtualUser::new(
                        spawned,
                        class,
                        self.context.clone(),
                        self.wind_down.child_token(),
                    )?;
                    let guard = ActiveGuard::enter(self.active.clone(), self.status.clone());
                    users.spawn(async move {
                        let _guard = guard;
                        user.run().await;
                    });
                    self.status.send_modify(|s| s.spawned = spawned);
                    next_spawn += interval;
                }
            }
        };

        let peak_users = self.active_users();
        if ramp_incomplete {
            warn!(
                "Run ended during ramp-up with {} of {} users started",
                spawned, target
            );
        } else {
            info!("All {} users started", target);
            self.enter(SchedulerState::Steady);
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = self.cancel.cancelled() => info!("Run cancelled"),
            }
        }

        self.enter(SchedulerState::WindingDown);
        self.wind_down.cancel();
        let aborted = self.drain(&mut users).await;

        self.enter(SchedulerState::Stopped);
        info!("All users stopped");
        Ok(SchedulerSummary {
            spawned,
            peak_users,
            aborted,
            ramp_incomplete,
        })
    }

    /// Wait for users to finish, aborting those still running at the timeout
    async fn drain(&self, users: &mut JoinSet<()>) -> usize {
        let graceful = tokio::time::timeout(self.settings.stop_timeout, async {
            while let Some(result) = users.join_next().await {
                if let Err(e) = result {
                    warn!("User task ended abnormally: {}", e);
                }
            }
        })
        .await;
        if graceful.is_ok() {
            return 0;
        }

        let remaining = users.len();
        warn!(
            "{} users still busy after {:?}, aborting",
            remaining, self.settings.stop_timeout
        );
        users.abort_all();
        while users.join_next().await.is_some() {}
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use crate::scenario::RequestPlanner;
    use surge_config::{TestMode, UserBehavior};
    use surge_http::{HttpClient, HttpError, HttpRequest, HttpResponse};
    use tokio::sync::mpsc;

    struct SlowClient(Duration);

    #[async_trait::async_trait]
    impl HttpClient for SlowClient {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            tokio::time::sleep(self.0).await;
            Ok(HttpResponse {
                status: 200,
                body_len: 0,
                elapsed: self.0,
                attempts: 1,
                body: None,
            })
        }
    }

    fn context(latency: Duration) -> Arc<UserContext> {
        let site = serde_json::from_str(r#"{"name": "Test", "base_url": "http://localhost:8080"}"#)
            .unwrap();
        let (tx, mut rx) = mpsc::channel::<Sample>(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Arc::new(UserContext {
            client: Arc::new(SlowClient(latency)),
            planner: RequestPlanner::new(site),
            behavior: UserBehavior {
                name: "test_user".to_string(),
                description: String::new(),
                wait_time_min: 0.5,
                wait_time_max: 1.0,
                reading_time_min: 0.5,
                reading_time_max: 1.0,
                search_probability: 0.5,
            },
            mode: TestMode::Realistic,
            samples: tx,
            seed: Some(1),
        })
    }

    fn settings(users: u32, spawn_rate: f64, run_secs: u64) -> SchedulerSettings {
        SchedulerSettings {
            users,
            spawn_rate,
            run_time: Duration::from_secs(run_secs),
            stop_timeout: Duration::from_secs(5),
            class_weights: UserClassWeights::default(),
            seed: Some(7),
        }
    }

    fn observe(
        mut rx: watch::Receiver<SchedulerStatus>,
    ) -> tokio::task::JoinHandle<Vec<SchedulerStatus>> {
        tokio::spawn(async move {
            let mut seen = vec![*rx.borrow()];
            while rx.changed().await.is_ok() {
                seen.push(*rx.borrow_and_update());
            }
            seen
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle() {
        let scheduler = Scheduler::new(
            settings(5, 1.0, 30),
            context(Duration::from_millis(100)),
            CancellationToken::new(),
        );
        let observed = observe(scheduler.subscribe());

        let started = Instant::now();
        let summary = scheduler.run().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(summary.spawned, 5);
        assert_eq!(summary.peak_users, 5);
        assert_eq!(summary.aborted, 0);
        assert!(!summary.ramp_incomplete);

        let seen = observed.await.unwrap();
        let states: Vec<_> = seen.iter().map(|s| s.state).collect();
        assert!(states.windows(2).all(|w| w[0] <= w[1]), "{:?}", states);
        assert!(states.contains(&SchedulerState::Steady));
        assert_eq!(seen.last().unwrap().state, SchedulerState::Stopped);
        assert_eq!(seen.last().unwrap().active, 0);

        assert!(seen.iter().all(|s| s.active <= 5));
        let ramping: Vec<_> = seen
            .iter()
            .filter(|s| s.state == SchedulerState::Ramping)
            .map(|s| s.active)
            .collect();
        assert!(ramping.windows(2).all(|w| w[0] <= w[1]), "{:?}", ramping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_time_expires_during_ramp() {
        let scheduler = Scheduler::new(
            settings(10, 1.0, 3),
            context(Duration::from_millis(100)),
            CancellationToken::new(),
        );
        let observed = observe(scheduler.subscribe());
        let summary = scheduler.run().await.unwrap();

        assert!(summary.ramp_incomplete);
        assert!(summary.spawned <= 4, "{}", summary.spawned);
        let seen = observed.await.unwrap();
        assert!(seen.iter().all(|s| s.state != SchedulerState::Steady));
        assert_eq!(seen.last().unwrap().state, SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_early() {
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            settings(2, 2.0, 3600),
            context(Duration::from_millis(100)),
            cancel.clone(),
        );
        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();

        let started = Instant::now();
        let summary = handle.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(summary.spawned, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_are_aborted() {
        let scheduler = Scheduler::new(
            settings(3, 10.0, 2),
            context(Duration::from_secs(600)),
            CancellationToken::new(),
        );
        let started = Instant::now();
        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.aborted, 3);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wind_down_token_fires_at_stop() {
        let wind_down = CancellationToken::new();
        let scheduler = Scheduler::new(
            settings(2, 2.0, 5),
            context(Duration::from_millis(100)),
            CancellationToken::new(),
        )
        .with_wind_down(wind_down.clone());
        let mut status = scheduler.subscribe();
        let handle = tokio::spawn(scheduler.run());

        status
            .wait_for(|s| s.state == SchedulerState::Steady)
            .await
            .unwrap();
        assert!(!wind_down.is_cancelled());

        handle.await.unwrap().unwrap();
        assert!(wind_down.is_cancelled());
    }

    #[tokio::test]
    async fn test_zero_spawn_rate_is_rejected() {
        let scheduler = Scheduler::new(
            settings(1, 0.0, 1),
            context(Duration::ZERO),
            CancellationToken::new(),
        );
        assert!(matches!(scheduler.run().await, Err(EngineError::Scenario(_))));
    }
}
