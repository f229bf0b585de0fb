//! Virtual user runtime

use crate::error::{EngineError, EngineResult};
use crate::sample::{RequestSample, Sample, UserEvent};
use crate::scenario::{task_mix, Action, RequestPlanner, Task, UserClass, WeightedChoice};
use crate::search::results_count;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use surge_config::{TestMode, UserBehavior};
use surge_http::{HttpClient, HttpRequest};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// State shared by every user of a run
pub struct UserContext {
    pub client: Arc<dyn HttpClient>,
    pub planner: RequestPlanner,
    pub behavior: UserBehavior,
    pub mode: TestMode,
    pub samples: mpsc::Sender<Sample>,
    /// Fixed seed for reproducible runs; each user derives its own stream
    pub seed: Option<u64>,
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("behavior", &self.behavior.name)
            .field("mode", &self.mode)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// A simulated visitor running its class's tasks until cancelled
pub struct VirtualUser {
    id: usize,
    class: UserClass,
    tasks: WeightedChoice<Task>,
    context: Arc<UserContext>,
    rng: StdRng,
    cancel: CancellationToken,
}

impl VirtualUser {
    pub fn new(
        id: usize,
        class: UserClass,
        context: Arc<UserContext>,
        cancel: CancellationToken,
    ) -> EngineResult<Self> {
        let tasks = task_mix(class)
            .ok_or_else(|| EngineError::Scenario(format!("user class '{}' has no tasks", class)))?;
        let rng = match context.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            id,
            class,
            tasks,
            context,
            rng,
            cancel,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn class(&self) -> UserClass {
        self.class
    }

    /// Visit the homepage, then pick tasks until cancelled.
    ///
    /// Cancellation interrupts waits only; a request in flight completes (or
    /// times out) and is recorded. Start and stop are reported around the
    /// session unless the user is aborted.
    pub async fn run(mut self) {
        debug!("User {} ({}) starting", self.id, self.class);
        let began = Instant::now();
        if !self.report(UserEvent::started(self.id, self.class)).await {
            return;
        }

        self.visit().await;

        let session = began.elapsed();
        self.report(UserEvent::stopped(self.id, self.class, session)).await;
        debug!("User {} stopped after {:?}", self.id, session);
    }

    async fn visit(&mut self) {
        if !self.perform(Action::Homepage).await {
            return;
        }

        let (wait_min, wait_max) = self.class.wait_time().unwrap_or((
            self.context.behavior.wait_time_min,
            self.context.behavior.wait_time_max,
        ));
        while !self.cancel.is_cancelled() {
            let task = self.tasks.choose(&mut self.rng).clone();
            trace!("User {} running task {}", self.id, task.name);
            if !self.run_task(&task).await {
                break;
            }
            let think = self.uniform(wait_min, wait_max);
            if !self.pause(think).await {
                break;
            }
        }
    }

    /// Returns false once the user should stop
    async fn run_task(&mut self, task: &Task) -> bool {
        let search_probability = self.context.behavior.search_probability;
        let mut previous_ran = true;

        for step in &task.steps {
            if self.cancel.is_cancelled() {
                return false;
            }
            previous_ran = step.fires(&mut self.rng, previous_ran, search_probability);
            if !previous_ran {
                continue;
            }

            for _ in 0..step.repetitions(&mut self.rng) {
                let Some(action) = step.pick_action(&mut self.rng) else {
                    break;
                };
                if !self.perform(action).await {
                    return false;
                }
            }

            if step.read_after && !self.read().await {
                return false;
            }
        }
        true
    }

    /// Issue one request and hand its sample to the aggregator
    async fn perform(&mut self, action: Action) -> bool {
        let Some(planned) = self.context.planner.plan(action, &mut self.rng) else {
            trace!("User {} has no target for {:?}", self.id, action);
            return true;
        };

        let mut request = HttpRequest::get(planned.path);
        if let Some(user_agent) = self.class.user_agent() {
            request = request.with_user_agent(user_agent);
        }
        if action.is_search() {
            request = request.with_body();
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let (sample, results) = match self.context.client.send(&request).await {
            Ok(response) => (
                RequestSample::from_response(planned.name, self.id, started_at, &response),
                response.body.as_deref().map(results_count).unwrap_or(0),
            ),
            Err(e) => {
                debug!("User {} request to {} failed: {}", self.id, request.path, e);
                let sample = RequestSample::from_error(
                    planned.name,
                    self.id,
                    started_at,
                    started.elapsed(),
                    &e,
                );
                (sample, 0)
            }
        };
        let sample = match planned.search_term {
            Some(term) => sample.with_search(term, results),
            None => sample,
        };

        self.report(sample).await
    }

    /// False when the aggregator has gone away
    async fn report(&self, sample: impl Into<Sample>) -> bool {
        self.context.samples.send(sample.into()).await.is_ok()
    }

    async fn read(&mut self) -> bool {
        if self.context.mode == TestMode::Stress {
            return true;
        }
        let span = self.uniform(
            self.context.behavior.reading_time_min,
            self.context.behavior.reading_time_max,
        );
        self.pause(span).await
    }

    /// Sleep for `span`; false when cancelled first
    async fn pause(&self, span: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(span) => true,
        }
    }

    fn uniform(&mut self, min: f64, max: f64) -> Duration {
        let secs = if max > min {
            self.rng.random_range(min..=max)
        } else {
            min
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}
