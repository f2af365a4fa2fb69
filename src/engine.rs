use crate::activity::ActivityFeed;
use crate::clock::Clock;
use crate::config::{Cadence, EngineConfig};
use crate::deployments::DeploymentBoard;
use crate::errors::AppResult;
use crate::metrics::MetricStore;
use crate::models::{MetricSnapshot, TaskStats};
use crate::persistence::{PersistenceAdapter, WriteBehind};
use crate::random::RandomSource;
use crate::revenue::RevenueAccumulator;
use crate::scheduler::{Scheduler, TaskAction};
use crate::walk::WalkParams;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub const TASK_METRICS: &str = "metrics";
pub const TASK_ACTIVITY: &str = "activity";
pub const TASK_REVENUE: &str = "revenue";
pub const TASK_DEPLOYMENTS: &str = "deployments";

type Tick = fn(&Engine) -> AppResult<usize>;

/// Owns every piece of simulated state plus the scheduler that drives it.
/// One instance per store; it is the only writer.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    writer: Arc<WriteBehind>,
    metrics: MetricStore,
    feed: ActivityFeed,
    revenue: RevenueAccumulator,
    board: DeploymentBoard,
    sources: Vec<String>,
    scheduler: Scheduler,
    started: AtomicBool,
}

impl Engine {
    /// Validates the config and loads persisted state so reads serve the
    /// last stored values before the first tick. Inside a tokio runtime the
    /// persistence writes go through the background writer.
    pub fn new(
        config: EngineConfig,
        adapter: Arc<dyn PersistenceAdapter>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> AppResult<Arc<Self>> {
        config.validate()?;
        let writer = Arc::new(WriteBehind::auto(adapter, config.writer_queue_capacity));
        let metrics = MetricStore::new(&config.metrics, writer.clone(), clock.clone());
        let feed = ActivityFeed::new(config.activity_cap, writer.clone());
        let revenue = RevenueAccumulator::new(config.revenue.clone(), writer.clone());
        let board = DeploymentBoard::new(
            config.services.clone(),
            config.health_checks.clone(),
            writer.clone(),
        );
        let sources = board.service_refs();
        let scheduler = Scheduler::new(clock.clone(), random.clone());

        let engine = Arc::new(Self {
            config,
            clock,
            random,
            writer,
            metrics,
            feed,
            revenue,
            board,
            sources,
            scheduler,
            started: AtomicBool::new(false),
        });
        engine.bootstrap()?;
        engine.register_tasks();
        Ok(engine)
    }

    fn bootstrap(&self) -> AppResult<()> {
        let now = self.clock.now();
        for seed in &self.config.metrics {
            self.metrics.get(&seed.key)?;
        }
        let restored_events = self.feed.restore();
        let restored_revenue = self.revenue.restore(now);
        self.board.restore(now)?;
        tracing::info!(
            metrics = self.config.metrics.len(),
            activity = restored_events,
            revenue = restored_revenue,
            services = self.sources.len(),
            "engine state loaded"
        );
        Ok(())
    }

    fn register_tasks(self: &Arc<Self>) {
        let cadences = self.config.cadences.clone();
        let tasks: [(&'static str, Cadence, Tick); 4] = [
            (TASK_METRICS, cadences.metrics, Engine::tick_metrics),
            (TASK_ACTIVITY, cadences.activity, Engine::tick_activity),
            (TASK_REVENUE, cadences.revenue, Engine::tick_revenue),
            (TASK_DEPLOYMENTS, cadences.deployments, Engine::tick_deployments),
        ];
        for (name, cadence, tick) in tasks {
            self.scheduler.register(name, cadence, self.task(name, tick));
        }
    }

    fn task(self: &Arc<Self>, name: &'static str, tick: Tick) -> TaskAction {
        let engine: Weak<Engine> = Arc::downgrade(self);
        Arc::new(move || {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            match tick(&engine) {
                Ok(changed) => tracing::trace!(task = name, changed, "tick complete"),
                Err(error) => tracing::warn!(task = name, error = %error, "tick failed"),
            }
        })
    }

    /// Computes revenue and deployments once, then starts the periodic
    /// cadences. Calling it again on a running engine does nothing.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::info!("engine already running");
            return false;
        }
        self.run_tick(TASK_REVENUE, Engine::tick_revenue);
        self.run_tick(TASK_DEPLOYMENTS, Engine::tick_deployments);

        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no tokio runtime; periodic cadences not started");
            return true;
        }
        self.scheduler.start();
        tracing::info!("engine started");
        true
    }

    /// Halts every cadence, then flushes queued writes to the store.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        self.writer.shutdown().await;
        tracing::info!(
            dropped_writes = self.writer.dropped(),
            failed_writes = self.writer.failed(),
            "engine stopped"
        );
    }

    fn run_tick(&self, name: &'static str, tick: Tick) {
        if let Err(error) = tick(self) {
            tracing::warn!(task = name, error = %error, "tick failed");
        }
    }

    /// Walks every registered metric that is past its minimum interval.
    /// Revenue-driven metrics only move with the revenue period.
    pub fn tick_metrics(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let mut stepped = 0;
        for seed in self.config.metrics.iter().filter(|seed| seed.is_walked()) {
            let params = WalkParams::from(seed);
            match self.metrics.step(&seed.key, &params, self.random.as_ref(), now) {
                Ok(Some(_)) => stepped += 1,
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(metric = %seed.key, error = %error, "metric step failed")
                }
            }
        }
        Ok(stepped)
    }

    pub fn tick_activity(&self) -> AppResult<usize> {
        let batch = self.config.activity_batch;
        let spread = batch.max.saturating_sub(batch.min) + 1;
        let count = batch.min + self.random.index(spread);
        let now = self.clock.now();
        for _ in 0..count {
            self.feed.generate(&self.sources, self.random.as_ref(), now)?;
        }
        Ok(count)
    }

    /// Recomputes the period, then copies its figures into the metrics that
    /// track them.
    pub fn tick_revenue(&self) -> AppResult<usize> {
        let period = self.revenue.recompute(self.random.as_ref(), self.clock.now())?;
        let prior_ratio = self.config.revenue.prior_ratio;
        let mut mirrored = 0;
        for seed in &self.config.metrics {
            let Some(field) = seed.revenue_field else {
                continue;
            };
            let current = field.value(&period);
            match self.metrics.mirror(&seed.key, current, current * prior_ratio) {
                Ok(_) => mirrored += 1,
                Err(error) => tracing::warn!(
                    metric = %seed.key,
                    error = %error,
                    "revenue metric update failed"
                ),
            }
        }
        Ok(1 + mirrored)
    }

    pub fn tick_deployments(&self) -> AppResult<usize> {
        self.board.refresh(self.random.as_ref(), self.clock.now())
    }

    /// Scheduler entry point for callers that drive time themselves.
    pub fn run_pending(&self) -> usize {
        self.scheduler.run_pending()
    }

    pub fn metric(&self, key: &str) -> AppResult<MetricSnapshot> {
        self.metrics.get(key)
    }

    pub fn set_metric(&self, key: &str, value: f64) -> AppResult<MetricSnapshot> {
        self.metrics.set(key, value)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    pub fn feed(&self) -> &ActivityFeed {
        &self.feed
    }

    pub fn revenue(&self) -> &RevenueAccumulator {
        &self.revenue
    }

    pub fn board(&self) -> &DeploymentBoard {
        &self.board
    }

    pub fn writer(&self) -> &WriteBehind {
        &self.writer
    }

    pub fn task_stats(&self) -> Vec<TaskStats> {
        self.scheduler.stats()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }
}
