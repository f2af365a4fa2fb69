use crate::engine::Engine;
use crate::errors::AppResult;
use crate::models::{
    ActivityEvent, DashboardSummary, DeploymentStat, MetricSnapshot, RevenuePeriod, ServiceActivity,
    SystemHealth,
};
use chrono::Duration;
use std::sync::Arc;

pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;

/// Read-only view over the engine. Every read hands out copies, and a failing
/// source degrades to an empty value instead of an error.
#[derive(Clone)]
pub struct Dashboard {
    engine: Arc<Engine>,
}

impl Dashboard {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Visible metrics in registry order.
    pub fn metrics(&self) -> Vec<MetricSnapshot> {
        let keys: Vec<&str> = self
            .engine
            .config()
            .metrics
            .iter()
            .filter(|seed| seed.visible)
            .map(|seed| seed.key.as_str())
            .collect();
        or_empty("metrics", self.engine.metrics().snapshots(&keys))
    }

    /// Most recent first; `limit` defaults to 20 and is clamped to the feed cap.
    pub fn activity(&self, limit: Option<usize>) -> Vec<ActivityEvent> {
        let feed = self.engine.feed();
        let limit = limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).min(feed.cap());
        or_empty("activity", feed.recent(limit))
    }

    pub fn current_period_revenue(&self) -> Option<RevenuePeriod> {
        let now = self.engine.clock().now();
        match self.engine.revenue().current(now) {
            Ok(period) => period,
            Err(error) => {
                tracing::warn!(source = "revenue", error = %error, "dashboard source unavailable");
                None
            }
        }
    }

    pub fn deployment_stats(&self) -> Vec<DeploymentStat> {
        or_empty("deployments", self.engine.board().stats())
    }

    pub fn system_health(&self) -> Vec<SystemHealth> {
        or_empty("system_health", self.engine.board().health())
    }

    pub fn active_agents(&self) -> Vec<ServiceActivity> {
        let window = Duration::seconds(self.engine.config().active_agent_window_secs);
        let since = self.engine.clock().now() - window;
        or_empty("active_agents", self.engine.feed().active_by_service(since))
    }

    pub fn summary(&self) -> DashboardSummary {
        DashboardSummary {
            metrics: self.metrics(),
            recent_activity: self.activity(None),
            current_period_revenue: self.current_period_revenue(),
            deployment_stats: self.deployment_stats(),
            active_agents: self.active_agents(),
            system_health: self.system_health(),
        }
    }
}

fn or_empty<T>(source: &'static str, result: AppResult<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|error| {
        tracing::warn!(source, error = %error, "dashboard source unavailable");
        Vec::new()
    })
}
