use crate::models::{
    ActivityEvent, DashboardSummary, DeploymentStat, MetricSnapshot, RevenuePeriod, ServiceActivity,
    SystemHealth,
};
use crate::query::Dashboard;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<usize>,
}

pub async fn metrics(State(dashboard): State<Dashboard>) -> Json<Vec<MetricSnapshot>> {
    Json(dashboard.metrics())
}

pub async fn activity(
    State(dashboard): State<Dashboard>,
    Query(params): Query<ActivityParams>,
) -> Json<Vec<ActivityEvent>> {
    Json(dashboard.activity(params.limit))
}

pub async fn current_period_revenue(
    State(dashboard): State<Dashboard>,
) -> Json<Option<RevenuePeriod>> {
    Json(dashboard.current_period_revenue())
}

pub async fn deployment_stats(State(dashboard): State<Dashboard>) -> Json<Vec<DeploymentStat>> {
    Json(dashboard.deployment_stats())
}

pub async fn system_health(State(dashboard): State<Dashboard>) -> Json<Vec<SystemHealth>> {
    Json(dashboard.system_health())
}

pub async fn active_agents(State(dashboard): State<Dashboard>) -> Json<Vec<ServiceActivity>> {
    Json(dashboard.active_agents())
}

pub async fn summary(State(dashboard): State<Dashboard>) -> Json<DashboardSummary> {
    Json(dashboard.summary())
}

/// Read-only dashboard surface.
pub fn create_router(dashboard: Dashboard) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/activity", get(activity))
        .route("/revenue/current-period", get(current_period_revenue))
        .route("/deployment-stats", get(deployment_stats))
        .route("/system-health", get(system_health))
        .route("/active-agents", get(active_agents))
        .route("/summary", get(summary))
        .with_state(dashboard)
}
