pub mod memory;
pub mod writer;

use crate::errors::AppResult;
use crate::models::{ActivityEvent, DeploymentStat, MetricSnapshot, RevenuePeriod, SystemHealth};
use chrono::{DateTime, Utc};

pub use memory::MemoryAdapter;
pub use writer::{PersistOp, WriteBehind};

/// Durable medium behind the engine. Implementations only need get/upsert by
/// key plus a bounded append for activity.
///
/// `load_metric` returns `AppError::Corrupt` for records it can read but not
/// trust; callers treat that the same as `Ok(None)`.
pub trait PersistenceAdapter: Send + Sync {
    fn load_metric(&self, key: &str) -> AppResult<Option<MetricSnapshot>>;
    fn save_metric(&self, snapshot: &MetricSnapshot) -> AppResult<()>;

    /// Appends and trims to the `cap` most recent events by timestamp.
    fn append_activity(&self, event: &ActivityEvent, cap: usize) -> AppResult<()>;
    fn recent_activity(&self, limit: usize) -> AppResult<Vec<ActivityEvent>>;

    fn save_revenue_period(&self, period: &RevenuePeriod) -> AppResult<()>;
    fn load_revenue_period(
        &self,
        period_type: &str,
        period_start: DateTime<Utc>,
    ) -> AppResult<Option<RevenuePeriod>>;

    fn save_deployment_stat(&self, stat: &DeploymentStat) -> AppResult<()>;
    fn load_deployment_stats(&self) -> AppResult<Vec<DeploymentStat>>;

    fn save_system_health(&self, health: &SystemHealth) -> AppResult<()>;
    fn load_system_health(&self) -> AppResult<Vec<SystemHealth>>;
}
