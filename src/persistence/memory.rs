use super::PersistenceAdapter;
use crate::errors::{AppError, AppResult};
use crate::models::{ActivityEvent, DeploymentStat, MetricSnapshot, RevenuePeriod, SystemHealth};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    metrics: HashMap<String, MetricSnapshot>,
    activity: VecDeque<ActivityEvent>,
    revenue: HashMap<(String, DateTime<Utc>), RevenuePeriod>,
    deployments: BTreeMap<String, DeploymentStat>,
    health: BTreeMap<String, SystemHealth>,
}

/// Process-local store. Survives engine teardown as long as the adapter
/// itself is kept alive, which is what restart tests rely on.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> AppResult<T> {
        let mut state = self.state.lock().map_err(|_| AppError::poisoned("memory adapter"))?;
        Ok(f(&mut state))
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn load_metric(&self, key: &str) -> AppResult<Option<MetricSnapshot>> {
        self.with_state(|state| state.metrics.get(key).cloned())
    }

    fn save_metric(&self, snapshot: &MetricSnapshot) -> AppResult<()> {
        self.with_state(|state| {
            state.metrics.insert(snapshot.key.clone(), snapshot.clone());
        })
    }

    fn append_activity(&self, event: &ActivityEvent, cap: usize) -> AppResult<()> {
        self.with_state(|state| {
            let position = state
                .activity
                .iter()
                .position(|existing| existing.timestamp <= event.timestamp)
                .unwrap_or(state.activity.len());
            state.activity.insert(position, event.clone());
            state.activity.truncate(cap.max(1));
        })
    }

    fn recent_activity(&self, limit: usize) -> AppResult<Vec<ActivityEvent>> {
        self.with_state(|state| state.activity.iter().take(limit).cloned().collect())
    }

    fn save_revenue_period(&self, period: &RevenuePeriod) -> AppResult<()> {
        self.with_state(|state| {
            state
                .revenue
                .insert((period.period_type.clone(), period.period_start), period.clone());
        })
    }

    fn load_revenue_period(
        &self,
        period_type: &str,
        period_start: DateTime<Utc>,
    ) -> AppResult<Option<RevenuePeriod>> {
        let key = (period_type.to_string(), period_start);
        self.with_state(|state| state.revenue.get(&key).cloned())
    }

    fn save_deployment_stat(&self, stat: &DeploymentStat) -> AppResult<()> {
        self.with_state(|state| {
            state.deployments.insert(stat.service_ref.clone(), stat.clone());
        })
    }

    fn load_deployment_stats(&self) -> AppResult<Vec<DeploymentStat>> {
        self.with_state(|state| state.deployments.values().cloned().collect())
    }

    fn save_system_health(&self, health: &SystemHealth) -> AppResult<()> {
        self.with_state(|state| {
            state.health.insert(health.name.clone(), health.clone());
        })
    }

    fn load_system_health(&self) -> AppResult<Vec<SystemHealth>> {
        self.with_state(|state| state.health.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryAdapter;
    use crate::models::{
        ActivityCategory, ActivityEvent, ActivityMetadata, AgentStatus, MetricSnapshot,
    };
    use crate::persistence::PersistenceAdapter;
    use chrono::{Duration, Utc};

    fn event(id: usize, offset_secs: i64) -> ActivityEvent {
        ActivityEvent {
            id: format!("evt-{}", id),
            category: ActivityCategory::Lead,
            description: "Processed 15 new leads".to_string(),
            source_ref: "lead_acquisition".to_string(),
            industry_ref: "Healthcare".to_string(),
            agent_id: "AGT-000001".to_string(),
            client_ref: "CLI-00000001".to_string(),
            status: AgentStatus::Active,
            metadata: ActivityMetadata {
                processing_ms: 120,
                confidence: 91.5,
            },
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn upserts_metrics_by_key() {
        let adapter = MemoryAdapter::new();
        let now = Utc::now();
        adapter
            .save_metric(&MetricSnapshot::new("leads", 480.0, 428.0, now))
            .expect("save");
        adapter
            .save_metric(&MetricSnapshot::new("leads", 489.0, 480.0, now))
            .expect("save");
        let loaded = adapter.load_metric("leads").expect("load").expect("present");
        assert_eq!(loaded.current, 489.0);
        assert!(adapter.load_metric("deals").expect("load").is_none());
    }

    #[test]
    fn activity_append_is_bounded_and_sorted() {
        let adapter = MemoryAdapter::new();
        for index in 0..10 {
            adapter.append_activity(&event(index, index as i64), 4).expect("append");
        }
        let recent = adapter.recent_activity(50).expect("recent");
        let ids: Vec<_> = recent.iter().map(|evt| evt.id.as_str()).collect();
        assert_eq!(ids, vec!["evt-9", "evt-8", "evt-7", "evt-6"]);
    }
}
