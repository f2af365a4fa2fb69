use crate::config::{HealthSeed, ServiceSeed};
use crate::errors::{AppError, AppResult};
use crate::models::{DeploymentStat, HealthStatus, SystemHealth};
use crate::persistence::{PersistOp, WriteBehind};
use crate::random::RandomSource;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

const ACTIVE_SHARE: (f64, f64) = (0.93, 0.97);
const SUCCESS_JITTER: f64 = 0.3;
const UPTIME_JITTER: f64 = 0.02;
const RESPONSE_SCALE: (f64, f64) = (0.9, 1.1);
const DEGRADED_BELOW: f64 = 99.0;
const DOWN_BELOW: f64 = 90.0;

/// Each refresh starts from the configured seed, so values wobble around the
/// registry figures instead of drifting.
pub fn refresh_stat(
    seed: &ServiceSeed,
    random: &dyn RandomSource,
    now: DateTime<Utc>,
) -> DeploymentStat {
    let active_share = random.range_f64(ACTIVE_SHARE.0, ACTIVE_SHARE.1);
    let active = ((seed.total_deployments as f64) * active_share).round() as u64;
    let success_rate =
        (seed.success_rate + random.range_f64(-SUCCESS_JITTER, SUCCESS_JITTER)).clamp(0.0, 100.0);
    let avg_response_time =
        seed.avg_response_time * random.range_f64(RESPONSE_SCALE.0, RESPONSE_SCALE.1);

    DeploymentStat {
        service_ref: seed.service_ref.clone(),
        total_deployments: seed.total_deployments,
        active_deployments: active.min(seed.total_deployments),
        success_rate: round_to(success_rate, 1),
        avg_response_time: round_to(avg_response_time, 2),
        last_deployment: Some(now),
        updated_at: now,
    }
}

pub fn refresh_health(
    seed: &HealthSeed,
    random: &dyn RandomSource,
    now: DateTime<Utc>,
) -> SystemHealth {
    let uptime_percent =
        (seed.uptime_percent + random.range_f64(-UPTIME_JITTER, UPTIME_JITTER)).clamp(0.0, 100.0);
    let response_time_ms =
        seed.response_time_ms * random.range_f64(RESPONSE_SCALE.0, RESPONSE_SCALE.1);
    SystemHealth {
        name: seed.name.clone(),
        status: status_for(uptime_percent),
        uptime_percent: round_to(uptime_percent, 2),
        response_time_ms: response_time_ms.round(),
        last_checked: now,
    }
}

pub fn status_for(uptime_percent: f64) -> HealthStatus {
    if uptime_percent < DOWN_BELOW {
        HealthStatus::Down
    } else if uptime_percent < DEGRADED_BELOW {
        HealthStatus::Degraded
    } else {
        HealthStatus::Operational
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn seeded_stat(seed: &ServiceSeed, now: DateTime<Utc>) -> DeploymentStat {
    DeploymentStat {
        service_ref: seed.service_ref.clone(),
        total_deployments: seed.total_deployments,
        active_deployments: seed.active_deployments.min(seed.total_deployments),
        success_rate: seed.success_rate,
        avg_response_time: seed.avg_response_time,
        last_deployment: None,
        updated_at: now,
    }
}

fn seeded_health(seed: &HealthSeed, now: DateTime<Utc>) -> SystemHealth {
    SystemHealth {
        name: seed.name.clone(),
        status: status_for(seed.uptime_percent),
        uptime_percent: seed.uptime_percent,
        response_time_ms: seed.response_time_ms,
        last_checked: now,
    }
}

/// Per-service deployment rows and system health rows, keyed so that
/// refreshes upsert in place.
pub struct DeploymentBoard {
    services: Vec<ServiceSeed>,
    health_checks: Vec<HealthSeed>,
    stats: RwLock<BTreeMap<String, DeploymentStat>>,
    health: RwLock<BTreeMap<String, SystemHealth>>,
    writer: Arc<WriteBehind>,
}

impl DeploymentBoard {
    pub fn new(
        services: Vec<ServiceSeed>,
        health_checks: Vec<HealthSeed>,
        writer: Arc<WriteBehind>,
    ) -> Self {
        Self {
            services,
            health_checks,
            stats: RwLock::new(BTreeMap::new()),
            health: RwLock::new(BTreeMap::new()),
            writer,
        }
    }

    /// Loads persisted rows for registered services and fills the gaps from
    /// the registry seeds. Rows for services no longer registered are ignored.
    pub fn restore(&self, now: DateTime<Utc>) -> AppResult<()> {
        let adapter = self.writer.adapter();
        let loaded_stats = adapter.load_deployment_stats();
        let mut persisted_stats: BTreeMap<String, DeploymentStat> = match loaded_stats {
            Ok(rows) => rows.into_iter().map(|row| (row.service_ref.clone(), row)).collect(),
            Err(error) => {
                tracing::warn!(error = %error, "deployment stats unavailable; using seeds");
                BTreeMap::new()
            }
        };
        let loaded_health = adapter.load_system_health();
        let mut persisted_health: BTreeMap<String, SystemHealth> = match loaded_health {
            Ok(rows) => rows.into_iter().map(|row| (row.name.clone(), row)).collect(),
            Err(error) => {
                tracing::warn!(error = %error, "system health unavailable; using seeds");
                BTreeMap::new()
            }
        };

        let mut stats = self.stats.write().map_err(|_| AppError::poisoned("deployment stats"))?;
        stats.clear();
        for seed in &self.services {
            let stat = persisted_stats
                .remove(&seed.service_ref)
                .unwrap_or_else(|| seeded_stat(seed, now));
            stats.insert(seed.service_ref.clone(), stat);
        }
        drop(stats);

        let mut health = self.health.write().map_err(|_| AppError::poisoned("system health"))?;
        health.clear();
        for seed in &self.health_checks {
            let row = persisted_health
                .remove(&seed.name)
                .unwrap_or_else(|| seeded_health(seed, now));
            health.insert(seed.name.clone(), row);
        }
        Ok(())
    }

    /// Recomputes every deployment row and health row.
    pub fn refresh(&self, random: &dyn RandomSource, now: DateTime<Utc>) -> AppResult<usize> {
        let fresh_stats: Vec<DeploymentStat> = self
            .services
            .iter()
            .map(|seed| refresh_stat(seed, random, now))
            .collect();
        let fresh_health: Vec<SystemHealth> = self
            .health_checks
            .iter()
            .map(|seed| refresh_health(seed, random, now))
            .collect();
        let refreshed = fresh_stats.len() + fresh_health.len();

        {
            let mut stats = self.stats.write().map_err(|_| AppError::poisoned("deployment stats"))?;
            for stat in fresh_stats {
                self.writer.submit(PersistOp::Deployment(stat.clone()));
                stats.insert(stat.service_ref.clone(), stat);
            }
        }
        {
            let mut health = self.health.write().map_err(|_| AppError::poisoned("system health"))?;
            for row in fresh_health {
                if row.status != HealthStatus::Operational {
                    tracing::warn!(
                        check = %row.name,
                        status = row.status.as_str(),
                        "health check not operational"
                    );
                }
                self.writer.submit(PersistOp::Health(row.clone()));
                health.insert(row.name.clone(), row);
            }
        }
        Ok(refreshed)
    }

    /// Rows in registry order.
    pub fn stats(&self) -> AppResult<Vec<DeploymentStat>> {
        let stats = self.stats.read().map_err(|_| AppError::poisoned("deployment stats"))?;
        Ok(self
            .services
            .iter()
            .filter_map(|seed| stats.get(&seed.service_ref).cloned())
            .collect())
    }

    /// Rows in registry order.
    pub fn health(&self) -> AppResult<Vec<SystemHealth>> {
        let health = self.health.read().map_err(|_| AppError::poisoned("system health"))?;
        Ok(self
            .health_checks
            .iter()
            .filter_map(|seed| health.get(&seed.name).cloned())
            .collect())
    }

    pub fn service_refs(&self) -> Vec<String> {
        self.services.iter().map(|seed| seed.service_ref.clone()).collect()
    }
}
