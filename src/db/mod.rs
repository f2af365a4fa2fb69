use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityCategory, ActivityEvent, ActivityMetadata, AgentStatus, DeploymentStat, HealthStatus,
    MetricSnapshot, RevenuePeriod, SystemHealth,
};
use crate::persistence::PersistenceAdapter;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AppError::poisoned("database"))
    }

    pub fn count_activity(&self) -> AppResult<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(1) FROM activity_events", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl PersistenceAdapter for Database {
    fn load_metric(&self, key: &str) -> AppResult<Option<MetricSnapshot>> {
        let conn = self.lock()?;
        let loaded = conn
            .query_row(
                "SELECT metric_key, current_value, previous_value, change_percent, last_updated
                 FROM metric_snapshots WHERE metric_key = ?1",
                [key],
                parse_metric_row,
            )
            .optional();

        match loaded {
            Ok(Some(snapshot)) if snapshot.is_well_formed() => Ok(Some(snapshot)),
            Ok(Some(_)) => Err(AppError::Corrupt(format!("metric '{}' failed validation", key))),
            Ok(None) => Ok(None),
            Err(error) if is_conversion_error(&error) => {
                Err(AppError::Corrupt(format!("metric '{}': {}", key, error)))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn save_metric(&self, snapshot: &MetricSnapshot) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO metric_snapshots
               (metric_key, current_value, previous_value, change_percent, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(metric_key) DO UPDATE SET
               current_value = excluded.current_value,
               previous_value = excluded.previous_value,
               change_percent = excluded.change_percent,
               last_updated = excluded.last_updated",
            params![
                snapshot.key,
                snapshot.current,
                snapshot.previous,
                snapshot.change_percent,
                format_time(snapshot.last_updated),
            ],
        )?;
        Ok(())
    }

    fn append_activity(&self, event: &ActivityEvent, cap: usize) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO activity_events (
               id, category, description, source_ref, industry_ref, agent_id, client_ref,
               status, metadata_json, timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id,
                event.category.as_str(),
                event.description,
                event.source_ref,
                event.industry_ref,
                event.agent_id,
                event.client_ref,
                event.status.as_str(),
                serde_json::to_string(&event.metadata)?,
                format_time(event.timestamp),
            ],
        )?;
        tx.execute(
            "DELETE FROM activity_events WHERE seq NOT IN (
               SELECT seq FROM activity_events ORDER BY timestamp DESC, seq DESC LIMIT ?1
             )",
            [cap.max(1) as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn recent_activity(&self, limit: usize) -> AppResult<Vec<ActivityEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, category, description, source_ref, industry_ref, agent_id, client_ref,
                    status, metadata_json, timestamp
             FROM activity_events ORDER BY timestamp DESC, seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], parse_activity_row)?;
        let mut result = Vec::new();
        for row in rows {
            match row {
                Ok(event) => result.push(event),
                Err(error) if is_conversion_error(&error) => {
                    tracing::warn!(error = %error, "skipping corrupt activity row");
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(result)
    }

    fn save_revenue_period(&self, period: &RevenuePeriod) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO revenue_periods (
               period_type, period_start, period_end, total_revenue, deals_closed,
               active_clients, automation_runs, cost_savings, computed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(period_type, period_start) DO UPDATE SET
               period_end = excluded.period_end,
               total_revenue = excluded.total_revenue,
               deals_closed = excluded.deals_closed,
               active_clients = excluded.active_clients,
               automation_runs = excluded.automation_runs,
               cost_savings = excluded.cost_savings,
               computed_at = excluded.computed_at",
            params![
                period.period_type,
                format_time(period.period_start),
                format_time(period.period_end),
                period.total_revenue,
                period.deals_closed as i64,
                period.active_clients as i64,
                period.automation_runs as i64,
                period.cost_savings,
                format_time(period.computed_at),
            ],
        )?;
        Ok(())
    }

    fn load_revenue_period(
        &self,
        period_type: &str,
        period_start: DateTime<Utc>,
    ) -> AppResult<Option<RevenuePeriod>> {
        let conn = self.lock()?;
        let loaded = conn
            .query_row(
                "SELECT period_type, period_start, period_end, total_revenue, deals_closed,
                        active_clients, automation_runs, cost_savings, computed_at
                 FROM revenue_periods WHERE period_type = ?1 AND period_start = ?2",
                params![period_type, format_time(period_start)],
                parse_revenue_row,
            )
            .optional();
        match loaded {
            Ok(period) => Ok(period),
            Err(error) if is_conversion_error(&error) => {
                let start = format_time(period_start);
                Err(AppError::Corrupt(format!("revenue period {}: {}", start, error)))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn save_deployment_stat(&self, stat: &DeploymentStat) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO deployment_stats (
               service_ref, total_deployments, active_deployments, success_rate,
               avg_response_time, last_deployment, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(service_ref) DO UPDATE SET
               total_deployments = excluded.total_deployments,
               active_deployments = excluded.active_deployments,
               success_rate = excluded.success_rate,
               avg_response_time = excluded.avg_response_time,
               last_deployment = excluded.last_deployment,
               updated_at = excluded.updated_at",
            params![
                stat.service_ref,
                stat.total_deployments as i64,
                stat.active_deployments as i64,
                stat.success_rate,
                stat.avg_response_time,
                stat.last_deployment.map(format_time),
                format_time(stat.updated_at),
            ],
        )?;
        Ok(())
    }

    fn load_deployment_stats(&self) -> AppResult<Vec<DeploymentStat>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT service_ref, total_deployments, active_deployments, success_rate,
                    avg_response_time, last_deployment, updated_at
             FROM deployment_stats ORDER BY service_ref",
        )?;
        let rows = stmt.query_map([], parse_deployment_row)?;
        collect_skipping_corrupt(rows, "deployment stat")
    }

    fn save_system_health(&self, health: &SystemHealth) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO system_health
               (name, status, uptime_percent, response_time_ms, last_checked)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
               status = excluded.status,
               uptime_percent = excluded.uptime_percent,
               response_time_ms = excluded.response_time_ms,
               last_checked = excluded.last_checked",
            params![
                health.name,
                health.status.as_str(),
                health.uptime_percent,
                health.response_time_ms,
                format_time(health.last_checked),
            ],
        )?;
        Ok(())
    }

    fn load_system_health(&self) -> AppResult<Vec<SystemHealth>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, status, uptime_percent, response_time_ms, last_checked
             FROM system_health ORDER BY name",
        )?;
        let rows = stmt.query_map([], parse_health_row)?;
        collect_skipping_corrupt(rows, "system health")
    }
}

fn collect_skipping_corrupt<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> AppResult<Vec<T>> {
    let mut result = Vec::new();
    for row in rows {
        match row {
            Ok(value) => result.push(value),
            Err(error) if is_conversion_error(&error) => {
                tracing::warn!(record = what, error = %error, "skipping corrupt row");
            }
            Err(error) => return Err(error.into()),
        }
    }
    Ok(result)
}

fn is_conversion_error(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
    )
}

fn parse_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    Ok(MetricSnapshot {
        key: row.get(0)?,
        current: row.get(1)?,
        previous: row.get(2)?,
        change_percent: row.get(3)?,
        last_updated: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityEvent> {
    let category_raw: String = row.get(1)?;
    let status_raw: String = row.get(7)?;
    let metadata_raw: String = row.get(8)?;
    Ok(ActivityEvent {
        id: row.get(0)?,
        category: ActivityCategory::parse(&category_raw)
            .ok_or_else(|| invalid_value(1, &category_raw))?,
        description: row.get(2)?,
        source_ref: row.get(3)?,
        industry_ref: row.get(4)?,
        agent_id: row.get(5)?,
        client_ref: row.get(6)?,
        status: AgentStatus::parse(&status_raw).ok_or_else(|| invalid_value(7, &status_raw))?,
        metadata: serde_json::from_str::<ActivityMetadata>(&metadata_raw)
            .map_err(|_| invalid_value(8, &metadata_raw))?,
        timestamp: parse_time(&row.get::<_, String>(9)?)?,
    })
}

fn parse_revenue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RevenuePeriod> {
    Ok(RevenuePeriod {
        period_type: row.get(0)?,
        period_start: parse_time(&row.get::<_, String>(1)?)?,
        period_end: parse_time(&row.get::<_, String>(2)?)?,
        total_revenue: row.get(3)?,
        deals_closed: row.get::<_, i64>(4)?.max(0) as u64,
        active_clients: row.get::<_, i64>(5)?.max(0) as u64,
        automation_runs: row.get::<_, i64>(6)?.max(0) as u64,
        cost_savings: row.get(7)?,
        computed_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

fn parse_deployment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeploymentStat> {
    Ok(DeploymentStat {
        service_ref: row.get(0)?,
        total_deployments: row.get::<_, i64>(1)?.max(0) as u64,
        active_deployments: row.get::<_, i64>(2)?.max(0) as u64,
        success_rate: row.get(3)?,
        avg_response_time: row.get(4)?,
        last_deployment: row
            .get::<_, Option<String>>(5)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        updated_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn parse_health_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SystemHealth> {
    let status_raw: String = row.get(1)?;
    Ok(SystemHealth {
        name: row.get(0)?,
        status: HealthStatus::parse(&status_raw).ok_or_else(|| invalid_value(1, &status_raw))?,
        uptime_percent: row.get(2)?,
        response_time_ms: row.get(3)?,
        last_checked: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn invalid_value(column: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected value '{}'", raw),
        )),
    )
}

/// Fixed-width UTC so that text ordering matches time ordering.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{
        ActivityCategory, ActivityEvent, ActivityMetadata, AgentStatus, DeploymentStat,
        HealthStatus, MetricSnapshot, RevenuePeriod, SystemHealth,
    };
    use crate::persistence::PersistenceAdapter;
    use chrono::{Duration, TimeZone, Utc};

    fn event(index: usize, at: chrono::DateTime<Utc>) -> ActivityEvent {
        ActivityEvent {
            id: format!("evt-{}", index),
            category: ActivityCategory::Call,
            description: "Completed customer inquiry".to_string(),
            source_ref: "deal_analysis".to_string(),
            industry_ref: "Finance".to_string(),
            agent_id: "AGT-ABC123".to_string(),
            client_ref: "CLI-ABCDEF12".to_string(),
            status: AgentStatus::Processing,
            metadata: ActivityMetadata {
                processing_ms: 310,
                confidence: 88.4,
            },
            timestamp: at,
        }
    }

    #[test]
    fn metric_snapshot_round_trip_and_upsert() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).single().expect("time")
            + Duration::nanoseconds(123_456_789);

        db.save_metric(&MetricSnapshot::new("leads", 480.0, 428.0, now)).expect("save");
        db.save_metric(&MetricSnapshot::new("leads", 489.0, 480.0, now)).expect("upsert");

        let loaded = db.load_metric("leads").expect("load").expect("exists");
        assert_eq!(loaded.current, 489.0);
        assert_eq!(loaded.previous, 480.0);
        assert_eq!(loaded.last_updated, now);
        assert!(db.load_metric("missing").expect("load").is_none());
    }

    #[test]
    fn corrupt_metric_rows_are_reported_as_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        {
            let conn = db.conn.lock().expect("conn");
            conn.execute(
                "INSERT INTO metric_snapshots
                   (metric_key, current_value, previous_value, change_percent, last_updated)
                 VALUES ('deals', 57.0, 53.0, 7.5, 'not-a-timestamp'),
                        ('calls', 'garbage', 10.0, 0.0, '2026-01-15T12:00:00.000000000Z'),
                        ('messages', 0.0, 10.0, 0.0, '2026-01-15T12:00:00.000000000Z'),
                        ('leads', 500.0, 480.0, 99.0, '2026-01-15T12:00:00.000000000Z'),
                        ('appointments', 320.0, -5.0, -6500.0, '2026-01-15T12:00:00.000000000Z')",
                [],
            )
            .expect("insert corrupt rows");
        }

        for key in ["deals", "calls", "messages", "leads", "appointments"] {
            let err = db.load_metric(key).expect_err("corrupt row");
            assert!(matches!(err, AppError::Corrupt(_)), "{} -> {}", key, err);
        }
    }

    #[test]
    fn activity_append_keeps_most_recent_within_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).single().expect("time");

        for index in 0..15 {
            db.append_activity(&event(index, start + Duration::seconds(index as i64)), 12)
                .expect("append");
        }

        assert_eq!(db.count_activity().expect("count"), 12);
        let recent = db.recent_activity(100).expect("recent");
        assert_eq!(recent.len(), 12);
        assert_eq!(recent[0].id, "evt-14");
        assert_eq!(recent[11].id, "evt-3");
        assert_eq!(recent[0].status, AgentStatus::Processing);
        assert_eq!(recent[0].metadata.processing_ms, 310);
    }

    #[test]
    fn revenue_period_upserts_by_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("start");
        let end = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).single().expect("end");
        let mut period = RevenuePeriod {
            period_type: "monthly".to_string(),
            period_start: start,
            period_end: end,
            total_revenue: 1_225_000.0,
            deals_closed: 27,
            active_clients: 250,
            automation_runs: 612_500,
            cost_savings: 4_165_000.0,
            computed_at: start,
        };
        db.save_revenue_period(&period).expect("save");
        period.total_revenue = 1_300_000.0;
        db.save_revenue_period(&period).expect("upsert");

        let loaded = db
            .load_revenue_period("monthly", start)
            .expect("load")
            .expect("exists");
        assert_eq!(loaded.total_revenue, 1_300_000.0);
        assert_eq!(loaded.deals_closed, 27);
        assert!(db
            .load_revenue_period("monthly", start + Duration::days(31))
            .expect("load")
            .is_none());
    }

    #[test]
    fn deployment_and_health_rows_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let now = Utc::now();
        {
            let db = Database::new(&path).expect("db");
            db.save_deployment_stat(&DeploymentStat {
                service_ref: "asset_sentinel".to_string(),
                total_deployments: 535,
                active_deployments: 512,
                success_rate: 99.7,
                avg_response_time: 0.8,
                last_deployment: Some(now),
                updated_at: now,
            })
            .expect("save stat");
            db.save_system_health(&SystemHealth {
                name: "System Uptime".to_string(),
                status: HealthStatus::Operational,
                uptime_percent: 99.98,
                response_time_ms: 42.0,
                last_checked: now,
            })
            .expect("save health");
        }

        let reopened = Database::new(&path).expect("reopen");
        let stats = reopened.load_deployment_stats().expect("stats");
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].active_deployments, 512);
        assert!(stats[0].last_deployment.is_some());
        let health = reopened.load_system_health().expect("health");
        assert_eq!(health[0].status, HealthStatus::Operational);
    }
}
