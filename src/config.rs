use crate::errors::{AppError, AppResult};
use crate::models::RevenuePeriod;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid key regex"));

pub const CONFIG_ENV_VAR: &str = "LIVE_OPS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub listen_addr: String,
    pub activity_cap: usize,
    pub activity_batch: BatchSize,
    pub active_agent_window_secs: i64,
    pub writer_queue_capacity: usize,
    pub metrics: Vec<MetricSeed>,
    pub services: Vec<ServiceSeed>,
    pub health_checks: Vec<HealthSeed>,
    pub revenue: RevenueConfig,
    pub cadences: Cadences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeed {
    pub key: String,
    #[serde(default)]
    pub label: String,
    pub base_growth: f64,
    pub volatility: f64,
    pub seed_current: f64,
    pub seed_previous: f64,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: i64,
    #[serde(default)]
    pub ceiling: Option<f64>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Set for metrics that follow the revenue period instead of walking.
    #[serde(default)]
    pub revenue_field: Option<RevenueField>,
}

impl MetricSeed {
    pub fn is_walked(&self) -> bool {
        self.revenue_field.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevenueField {
    TotalRevenue,
    CostSavings,
}

impl RevenueField {
    pub fn value(self, period: &RevenuePeriod) -> f64 {
        match self {
            Self::TotalRevenue => period.total_revenue,
            Self::CostSavings => period.cost_savings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSeed {
    pub service_ref: String,
    pub label: String,
    pub total_deployments: u64,
    pub active_deployments: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSeed {
    pub name: String,
    pub uptime_percent: f64,
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevenueConfig {
    pub base_target: f64,
    pub variation: f64,
    pub avg_deal_size: f64,
    pub base_client_count: u64,
    pub client_jitter: u64,
    pub correlation_factor: f64,
    pub roi_multiplier: f64,
    /// Share of the current figure reported as the previous value on
    /// revenue-driven metrics.
    pub prior_ratio: f64,
}

impl Default for RevenueConfig {
    fn default() -> Self {
        Self {
            base_target: 2_450_000.0,
            variation: 0.05,
            avg_deal_size: 45_000.0,
            base_client_count: 247,
            client_jitter: 10,
            correlation_factor: 2.0,
            roi_multiplier: 3.4,
            prior_ratio: 0.92,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSize {
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cadence {
    pub min_secs: f64,
    pub max_secs: f64,
    #[serde(default)]
    pub skip_probability: f64,
}

impl Cadence {
    pub fn new(min_secs: f64, max_secs: f64, skip_probability: f64) -> Self {
        Self {
            min_secs,
            max_secs,
            skip_probability,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cadences {
    pub metrics: Cadence,
    pub activity: Cadence,
    pub revenue: Cadence,
    pub deployments: Cadence,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            metrics: Cadence::new(1.0, 3.0, 0.3),
            activity: Cadence::new(1.0, 3.0, 0.5),
            revenue: Cadence::new(30.0, 60.0, 0.1),
            deployments: Cadence::new(30.0, 60.0, 0.2),
        }
    }
}

fn default_min_interval_secs() -> i64 {
    4
}

fn default_visible() -> bool {
    true
}

fn metric(
    key: &str,
    label: &str,
    base_growth: f64,
    volatility: f64,
    current: f64,
    previous: f64,
    min_interval_secs: i64,
) -> MetricSeed {
    MetricSeed {
        key: key.to_string(),
        label: label.to_string(),
        base_growth,
        volatility,
        seed_current: current,
        seed_previous: previous,
        min_interval_secs,
        ceiling: None,
        visible: true,
        revenue_field: None,
    }
}

fn revenue_metric(
    key: &str,
    label: &str,
    field: RevenueField,
    current: f64,
    previous: f64,
) -> MetricSeed {
    MetricSeed {
        revenue_field: Some(field),
        ..metric(key, label, 0.0, 0.0, current, previous, 0)
    }
}

fn service(
    service_ref: &str,
    label: &str,
    total: u64,
    active: u64,
    success_rate: f64,
    avg_response_time: f64,
) -> ServiceSeed {
    ServiceSeed {
        service_ref: service_ref.to_string(),
        label: label.to_string(),
        total_deployments: total,
        active_deployments: active,
        success_rate,
        avg_response_time,
    }
}

fn health(name: &str, uptime_percent: f64, response_time_ms: f64) -> HealthSeed {
    HealthSeed {
        name: name.to_string(),
        uptime_percent,
        response_time_ms,
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            listen_addr: "127.0.0.1:8787".to_string(),
            activity_cap: 30,
            activity_batch: BatchSize { min: 1, max: 3 },
            active_agent_window_secs: 300,
            writer_queue_capacity: 1024,
            metrics: vec![
                metric("leads", "Leads Captured", 2.0, 5.0, 480.0, 428.0, 4),
                metric("deals", "Deals in Pipeline", 1.0, 2.0, 57.0, 53.0, 5),
                metric("total_actions", "Total Agent Actions", 8.0, 20.0, 18_543.0, 17_902.0, 3),
                metric("calls", "Calls Handled", 2.0, 4.0, 1_284.0, 1_211.0, 4),
                metric("messages", "Messages Sent", 4.0, 9.0, 6_420.0, 6_105.0, 3),
                metric("appointments", "Appointments Booked", 1.0, 2.0, 312.0, 296.0, 5),
                metric("active_agents", "Active Agents", 0.0, 3.0, 247.0, 240.0, 4),
                metric("total_agents", "Total Agents Deployed", 3.0, 6.0, 13_839.0, 13_425.0, 5),
                metric("active_deployments", "Active Deployments", 2.0, 5.0, 8_247.0, 7_892.0, 5),
                metric(
                    "monthly_runs",
                    "Monthly Automation Runs",
                    40.0,
                    120.0,
                    1_247_893.0,
                    1_184_220.0,
                    3,
                ),
                revenue_metric(
                    "monthly_revenue",
                    "Monthly Revenue",
                    RevenueField::TotalRevenue,
                    1_185_000.0,
                    1_090_200.0,
                ),
                revenue_metric(
                    "cost_savings",
                    "Cost Savings",
                    RevenueField::CostSavings,
                    8_400_000.0,
                    7_900_000.0,
                ),
            ],
            services: vec![
                service("lead_acquisition", "Autonomous Lead Acquisition", 842, 789, 99.2, 1.2),
                service("deal_analysis", "Predictive Deal Analysis", 1_250, 1_187, 98.8, 2.4),
                service("asset_sentinel", "Asset Sentinel Dashboard", 535, 512, 99.7, 0.8),
                service(
                    "reputation_guardian",
                    "Brand Reputation Guardian",
                    3_436,
                    3_289,
                    99.5,
                    0.3,
                ),
                service(
                    "scheduling_matrix",
                    "Intelligent Scheduling Matrix",
                    6_766,
                    6_470,
                    99.9,
                    0.5,
                ),
            ],
            health_checks: vec![
                health("System Uptime", 99.98, 42.0),
                health("API Response Time", 99.95, 38.0),
                health("Agent Processing", 99.99, 125.0),
            ],
            revenue: RevenueConfig::default(),
            cadences: Cadences::default(),
        }
    }
}

impl EngineConfig {
    /// Reads the YAML file when a path is given, otherwise the built-in
    /// registry. The result is always validated.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|err| AppError::Config(format!("{}: {}", path.display(), err)))?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Path from the first CLI argument, falling back to `LIVE_OPS_CONFIG`.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        Ok(serde_yaml::from_str::<Self>(raw)?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("dashboard.sqlite")
    }

    pub fn metric_seed(&self, key: &str) -> Option<&MetricSeed> {
        self.metrics.iter().find(|seed| seed.key == key)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.activity_cap == 0 {
            return Err(AppError::Config("activityCap must be at least 1".to_string()));
        }
        if self.activity_batch.min > self.activity_batch.max {
            return Err(AppError::Config("activityBatch.min exceeds activityBatch.max".to_string()));
        }
        if self.writer_queue_capacity == 0 {
            return Err(AppError::Config("writerQueueCapacity must be at least 1".to_string()));
        }
        if self.active_agent_window_secs < 0 {
            return Err(AppError::Config("activeAgentWindowSecs must not be negative".to_string()));
        }

        let mut seen = HashSet::new();
        for seed in &self.metrics {
            if !KEY_PATTERN.is_match(&seed.key) {
                return Err(AppError::Config(format!("invalid metric key '{}'", seed.key)));
            }
            if !seen.insert(seed.key.as_str()) {
                return Err(AppError::Config(format!("duplicate metric key '{}'", seed.key)));
            }
            let walk_finite = seed.volatility.is_finite() && seed.base_growth.is_finite();
            if seed.volatility < 0.0 || !walk_finite {
                return Err(AppError::Config(format!(
                    "metric '{}' has invalid walk parameters",
                    seed.key
                )));
            }
            if seed.min_interval_secs < 0 {
                return Err(AppError::Config(format!(
                    "metric '{}' has a negative minIntervalSecs",
                    seed.key
                )));
            }
            if let Some(ceiling) = seed.ceiling {
                if ceiling < 1.0 {
                    return Err(AppError::Config(format!(
                        "metric '{}' ceiling is below the floor of 1",
                        seed.key
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !KEY_PATTERN.is_match(&service.service_ref) {
                return Err(AppError::Config(format!(
                    "invalid service ref '{}'",
                    service.service_ref
                )));
            }
            if !seen.insert(service.service_ref.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate service ref '{}'",
                    service.service_ref
                )));
            }
        }

        let mut seen = HashSet::new();
        for check in &self.health_checks {
            if check.name.trim().is_empty() || !seen.insert(check.name.as_str()) {
                return Err(AppError::Config(format!(
                    "health check name '{}' is empty or duplicated",
                    check.name
                )));
            }
        }

        let revenue = &self.revenue;
        if revenue.avg_deal_size <= 0.0 || revenue.correlation_factor <= 0.0 {
            return Err(AppError::Config("revenue divisors must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&revenue.variation) {
            return Err(AppError::Config("revenue.variation must be in [0, 1)".to_string()));
        }
        if !(revenue.prior_ratio > 0.0 && revenue.prior_ratio <= 1.0) {
            return Err(AppError::Config("revenue.priorRatio must be in (0, 1]".to_string()));
        }

        for (name, cadence) in [
            ("metrics", &self.cadences.metrics),
            ("activity", &self.cadences.activity),
            ("revenue", &self.cadences.revenue),
            ("deployments", &self.cadences.deployments),
        ] {
            if cadence.min_secs <= 0.0 || cadence.min_secs > cadence.max_secs {
                return Err(AppError::Config(format!(
                    "cadence '{}' needs 0 < minSecs <= maxSecs",
                    name
                )));
            }
            if !(0.0..1.0).contains(&cadence.skip_probability) {
                return Err(AppError::Config(format!(
                    "cadence '{}' skipProbability must be in [0, 1)",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, RevenueField};

    #[test]
    fn default_registry_is_valid() {
        let config = EngineConfig::default();
        config.validate().expect("default config");
        let leads = config.metric_seed("leads").expect("leads seed");
        assert_eq!(leads.seed_current, 480.0);
        assert_eq!(leads.seed_previous, 428.0);
        assert_eq!(config.services.len(), 5);

        let revenue_keys: Vec<&str> = config
            .metrics
            .iter()
            .filter(|seed| !seed.is_walked())
            .map(|seed| seed.key.as_str())
            .collect();
        assert_eq!(revenue_keys, ["monthly_revenue", "cost_savings"]);
    }

    #[test]
    fn revenue_field_parses_from_yaml() {
        let raw = r#"
metrics:
  - key: booked_revenue
    baseGrowth: 0
    volatility: 0
    seedCurrent: 10
    seedPrevious: 9
    revenueField: totalRevenue
"#;
        let config = EngineConfig::from_yaml(raw).expect("parse yaml");
        config.validate().expect("valid");
        assert_eq!(config.metrics[0].revenue_field, Some(RevenueField::TotalRevenue));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let raw = "activityCap: 12\nrevenue:\n  baseTarget: 1000000\n";
        let config = EngineConfig::from_yaml(raw).expect("parse yaml");
        config.validate().expect("valid");
        assert_eq!(config.activity_cap, 12);
        assert_eq!(config.revenue.base_target, 1_000_000.0);
        assert_eq!(config.revenue.avg_deal_size, 45_000.0);
        assert!(!config.metrics.is_empty());
    }

    #[test]
    fn rejects_bad_metric_keys() {
        let raw = r#"
metrics:
  - key: Bad-Key
    baseGrowth: 1
    volatility: 2
    seedCurrent: 10
    seedPrevious: 9
"#;
        let config = EngineConfig::from_yaml(raw).expect("parse yaml");
        let err = config.validate().expect_err("invalid key");
        assert!(err.to_string().contains("CONFIG_INVALID"));
    }

    #[test]
    fn rejects_zero_cap_and_inverted_cadence() {
        let mut config = EngineConfig::default();
        config.activity_cap = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cadences.revenue.min_secs = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "listenAddr: 0.0.0.0:9000\nactivityCap: 6\n").expect("write config");
        let config = EngineConfig::load(Some(&path)).expect("load");
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.activity_cap, 6);
    }
}
