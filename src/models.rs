use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub key: String,
    pub current: f64,
    pub previous: f64,
    pub change_percent: f64,
    pub last_updated: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn new(key: &str, current: f64, previous: f64, last_updated: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            current,
            previous,
            change_percent: change_percent(current, previous),
            last_updated,
        }
    }

    /// Records that survive a round trip through storage but would break the
    /// store's invariants are treated as corrupt.
    pub fn is_well_formed(&self) -> bool {
        self.current.is_finite()
            && self.previous.is_finite()
            && self.change_percent.is_finite()
            && self.current >= 1.0
            && self.previous >= 0.0
            && (self.change_percent - change_percent(self.current, self.previous)).abs()
                <= CHANGE_PERCENT_TOLERANCE
            && !self.key.is_empty()
    }
}

const CHANGE_PERCENT_TOLERANCE: f64 = 1e-6;

pub fn change_percent(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityCategory {
    Lead,
    Call,
    Message,
    Appointment,
    Report,
    Workflow,
    Analysis,
}

impl ActivityCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Call => "call",
            Self::Message => "message",
            Self::Appointment => "appointment",
            Self::Report => "report",
            Self::Workflow => "workflow",
            Self::Analysis => "analysis",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "lead" => Some(Self::Lead),
            "call" => Some(Self::Call),
            "message" => Some(Self::Message),
            "appointment" => Some(Self::Appointment),
            "report" => Some(Self::Report),
            "workflow" => Some(Self::Workflow),
            "analysis" => Some(Self::Analysis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    Active,
    Processing,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Processing => "processing",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "processing" => Some(Self::Processing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetadata {
    pub processing_ms: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub category: ActivityCategory,
    pub description: String,
    pub source_ref: String,
    pub industry_ref: String,
    pub agent_id: String,
    pub client_ref: String,
    pub status: AgentStatus,
    pub metadata: ActivityMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePeriod {
    pub period_type: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_revenue: f64,
    pub deals_closed: u64,
    pub active_clients: u64,
    pub automation_runs: u64,
    pub cost_savings: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStat {
    pub service_ref: String,
    pub total_deployments: u64,
    pub active_deployments: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub last_deployment: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Operational,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operational => "operational",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "operational" => Some(Self::Operational),
            "degraded" => Some(Self::Degraded),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub name: String,
    pub status: HealthStatus,
    pub uptime_percent: f64,
    pub response_time_ms: f64,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceActivity {
    pub service_ref: String,
    pub active_agents: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub metrics: Vec<MetricSnapshot>,
    pub recent_activity: Vec<ActivityEvent>,
    pub current_period_revenue: Option<RevenuePeriod>,
    pub deployment_stats: Vec<DeploymentStat>,
    pub active_agents: Vec<ServiceActivity>,
    pub system_health: Vec<SystemHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub name: String,
    pub runs: u64,
    pub skips: u64,
    pub next_due: DateTime<Utc>,
}
