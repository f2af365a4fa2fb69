use crate::config::RevenueConfig;
use crate::errors::{AppError, AppResult};
use crate::models::RevenuePeriod;
use crate::persistence::{PersistOp, WriteBehind};
use crate::random::RandomSource;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::sync::{Arc, RwLock};

pub const PERIOD_MONTHLY: &str = "monthly";

/// Where "now" sits inside the reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodPosition {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub days_in_period: u32,
    pub days_elapsed: u32,
}

impl PeriodPosition {
    pub fn new(
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        days_in_period: u32,
        days_elapsed: u32,
    ) -> Self {
        let days_in_period = days_in_period.max(1);
        Self {
            period_start,
            period_end,
            days_in_period,
            days_elapsed: days_elapsed.min(days_in_period),
        }
    }

    /// Calendar month (UTC) containing `now`; today counts as elapsed.
    pub fn monthly(now: DateTime<Utc>) -> Self {
        let (year, month) = (now.year(), now.month());
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let start = month_start(year, month).unwrap_or(now);
        let next_start = month_start(next_year, next_month).unwrap_or(start + Duration::days(30));
        let days_in_period = (next_start - start).num_days().max(1) as u32;
        Self::new(start, next_start - Duration::seconds(1), days_in_period, now.day())
    }

    pub fn elapsed_fraction(&self) -> f64 {
        f64::from(self.days_elapsed) / f64::from(self.days_in_period.max(1))
    }
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Full recompute from the calendar position. Nothing here reads a previous
/// result, so missed or repeated ticks cannot compound.
pub fn compute(
    config: &RevenueConfig,
    position: &PeriodPosition,
    random: &dyn RandomSource,
    computed_at: DateTime<Utc>,
) -> RevenuePeriod {
    let days_in_period = f64::from(position.days_in_period.max(1));
    let days_elapsed = f64::from(position.days_elapsed).min(days_in_period);
    let accumulated = config.base_target * days_elapsed / days_in_period;
    let variation = (random.next_f64() - 0.5) * 2.0 * config.variation;
    let total_revenue = (accumulated * (1.0 + variation)).floor().max(0.0);

    let client_jitter = (random.next_f64() * config.client_jitter as f64).floor() as u64;

    RevenuePeriod {
        period_type: PERIOD_MONTHLY.to_string(),
        period_start: position.period_start,
        period_end: position.period_end,
        total_revenue,
        deals_closed: (total_revenue / config.avg_deal_size).floor() as u64,
        active_clients: config.base_client_count + client_jitter,
        automation_runs: (total_revenue / config.correlation_factor).floor() as u64,
        cost_savings: (total_revenue * config.roi_multiplier).floor(),
        computed_at,
    }
}

pub struct RevenueAccumulator {
    config: RevenueConfig,
    latest: RwLock<Option<RevenuePeriod>>,
    writer: Arc<WriteBehind>,
}

impl RevenueAccumulator {
    pub fn new(config: RevenueConfig, writer: Arc<WriteBehind>) -> Self {
        Self {
            config,
            latest: RwLock::new(None),
            writer,
        }
    }

    /// Picks up the persisted figure for the current period so a restart
    /// serves it before the first recompute.
    pub fn restore(&self, now: DateTime<Utc>) -> bool {
        let position = PeriodPosition::monthly(now);
        match self
            .writer
            .adapter()
            .load_revenue_period(PERIOD_MONTHLY, position.period_start)
        {
            Ok(Some(period)) => {
                if let Ok(mut latest) = self.latest.write() {
                    *latest = Some(period);
                    return true;
                }
                false
            }
            Ok(None) => false,
            Err(error) => {
                tracing::warn!(error = %error, "revenue history unavailable");
                false
            }
        }
    }

    pub fn recompute(
        &self,
        random: &dyn RandomSource,
        now: DateTime<Utc>,
    ) -> AppResult<RevenuePeriod> {
        let position = PeriodPosition::monthly(now);
        let period = compute(&self.config, &position, random, now);
        {
            let mut latest = self.latest.write().map_err(|_| AppError::poisoned("revenue"))?;
            *latest = Some(period.clone());
        }
        self.writer.submit(PersistOp::Revenue(period.clone()));
        tracing::debug!(
            total_revenue = period.total_revenue,
            days_elapsed = position.days_elapsed,
            days_in_period = position.days_in_period,
            "revenue recomputed"
        );
        Ok(period)
    }

    /// Latest figure, or `None` once the calendar has moved past its period.
    pub fn current(&self, now: DateTime<Utc>) -> AppResult<Option<RevenuePeriod>> {
        let latest = self.latest.read().map_err(|_| AppError::poisoned("revenue"))?;
        let period_start = PeriodPosition::monthly(now).period_start;
        Ok(latest
            .as_ref()
            .filter(|period| period.period_start == period_start)
            .cloned())
    }
}
