use crate::config::MetricSeed;
use crate::random::RandomSource;
use chrono::{DateTime, Duration, Utc};

pub const FLOOR: f64 = 1.0;

const DECREASE_BELOW: f64 = 0.35;
const SMALL_INCREASE_BELOW: f64 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkParams {
    pub base_growth: f64,
    pub volatility: f64,
    pub min_interval: Duration,
    pub ceiling: Option<f64>,
}

impl WalkParams {
    pub fn new(base_growth: f64, volatility: f64, min_interval: Duration) -> Self {
        Self {
            base_growth,
            volatility,
            min_interval,
            ceiling: None,
        }
    }
}

impl From<&MetricSeed> for WalkParams {
    fn from(seed: &MetricSeed) -> Self {
        Self {
            base_growth: seed.base_growth,
            volatility: seed.volatility,
            min_interval: Duration::seconds(seed.min_interval_secs),
            ceiling: seed.ceiling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Decrease,
    SmallIncrease,
    GrowthIncrease,
}

pub fn band_for(r: f64) -> Band {
    if r < DECREASE_BELOW {
        Band::Decrease
    } else if r < SMALL_INCREASE_BELOW {
        Band::SmallIncrease
    } else {
        Band::GrowthIncrease
    }
}

pub fn delta(band: Band, r_v: f64, params: &WalkParams) -> f64 {
    match band {
        Band::Decrease => -(r_v * params.volatility * 0.5).floor(),
        Band::SmallIncrease => (r_v * params.volatility).floor(),
        Band::GrowthIncrease => (r_v * params.volatility * 1.5 + params.base_growth).floor(),
    }
}

pub fn bounded(value: f64, ceiling: Option<f64>) -> f64 {
    let floored = value.max(FLOOR);
    match ceiling {
        Some(ceiling) => floored.min(ceiling.max(FLOOR)),
        None => floored,
    }
}

/// One step of the walk. Consumes exactly two draws: the band selector and
/// the magnitude.
pub fn next_value(current: f64, params: &WalkParams, random: &dyn RandomSource) -> f64 {
    let band = band_for(random.next_f64());
    let r_v = random.next_f64();
    bounded(current + delta(band, r_v, params), params.ceiling)
}

pub fn is_due(last_updated: DateTime<Utc>, now: DateTime<Utc>, min_interval: Duration) -> bool {
    now - last_updated >= min_interval
}

#[cfg(test)]
mod tests {
    use super::{band_for, bounded, delta, is_due, next_value, Band, WalkParams};
    use crate::random::{ScriptedRandom, SeededRandom};
    use chrono::{Duration, Utc};

    fn params() -> WalkParams {
        WalkParams::new(2.0, 5.0, Duration::seconds(4))
    }

    #[test]
    fn growth_band_adds_base_growth() {
        let random = ScriptedRandom::new([0.99, 0.99], 0.5);
        assert_eq!(next_value(480.0, &params(), &random), 489.0);
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(band_for(0.0), Band::Decrease);
        assert_eq!(band_for(0.349), Band::Decrease);
        assert_eq!(band_for(0.35), Band::SmallIncrease);
        assert_eq!(band_for(0.649), Band::SmallIncrease);
        assert_eq!(band_for(0.65), Band::GrowthIncrease);
    }

    #[test]
    fn decrease_uses_half_volatility() {
        assert_eq!(delta(Band::Decrease, 0.99, &params()), -2.0);
        assert_eq!(delta(Band::SmallIncrease, 0.99, &params()), 4.0);
    }

    #[test]
    fn never_drops_below_floor() {
        let random = SeededRandom::new(11);
        let steep = WalkParams::new(0.0, 400.0, Duration::zero());
        let mut value = 3.0;
        for _ in 0..2_000 {
            value = next_value(value, &steep, &random);
            assert!(value >= 1.0);
        }
    }

    #[test]
    fn ceiling_caps_growth() {
        let mut capped = params();
        capped.ceiling = Some(485.0);
        let random = ScriptedRandom::new([0.99, 0.99], 0.5);
        assert_eq!(next_value(480.0, &capped, &random), 485.0);
        assert_eq!(bounded(-20.0, Some(10.0)), 1.0);
    }

    #[test]
    fn interval_gate() {
        let now = Utc::now();
        assert!(!is_due(now - Duration::seconds(3), now, Duration::seconds(4)));
        assert!(is_due(now - Duration::seconds(4), now, Duration::seconds(4)));
    }

    #[test]
    fn walk_trends_upward_over_long_runs() {
        let random = SeededRandom::new(42);
        let walk = WalkParams::new(2.0, 5.0, Duration::zero());
        let mut value = 480.0;
        for _ in 0..1_000 {
            value = next_value(value, &walk, &random);
        }
        assert!(value > 480.0);
    }
}
