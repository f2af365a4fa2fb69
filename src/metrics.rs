use crate::clock::Clock;
use crate::config::MetricSeed;
use crate::errors::{AppError, AppResult};
use crate::models::{change_percent, MetricSnapshot};
use crate::persistence::{PersistOp, WriteBehind};
use crate::random::RandomSource;
use crate::walk::{self, WalkParams};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Seed for keys that are not in the registry.
pub const FALLBACK_SEED: (f64, f64) = (1.0, 1.0);

type Entry = Arc<Mutex<MetricSnapshot>>;

/// Keyed metric snapshots. Each key has its own lock, so a read-modify-write
/// on one key never interleaves with another write to the same key while
/// different keys proceed independently.
pub struct MetricStore {
    entries: RwLock<HashMap<String, Entry>>,
    seeds: HashMap<String, (f64, f64)>,
    writer: Arc<WriteBehind>,
    clock: Arc<dyn Clock>,
}

impl MetricStore {
    pub fn new(seeds: &[MetricSeed], writer: Arc<WriteBehind>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            seeds: seeds
                .iter()
                .map(|seed| (seed.key.clone(), (seed.seed_current, seed.seed_previous)))
                .collect(),
            writer,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> AppResult<MetricSnapshot> {
        let entry = self.entry(key)?;
        let snapshot = entry.lock().map_err(|_| AppError::poisoned("metric entry"))?;
        Ok(snapshot.clone())
    }

    pub fn set(&self, key: &str, new_current: f64) -> AppResult<MetricSnapshot> {
        let updated = self.update(key, |_| Some(new_current))?;
        match updated {
            Some(snapshot) => Ok(snapshot),
            None => self.get(key),
        }
    }

    /// Runs `next` inside the key's critical section. Returning `None` leaves
    /// the snapshot untouched; `Some(value)` shifts current into previous.
    pub fn update(
        &self,
        key: &str,
        next: impl FnOnce(&MetricSnapshot) -> Option<f64>,
    ) -> AppResult<Option<MetricSnapshot>> {
        let entry = self.entry(key)?;
        let mut snapshot = entry.lock().map_err(|_| AppError::poisoned("metric entry"))?;
        let Some(value) = next(&*snapshot) else {
            return Ok(None);
        };

        snapshot.previous = snapshot.current;
        snapshot.current = value.max(walk::FLOOR);
        snapshot.change_percent = change_percent(snapshot.current, snapshot.previous);
        snapshot.last_updated = self.clock.now();

        self.writer.submit(PersistOp::Metric(snapshot.clone()));
        Ok(Some(snapshot.clone()))
    }

    /// Overwrites both values at once for metrics derived from another
    /// figure rather than walked from their own history.
    pub fn mirror(&self, key: &str, current: f64, previous: f64) -> AppResult<MetricSnapshot> {
        let entry = self.entry(key)?;
        let mut snapshot = entry.lock().map_err(|_| AppError::poisoned("metric entry"))?;
        snapshot.current = current.max(walk::FLOOR);
        snapshot.previous = previous.max(0.0);
        snapshot.change_percent = change_percent(snapshot.current, snapshot.previous);
        snapshot.last_updated = self.clock.now();

        self.writer.submit(PersistOp::Metric(snapshot.clone()));
        Ok(snapshot.clone())
    }

    /// One random-walk step, skipped while the key is inside its minimum
    /// update interval.
    pub fn step(
        &self,
        key: &str,
        params: &WalkParams,
        random: &dyn RandomSource,
        now: DateTime<Utc>,
    ) -> AppResult<Option<MetricSnapshot>> {
        self.update(key, |snapshot| {
            if !walk::is_due(snapshot.last_updated, now, params.min_interval) {
                return None;
            }
            Some(walk::next_value(snapshot.current, params, random))
        })
    }

    pub fn snapshots(&self, keys: &[&str]) -> AppResult<Vec<MetricSnapshot>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    pub fn loaded_keys(&self) -> AppResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| AppError::poisoned("metric store"))?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn entry(&self, key: &str) -> AppResult<Entry> {
        {
            let entries = self.entries.read().map_err(|_| AppError::poisoned("metric store"))?;
            if let Some(entry) = entries.get(key) {
                return Ok(entry.clone());
            }
        }

        let (snapshot, persist) = self.load_or_seed(key);
        let mut entries = self.entries.write().map_err(|_| AppError::poisoned("metric store"))?;
        if let Some(existing) = entries.get(key) {
            return Ok(existing.clone());
        }
        if persist {
            self.writer.submit(PersistOp::Metric(snapshot.clone()));
        }
        let entry = Arc::new(Mutex::new(snapshot));
        entries.insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    /// Persisted record if it can be trusted, otherwise the seed. The flag is
    /// true when the seed replaces a missing or corrupt record and needs
    /// persisting. A seed used because the store could not be read stays in
    /// memory so it never overwrites a durable record.
    fn load_or_seed(&self, key: &str) -> (MetricSnapshot, bool) {
        let persist = match self.writer.adapter().load_metric(key) {
            Ok(Some(snapshot)) if snapshot.is_well_formed() && snapshot.key == key => {
                return (snapshot, false);
            }
            Ok(Some(_)) => {
                tracing::warn!(metric = key, "persisted metric failed validation; reseeding");
                true
            }
            Ok(None) => true,
            Err(AppError::Corrupt(reason)) => {
                tracing::warn!(metric = key, reason = %reason, "corrupt metric record; reseeding");
                true
            }
            Err(error) => {
                tracing::warn!(
                    metric = key,
                    error = %error,
                    "metric store unavailable; using in-memory seed"
                );
                false
            }
        };

        let (current, previous) = self.seeds.get(key).copied().unwrap_or(FALLBACK_SEED);
        let seeded = MetricSnapshot::new(key, current.max(walk::FLOOR), previous, self.clock.now());
        (seeded, persist)
    }
}
