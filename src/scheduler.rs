use crate::clock::Clock;
use crate::config::Cadence;
use crate::models::TaskStats;
use crate::random::RandomSource;
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

pub type TaskAction = Arc<dyn Fn() + Send + Sync>;

const MIN_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_secs(1);
const STATUS_EVERY: Duration = Duration::from_secs(60);

struct TaskSlot {
    name: String,
    cadence: Cadence,
    action: TaskAction,
    next_due: DateTime<Utc>,
    runs: u64,
    skips: u64,
}

/// Named periodic tasks on jittered cadences. Time and randomness come from
/// the injected sources; `run_pending` is the only place tasks fire, whether
/// driven by the background loop or by a test.
#[derive(Clone)]
pub struct Scheduler {
    tasks: Arc<Mutex<Vec<TaskSlot>>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    stopped: Arc<RwLock<bool>>,
    shutdown: Arc<watch::Sender<bool>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
            clock,
            random,
            stopped: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(shutdown),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// First due time is one sampled interval from now. Registering a name
    /// twice replaces the earlier task.
    pub fn register(&self, name: &str, cadence: Cadence, action: TaskAction) {
        let next_due = self.clock.now() + self.sample_interval(&cadence);
        let Ok(mut tasks) = self.tasks.lock() else {
            tracing::error!(task = name, "scheduler task table poisoned");
            return;
        };
        tasks.retain(|slot| slot.name != name);
        tasks.push(TaskSlot {
            name: name.to_string(),
            cadence,
            action,
            next_due,
            runs: 0,
            skips: 0,
        });
    }

    /// Fires every task whose due time has passed. For each due task the skip
    /// draw comes first, then the draw for its next interval. Returns how many
    /// actions ran.
    pub fn run_pending(&self) -> usize {
        let Ok(stopped) = self.stopped.read() else {
            return 0;
        };
        if *stopped {
            return 0;
        }

        let now = self.clock.now();
        let due: Vec<(String, TaskAction)> = {
            let Ok(mut tasks) = self.tasks.lock() else {
                tracing::error!("scheduler task table poisoned");
                return 0;
            };
            let mut due = Vec::new();
            for slot in tasks.iter_mut().filter(|slot| slot.next_due <= now) {
                if self.random.chance(slot.cadence.skip_probability) {
                    slot.skips += 1;
                    tracing::trace!(task = %slot.name, "tick skipped");
                } else {
                    slot.runs += 1;
                    due.push((slot.name.clone(), slot.action.clone()));
                }
                slot.next_due = now + self.sample_interval(&slot.cadence);
            }
            due
        };

        let fired = due.len();
        for (name, action) in due {
            if catch_unwind(AssertUnwindSafe(|| action())).is_err() {
                tracing::error!(task = %name, "scheduled task panicked");
            }
        }
        fired
    }

    /// Spawns the timer loop. A no-op if it is already running or the
    /// scheduler was stopped.
    pub fn start(&self) -> bool {
        if self.is_stopped() {
            tracing::warn!("scheduler already stopped; not restarting");
            return false;
        }
        let Ok(mut handle) = self.handle.lock() else {
            return false;
        };
        if handle.is_some() {
            tracing::info!("scheduler already running");
            return false;
        }
        let scheduler = self.clone();
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move {
            scheduler.run_loop(shutdown).await;
        }));
        true
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut last_status = Instant::now();
        loop {
            let wait = self.until_next_due();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
            self.run_pending();

            if last_status.elapsed() >= STATUS_EVERY {
                last_status = Instant::now();
                self.log_status();
            }
        }
        tracing::debug!("scheduler loop exited");
    }

    /// After this returns no task action is running and none will start.
    pub async fn stop(&self) {
        match self.stopped.write() {
            Ok(mut stopped) => *stopped = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        self.shutdown.send_replace(true);

        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "scheduler loop terminated abnormally");
            }
        }
        self.log_status();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.read().map(|stopped| *stopped).unwrap_or(true)
    }

    pub fn is_running(&self) -> bool {
        !self.is_stopped() && self.handle.lock().map(|handle| handle.is_some()).unwrap_or(false)
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        let Ok(tasks) = self.tasks.lock() else {
            return Vec::new();
        };
        tasks
            .iter()
            .map(|slot| TaskStats {
                name: slot.name.clone(),
                runs: slot.runs,
                skips: slot.skips,
                next_due: slot.next_due,
            })
            .collect()
    }

    fn log_status(&self) {
        for task in self.stats() {
            tracing::info!(
                task = %task.name,
                runs = task.runs,
                skips = task.skips,
                "scheduler task status"
            );
        }
    }

    fn sample_interval(&self, cadence: &Cadence) -> chrono::Duration {
        let seconds = self.random.range_f64(cadence.min_secs, cadence.max_secs);
        chrono::Duration::milliseconds((seconds * 1000.0).round() as i64)
    }

    fn until_next_due(&self) -> Duration {
        let now = self.clock.now();
        let next = self
            .tasks
            .lock()
            .ok()
            .and_then(|tasks| tasks.iter().map(|slot| slot.next_due).min());
        let Some(next) = next else {
            return MAX_POLL;
        };
        (next - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .clamp(MIN_POLL, MAX_POLL)
    }
}

#[cfg(test)]
mod tests {
    use super::{Scheduler, TaskAction};
    use crate::clock::{ManualClock, SystemClock};
    use crate::config::Cadence;
    use crate::random::ScriptedRandom;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, TaskAction) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let action: TaskAction = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, action)
    }

    #[test]
    fn tasks_fire_only_when_due() {
        let clock = Arc::new(ManualClock::fixed());
        let random = Arc::new(ScriptedRandom::new([0.0], 0.5));
        let scheduler = Scheduler::new(clock.clone(), random);
        let (count, action) = counter();
        scheduler.register("metrics", Cadence::new(1.0, 3.0, 0.3), action);

        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::milliseconds(999));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::milliseconds(1));
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // 0.5 for the next interval puts the task two seconds out.
        clock.advance(Duration::milliseconds(1_999));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::milliseconds(1));
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    fn skip_probability_counts_skips() {
        let clock = Arc::new(ManualClock::fixed());
        // register interval, skip draw, next interval, run draw, next interval
        let random = Arc::new(ScriptedRandom::new([0.0, 0.1, 0.0, 0.9, 0.0], 0.0));
        let scheduler = Scheduler::new(clock.clone(), random);
        let (count, action) = counter();
        scheduler.register("activity", Cadence::new(1.0, 3.0, 0.5), action);

        clock.advance(Duration::seconds(1));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::seconds(1));
        assert_eq!(scheduler.run_pending(), 1);

        let stats = scheduler.stats();
        assert_eq!(stats[0].name, "activity");
        assert_eq!(stats[0].runs, 1);
        assert_eq!(stats[0].skips, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tasks_are_independent() {
        let clock = Arc::new(ManualClock::fixed());
        let random = Arc::new(ScriptedRandom::constant(0.0));
        let scheduler = Scheduler::new(clock.clone(), random);
        let (fast, fast_action) = counter();
        let (slow, slow_action) = counter();
        scheduler.register("fast", Cadence::new(1.0, 3.0, 0.0), fast_action);
        scheduler.register("slow", Cadence::new(30.0, 60.0, 0.0), slow_action);
        scheduler.register("broken", Cadence::new(1.0, 3.0, 0.0), Arc::new(|| panic!("boom")));

        for _ in 0..30 {
            clock.advance(Duration::seconds(1));
            scheduler.run_pending();
        }
        assert_eq!(fast.load(Ordering::SeqCst), 30);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nothing_fires_after_stop() {
        let clock = Arc::new(ManualClock::fixed());
        let random = Arc::new(ScriptedRandom::constant(0.0));
        let scheduler = Scheduler::new(clock.clone(), random);
        let (count, action) = counter();
        scheduler.register("revenue", Cadence::new(1.0, 2.0, 0.1), action);

        scheduler.stop().await;
        clock.advance(Duration::seconds(5));
        assert_eq!(scheduler.run_pending(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!scheduler.start());
    }

    #[tokio::test]
    async fn background_loop_runs_until_stopped() {
        let random = Arc::new(ScriptedRandom::constant(0.5));
        let scheduler = Scheduler::new(Arc::new(SystemClock), random);
        let (count, action) = counter();
        scheduler.register("metrics", Cadence::new(0.01, 0.02, 0.1), action);

        assert!(scheduler.start());
        assert!(!scheduler.start());
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        scheduler.stop().await;

        let fired = count.load(Ordering::SeqCst);
        assert!(fired > 0);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
        assert!(!scheduler.is_running());
    }
}
