use super::PersistenceAdapter;
use crate::errors::AppResult;
use crate::models::{ActivityEvent, DeploymentStat, MetricSnapshot, RevenuePeriod, SystemHealth};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum PersistOp {
    Metric(MetricSnapshot),
    Activity { event: ActivityEvent, cap: usize },
    Revenue(RevenuePeriod),
    Deployment(DeploymentStat),
    Health(SystemHealth),
}

impl PersistOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metric(_) => "metric",
            Self::Activity { .. } => "activity",
            Self::Revenue(_) => "revenue",
            Self::Deployment(_) => "deployment",
            Self::Health(_) => "health",
        }
    }

    pub fn apply(&self, adapter: &dyn PersistenceAdapter) -> AppResult<()> {
        match self {
            Self::Metric(snapshot) => adapter.save_metric(snapshot),
            Self::Activity { event, cap } => adapter.append_activity(event, *cap),
            Self::Revenue(period) => adapter.save_revenue_period(period),
            Self::Deployment(stat) => adapter.save_deployment_stat(stat),
            Self::Health(health) => adapter.save_system_health(health),
        }
    }
}

/// Fire-and-forget persistence. With a tokio runtime, writes go through a
/// bounded queue drained by a single worker, so per-key order is preserved
/// and a slow store never stalls the caller. Without one, writes are applied
/// inline. Failures are counted and logged, never returned.
pub struct WriteBehind {
    adapter: Arc<dyn PersistenceAdapter>,
    sender: Mutex<Option<mpsc::Sender<PersistOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    failed: Arc<AtomicU64>,
}

impl WriteBehind {
    pub fn inline(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            adapter,
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            dropped: AtomicU64::new(0),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn spawn(adapter: Arc<dyn PersistenceAdapter>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<PersistOp>(capacity.max(1));
        let failed = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(drain(adapter.clone(), receiver, failed.clone()));
        Self {
            adapter,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
            failed,
        }
    }

    pub fn auto(adapter: Arc<dyn PersistenceAdapter>, capacity: usize) -> Self {
        if tokio::runtime::Handle::try_current().is_ok() {
            Self::spawn(adapter, capacity)
        } else {
            tracing::debug!("no tokio runtime; persistence writes applied inline");
            Self::inline(adapter)
        }
    }

    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    pub fn submit(&self, op: PersistOp) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.as_ref().cloned(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            self.apply_inline(op);
            return;
        };

        match sender.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(op)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(kind = op.kind(), dropped, "persistence queue full; write dropped");
            }
            Err(TrySendError::Closed(op)) => self.apply_inline(op),
        }
    }

    fn apply_inline(&self, op: PersistOp) {
        if let Err(error) = op.apply(self.adapter.as_ref()) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(kind = op.kind(), error = %error, "persistence write failed");
        }
    }

    /// Closes the queue and waits for every accepted write to be applied.
    /// Later submissions are applied inline.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut guard| guard.take());
        drop(sender);
        let worker = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::warn!(error = %error, "persistence writer terminated abnormally");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(worker) = guard.take() {
                worker.abort();
            }
        }
    }
}

async fn drain(
    adapter: Arc<dyn PersistenceAdapter>,
    mut receiver: mpsc::Receiver<PersistOp>,
    failed: Arc<AtomicU64>,
) {
    while let Some(op) = receiver.recv().await {
        let kind = op.kind();
        let adapter = adapter.clone();
        match tokio::task::spawn_blocking(move || op.apply(adapter.as_ref())).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind, error = %error, "persistence write failed");
            }
            Err(error) => {
                failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind, error = %error, "persistence write panicked");
            }
        }
    }
}
