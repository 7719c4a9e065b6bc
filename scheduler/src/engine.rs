// Scheduler engine: repeating poll loop that evaluates every trigger
// against the wall clock and fires the due ones

use crate::config::SchedulerSettings;
use crate::models::{local_now, DirectDispatch, Dispatch, TriggerCollection, TriggerItem};
use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default pause between trigger evaluation passes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Configuration for the scheduler engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between trigger evaluation passes, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl From<&SchedulerSettings> for EngineConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            poll_interval_ms: settings.poll_interval_ms,
        }
    }
}

/// Poll-driven trigger scheduler.
///
/// Owns one [`TriggerCollection`] behind a mutex: collection mutation and
/// evaluation passes are serialized by the same lock. While enabled, a
/// single poll task sleeps the configured interval, evaluates every item in
/// insertion order, then sleeps again — a pass is never overlapped by the
/// next one, however slow a fire callback is. Each item's own enabled flag
/// is independent of the engine's.
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
    poll_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner {
    triggers: Mutex<TriggerCollection>,
    interval_tx: watch::Sender<u64>,
    enabled: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    dispatch: Arc<dyn Dispatch>,
}

impl EngineInner {
    async fn run_tick(&self, now: NaiveDateTime) -> usize {
        let mut triggers = self.triggers.lock().await;
        let mut fired = 0usize;
        for item in triggers.iter_mut() {
            match item.run_check_via(now, self.dispatch.as_ref()) {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    // One failing callback must not suspend evaluation of
                    // the remaining items in this pass.
                    warn!(error = %e, "trigger callback failed");
                    fired += 1;
                }
            }
        }
        if fired > 0 {
            info!(fired, "trigger evaluation pass complete");
        } else {
            debug!("no triggers due");
        }
        fired
    }
}

impl SchedulerEngine {
    /// Create a stopped engine with an empty collection and the inline
    /// dispatcher.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_dispatch(config, Arc::new(DirectDispatch))
    }

    /// Create a stopped engine routing fire callbacks through `dispatch`.
    pub fn with_dispatch(config: EngineConfig, dispatch: Arc<dyn Dispatch>) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        let (interval_tx, _interval_rx) = watch::channel(config.poll_interval_ms);

        Self {
            inner: Arc::new(EngineInner {
                triggers: Mutex::new(TriggerCollection::new()),
                interval_tx,
                enabled: AtomicBool::new(false),
                shutdown_tx,
                dispatch,
            }),
            poll_task: std::sync::Mutex::new(None),
        }
    }

    /// Append a trigger to the collection. Insertion order is evaluation
    /// order.
    pub async fn add_trigger(&self, item: TriggerItem) {
        self.inner.triggers.lock().await.add(item);
    }

    /// Guarded access to the trigger collection. Holding the guard blocks
    /// the poll loop, so mutations never race an evaluation pass.
    pub async fn triggers(&self) -> MutexGuard<'_, TriggerCollection> {
        self.inner.triggers.lock().await
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Start or stop the poll loop. Enabling must happen inside a Tokio
    /// runtime; disabling lets an in-flight evaluation pass complete and
    /// only prevents the next one from starting.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            if self.inner.enabled.swap(true, Ordering::SeqCst) {
                return;
            }
            let inner = Arc::clone(&self.inner);
            let mut shutdown_rx = inner.shutdown_tx.subscribe();
            let mut interval_rx = inner.interval_tx.subscribe();
            let task = tokio::spawn(async move {
                info!(interval_ms = *interval_rx.borrow(), "scheduler engine started");
                loop {
                    let interval = Duration::from_millis((*interval_rx.borrow()).max(1));
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            if !inner.enabled.load(Ordering::SeqCst) {
                                break;
                            }
                            inner.run_tick(local_now()).await;
                        }
                        _ = interval_rx.changed() => {
                            debug!(
                                interval_ms = *interval_rx.borrow(),
                                "poll interval changed, timer restarted"
                            );
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                info!("scheduler engine stopped");
            });
            *self
                .poll_task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        } else {
            if !self.inner.enabled.swap(false, Ordering::SeqCst) {
                return;
            }
            let _ = self.inner.shutdown_tx.send(());
            // The poll task exits on its own after any in-flight pass.
            self.poll_task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
        }
    }

    pub fn interval_ms(&self) -> u64 {
        *self.inner.interval_tx.borrow()
    }

    /// Change the poll cadence. While running, the current sleep is
    /// abandoned and restarted at the new interval; no phase is preserved.
    pub fn set_interval_ms(&self, interval_ms: u64) {
        self.inner.interval_tx.send_replace(interval_ms);
    }

    /// Run one evaluation pass against `now` immediately, outside the
    /// timer. Returns the number of triggers that fired.
    pub async fn run_tick(&self, now: NaiveDateTime) -> usize {
        self.inner.run_tick(now).await
    }
}

impl Default for SchedulerEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for SchedulerEngine {
    fn drop(&mut self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(());
    }
}
