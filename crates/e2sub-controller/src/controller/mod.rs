// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Controller runtime.
//!
//! A [`Controller`] owns a set of [`Watcher`]s and one [`Reconciler`].
//! Watchers push keys into a shared channel; an intake task moves them into
//! a deduplicating [`WorkQueue`]; a fixed pool of workers pops keys and
//! reconciles them.
//!
//! # Retry Policy
//!
//! | Outcome | Action |
//! |---------|--------|
//! | `Ok(Done)` | failure count reset, key settled until the next event |
//! | `Ok(Requeue)` | requeued with backoff |
//! | `Ok(RequeueAfter(d))` | failure count reset, requeued after `d` |
//! | `Err(_)` or deadline exceeded | requeued with backoff, retried indefinitely |

pub mod backoff;
pub mod queue;
pub mod watch;

pub use backoff::Backoff;
pub use queue::WorkQueue;
pub use watch::{StoreWatcher, WatchSlot, Watcher};

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::error::{ControllerError, ReconcileError};

/// Capacity of the channel between watchers and the queue.
pub const KEY_BUFFER: usize = 100;

/// A value identifying one entity to reconcile.
pub trait ReconcileKey:
    Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

impl<K> ReconcileKey for K where
    K: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

/// What to do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileResult {
    /// Converged; wait for the next event.
    #[default]
    Done,
    /// Run again with backoff.
    Requeue,
    /// Run again after a fixed delay.
    RequeueAfter(Duration),
}

/// Drives the state of one entity towards its desired state.
///
/// Implementations read current state on every call, so running the same
/// key again (or after missed events) always converges.
#[async_trait]
pub trait Reconciler<K>: Send + Sync {
    /// Reconcile one key.
    async fn reconcile(&self, key: &K) -> Result<ReconcileResult, ReconcileError>;
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of reconcile workers.
    pub workers: usize,
    /// Deadline for one reconcile pass.
    pub reconcile_timeout: Duration,
    /// Retry delays for failed passes.
    pub backoff: Backoff,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            reconcile_timeout: Duration::from_secs(30),
            backoff: Backoff::default(),
        }
    }
}

/// Run one store call under its own deadline.
pub async fn bounded<T, E, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, E>>,
    ReconcileError: From<E>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(ReconcileError::from),
        Err(_) => Err(ReconcileError::Timeout { operation, timeout }),
    }
}

struct RunningController<K> {
    queue: Arc<WorkQueue<K>>,
    intake: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Watchers, a work queue and a worker pool around one reconciler.
pub struct Controller<K> {
    name: String,
    watchers: Vec<Arc<dyn Watcher<K>>>,
    reconciler: Arc<dyn Reconciler<K>>,
    config: ControllerConfig,
    span: Span,
    running: Mutex<Option<RunningController<K>>>,
}

impl<K: ReconcileKey> Controller<K> {
    /// Create a stopped controller.
    pub fn new(
        name: impl Into<String>,
        watchers: Vec<Arc<dyn Watcher<K>>>,
        reconciler: Arc<dyn Reconciler<K>>,
        config: ControllerConfig,
    ) -> Self {
        let name = name.into();
        let span = info_span!("controller", name = %name);
        Self {
            name,
            watchers,
            reconciler,
            config,
            span,
            running: Mutex::new(None),
        }
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start every watcher, then the intake task and the worker pool.
    ///
    /// If any watcher fails to start, the ones already started are stopped
    /// and the error is returned.
    pub async fn start(&self) -> Result<(), ControllerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ControllerError::AlreadyRunning(self.name.clone()));
        }

        let queue = Arc::new(WorkQueue::new(self.config.backoff));
        let (tx, rx) = mpsc::channel(KEY_BUFFER);

        for watcher in &self.watchers {
            if let Err(source) = watcher.start(tx.clone()).await {
                error!(
                    parent: &self.span,
                    watcher = watcher.name(),
                    error = %source,
                    "Failed to start watcher"
                );
                for started in &self.watchers {
                    started.stop().await;
                }
                return Err(ControllerError::Watch {
                    controller: self.name.clone(),
                    source,
                });
            }
        }
        // The intake loop ends once every watcher has dropped its sender.
        drop(tx);

        let intake = tokio::spawn(run_intake(rx, queue.clone()).instrument(self.span.clone()));

        let workers = (0..self.config.workers.max(1))
            .map(|worker| {
                tokio::spawn(
                    run_worker(
                        worker,
                        queue.clone(),
                        self.reconciler.clone(),
                        self.config.reconcile_timeout,
                    )
                    .instrument(self.span.clone()),
                )
            })
            .collect();

        info!(
            parent: &self.span,
            watchers = self.watchers.len(),
            workers = self.config.workers.max(1),
            reconcile_timeout_secs = self.config.reconcile_timeout.as_secs(),
            "Controller started"
        );

        *running = Some(RunningController {
            queue,
            intake,
            workers,
        });
        Ok(())
    }

    /// Stop the watchers, drain the queue and wait for every worker.
    ///
    /// Safe to call more than once or on a controller that never started.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        info!(parent: &self.span, "Controller stopping...");

        for watcher in &self.watchers {
            watcher.stop().await;
        }

        if let Err(e) = running.intake.await {
            error!(parent: &self.span, "Intake task panicked: {}", e);
        }

        running.queue.shut_down().await;
        for handle in running.workers {
            if let Err(e) = handle.await {
                error!(parent: &self.span, "Worker task panicked: {}", e);
            }
        }

        info!(parent: &self.span, "Controller stopped");
    }

    /// Whether the controller has been started and not stopped.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn run_intake<K: ReconcileKey>(mut rx: mpsc::Receiver<K>, queue: Arc<WorkQueue<K>>) {
    while let Some(key) = rx.recv().await {
        queue.add(key).await;
    }
    debug!("All watchers closed");
}

async fn run_worker<K: ReconcileKey>(
    worker: usize,
    queue: Arc<WorkQueue<K>>,
    reconciler: Arc<dyn Reconciler<K>>,
    timeout: Duration,
) {
    debug!(worker, "Worker started");

    while let Some(key) = queue.get().await {
        let outcome = match tokio::time::timeout(timeout, reconciler.reconcile(&key)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReconcileError::Timeout {
                operation: "reconcile",
                timeout,
            }),
        };

        match outcome {
            Ok(ReconcileResult::Done) => {
                queue.forget(&key).await;
                debug!(worker, key = %key, "Reconciled");
            }
            Ok(ReconcileResult::Requeue) => {
                let delay = queue.add_rate_limited(key.clone()).await;
                debug!(worker, key = %key, retry_in_ms = delay.as_millis() as u64, "Requeued");
            }
            Ok(ReconcileResult::RequeueAfter(delay)) => {
                queue.forget(&key).await;
                queue.add_after(key.clone(), delay);
                debug!(worker, key = %key, retry_in_ms = delay.as_millis() as u64, "Requeued");
            }
            Err(e) => {
                let delay = queue.add_rate_limited(key.clone()).await;
                warn!(
                    worker,
                    key = %key,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile failed"
                );
            }
        }

        queue.done(&key).await;
    }

    debug!(worker, "Worker stopped");
}
