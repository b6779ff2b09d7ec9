//! Keyed work queue
//!
//! Bounded-concurrency task runner shared by the query scheduler and the result writer.
//!
//! - Jobs are keyed. A job enqueued while another job with the same key is still pending
//!   replaces it. A job whose key is in flight waits until that run completes, so
//!   processing per key is strictly sequential.
//! - `wait_till_drained` resolves immediately if nothing was ever enqueued, otherwise
//!   once the queue is empty and idle.
//! - The first failing job stops the queue: pending jobs are dropped and every drain
//!   waiter receives that error. A panicking handler counts as a failure.

use crate::error::BuildError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Something that can be deduplicated by key
pub trait Keyed {
    fn key(&self) -> String;
}

/// Processes one job
#[async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    async fn handle(&self, job: J) -> Result<(), BuildError>;
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of pending jobs
    pub pending: usize,
    /// Number of jobs currently being processed
    pub processing: usize,
    /// Number of completed jobs
    pub completed: usize,
    /// Number of failed jobs
    pub failed: usize,
    /// Pending jobs replaced by a newer job with the same key
    pub superseded: usize,
    /// Jobs dropped because an earlier job failed
    pub dropped: usize,
}

struct QueueState<J> {
    order: VecDeque<String>,
    jobs: HashMap<String, J>,
    in_flight: HashSet<String>,
    ever_enqueued: bool,
    error: Option<BuildError>,
    stats: QueueStats,
}

impl<J> QueueState<J> {
    fn is_idle(&self) -> bool {
        self.order.is_empty() && self.in_flight.is_empty()
    }

    /// Take the first pending job whose key is not in flight
    fn next_ready(&mut self) -> Option<(String, J)> {
        let position = self
            .order
            .iter()
            .position(|key| !self.in_flight.contains(key))?;
        let key = self.order.remove(position)?;
        let job = self.jobs.remove(&key)?;
        self.in_flight.insert(key.clone());
        self.stats.pending = self.stats.pending.saturating_sub(1);
        self.stats.processing += 1;
        Some((key, job))
    }
}

struct Shared<J> {
    name: &'static str,
    state: Mutex<QueueState<J>>,
    notify: Notify,
    drained: watch::Sender<u64>,
    running: RwLock<bool>,
}

impl<J> Shared<J> {
    fn signal_drained(&self) {
        self.drained.send_modify(|epoch| *epoch += 1);
    }
}

pub struct KeyedQueue<J> {
    shared: Arc<Shared<J>>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<J: Keyed + Send + 'static> KeyedQueue<J> {
    /// Create the queue and start `concurrency` worker tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<H: JobHandler<J>>(name: &'static str, handler: Arc<H>, concurrency: usize) -> Self {
        let (drained, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            name,
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                jobs: HashMap::new(),
                in_flight: HashSet::new(),
                ever_enqueued: false,
                error: None,
                stats: QueueStats::default(),
            }),
            notify: Notify::new(),
            drained,
            running: RwLock::new(true),
        });

        let workers = (0..concurrency.max(1))
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    Self::worker_loop(worker_id, shared, handler).await;
                })
            })
            .collect::<Vec<_>>();

        info!(queue = name, worker_count = workers.len(), "Started queue workers");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Add a job; a pending job with the same key is replaced
    pub fn enqueue(&self, job: J) {
        let key = job.key();
        {
            let mut state = self.shared.state.lock();
            state.ever_enqueued = true;
            if state.jobs.insert(key.clone(), job).is_some() {
                state.stats.superseded += 1;
                debug!(queue = self.shared.name, key = %key, "Superseded pending job");
            } else {
                state.order.push_back(key.clone());
                state.stats.pending += 1;
            }
        }
        self.shared.notify.notify_one();
    }

    pub fn enqueue_all(&self, jobs: impl IntoIterator<Item = J>) {
        for job in jobs {
            self.enqueue(job);
        }
    }

    /// Wait until every enqueued job has been processed
    pub async fn wait_till_drained(&self) -> Result<(), BuildError> {
        let mut drained = self.shared.drained.subscribe();
        loop {
            {
                let state = self.shared.state.lock();
                if !state.ever_enqueued {
                    return Ok(());
                }
                if state.is_idle() {
                    return match &state.error {
                        Some(err) => Err(err.clone()),
                        None => Ok(()),
                    };
                }
            }
            if drained.changed().await.is_err() {
                return Err(BuildError::Protocol(format!(
                    "{} queue closed while draining",
                    self.shared.name
                )));
            }
        }
    }

    /// Clear a recorded failure so the queue accepts a new batch
    pub fn clear_error(&self) -> Option<BuildError> {
        self.shared.state.lock().error.take()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.state.lock().stats.clone()
    }

    /// Stop worker tasks after their current job
    pub async fn stop(&self) {
        {
            let mut running = self.shared.running.write();
            if !*running {
                return;
            }
            *running = false;
        }
        self.shared.notify.notify_waiters();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
        info!(queue = self.shared.name, "Stopped queue workers");
    }

    async fn worker_loop<H: JobHandler<J>>(worker_id: usize, shared: Arc<Shared<J>>, handler: Arc<H>) {
        debug!(queue = shared.name, worker_id, "Worker started");

        while *shared.running.read() {
            let next = shared.state.lock().next_ready();

            let Some((key, job)) = next else {
                // Woken by a new job or a finished key; the timeout re-checks `running`
                // and keys that became ready while we were not waiting.
                tokio::select! {
                    _ = shared.notify.notified() => continue,
                    _ = sleep(Duration::from_millis(100)) => continue,
                }
            };

            let started = Instant::now();
            let task_handler = Arc::clone(&handler);
            let result = match tokio::spawn(async move { task_handler.handle(job).await }).await {
                Ok(result) => result,
                Err(join_err) => Err(BuildError::JobPanicked {
                    queue: shared.name.to_string(),
                    key: key.clone(),
                    message: join_err.to_string(),
                }),
            };

            let idle = {
                let mut state = shared.state.lock();
                state.in_flight.remove(&key);
                state.stats.processing = state.stats.processing.saturating_sub(1);
                match result {
                    Ok(()) => state.stats.completed += 1,
                    Err(err) => {
                        state.stats.failed += 1;
                        error!(
                            queue = shared.name,
                            worker_id,
                            key = %key,
                            error = %err,
                            "Job failed, dropping pending jobs"
                        );
                        let dropped = state.order.len();
                        state.order.clear();
                        state.jobs.clear();
                        state.stats.pending = 0;
                        state.stats.dropped += dropped;
                        if state.error.is_none() {
                            state.error = Some(err);
                        }
                    }
                }
                state.is_idle()
            };
            debug!(
                queue = shared.name,
                worker_id,
                key = %key,
                duration_ms = started.elapsed().as_millis() as u64,
                "Job finished"
            );

            // a job for this key may have been waiting on it
            shared.notify.notify_waiters();
            if idle {
                shared.signal_drained();
            }
        }

        debug!(queue = shared.name, worker_id, "Worker stopped");
    }
}

impl<J> Drop for KeyedQueue<J> {
    fn drop(&mut self) {
        *self.shared.running.write() = false;
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }
}
