//! Worker runtime: weighted dequeue, per-task timeout, bounded retry.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SqliteWorkQueue;
use crate::config::QueueWeights;
use crate::database::models::TaskDbModel;
use crate::tier::PriorityClass;
use crate::Result;

/// Consumer registered for one task type.
///
/// `handle` must be cancel-safe: the runtime drops the future on timeout
/// and cancels the token, and subprocesses must die with it.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;
    async fn handle(&self, payload: serde_json::Value, cancel: CancellationToken) -> Result<()>;
    /// Called once when the task's retry budget is exhausted.
    async fn on_exhausted(&self, _payload: serde_json::Value) {}
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct QueueRuntimeConfig {
    /// Concurrent workers.
    pub concurrency: usize,
    /// Worker-time weighting across queue classes.
    pub weights: QueueWeights,
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Lease reaper interval in seconds.
    pub reaper_interval_secs: u64,
    /// Base delay for retry backoff in seconds (doubles per attempt).
    pub retry_base_delay_secs: u64,
}

impl Default for QueueRuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            weights: QueueWeights::default(),
            poll_interval_ms: 500,
            reaper_interval_secs: 30,
            retry_base_delay_secs: 2,
        }
    }
}

/// Build the weighted pick cycle, e.g. 6:3:1 ->
/// `[critical x6, default x3, low x1]`.
fn weight_cycle(weights: &QueueWeights) -> Vec<PriorityClass> {
    let mut cycle = Vec::with_capacity((weights.critical + weights.default + weights.low) as usize);
    cycle.extend(std::iter::repeat_n(PriorityClass::Critical, weights.critical as usize));
    cycle.extend(std::iter::repeat_n(PriorityClass::Default, weights.default as usize));
    cycle.extend(std::iter::repeat_n(PriorityClass::Low, weights.low as usize));
    if cycle.is_empty() {
        cycle.push(PriorityClass::Default);
    }
    cycle
}

/// Worker pool consuming the durable queue.
pub struct QueueRuntime {
    queue: Arc<SqliteWorkQueue>,
    config: QueueRuntimeConfig,
    cancel: CancellationToken,
    workers: parking_lot::Mutex<Option<JoinSet<()>>>,
    cycle: Arc<Vec<PriorityClass>>,
    cycle_pos: Arc<AtomicUsize>,
}

impl QueueRuntime {
    pub fn new(queue: Arc<SqliteWorkQueue>, config: QueueRuntimeConfig) -> Self {
        let cycle = Arc::new(weight_cycle(&config.weights));
        Self {
            queue,
            config,
            cancel: CancellationToken::new(),
            workers: parking_lot::Mutex::new(Some(JoinSet::new())),
            cycle,
            cycle_pos: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the workers and the lease reaper.
    pub fn start(&self, handlers: Vec<Arc<dyn TaskHandler>>) {
        let handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>> = Arc::new(
            handlers
                .into_iter()
                .map(|h| (h.task_type().to_string(), h))
                .collect(),
        );

        info!(
            "Starting queue runtime with {} workers (weights {}:{}:{})",
            self.config.concurrency,
            self.config.weights.critical,
            self.config.weights.default,
            self.config.weights.low
        );

        let mut workers = self.workers.lock();
        let Some(join_set) = workers.as_mut() else {
            warn!("Queue runtime already stopped");
            return;
        };

        for i in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let handlers = handlers.clone();
            let cancel = self.cancel.clone();
            let notifier = queue.notifier();
            let cycle = self.cycle.clone();
            let cycle_pos = self.cycle_pos.clone();
            let config = self.config.clone();

            join_set.spawn(async move {
                debug!("Worker {} started", i);
                let poll_interval = Duration::from_millis(config.poll_interval_ms);

                loop {
                    if cancel.is_cancelled() {
                        debug!("Worker {} shutting down", i);
                        break;
                    }

                    // Drain everything currently available, then wait for a
                    // wake-up or the poll tick.
                    loop {
                        let task = match claim_weighted(&queue, &cycle, &cycle_pos).await {
                            Ok(Some(task)) => task,
                            Ok(None) => break,
                            Err(e) => {
                                error!("Error dequeuing task: {}", e);
                                break;
                            }
                        };
                        run_task(&queue, &handlers, &config, task).await;
                        if cancel.is_cancelled() {
                            break;
                        }
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = notifier.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            });
        }

        // Lease reaper: redeliver tasks whose worker died.
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        let reaper_interval = Duration::from_secs(self.config.reaper_interval_secs);
        join_set.spawn(async move {
            let mut ticker = tokio::time::interval(reaper_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match queue.tasks().requeue_expired_leases(Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => warn!("Requeued {} tasks with expired leases", n),
                            Err(e) => error!("Lease reaper failed: {}", e),
                        }
                    }
                }
            }
        });
    }

    /// Stop accepting work and drain in-flight tasks.
    pub async fn stop(&self) {
        info!("Stopping queue runtime");
        self.cancel.cancel();

        let join_set = {
            let mut workers = self.workers.lock();
            workers.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
        info!("Queue runtime stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Pick a queue by the weighted cycle, falling through in priority order
/// when the picked queue is empty.
async fn claim_weighted(
    queue: &SqliteWorkQueue,
    cycle: &[PriorityClass],
    cycle_pos: &AtomicUsize,
) -> Result<Option<TaskDbModel>> {
    let pos = cycle_pos.fetch_add(1, Ordering::Relaxed) % cycle.len();
    let first = cycle[pos];

    let mut order = vec![first];
    for class in [
        PriorityClass::Critical,
        PriorityClass::Default,
        PriorityClass::Low,
    ] {
        if class != first {
            order.push(class);
        }
    }

    let now = Utc::now();
    for class in order {
        if let Some(task) = queue.tasks().claim_next(class.as_str(), now).await? {
            return Ok(Some(task));
        }
    }
    Ok(None)
}

async fn run_task(
    queue: &SqliteWorkQueue,
    handlers: &HashMap<String, Arc<dyn TaskHandler>>,
    config: &QueueRuntimeConfig,
    task: TaskDbModel,
) {
    let payload: serde_json::Value = serde_json::from_str(&task.payload).unwrap_or_default();

    let Some(handler) = handlers.get(&task.task_type) else {
        warn!("No handler registered for task type: {}", task.task_type);
        let _ = queue.tasks().mark_dead(&task.id, Utc::now()).await;
        return;
    };

    debug!(
        task_id = %task.id,
        task_type = %task.task_type,
        attempt = task.attempt,
        "Processing task"
    );

    let task_cancel = CancellationToken::new();
    let timeout = Duration::from_secs(task.timeout_secs.max(1) as u64);
    let outcome = tokio::time::timeout(timeout, handler.handle(payload.clone(), task_cancel.clone())).await;

    let failure = match outcome {
        Ok(Ok(())) => {
            if let Err(e) = queue.tasks().mark_done(&task.id, Utc::now()).await {
                error!("Failed to mark task {} done: {}", task.id, e);
            }
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => {
            // The handler future is already dropped; the token tells any
            // survivors (spawned pumps) to wind down.
            task_cancel.cancel();
            "task timed out".to_string()
        }
    };

    if task.retries_exhausted() {
        warn!(
            task_id = %task.id,
            attempt = task.attempt,
            "Task failed with retries exhausted: {}",
            failure
        );
        if let Err(e) = queue.tasks().mark_dead(&task.id, Utc::now()).await {
            error!("Failed to mark task {} dead: {}", task.id, e);
        }
        handler.on_exhausted(payload).await;
    } else {
        let shift = ((task.attempt.max(1) - 1) as u32).min(8);
        let backoff_secs = (config.retry_base_delay_secs << shift).min(300);
        let available_at = Utc::now() + ChronoDuration::seconds(backoff_secs as i64);
        warn!(
            task_id = %task.id,
            attempt = task.attempt,
            backoff_secs,
            "Task failed, requeueing: {}",
            failure
        );
        if let Err(e) = queue
            .tasks()
            .requeue_for_retry(&task.id, available_at, Utc::now())
            .await
        {
            error!("Failed to requeue task {}: {}", task.id, e);
        }
    }
}
