use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::delivery_job::{DeliveryJob, QueueStats};
use crate::services::delivery_service::{DeliveryOutcome, DeliveryWorker};

/// Hands message ids to delivery workers. The message id is the job key: a
/// message already waiting, running or scheduled for retry is not enqueued
/// twice.
#[derive(Clone)]
pub enum DeliveryQueue {
    InProcess(InProcessQueue),
    Postgres(PgDeliveryQueue),
}

impl DeliveryQueue {
    pub fn in_process(concurrency: usize) -> Self {
        DeliveryQueue::InProcess(InProcessQueue::new(concurrency))
    }

    pub fn postgres(pool: PgPool, concurrency: usize, poll_interval: Duration) -> Self {
        DeliveryQueue::Postgres(PgDeliveryQueue {
            pool,
            concurrency: concurrency.max(1),
            poll_interval,
        })
    }

    pub fn backend(&self) -> &'static str {
        match self {
            DeliveryQueue::InProcess(_) => "in_process",
            DeliveryQueue::Postgres(_) => "postgres",
        }
    }

    /// Returns false when a job for this message already exists.
    pub async fn submit(&self, message_id: Uuid) -> Result<bool> {
        let accepted = match self {
            DeliveryQueue::InProcess(q) => q.submit(message_id)?,
            DeliveryQueue::Postgres(q) => q.submit(message_id).await?,
        };
        if !accepted {
            tracing::debug!(%message_id, "delivery job already exists");
        }
        Ok(accepted)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        match self {
            DeliveryQueue::InProcess(q) => q.stats(),
            DeliveryQueue::Postgres(q) => q.stats().await,
        }
    }

    /// Recovers work left behind by a previous process, then starts the
    /// workers. They stop taking jobs once `shutdown` is cancelled; sends
    /// already in flight run to completion.
    pub async fn start(&self, worker: DeliveryWorker, shutdown: CancellationToken) -> Result<TaskTracker> {
        match self {
            DeliveryQueue::InProcess(q) => q.start(worker, shutdown).await,
            DeliveryQueue::Postgres(q) => q.start(worker, shutdown).await,
        }
    }
}

#[derive(Default)]
struct Counters {
    waiting: i64,
    active: i64,
    delayed: i64,
    completed: i64,
    failed: i64,
}

struct InProcessShared {
    sender: mpsc::UnboundedSender<Uuid>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    jobs: Mutex<HashSet<Uuid>>,
    counters: Mutex<Counters>,
    concurrency: usize,
}

/// Channel plus semaphore-bounded worker pool living inside this process.
#[derive(Clone)]
pub struct InProcessQueue {
    shared: Arc<InProcessShared>,
}

impl InProcessQueue {
    pub fn new(concurrency: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(InProcessShared {
                sender,
                receiver: Mutex::new(Some(receiver)),
                jobs: Mutex::new(HashSet::new()),
                counters: Mutex::new(Counters::default()),
                concurrency: concurrency.max(1),
            }),
        }
    }

    fn submit(&self, message_id: Uuid) -> Result<bool> {
        {
            let mut jobs = self.jobs()?;
            if !jobs.insert(message_id) {
                return Ok(false);
            }
        }
        self.counters()?.waiting += 1;
        if self.shared.sender.send(message_id).is_err() {
            self.jobs()?.remove(&message_id);
            self.counters()?.waiting -= 1;
            return Err(Error::Internal("delivery queue is closed".into()));
        }
        Ok(true)
    }

    fn stats(&self) -> Result<QueueStats> {
        let c = self.counters()?;
        Ok(QueueStats {
            waiting: c.waiting,
            active: c.active,
            delayed: c.delayed,
            completed: c.completed,
            failed: c.failed,
        })
    }

    fn jobs(&self) -> Result<std::sync::MutexGuard<'_, HashSet<Uuid>>> {
        self.shared
            .jobs
            .lock()
            .map_err(|_| Error::Internal("delivery queue lock poisoned".into()))
    }

    fn counters(&self) -> Result<std::sync::MutexGuard<'_, Counters>> {
        self.shared
            .counters
            .lock()
            .map_err(|_| Error::Internal("delivery queue lock poisoned".into()))
    }

    async fn start(&self, worker: DeliveryWorker, shutdown: CancellationToken) -> Result<TaskTracker> {
        let mut receiver = self
            .shared
            .receiver
            .lock()
            .map_err(|_| Error::Internal("delivery queue lock poisoned".into()))?
            .take()
            .ok_or_else(|| Error::Internal("delivery queue already started".into()))?;

        let queued = worker.store().queued_message_ids().await?;
        let mut recovered = 0usize;
        for message_id in queued {
            if self.submit(message_id)? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "re-submitted queued messages from a previous run");
        }

        let tracker = TaskTracker::new();
        let semaphore = Arc::new(Semaphore::new(self.shared.concurrency));
        let queue = self.clone();
        let jobs = tracker.clone();

        tracker.spawn(async move {
            tracing::info!(concurrency = queue.shared.concurrency, "in-process delivery workers started");
            loop {
                let message_id = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(id) => id,
                        None => break,
                    },
                };
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let queue = queue.clone();
                let worker = worker.clone();
                let shutdown = shutdown.clone();
                jobs.spawn(async move {
                    let _permit = permit;
                    queue.run_job(&worker, message_id, shutdown).await;
                });
            }
            tracing::info!("in-process delivery workers stopped taking jobs");
        });
        tracker.close();
        Ok(tracker)
    }

    async fn run_job(&self, worker: &DeliveryWorker, message_id: Uuid, shutdown: CancellationToken) {
        self.adjust(|c| {
            c.waiting -= 1;
            c.active += 1;
        });

        let (reschedule, failed) = match worker.deliver(message_id).await {
            Ok(outcome) => {
                tracing::debug!(%message_id, outcome = outcome.label(), "delivery job finished");
                (
                    outcome.reschedule_after(worker.lease()),
                    matches!(outcome, DeliveryOutcome::Failed { .. }),
                )
            }
            Err(err) => {
                tracing::error!(%message_id, error = %err, "delivery job errored, rescheduling");
                (Some(worker.policy().base_delay), false)
            }
        };

        match reschedule {
            Some(delay) => {
                self.adjust(|c| {
                    c.active -= 1;
                    c.delayed += 1;
                });
                let queue = self.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => queue.requeue(message_id),
                    }
                });
            }
            None => {
                if let Ok(mut jobs) = self.jobs() {
                    jobs.remove(&message_id);
                }
                self.adjust(|c| {
                    c.active -= 1;
                    if failed {
                        c.failed += 1;
                    } else {
                        c.completed += 1;
                    }
                });
            }
        }
    }

    fn requeue(&self, message_id: Uuid) {
        self.adjust(|c| {
            c.delayed -= 1;
            c.waiting += 1;
        });
        if self.shared.sender.send(message_id).is_err() {
            tracing::warn!(%message_id, "delivery queue closed before retry");
        }
    }

    fn adjust(&self, f: impl FnOnce(&mut Counters)) {
        if let Ok(mut c) = self.counters() {
            f(&mut c);
        }
    }
}

/// Durable queue on the `delivery_jobs` table; survives restarts and can be
/// shared by several processes.
#[derive(Clone)]
pub struct PgDeliveryQueue {
    pool: PgPool,
    concurrency: usize,
    poll_interval: Duration,
}

impl PgDeliveryQueue {
    async fn submit(&self, message_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO delivery_jobs (message_id)
            VALUES ($1)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let stats = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending' AND run_at <= NOW()),
                COUNT(*) FILTER (WHERE status = 'running'),
                COUNT(*) FILTER (WHERE status = 'pending' AND run_at > NOW()),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM delivery_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueStats {
            waiting: stats.0,
            active: stats.1,
            delayed: stats.2,
            completed: stats.3,
            failed: stats.4,
        })
    }

    /// Jobs a crashed process left `running` go back to `pending`, and queued
    /// messages whose job was lost get a fresh one.
    async fn recover(&self) -> Result<()> {
        let reset = sqlx::query(
            r#"UPDATE delivery_jobs SET status = 'pending', run_at = NOW(), updated_at = NOW() WHERE status = 'running'"#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let restored = sqlx::query(
            r#"
            INSERT INTO delivery_jobs (message_id)
            SELECT id FROM messages WHERE status = 'queued'
            ON CONFLICT (message_id) DO UPDATE
                SET status = 'pending', run_at = NOW(), updated_at = NOW()
                WHERE delivery_jobs.status IN ('completed', 'failed')
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reset > 0 || restored > 0 {
            tracing::info!(reset, restored, "recovered durable delivery jobs");
        }
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<DeliveryJob>> {
        let job = sqlx::query_as::<_, DeliveryJob>(
            r#"
            UPDATE delivery_jobs SET status = 'running', attempts = attempts + 1, updated_at = NOW()
            WHERE message_id = (
                SELECT message_id FROM delivery_jobs
                WHERE status = 'pending' AND run_at <= NOW()
                ORDER BY run_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING message_id, status, attempts, run_at, last_error, created_at, updated_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn reschedule(&self, message_id: Uuid, delay: Duration, error: Option<String>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET status = 'pending',
                run_at = NOW() + make_interval(secs => $2),
                last_error = COALESCE($3, last_error),
                updated_at = NOW()
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(&self, message_id: Uuid, status: &str, error: Option<String>) -> Result<()> {
        sqlx::query(
            r#"UPDATE delivery_jobs SET status = $2, last_error = COALESCE($3, last_error), updated_at = NOW() WHERE message_id = $1"#,
        )
        .bind(message_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Runs at most one job. Returns false when nothing was due.
    pub async fn run_once(&self, worker: &DeliveryWorker) -> Result<bool> {
        let Some(job) = self.claim_next().await? else {
            return Ok(false);
        };
        let message_id = job.message_id;

        match worker.deliver(message_id).await {
            Ok(outcome) => {
                tracing::debug!(%message_id, job_attempt = job.attempts, outcome = outcome.label(), "delivery job finished");
                match (&outcome, outcome.reschedule_after(worker.lease())) {
                    (DeliveryOutcome::Retry { error, .. }, Some(delay)) => {
                        self.reschedule(message_id, delay, Some(error.clone())).await?
                    }
                    (_, Some(delay)) => self.reschedule(message_id, delay, None).await?,
                    (DeliveryOutcome::Failed { error }, None) => {
                        self.finish(message_id, "failed", Some(error.clone())).await?
                    }
                    (_, None) => self.finish(message_id, "completed", None).await?,
                }
            }
            Err(err) => {
                tracing::error!(%message_id, error = %err, "delivery job errored, rescheduling");
                self.reschedule(message_id, worker.policy().base_delay, Some(err.to_string()))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn start(&self, worker: DeliveryWorker, shutdown: CancellationToken) -> Result<TaskTracker> {
        self.recover().await?;

        let tracker = TaskTracker::new();
        for slot in 0..self.concurrency {
            let queue = self.clone();
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tracker.spawn(async move {
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    let idle = match queue.run_once(&worker).await {
                        Ok(true) => None,
                        Ok(false) => Some(queue.poll_interval),
                        Err(e) => {
                            tracing::error!(slot, error = ?e, "durable delivery worker error");
                            Some(Duration::from_secs(1))
                        }
                    };
                    if let Some(idle) = idle {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(idle) => {}
                        }
                    }
                }
            });
        }
        tracker.close();
        tracing::info!(concurrency = self.concurrency, "durable delivery workers started");
        Ok(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_process_submit_deduplicates_by_message_id() {
        let queue = DeliveryQueue::in_process(2);
        let id = Uuid::new_v4();
        let DeliveryQueue::InProcess(inner) = &queue else {
            unreachable!()
        };
        assert!(inner.submit(id).unwrap());
        assert!(!inner.submit(id).unwrap());
        assert!(inner.submit(Uuid::new_v4()).unwrap());
        assert_eq!(inner.stats().unwrap().waiting, 2);
    }
}
