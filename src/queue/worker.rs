//! Queue worker pool
//!
//! Workers drain the queues round-robin, handing each claimed job to a
//! [`JobHandler`]. A separate maintenance loop promotes due scheduled jobs
//! and requeues expired leases for every queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{redelivery_delay, ClaimedJob, Job, Queue, ALL_QUEUES};
use crate::error::{Error, HeraldErrorTrait};

/// How often an idle worker polls for work
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often the maintenance loop runs
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Jobs moved per maintenance pass per queue
const MAINTENANCE_BATCH: usize = 100;

/// Processes claimed jobs
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Handle one job. A recoverable error redelivers the job with
    /// backoff; any other error parks it.
    async fn handle(&self, job: &Job) -> Result<(), Error>;

    /// Called once when a job runs out of delivery attempts
    async fn on_exhausted(&self, job: &Job, error: &Error) {
        tracing::error!(
            job_id = %job.id,
            kind = job.kind(),
            error = %error,
            "Job exhausted its delivery attempts"
        );
    }
}

/// Pool of queue workers plus the maintenance loop
pub struct WorkerPool {
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: Queue, handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawn the workers and the maintenance loop
    pub fn start(&mut self) {
        for worker_id in 0..self.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let shutdown = self.shutdown_tx.subscribe();

            self.handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, handler, shutdown).await;
            }));
        }

        let queue = self.queue.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            maintenance_loop(queue, shutdown).await;
        }));

        tracing::info!(workers = self.concurrency, "Worker pool started");
    }

    /// Signal all loops to stop and wait for in-flight jobs to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }

        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut handled_any = false;
        for queue_name in ALL_QUEUES {
            match queue.dequeue(queue_name).await {
                Ok(Some(claimed)) => {
                    handled_any = true;
                    process(&queue, handler.as_ref(), claimed).await;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(worker_id, queue = queue_name, error = %err, "Dequeue failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        if !handled_any {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}

async fn process(queue: &Queue, handler: &dyn JobHandler, claimed: ClaimedJob) {
    let job = claimed.job.clone();

    match handler.handle(&job).await {
        Ok(()) => {
            if let Err(err) = queue.ack(&claimed).await {
                tracing::error!(job_id = %job.id, error = %err, "Failed to ack job");
            }
        }
        Err(err) if err.is_recoverable() => {
            let delay = redelivery_delay(job.attempt);
            tracing::warn!(
                job_id = %job.id,
                kind = job.kind(),
                attempt = job.attempt,
                delay_secs = delay.num_seconds(),
                error = %err,
                "Job failed, scheduling redelivery"
            );

            match queue.nack(&claimed, delay).await {
                Ok(false) => handler.on_exhausted(&job, &err).await,
                Ok(true) => {}
                Err(nack_err) => {
                    tracing::error!(job_id = %job.id, error = %nack_err, "Failed to nack job");
                }
            }
        }
        Err(err) => {
            handler.on_exhausted(&job, &err).await;
            if let Err(park_err) = queue.park(&job).await {
                tracing::error!(job_id = %job.id, error = %park_err, "Failed to park job");
            }
            if let Err(ack_err) = queue.ack(&claimed).await {
                tracing::error!(job_id = %job.id, error = %ack_err, "Failed to ack parked job");
            }
        }
    }
}

async fn maintenance_loop(queue: Queue, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        for queue_name in ALL_QUEUES {
            if let Err(err) = queue.promote_due(queue_name, MAINTENANCE_BATCH).await {
                tracing::error!(queue = queue_name, error = %err, "Promotion pass failed");
            }
            if let Err(err) = queue.reclaim_expired(queue_name, MAINTENANCE_BATCH).await {
                tracing::error!(queue = queue_name, error = %err, "Lease reclaim pass failed");
            }
        }
    }

    tracing::debug!("Maintenance loop stopped");
}
