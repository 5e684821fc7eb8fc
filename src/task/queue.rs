//! Per-backend execution queue.
//!
//! Every storage service owns one [`BackendQueue`]. Jobs are taken off the
//! channel by a single consumer loop in FIFO order, and at most `workers`
//! jobs run at once. With the default of one worker, operations against a
//! backend never overlap while different backends proceed in parallel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::Instrument;

/// Default number of concurrent jobs per backend.
pub const DEFAULT_BACKEND_WORKERS: usize = 1;

pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Single-consumer job queue for one backend.
#[derive(Debug, Clone)]
pub struct BackendQueue {
    name: Arc<str>,
    workers: usize,
    tx: mpsc::UnboundedSender<Job>,
}

impl BackendQueue {
    /// Creates the queue and spawns its consumer loop.
    ///
    /// `workers` below one is treated as one. Must be called from within a
    /// Tokio runtime.
    pub fn new(name: &str, workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::debug_span!("backend_queue", backend = name);
        tokio::spawn(consume(rx, Arc::new(Semaphore::new(workers))).instrument(span));
        Self {
            name: Arc::from(name),
            workers,
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Appends a job. Fails with the job if the consumer has stopped.
    pub(crate) fn push(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|e| e.0)
    }
}

async fn consume(mut rx: mpsc::UnboundedReceiver<Job>, slots: Arc<Semaphore>) {
    loop {
        // Take a slot before the next job so jobs start in queue order.
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let Some(job) = rx.recv().await else {
            break;
        };
        tokio::spawn(
            async move {
                job.await;
                drop(permit);
            }
            .in_current_span(),
        );
    }
    tracing::debug!("backend queue closed");
}
