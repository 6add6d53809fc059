//! Bounded background queue for batch enrichment
//!
//! N worker tasks share one bounded channel. Submitting never blocks: a full
//! queue is reported to the caller. `shutdown` stops intake, lets the workers
//! drain what is queued, and reports how many jobs completed or failed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{BatchJob, Pipeline};
use crate::core::schema::CaptioningStatus;
use crate::embedding::SqliteStore;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("enrichment queue is full")]
    Full,
    #[error("enrichment queue is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: usize,
    pub failed: usize,
}

/// Whatever executes a dequeued batch
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: BatchJob) -> Result<()>;
}

/// Runs batches through a [`Pipeline`], each on its own storage session
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    store: SqliteStore,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<Pipeline>, store: SqliteStore) -> Self {
        Self { pipeline, store }
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    async fn run(&self, job: BatchJob) -> Result<()> {
        let session = match self.store.session() {
            Ok(session) => session,
            Err(e) => {
                // The batch never starts; settle the status through the runner's own connection
                if let Err(status_err) = self.store.set_captioning_status(&job.subject_id, CaptioningStatus::Failed) {
                    error!(subject_id = %job.subject_id, error = %status_err, "could not record failure");
                }
                return Err(e);
            }
        };
        self.pipeline.process_batch(&session, &job).await?;
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

pub struct EnrichmentQueue {
    sender: mpsc::Sender<BatchJob>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl EnrichmentQueue {
    /// Spawn `workers` tasks on the current runtime
    pub fn start(workers: usize, capacity: usize, runner: Arc<dyn JobRunner>) -> Self {
        let (sender, receiver) = mpsc::channel::<BatchJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let runner = Arc::clone(&runner);
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    loop {
                        // Lock only for the receive so other workers can pick up jobs
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };

                        let subject_id = job.subject_id.clone();
                        debug!(worker_id, subject_id = %subject_id, "job started");
                        match runner.run(job).await {
                            Ok(()) => {
                                counters.completed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                error!(worker_id, subject_id = %subject_id, error = %e, "background job failed");
                            }
                        }
                    }
                    debug!(worker_id, "worker stopped");
                })
            })
            .collect();

        Self {
            sender,
            workers,
            counters,
        }
    }

    pub fn submit(&self, job: BatchJob) -> Result<(), QueueError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Close intake, wait for queued jobs to drain, and report the totals
    pub async fn shutdown(self) -> QueueStats {
        let Self {
            sender,
            workers,
            counters,
        } = self;
        drop(sender);

        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }

        QueueStats {
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Duration;

    struct ScriptedRunner {
        delay: Duration,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run(&self, job: BatchJob) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.seen.fetch_add(1, Ordering::SeqCst);
            if job.subject_id.starts_with("bad") {
                bail!("storage unavailable");
            }
            Ok(())
        }
    }

    fn job(subject_id: &str) -> BatchJob {
        BatchJob {
            subject_id: subject_id.to_string(),
            photos: Vec::new(),
            refresh_embedding: false,
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_counts() {
        let runner = Arc::new(ScriptedRunner {
            delay: Duration::from_millis(5),
            seen: AtomicUsize::new(0),
        });
        let queue = EnrichmentQueue::start(2, 8, runner.clone());

        for subject in ["u1", "bad-1", "u2", "u3"] {
            queue.submit(job(subject)).unwrap();
        }
        let stats = queue.shutdown().await;

        assert_eq!(stats, QueueStats { completed: 3, failed: 1 });
        assert_eq!(runner.seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let runner = Arc::new(ScriptedRunner {
            delay: Duration::from_secs(3600),
            seen: AtomicUsize::new(0),
        });
        let queue = EnrichmentQueue::start(1, 1, runner);

        // The worker holds at most one job; the channel holds one more
        let mut rejected = 0;
        for i in 0..4 {
            if queue.submit(job(&format!("u{}", i))) == Err(QueueError::Full) {
                rejected += 1;
            }
        }
        assert!(rejected >= 2);
    }

    #[tokio::test]
    async fn test_unopenable_session_marks_failed() -> Result<()> {
        use crate::core::config::Settings;
        use crate::services::Services;

        let dir = tempfile::TempDir::new()?;
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir)?;
        let store = SqliteStore::open(&data_dir.join("affinity.db"))?;
        store.set_captioning_status("u1", CaptioningStatus::Processing)?;

        let settings = Settings::default();
        let pipeline = Pipeline::from_settings(&settings, Services::from_settings(&settings), dir.path());
        let runner = PipelineRunner::new(Arc::new(pipeline), store);

        // New sessions can no longer open the database file
        std::fs::remove_dir_all(&data_dir)?;

        assert!(runner.run(job("u1")).await.is_err());
        assert_eq!(
            runner.store.get_captioning_status("u1")?,
            Some(CaptioningStatus::Failed)
        );
        Ok(())
    }
}
