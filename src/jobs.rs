use crate::models::ImportJob;
use crate::pipeline::{ImportPipeline, JobSummary};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Finished jobs whose final state stays queryable; older ones are evicted.
const FINISHED_JOBS_KEPT: usize = 256;

#[derive(Clone)]
pub struct ImportQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
    counters: Arc<Mutex<QueueStatus>>,
}

struct Job {
    job: ImportJob,
    done: oneshot::Sender<JobState>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        summary: JobSummary,
    },
    Failed {
        error: String,
        stage: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub active: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("import queue is full")]
    Full,
    #[error("import queue worker is not running")]
    Closed,
}

/// Handle on an enqueued job; resolves when the worker is done with it.
pub struct JobTicket {
    pub id: Uuid,
    done: oneshot::Receiver<JobState>,
}

impl JobTicket {
    /// Final state of the job, or `None` if the worker went away first.
    pub async fn finished(self) -> Option<JobState> {
        self.done.await.ok()
    }
}

impl ImportQueue {
    pub fn spawn(pipeline: ImportPipeline, capacity: usize) -> (Self, JoinHandle<()>) {
        Self::spawn_keeping(pipeline, capacity, FINISHED_JOBS_KEPT)
    }

    fn spawn_keeping(
        pipeline: ImportPipeline,
        capacity: usize,
        keep_finished: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let counters = Arc::new(Mutex::new(QueueStatus::default()));
        let statuses_bg = statuses.clone();
        let counters_bg = counters.clone();

        let handle = tokio::spawn(async move {
            let mut finished = VecDeque::new();
            while let Some(Job { job, done }) = rx.recv().await {
                let id = job.id;
                {
                    let mut guard = counters_bg.lock().await;
                    guard.pending = guard.pending.saturating_sub(1);
                    guard.active += 1;
                }
                statuses_bg.lock().await.insert(id, JobState::Running);
                info!(target = "woopl.queue", job = %id, platforms = job.platforms.len(), "job_started");

                let state = match pipeline.run(job).await {
                    Ok(summary) => JobState::Completed { summary },
                    Err(err) => {
                        warn!(
                            target = "woopl.queue",
                            job = %id,
                            kind = ?err.kind(),
                            error = %err,
                            "job_failed"
                        );
                        JobState::Failed {
                            error: err.detail().to_string(),
                            stage: Some(err.stage().to_string()),
                        }
                    }
                };

                {
                    let mut guard = counters_bg.lock().await;
                    guard.active = guard.active.saturating_sub(1);
                    match &state {
                        JobState::Completed { summary } => {
                            if let Some(last) = summary.errors.last() {
                                guard.last_error = Some(last.clone());
                            }
                        }
                        JobState::Failed { error, .. } => guard.last_error = Some(error.clone()),
                        _ => {}
                    }
                }
                {
                    let mut statuses = statuses_bg.lock().await;
                    statuses.insert(id, state.clone());
                    finished.push_back(id);
                    while finished.len() > keep_finished.max(1) {
                        if let Some(evicted) = finished.pop_front() {
                            statuses.remove(&evicted);
                        }
                    }
                }
                let _ = done.send(state);
            }
        });

        (
            Self {
                tx,
                statuses,
                counters,
            },
            handle,
        )
    }

    /// Enqueues without waiting; a full queue is reported, not awaited.
    pub async fn enqueue(&self, job: ImportJob) -> Result<JobTicket, QueueError> {
        let id = job.id;
        let (done_tx, done_rx) = oneshot::channel();
        self.statuses.lock().await.insert(id, JobState::Queued);
        self.counters.lock().await.pending += 1;
        if let Err(err) = self.tx.try_send(Job { job, done: done_tx }) {
            self.statuses.lock().await.remove(&id);
            let mut guard = self.counters.lock().await;
            guard.pending = guard.pending.saturating_sub(1);
            return Err(match err {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            });
        }
        info!(target = "woopl.queue", job = %id, "job_enqueued");
        Ok(JobTicket { id, done: done_rx })
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }

    pub async fn status(&self) -> QueueStatus {
        self.counters.lock().await.clone()
    }
}
