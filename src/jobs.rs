use crate::{
    models::{AnalysisRequest, ApiError},
    pipeline::Pipeline,
    security::AuthContext,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    request: AnalysisRequest,
    context: AuthContext,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        result: crate::models::AnalysisResponse,
    },
    Failed {
        error: String,
        stage: Option<String>,
    },
}

impl JobState {
    fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Clone)]
struct JobEntry {
    state: JobState,
    updated_at: Instant,
}

impl JobEntry {
    fn now(state: JobState) -> Self {
        Self {
            state,
            updated_at: Instant::now(),
        }
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

/// How long finished jobs stay pollable, and how many are retained at once.
/// Active jobs are never evicted.
struct Retention {
    keep_for: Duration,
    max_finished: usize,
}

impl Retention {
    fn from_env() -> Self {
        let keep_secs = std::env::var("JOB_RETENTION_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(3600);
        let max_finished = std::env::var("JOB_HISTORY_MAX")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(256);
        Self {
            keep_for: Duration::from_secs(keep_secs),
            max_finished,
        }
    }
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();
        let shutdown = CancellationToken::new();
        let shutdown_bg = shutdown.clone();
        let retention = Retention::from_env();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobEntry::now(JobState::Running));
                }

                // In-flight analyses abort at the next stage boundary on
                // shutdown instead of holding the worker open.
                let result = pipeline
                    .run_with_cancel(job.request, Some(job.context), shutdown_bg.child_token())
                    .await;
                let entry = match result {
                    Ok(resp) => JobEntry::now(JobState::Completed { result: resp }),
                    Err(err) => JobEntry::now(JobState::Failed {
                        error: err.detail().to_string(),
                        stage: Some(err.stage().to_string()),
                    }),
                };
                let mut guard = statuses_bg.lock().await;
                guard.insert(job.id, entry);
                prune_finished(&mut guard, Instant::now(), &retention);
                if shutdown_bg.is_cancelled() {
                    break;
                }
            }
        });

        (
            Self {
                tx,
                statuses,
                shutdown,
            },
            handle,
        )
    }

    pub async fn enqueue_analysis(
        &self,
        request: AnalysisRequest,
        context: AuthContext,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobEntry::now(JobState::Queued));
        }
        let job = Job {
            id,
            request,
            context,
        };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            state: entry.state.clone(),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Drop finished jobs past the retention window, then cap the remaining
/// finished set at `max_finished` by dropping the oldest.
fn prune_finished(statuses: &mut HashMap<Uuid, JobEntry>, now: Instant, retention: &Retention) {
    statuses.retain(|_, entry| {
        !entry.state.is_finished()
            || now.saturating_duration_since(entry.updated_at) < retention.keep_for
    });

    let mut finished: Vec<(Uuid, Instant)> = statuses
        .iter()
        .filter(|(_, entry)| entry.state.is_finished())
        .map(|(id, entry)| (*id, entry.updated_at))
        .collect();
    if finished.len() > retention.max_finished {
        finished.sort_by_key(|(_, updated_at)| *updated_at);
        let excess = finished.len() - retention.max_finished;
        for (id, _) in finished.into_iter().take(excess) {
            statuses.remove(&id);
        }
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
