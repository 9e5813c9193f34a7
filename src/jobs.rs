use crate::{
    models::{ApiError, InventoryResponse},
    pipeline::InventoryPipeline,
    security::AuthContext,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
    /// How long a finished job stays queryable.
    retention: TimeDelta,
}

struct Job {
    id: Uuid,
    image_urls: Vec<String>,
    context: AuthContext,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: InventoryResponse },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone)]
struct JobRecord {
    seller_id: String,
    state: JobState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn expired(&self, now: DateTime<Utc>, retention: TimeDelta) -> bool {
        matches!(self.state, JobState::Completed { .. } | JobState::Failed { .. })
            && now - self.updated_at >= retention
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: InventoryPipeline) -> (Self, JoinHandle<()>) {
        Self::spawn_with(pipeline, queue_capacity_from_env(), retention_from_env())
    }

    fn spawn_with(
        pipeline: InventoryPipeline,
        capacity: usize,
        retention: TimeDelta,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_state(&statuses_bg, job.id, JobState::Running).await;
                info!(target = "furniflip.jobs", job_id = %job.id, seller_id = %job.context.seller_id, images = job.image_urls.len(), "job started");

                let state = match pipeline.inventory_agent(&job.image_urls).await {
                    Ok(items) => JobState::Completed {
                        result: InventoryResponse::new(job.image_urls.len(), items),
                    },
                    Err(err) => JobState::Failed {
                        error: err.detail().to_string(),
                        stage: Some(err.stage().to_string()),
                    },
                };
                set_state(&statuses_bg, job.id, state).await;
            }
        });

        (
            Self {
                tx,
                statuses,
                retention,
            },
            handle,
        )
    }

    pub async fn enqueue_inventory(
        &self,
        image_urls: Vec<String>,
        context: AuthContext,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        {
            let mut statuses = self.statuses.lock().await;
            let before = statuses.len();
            statuses.retain(|_, record| !record.expired(now, self.retention));
            let pruned = before - statuses.len();
            if pruned > 0 {
                debug!(target = "furniflip.jobs", pruned, "expired job records pruned");
            }
            statuses.insert(
                id,
                JobRecord {
                    seller_id: context.seller_id.clone(),
                    state: JobState::Queued,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        let job = Job {
            id,
            image_urls,
            context,
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    /// Status of a job, visible only to the seller that submitted it.
    pub async fn get(&self, id: Uuid, seller_id: &str) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard
            .get(&id)
            .filter(|record| record.seller_id == seller_id)
            .map(|record| JobInfo {
                id: id.to_string(),
                created_at: record.created_at,
                updated_at: record.updated_at,
                state: record.state.clone(),
            })
    }
}

async fn set_state(statuses: &Mutex<HashMap<Uuid, JobRecord>>, id: Uuid, state: JobState) {
    if let Some(record) = statuses.lock().await.get_mut(&id) {
        record.state = state;
        record.updated_at = Utc::now();
    }
}

fn queue_capacity_from_env() -> usize {
    crate::http::env_usize("QUEUE_CAPACITY", 64)
}

fn retention_from_env() -> TimeDelta {
    let secs = crate::http::env_secs("JOB_RETENTION_SECS", 3600).min(315_360_000);
    TimeDelta::seconds(secs as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakeBrowser;
    use crate::pipeline::testing::{lens_page, pipeline};
    use crate::security::AuthMethod;
    use std::time::Duration;

    fn seller(id: &str) -> AuthContext {
        AuthContext {
            seller_id: id.to_string(),
            method: AuthMethod::ServiceKey,
        }
    }

    async fn wait_for_finish(queue: &JobQueue, id: Uuid, seller_id: &str) -> JobInfo {
        for _ in 0..200 {
            let info = queue.get(id, seller_id).await.expect("job exists");
            if matches!(info.state, JobState::Completed { .. } | JobState::Failed { .. }) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not finish");
    }

    #[tokio::test]
    async fn queued_job_completes_with_response() {
        let browser = std::sync::Arc::new(FakeBrowser::default());
        browser.serve("a.jpg", &lens_page("Oak Table", "https://www.wayfair.com/oak", "$300"));
        let (queue, _worker) = JobQueue::spawn(pipeline(browser, false).await);

        let id = queue
            .enqueue_inventory(vec!["https://cdn.test/a.jpg".into()], seller("seller-a"))
            .await
            .unwrap();
        let info = wait_for_finish(&queue, id, "seller-a").await;
        let JobState::Completed { result } = info.state else {
            panic!("expected completion");
        };
        assert_eq!(result.submitted, 1);
        assert_eq!(result.items.len(), 1);
        assert!(info.updated_at >= info.created_at);
    }

    #[tokio::test]
    async fn failed_run_records_stage() {
        let browser = std::sync::Arc::new(FakeBrowser::default());
        let (queue, _worker) = JobQueue::spawn(pipeline(browser, true).await);
        let id = queue
            .enqueue_inventory(vec!["https://cdn.test/a.jpg".into()], seller("seller-a"))
            .await
            .unwrap();
        let info = wait_for_finish(&queue, id, "seller-a").await;
        assert!(matches!(info.state, JobState::Failed { stage: Some(ref s), .. } if s == "vocabulary"));
    }

    #[tokio::test]
    async fn jobs_are_private_to_their_seller() {
        let browser = std::sync::Arc::new(FakeBrowser::default());
        let (queue, _worker) = JobQueue::spawn(pipeline(browser, true).await);
        let id = queue
            .enqueue_inventory(vec!["https://cdn.test/a.jpg".into()], seller("seller-a"))
            .await
            .unwrap();
        assert!(queue.get(id, "seller-b").await.is_none());
        assert!(queue.get(Uuid::new_v4(), "seller-a").await.is_none());
    }

    #[tokio::test]
    async fn finished_jobs_are_pruned_after_retention() {
        let browser = std::sync::Arc::new(FakeBrowser::default());
        let (queue, _worker) =
            JobQueue::spawn_with(pipeline(browser, true).await, 8, TimeDelta::zero());
        let first = queue
            .enqueue_inventory(vec!["https://cdn.test/a.jpg".into()], seller("seller-a"))
            .await
            .unwrap();
        wait_for_finish(&queue, first, "seller-a").await;

        let second = queue
            .enqueue_inventory(vec!["https://cdn.test/b.jpg".into()], seller("seller-a"))
            .await
            .unwrap();
        assert!(queue.get(first, "seller-a").await.is_none());
        assert!(queue.get(second, "seller-a").await.is_some());
    }
}
