//! Per-guild ordered execution.
//!
//! Every guild gets a FIFO queue drained by a single worker task. Work
//! submitted for one guild runs strictly one job at a time in submission
//! order; different guilds run independently.

use std::future::Future;
use std::pin::Pin;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::{GuardianError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
pub struct CommunityLanes {
    lanes: DashMap<u64, mpsc::UnboundedSender<Job>>,
}

impl CommunityLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` on the guild's lane without waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F>(&self, guild_id: u64, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut job: Job = Box::pin(job);

        // A lane whose worker died (a job panicked) is replaced once.
        for _ in 0..2 {
            let sender = self
                .lanes
                .entry(guild_id)
                .or_insert_with(|| spawn_lane(guild_id))
                .clone();

            match sender.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    tracing::warn!(guild_id, "Lane worker stopped, restarting");
                    self.lanes
                        .remove_if(&guild_id, |_, current| current.same_channel(&sender));
                    job = returned;
                }
            }
        }

        Err(GuardianError::InternalState(format!(
            "Lane for guild {} cannot accept work",
            guild_id
        )))
    }

    /// Number of guilds with a lane.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

fn spawn_lane(guild_id: u64) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            job.await;
        }
        tracing::debug!(guild_id, "Lane closed");
    });
    tx
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use crate::error::{GuardianError, Result};
    use crate::lanes::CommunityLanes;

    /// Queue `job` and wait for its output.
    async fn run<F, T>(lanes: &CommunityLanes, guild_id: u64, job: F) -> Result<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        lanes.submit(guild_id, async move {
            let _ = tx.send(job.await);
        })?;
        rx.await
            .map_err(|_| GuardianError::InternalState("lane job dropped".to_string()))
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let lanes = CommunityLanes::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u64 {
            let order = Arc::clone(&order);
            lanes
                .submit(1, async move {
                    // Earlier jobs sleep longer; order must still hold.
                    tokio::time::sleep(Duration::from_millis(10 - i)).await;
                    order.lock().unwrap().push(i);
                })
                .expect("submit");
        }

        run(&lanes, 1, async {}).await.expect("drain");
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn jobs_never_overlap_within_a_guild() {
        let lanes = CommunityLanes::new();
        let active = Arc::new(Mutex::new((0usize, 0usize)));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let active = Arc::clone(&active);
            handles.push(run(&lanes, 7, async move {
                {
                    let mut a = active.lock().unwrap();
                    a.0 += 1;
                    a.1 = a.1.max(a.0);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.lock().unwrap().0 -= 1;
            }));
        }
        futures::future::join_all(handles).await;

        assert_eq!(active.lock().unwrap().1, 1);
    }

    #[tokio::test]
    async fn guilds_do_not_block_each_other() {
        let lanes = Arc::new(CommunityLanes::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        lanes
            .submit(1, async move {
                let _ = release_rx.await;
            })
            .expect("submit");

        let value = tokio::time::timeout(Duration::from_secs(1), run(&lanes, 2, async { 42 }))
            .await
            .expect("guild 2 not blocked")
            .expect("run");
        assert_eq!(value, 42);
        assert_eq!(lanes.len(), 2);

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn lane_recovers_after_panicking_job() {
        let lanes = CommunityLanes::new();

        let result: Result<u32> = run(&lanes, 3, async { panic!("boom") }).await;
        assert!(result.is_err());

        // give the dead worker's receiver time to drop
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(run(&lanes, 3, async { 5 }).await.expect("restarted"), 5);
    }
}
