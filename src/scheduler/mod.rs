pub mod tasks;

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

/// Wrapper around tokio-cron-scheduler for background tasks
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    /// Create a new scheduler
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Add a job that runs every `interval`, first firing one interval from now
    pub async fn add_repeating_job<F>(&self, name: &str, interval: Duration, task: F) -> Result<()>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running scheduled task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Failed to create repeating job: {}", name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled task '{}' every {:?}", name, interval);
        Ok(())
    }

    /// Add a job that runs once after `delay`
    pub async fn add_one_shot_job<F>(&self, name: &str, delay: Duration, task: F) -> Result<()>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_one_shot_async(delay, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running one-shot task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Failed to create one-shot job: {}", name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled one-shot task '{}' in {:?}", name, delay);
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_shot_job_runs_once() {
        let mut scheduler = Scheduler::new().await.unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(tokio::sync::Notify::new());

        let (counter, done) = (runs.clone(), notify.clone());
        scheduler
            .add_one_shot_job("count_runs", Duration::from_millis(100), move || {
                let counter = counter.clone();
                let done = done.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    done.notify_one();
                }
                .boxed()
            })
            .await
            .unwrap();
        scheduler.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), notify.notified())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await.unwrap();
    }
}
