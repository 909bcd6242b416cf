use std::sync::Arc;

use futures::FutureExt;
use tracing::info;

use crate::config::ScheduleConfig;
use crate::scheduler::Scheduler;
use crate::updater::UpdateJob;

/// Register the deck list update check: once shortly after startup, then
/// on a fixed interval.
pub async fn register_update_check(
    scheduler: &Scheduler,
    job: Arc<UpdateJob>,
    schedule: &ScheduleConfig,
) -> anyhow::Result<()> {
    let first = job.clone();
    scheduler
        .add_one_shot_job("update_check_initial", schedule.first_run(), move || {
            let job = first.clone();
            async move {
                job.run_update_check().await;
            }
            .boxed()
        })
        .await?;

    scheduler
        .add_repeating_job("update_check", schedule.interval(), move || {
            let job = job.clone();
            async move {
                job.run_update_check().await;
            }
            .boxed()
        })
        .await?;

    info!(
        "Update check registered: first run in {:?}, then every {:?}",
        schedule.first_run(),
        schedule.interval()
    );
    Ok(())
}
