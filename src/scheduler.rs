use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::proxy::{ProxyPool, RefreshOutcome};

/// Checked every five minutes; the pool's own interval guard lets a refresh
/// through at most once per refresh interval (30 minutes by default).
pub const PROXY_REFRESH_CRON: &str = "0 */5 * * * *";

pub async fn start_scheduler(proxies: Arc<ProxyPool>) -> anyhow::Result<JobScheduler> {
    let sched = JobScheduler::new().await?;

    sched
        .add(Job::new_async(PROXY_REFRESH_CRON, move |_uuid, _l| {
            let proxies = proxies.clone();
            Box::pin(async move {
                match proxies.refresh().await {
                    RefreshOutcome::Refreshed { added, size } => {
                        info!(added, size, "⏰ scheduled proxy refresh done")
                    }
                    outcome => debug!(?outcome, "⏰ scheduled proxy refresh skipped"),
                }
            })
        })?)
        .await?;

    sched.start().await?;
    info!("✅ scheduler started");
    Ok(sched)
}
