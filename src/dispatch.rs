use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::db::{self, JobRecord};
use crate::error::BridgeError;
use crate::BridgeContext;

pub const METHOD_SEND_MESSAGE: &str = "send_message";

/// A job with no scheduled time runs immediately; otherwise it runs once the
/// local clock strictly passes the stored UTC wall-clock time.
pub fn is_due(scheduled_time: Option<DateTime<Utc>>, now: DateTime<Local>) -> bool {
    match scheduled_time {
        None => true,
        Some(t) => now > t.with_timezone(&Local),
    }
}

/// One poll cycle: select eligible jobs, execute the due ones against the
/// live session, and commit every row mutation atomically at cycle end.
/// A failed send leaves its job unsent for the next cycle; jobs never stop
/// being retried on their own.
pub async fn run_dispatch_cycle(ctx: &BridgeContext) -> Result<usize, BridgeError> {
    if !ctx.session.is_connected().await {
        return Ok(0);
    }

    let mut tx = ctx.pool.begin().await?;
    let jobs = db::fetch_unsent_jobs(&mut *tx, ctx.db_kind, ctx.account.id).await?;
    debug!(jobs = jobs.len(), "dispatch cycle starting");

    let now = Local::now();
    let mut dispatched = 0;
    for job in jobs {
        if !is_due(job.scheduled_time, now) {
            continue;
        }
        info!(job = job.id, method = %job.method, "job can run");
        match execute_job(ctx, &job).await {
            Ok(network_message_id) => {
                db::mark_job_sent(&mut *tx, ctx.db_kind, job.id, &network_message_id).await?;
                dispatched += 1;
            }
            Err(err) => {
                warn!(job = job.id, "send failed, leaving job queued: {err}");
                ctx.alerts
                    .report("warning", &format!("send failed for job {}: {err}", job.id))
                    .await;
            }
        }
    }

    tx.commit().await?;
    Ok(dispatched)
}

async fn execute_job(ctx: &BridgeContext, job: &JobRecord) -> Result<String, BridgeError> {
    match job.method.as_str() {
        METHOD_SEND_MESSAGE => {
            debug!(to = %job.targets, "sending message");
            ctx.session
                .handle()
                .send_message(&job.targets, &job.args)
                .await
        }
        other => Err(BridgeError::Send(format!("unknown job method: {other}"))),
    }
}

/// Polling worker. The cadence comes from configuration; a failed cycle is
/// logged and the next tick starts fresh.
pub async fn start_dispatch_worker(ctx: Arc<BridgeContext>) {
    let interval = ctx.config.dispatch.poll_interval_seconds;
    loop {
        if let Err(err) = run_dispatch_cycle(&ctx).await {
            error!("dispatch cycle aborted: {err}");
        }
        sleep(std::time::Duration::from_secs(interval)).await;
    }
}
