use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::error::BridgeError;
use crate::protocol::{phone_from_jid, ProtocolEvent};
use crate::realtime::RealtimeMessage;
use crate::BridgeContext;

/// Drains protocol events in arrival order on one worker task. Handlers run
/// to completion before the next event is taken, so no two handlers ever
/// execute concurrently for the session.
pub async fn run_event_router(ctx: Arc<BridgeContext>, mut rx: mpsc::Receiver<ProtocolEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(err) = handle_event(&ctx, event).await {
            error!("event handler aborted: {err}");
        }
    }
}

/// Dispatch by event kind. Datastore failures propagate and abort the
/// current handler; sink and ack failures are logged and swallowed.
pub async fn handle_event(ctx: &BridgeContext, event: ProtocolEvent) -> Result<(), BridgeError> {
    match event {
        ProtocolEvent::AuthSuccess { identity } => on_auth_success(ctx, &identity).await,
        ProtocolEvent::AuthFailure { identity, reason } => {
            on_auth_failure(ctx, &identity, &reason).await
        }
        ProtocolEvent::Disconnected { reason } => on_disconnected(ctx, &reason).await,
        ProtocolEvent::MessageReceived {
            message_id,
            jid,
            text,
            display_name,
            ..
        } => on_message_received(ctx, &message_id, &jid, &text, display_name.as_deref()).await,
        ProtocolEvent::GroupMessageReceived {
            message_id,
            group_jid,
            author_jid,
            text,
            display_name,
            ..
        } => {
            on_group_message_received(
                ctx,
                &message_id,
                &group_jid,
                &author_jid,
                &text,
                display_name.as_deref(),
            )
            .await
        }
        ProtocolEvent::ImageReceived {
            message_id,
            jid,
            url,
            ..
        } => on_image_received(ctx, &message_id, &jid, &url).await,
        ProtocolEvent::DeliveryReceipt { jid, message_id } => {
            on_delivery_receipt(ctx, &jid, &message_id).await
        }
    }
}

async fn on_auth_success(ctx: &BridgeContext, identity: &str) -> Result<(), BridgeError> {
    info!(identity, "auth success");
    if let Err(err) = ctx.session.complete_handshake().await {
        warn!("post-auth handshake incomplete: {err}");
    }
    if let Err(err) = ctx.backend.set_status(1, "Connected").await {
        warn!("status update failed: {err}");
    }
    Ok(())
}

async fn on_auth_failure(ctx: &BridgeContext, identity: &str, reason: &str) -> Result<(), BridgeError> {
    error!(identity, "auth error: {reason}");
    if let Err(err) = ctx.backend.report_auth_error().await {
        warn!("auth error report failed: {err}");
    }
    Ok(())
}

async fn on_disconnected(ctx: &BridgeContext, reason: &str) -> Result<(), BridgeError> {
    error!(account = %ctx.account.phone_number, "disconnected: {reason}");
    ctx.session.mark_disconnected().await;
    ctx.alerts
        .report(
            "warning",
            &format!(
                "Unscheduled disconnect for {}: {reason}",
                ctx.account.phone_number
            ),
        )
        .await;
    Ok(())
}

async fn on_message_received(
    ctx: &BridgeContext,
    message_id: &str,
    jid: &str,
    text: &str,
    display_name: Option<&str>,
) -> Result<(), BridgeError> {
    let phone_number = phone_from_jid(jid);
    let name = display_name.unwrap_or_default();
    debug!(sender = phone_number, "received message");

    let duplicate = db::message_exists(&ctx.pool, ctx.db_kind, message_id, ctx.account.id).await?;

    // Receipts go back even for redelivered events.
    acknowledge(ctx, jid, message_id).await;

    if duplicate {
        warn!("duplicate message {message_id}");
        return Ok(());
    }

    let payload = json!({
        "message": {
            "text": text,
            "phone_number": phone_number,
            "message_type": "Text",
            "whatsapp_message_id": message_id,
            "name": name,
        }
    });
    if let Err(err) = ctx.backend.post_event("/messages", payload).await {
        warn!("message relay failed: {err}");
    }

    let publish = ctx
        .realtime
        .publish(RealtimeMessage::Text {
            phone_number: phone_number.to_string(),
            text: text.to_string(),
            name: name.to_string(),
        })
        .await;
    if let Err(err) = publish {
        warn!("realtime publish failed: {err}");
    }
    Ok(())
}

async fn on_group_message_received(
    ctx: &BridgeContext,
    message_id: &str,
    group_jid: &str,
    author_jid: &str,
    text: &str,
    display_name: Option<&str>,
) -> Result<(), BridgeError> {
    info!(group = group_jid, author = author_jid, "received group message");
    let name = display_name.unwrap_or_default();

    let duplicate = db::message_exists(&ctx.pool, ctx.db_kind, message_id, ctx.account.id).await?;

    acknowledge(ctx, group_jid, message_id).await;

    if duplicate {
        let account_name = ctx.account.name.as_deref().unwrap_or_default();
        warn!("duplicate group message {message_id}");
        ctx.alerts
            .report(
                "warning",
                &format!(
                    "Duplicate group message ({message_id}) {} - {account_name}",
                    ctx.account.phone_number
                ),
            )
            .await;
        return Ok(());
    }

    let payload = json!({
        "message": {
            "text": text,
            "group_jid": group_jid,
            "message_type": "Text",
            "whatsapp_message_id": message_id,
            "name": name,
            "jid": author_jid,
        }
    });
    if let Err(err) = ctx.backend.post_event("/receive_broadcast", payload).await {
        warn!("group message relay failed: {err}");
    }
    Ok(())
}

async fn on_image_received(
    ctx: &BridgeContext,
    message_id: &str,
    jid: &str,
    url: &str,
) -> Result<(), BridgeError> {
    // TODO: run the same message_exists lookup the text and group paths do;
    // needs the backend to persist image message ids first.
    let phone_number = phone_from_jid(jid);
    debug!(sender = phone_number, "received image");

    acknowledge(ctx, jid, message_id).await;

    let payload = json!({
        "message": {
            "url": url,
            "message_type": "Image",
            "phone_number": phone_number,
            "whatsapp_message_id": message_id,
            "name": "",
        }
    });
    if let Err(err) = ctx.backend.post_event("/upload", payload).await {
        warn!("image relay failed: {err}");
    }

    let publish = ctx
        .realtime
        .publish(RealtimeMessage::Image {
            phone_number: phone_number.to_string(),
            url: url.to_string(),
            name: String::new(),
        })
        .await;
    if let Err(err) = publish {
        warn!("realtime publish failed: {err}");
    }
    Ok(())
}

async fn on_delivery_receipt(
    ctx: &BridgeContext,
    jid: &str,
    message_id: &str,
) -> Result<(), BridgeError> {
    debug!(sender = jid, "delivered {message_id}");

    let mut tx = ctx.pool.begin().await?;
    let Some(job) = db::find_sent_job(&mut *tx, ctx.db_kind, message_id, ctx.account.id).await?
    else {
        tx.commit().await?;
        debug!("receipt {message_id} matches no sent job");
        return Ok(());
    };

    db::mark_job_received(&mut *tx, ctx.db_kind, job.id).await?;

    if job.method == crate::dispatch::METHOD_SEND_MESSAGE {
        let message = match job.message_id {
            Some(linked_id) => db::get_message(&mut *tx, ctx.db_kind, linked_id, ctx.account.id).await?,
            None => None,
        };
        let Some(message) = message else {
            tx.commit().await?;
            return Ok(());
        };

        db::mark_message_received(&mut *tx, ctx.db_kind, message.id, Utc::now()).await?;
        tx.commit().await?;

        let payload = json!({ "receipt": { "message_id": message.id } });
        if let Err(err) = ctx.backend.post_event("/receipt", payload).await {
            warn!("receipt relay failed: {err}");
        }
        let publish = ctx
            .realtime
            .publish(RealtimeMessage::Receipt {
                message_id: message.id,
            })
            .await;
        if let Err(err) = publish {
            warn!("realtime publish failed: {err}");
        }
    } else {
        tx.commit().await?;
        let payload = json!({
            "receipt": {
                "message_id": message_id,
                "phone_number": phone_from_jid(jid),
            }
        });
        if let Err(err) = ctx.backend.post_event("/broadcast_receipt", payload).await {
            warn!("broadcast receipt relay failed: {err}");
        }
    }
    Ok(())
}

/// Fire-and-forget receipt back into the protocol session. Never retried;
/// a failure is logged and does not block sink delivery.
async fn acknowledge(ctx: &BridgeContext, jid: &str, message_id: &str) {
    if let Err(err) = ctx
        .session
        .handle()
        .acknowledge_message(jid, message_id)
        .await
    {
        warn!("ack failed for {message_id}: {err}");
    }
}
