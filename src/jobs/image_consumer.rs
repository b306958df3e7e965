use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::app::ports::{Delivery, EventSource};
use crate::domain::image::AcceptedImageEvent;
use crate::jobs::derivation::DerivationEngine;

const POLL_WAIT_SECONDS: i32 = 10;
const ERROR_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub lanes: usize,
    pub max_deliveries: u32,
    pub poll_wait_seconds: i32,
    pub error_backoff: Duration,
}

impl ConsumerSettings {
    pub fn new(lanes: usize, max_deliveries: u32) -> Self {
        Self {
            lanes,
            max_deliveries,
            poll_wait_seconds: POLL_WAIT_SECONDS,
            error_backoff: Duration::from_millis(ERROR_BACKOFF_MS),
        }
    }
}

/// What to do with a delivery once it has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Leave unacked; the broker hands it out again.
    Retry,
    /// Park the message and ack it.
    DeadLetter(String),
}

/// Runs `settings.lanes` consumer lanes until `shutdown` flips to true. Each
/// lane handles its deliveries strictly one after another, so a lane never
/// acks out of order.
pub async fn run(
    source: Arc<dyn EventSource>,
    engine: DerivationEngine,
    settings: ConsumerSettings,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(lanes = settings.lanes, "image consumer started");

    let handles: Vec<_> = (0..settings.lanes)
        .map(|lane| {
            tokio::spawn(run_lane(
                lane,
                Arc::clone(&source),
                engine.clone(),
                settings.clone(),
                shutdown.clone(),
            ))
        })
        .collect();

    let mut failed = 0;
    for result in futures::future::join_all(handles).await {
        if let Err(err) = result {
            error!(error = %err, "consumer lane panicked");
            failed += 1;
        }
    }

    info!("image consumer stopped");
    if failed > 0 {
        return Err(anyhow!("{} consumer lane(s) panicked", failed));
    }
    Ok(())
}

pub async fn run_lane(
    lane: usize,
    source: Arc<dyn EventSource>,
    engine: DerivationEngine,
    settings: ConsumerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(lane, "consumer lane started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            received = source.receive(settings.poll_wait_seconds) => received,
        };

        match received {
            Ok(deliveries) => {
                // Deliveries already pulled are finished even if shutdown
                // arrives meanwhile, so nothing is dropped mid-processing.
                for delivery in deliveries {
                    let disposition =
                        handle_delivery(&engine, &delivery, settings.max_deliveries).await;
                    settle(source.as_ref(), &delivery, disposition).await;
                }
            }
            Err(err) => {
                warn!(lane, error = %err, "queue receive failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(settings.error_backoff) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    debug!(lane, "consumer lane drained");
}

/// Decodes and derives one delivery and decides its fate.
pub async fn handle_delivery(
    engine: &DerivationEngine,
    delivery: &Delivery,
    max_deliveries: u32,
) -> Disposition {
    let event = match AcceptedImageEvent::from_json(&delivery.body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "failed to parse queue message body");
            return Disposition::DeadLetter(err.to_string());
        }
    };

    let exhausted = delivery.delivery_count >= max_deliveries;
    match engine.derive(&event).await {
        Ok(report) if !report.has_retryable_failure() => Disposition::Ack,
        Ok(_) if exhausted => {
            Disposition::DeadLetter("variants still failing after max deliveries".to_string())
        }
        Ok(_) => Disposition::Retry,
        Err(err) if err.is_retryable() && !exhausted => {
            warn!(
                image_id = %event.id,
                attempt = delivery.delivery_count,
                error = %err,
                "derivation failed, leaving for redelivery"
            );
            Disposition::Retry
        }
        Err(err) => {
            error!(
                image_id = %event.id,
                attempt = delivery.delivery_count,
                kind = err.kind(),
                error = %err,
                "derivation failed permanently"
            );
            Disposition::DeadLetter(err.to_string())
        }
    }
}

async fn settle(source: &dyn EventSource, delivery: &Delivery, disposition: Disposition) {
    match disposition {
        Disposition::Ack => {
            if let Err(err) = source.ack(delivery).await {
                warn!(error = %err, "failed to ack queue message");
            }
        }
        Disposition::Retry => {}
        Disposition::DeadLetter(reason) => {
            if let Err(err) = source.dead_letter(delivery, &reason).await {
                // Not acked either: it comes back and gets another chance
                // to be parked.
                warn!(error = %err, "failed to dead-letter queue message");
                return;
            }
            if let Err(err) = source.ack(delivery).await {
                warn!(error = %err, "failed to ack dead-lettered message");
            }
        }
    }
}
