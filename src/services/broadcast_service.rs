use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{dto::ws::AudienceEvent, state::AppState};

/// Broadcast that did not reach the whole audience.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to serialize {kind} event")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} reached {delivered} connections but failed for {failed}")]
    PartialDelivery {
        kind: &'static str,
        delivered: usize,
        failed: usize,
    },
}

/// Push `event` to every admitted connection and record how long it took
/// since the snapshot was received.
///
/// Failures are logged and returned; the caller decides whether to go on.
pub fn broadcast(
    state: &AppState,
    event: &AudienceEvent,
    received_at: Instant,
) -> Result<usize, BroadcastError> {
    let kind = event.kind();
    let payload = serde_json::to_string(event).map_err(|source| {
        warn!(kind, error = %source, "failed to serialize audience event");
        BroadcastError::Serialize { kind, source }
    })?;

    let delivery = state.audience().publish(event, payload);
    let latency = received_at.elapsed();
    state.latency().record(kind, latency);
    debug!(
        kind,
        delivered = delivery.delivered,
        latency_ms = latency.as_secs_f64() * 1_000.0,
        "audience event broadcast"
    );

    if delivery.failed > 0 {
        warn!(
            kind,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "broadcast did not reach every connection"
        );
        return Err(BroadcastError::PartialDelivery {
            kind,
            delivered: delivery.delivered,
            failed: delivery.failed,
        });
    }
    Ok(delivery.delivered)
}
