//! Background tasks started once from `main` (spec §5, §7): the bus→WS-hub
//! relay, and the periodic verification-timeout sweep. Neither owns
//! request-scoped state; both just hold a clone of `AppState`.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use healarr_core::aggregate::CorruptionAggregate;
use healarr_core::database::ScanPathRepository;
use healarr_core::events::store::{EventStore, ProjectionReader};
use healarr_core::events::{AggregateType, EventType, NewEvent};

use crate::app_state::AppState;

/// Subscribes to every event and forwards each one to the `WsHub` (spec
/// §4.2 "Bus notifies ... the WS Hub"). The WS Hub never publishes to the
/// bus directly — this task is the only bridge between the two, so a
/// filtered or unfiltered bus subscription is the single source the hub
/// ever sees.
pub async fn relay_events_to_ws_hub(state: AppState) {
    let subscription = state.bus.subscribe(None).await;
    info!("event bus -> WS hub relay started");
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = subscription.recv() => {
                let Some(event) = event else { break };
                state.ws_hub.broadcast(event).await;
            }
        }
    }
    info!("event bus -> WS hub relay stopped");
}

/// Every tick: finds aggregates parked in `DownloadStarted` whose
/// `verification_timeout_hours` has elapsed without reaching `FileDetected`,
/// and raises `VerificationFailed` for each (spec §4.3 Timeout rule).
pub async fn sweep_verification_timeouts(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_sweep(&state).await {
                    warn!(error = %e, "verification-timeout sweep failed");
                }
            }
        }
    }
}

/// Every tick, drops idle buckets on all five rate limiters (spec §5:
/// "periodic reaper removes entries idle >10 minutes"). Ten minutes of idle
/// buckets across five limiter instances is a small map; a five-minute tick
/// keeps memory bounded without adding meaningful lock contention.
pub async fn reap_idle_rate_limiters(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                state.login_rate_limiter.reap_idle().await;
                state.setup_rate_limiter.reap_idle().await;
                state.webhook_rate_limiter.reap_idle().await;
                state.api_rate_limiter.reap_idle().await;
                state.arr_rate_limiter.reap_idle().await;
            }
        }
    }
}

async fn run_sweep(state: &AppState) -> healarr_core::Result<()> {
    let default_hours = state.config.remediation.verification_timeout_hours as i64;

    let in_flight = state
        .event_store
        .list(
            Some(&[EventType::DownloadStarted, EventType::DownloadProgress]),
            None,
            "detected_at",
            "ASC",
            healarr_core::types::Pagination::normalize(Some(1), Some(500), 500, 500),
        )
        .await?;

    let now = Utc::now();
    for row in in_flight.data {
        let history = state.event_store.history(&row.aggregate_id).await?;
        let Ok(aggregate) = CorruptionAggregate::replay(&history) else {
            continue;
        };

        let mut timeout_hours = Some(default_hours);
        if let Some(path_id) = row.path_id {
            if let Ok(Some(path)) = state.scan_repo.get(path_id).await {
                if let Some(hours) = path.verification_timeout_hours {
                    timeout_hours = Some(i64::from(hours));
                }
            }
        }

        if !aggregate.is_verification_timed_out(timeout_hours, now) {
            continue;
        }

        let event = NewEvent::new(
            AggregateType::Corruption,
            row.aggregate_id.clone(),
            EventType::VerificationFailed,
            serde_json::json!({ "error": "verification timed out" }),
        );
        state.event_store.append(event).await?;
        warn!(aggregate_id = %row.aggregate_id, "verification timed out");
    }

    Ok(())
}
