//! Corruption aggregate state machine (spec §3, §4.3). The aggregate holds
//! no mutable state outside a request: callers fold `history()` into a
//! `CorruptionAggregate` on demand, validate a requested transition, and
//! only then append (spec §3 ownership rule, §9 "projection vs materialised
//! aggregate" design note).

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{HealarrError, Result};
use crate::events::{CorruptionDetectedPayload, Event, EventType};
use crate::types::AggregateId;

/// Deterministic, collision-resistant aggregate id derived from a file's
/// canonical absolute path (spec §9 Open Question (b), resolved in
/// `DESIGN.md`): SHA-256 of the lower-cased canonical path, hex-encoded,
/// truncated to 32 hex characters.
pub fn derive_aggregate_id(canonical_abs_path: &Path) -> AggregateId {
    let normalized = canonical_abs_path.to_string_lossy().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)[..32].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Folded view of a corruption aggregate's history (spec §3, §4.3).
#[derive(Debug, Clone)]
pub struct CorruptionAggregate {
    pub aggregate_id: AggregateId,
    pub current_state: EventType,
    pub retry_count: u32,
    pub file_path: String,
    pub path_id: Option<i64>,
    pub corruption_type: String,
    pub detected_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_download_started_at: Option<DateTime<Utc>>,
}

impl CorruptionAggregate {
    /// Folds ordered history into the current aggregate view. `history` must
    /// already be sorted ascending by `id` (the store guarantees this).
    /// (I1): the first event must be `CorruptionDetected`.
    pub fn replay(history: &[Event]) -> Result<Self> {
        let first = history
            .first()
            .ok_or_else(|| HealarrError::NotFound("aggregate has no history".to_string()))?;

        if first.event_type() != Some(EventType::CorruptionDetected) {
            return Err(HealarrError::Internal(format!(
                "aggregate {} violates invariant I1: first event is {}",
                first.aggregate_id, first.event_type
            )));
        }

        let detected: CorruptionDetectedPayload = serde_json::from_value(first.payload.clone())?;

        let mut aggregate = CorruptionAggregate {
            aggregate_id: first.aggregate_id.clone(),
            current_state: EventType::CorruptionDetected,
            retry_count: 0,
            file_path: detected.file_path,
            path_id: detected.path_id,
            corruption_type: detected.corruption_type,
            detected_at: first.created_at,
            last_updated_at: first.created_at,
            last_download_started_at: None,
        };

        for event in history {
            let Some(event_type) = event.event_type() else {
                continue;
            };
            aggregate.current_state = event_type;
            aggregate.last_updated_at = event.created_at;
            if event_type.ends_in_failed() {
                aggregate.retry_count += 1;
            }
            if event_type == EventType::DownloadStarted {
                aggregate.last_download_started_at = Some(event.created_at);
            }
        }

        Ok(aggregate)
    }

    /// (I2): a terminal state admits no further transitions except an
    /// explicit user override (`CorruptionIgnored`/`ManuallyRemoved`/retry
    /// override, handled by the caller as a distinct command).
    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Validates whether `next` is a legal transition from the current
    /// state, per the remediation pipeline and retry rules in spec §4.3.
    /// Does not itself append; callers append on `Ok`.
    pub fn validate_transition(
        &self,
        next: EventType,
        max_retries: u32,
        is_override: bool,
    ) -> Result<()> {
        if is_override {
            // CorruptionIgnored / ManuallyRemoved may be raised in any
            // non-terminal state, or explicitly requested even in a
            // terminal one (spec: "admits no further transitions except
            // explicit user override").
            return Ok(());
        }

        if self.is_terminal() {
            return Err(HealarrError::Conflict(format!(
                "aggregate {} is in terminal state {:?}",
                self.aggregate_id, self.current_state
            )));
        }

        let allowed = match (self.current_state, next) {
            (EventType::CorruptionDetected, EventType::SearchQueued) => true,
            (EventType::SearchQueued, EventType::SearchStarted) => true,
            (EventType::SearchStarted, EventType::SearchCompleted) => true,
            (EventType::SearchStarted, EventType::SearchFailed) => true,
            (EventType::SearchCompleted, EventType::RemediationQueued) => true,
            (EventType::RemediationQueued, EventType::DownloadStarted) => true,
            (EventType::DownloadStarted, EventType::DownloadProgress) => true,
            (EventType::DownloadStarted, EventType::DeletionCompleted) => true,
            (EventType::DownloadStarted, EventType::DownloadFailed) => true,
            (EventType::DownloadStarted, EventType::DeletionFailed) => true,
            (EventType::DownloadProgress, EventType::DownloadProgress) => true,
            (EventType::DownloadProgress, EventType::DeletionCompleted) => true,
            (EventType::DownloadProgress, EventType::DownloadFailed) => true,
            (EventType::DownloadProgress, EventType::DeletionFailed) => true,
            (EventType::DeletionCompleted, EventType::FileDetected) => true,
            (EventType::FileDetected, EventType::VerificationSuccess) => true,
            (EventType::FileDetected, EventType::VerificationFailed) => true,
            // Retry: any *Failed event re-enters SearchQueued unless it
            // would push retry_count to max_retries, in which case the
            // caller should raise MaxRetriesReached instead.
            (state, EventType::SearchQueued) if state.ends_in_failed() => true,
            (state, EventType::MaxRetriesReached) if state.ends_in_failed() => true,
            (EventType::CorruptionDetected, EventType::ImportBlocked) => true,
            (state, EventType::ImportBlocked) if !state.is_terminal() => true,
            _ => false,
        };

        if allowed && next == EventType::SearchQueued && self.retry_count >= max_retries {
            return Err(HealarrError::Conflict(format!(
                "aggregate {} has exhausted retries ({}/{})",
                self.aggregate_id, self.retry_count, max_retries
            )));
        }

        if allowed {
            Ok(())
        } else {
            Err(HealarrError::Conflict(format!(
                "illegal transition for aggregate {}: {:?} -> {:?}",
                self.aggregate_id, self.current_state, next
            )))
        }
    }

    /// (Timeout rule): true once wall time since `DownloadStarted` exceeds
    /// `verification_timeout_hours` without reaching `FileDetected`.
    pub fn is_verification_timed_out(&self, verification_timeout_hours: Option<i64>, now: DateTime<Utc>) -> bool {
        let Some(hours) = verification_timeout_hours else {
            return false;
        };
        let Some(started) = self.last_download_started_at else {
            return false;
        };
        if matches!(
            self.current_state,
            EventType::FileDetected | EventType::VerificationSuccess | EventType::VerificationFailed
        ) {
            return false;
        }
        now - started > Duration::hours(hours)
    }

    /// Bucket classification used by `GET /api/corruptions?status=` (spec §6).
    /// (Open Question (a)): `MaxRetriesReached` is `orphaned`; other
    /// `*Failed` states fall under `failed`, preserving the partition.
    pub fn status_bucket(&self) -> StatusBucket {
        match self.current_state {
            EventType::CorruptionDetected => StatusBucket::Pending,
            EventType::VerificationSuccess => StatusBucket::Resolved,
            EventType::MaxRetriesReached => StatusBucket::Orphaned,
            EventType::CorruptionIgnored => StatusBucket::Ignored,
            EventType::ImportBlocked | EventType::ManuallyRemoved => {
                StatusBucket::ManualIntervention
            }
            state if state.ends_in_failed() => StatusBucket::Failed,
            _ => StatusBucket::InProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    Pending,
    Resolved,
    Orphaned,
    Ignored,
    ManualIntervention,
    Failed,
    InProgress,
}

impl StatusBucket {
    /// `active` = everything not resolved/orphaned/ignored (spec §6).
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            StatusBucket::Resolved | StatusBucket::Orphaned | StatusBucket::Ignored
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AggregateType;
    use serde_json::json;
    use std::path::PathBuf;

    fn ev(id: i64, event_type: EventType, payload: serde_json::Value, t: DateTime<Utc>) -> Event {
        Event {
            id,
            aggregate_type: AggregateType::Corruption.as_str().to_string(),
            aggregate_id: "agg-1".to_string(),
            event_type: event_type.as_str().to_string(),
            payload,
            version: 1,
            created_at: t,
            actor_id: None,
        }
    }

    fn detected_payload() -> serde_json::Value {
        json!({
            "file_path": "/media/movie.mkv",
            "path_id": 1,
            "corruption_type": "moov_atom_missing",
            "size": 1024,
        })
    }

    #[test]
    fn derive_aggregate_id_is_deterministic() {
        let a = derive_aggregate_id(&PathBuf::from("/media/Movie.mkv"));
        let b = derive_aggregate_id(&PathBuf::from("/media/movie.mkv"));
        assert_eq!(a, b, "case-insensitive path should hash identically");
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn replay_rejects_history_not_starting_with_detected() {
        let t = Utc::now();
        let history = vec![ev(1, EventType::SearchQueued, json!({}), t)];
        assert!(CorruptionAggregate::replay(&history).is_err());
    }

    #[test]
    fn replay_computes_retry_count_per_i3() {
        let t = Utc::now();
        let history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t),
            ev(2, EventType::SearchQueued, json!({}), t),
            ev(3, EventType::SearchStarted, json!({}), t),
            ev(4, EventType::SearchFailed, json!({}), t),
            ev(5, EventType::SearchQueued, json!({}), t),
            ev(6, EventType::SearchStarted, json!({}), t),
            ev(7, EventType::SearchFailed, json!({}), t),
        ];
        let aggregate = CorruptionAggregate::replay(&history).unwrap();
        assert_eq!(aggregate.retry_count, 2);
        assert_eq!(aggregate.current_state, EventType::SearchFailed);
    }

    #[test]
    fn detected_at_never_exceeds_last_updated_at() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(5);
        let history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t0),
            ev(2, EventType::VerificationSuccess, json!({}), t1),
        ];
        let aggregate = CorruptionAggregate::replay(&history).unwrap();
        assert!(aggregate.detected_at <= aggregate.last_updated_at);
    }

    #[test]
    fn terminal_state_rejects_normal_transitions() {
        let t = Utc::now();
        let history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t),
            ev(2, EventType::VerificationSuccess, json!({}), t),
        ];
        let aggregate = CorruptionAggregate::replay(&history).unwrap();
        assert!(aggregate
            .validate_transition(EventType::SearchQueued, 3, false)
            .is_err());
        assert!(aggregate
            .validate_transition(EventType::ManuallyRemoved, 3, true)
            .is_ok());
    }

    #[test]
    fn retry_rule_emits_max_retries_reached_at_limit() {
        let t = Utc::now();
        let history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t),
            ev(2, EventType::SearchQueued, json!({}), t),
            ev(3, EventType::SearchStarted, json!({}), t),
            ev(4, EventType::SearchFailed, json!({}), t),
        ];
        let aggregate = CorruptionAggregate::replay(&history).unwrap();
        assert!(aggregate
            .validate_transition(EventType::SearchQueued, 1, false)
            .is_err());
        assert!(aggregate
            .validate_transition(EventType::MaxRetriesReached, 1, false)
            .is_ok());
    }

    #[test]
    fn status_bucket_partitions_failed_vs_orphaned() {
        let t = Utc::now();
        let failed_history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t),
            ev(2, EventType::SearchFailed, json!({}), t),
        ];
        let orphaned_history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t),
            ev(2, EventType::MaxRetriesReached, json!({}), t),
        ];
        assert_eq!(
            CorruptionAggregate::replay(&failed_history).unwrap().status_bucket(),
            StatusBucket::Failed
        );
        assert_eq!(
            CorruptionAggregate::replay(&orphaned_history).unwrap().status_bucket(),
            StatusBucket::Orphaned
        );
    }

    #[test]
    fn verification_timeout_fires_after_configured_hours() {
        let t0 = Utc::now() - Duration::hours(10);
        let history = vec![
            ev(1, EventType::CorruptionDetected, detected_payload(), t0),
            ev(2, EventType::DownloadStarted, json!({}), t0),
        ];
        let aggregate = CorruptionAggregate::replay(&history).unwrap();
        assert!(aggregate.is_verification_timed_out(Some(1), Utc::now()));
        assert!(!aggregate.is_verification_timed_out(Some(24), Utc::now()));
        assert!(!aggregate.is_verification_timed_out(None, Utc::now()));
    }
}
