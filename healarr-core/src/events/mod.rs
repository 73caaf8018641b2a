//! Event-sourced domain primitives (spec §3, §4.1, §4.3).
//!
//! `events::store` owns the append-only log and its read projection;
//! `events::bus` fans appended events out to in-process subscribers and the
//! WebSocket hub. Ordering and durability guarantees live with the store;
//! the bus only guarantees per-subscription order (spec §4.2).

pub mod bus;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::AggregateId;

/// The aggregate kinds the event store is used for. Healarr only models one
/// today (`Corruption`), but the column exists so the store can host other
/// aggregate families without a schema change (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Corruption,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Corruption => "corruption",
        }
    }
}

/// Event vocabulary for the corruption aggregate (spec §4.3). `PascalCase`
/// wire form matches the literal strings in spec.md exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    CorruptionDetected,
    CorruptionIgnored,
    SearchQueued,
    SearchStarted,
    SearchCompleted,
    SearchFailed,
    RemediationQueued,
    DownloadStarted,
    DownloadProgress,
    DownloadFailed,
    DeletionCompleted,
    DeletionFailed,
    FileDetected,
    VerificationSuccess,
    VerificationFailed,
    MaxRetriesReached,
    ImportBlocked,
    ManuallyRemoved,
}

impl EventType {
    /// (I3): `retry_count` equals the number of events whose type ends in
    /// "Failed".
    pub fn ends_in_failed(&self) -> bool {
        matches!(
            self,
            EventType::SearchFailed | EventType::DownloadFailed | EventType::DeletionFailed
                | EventType::VerificationFailed
        )
    }

    /// (I2): terminal states admit no further transitions except explicit
    /// user override.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::VerificationSuccess
                | EventType::MaxRetriesReached
                | EventType::CorruptionIgnored
                | EventType::ManuallyRemoved
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CorruptionDetected => "CorruptionDetected",
            EventType::CorruptionIgnored => "CorruptionIgnored",
            EventType::SearchQueued => "SearchQueued",
            EventType::SearchStarted => "SearchStarted",
            EventType::SearchCompleted => "SearchCompleted",
            EventType::SearchFailed => "SearchFailed",
            EventType::RemediationQueued => "RemediationQueued",
            EventType::DownloadStarted => "DownloadStarted",
            EventType::DownloadProgress => "DownloadProgress",
            EventType::DownloadFailed => "DownloadFailed",
            EventType::DeletionCompleted => "DeletionCompleted",
            EventType::DeletionFailed => "DeletionFailed",
            EventType::FileDetected => "FileDetected",
            EventType::VerificationSuccess => "VerificationSuccess",
            EventType::VerificationFailed => "VerificationFailed",
            EventType::MaxRetriesReached => "MaxRetriesReached",
            EventType::ImportBlocked => "ImportBlocked",
            EventType::ManuallyRemoved => "ManuallyRemoved",
        }
    }
}

/// Immutable record appended to the event log (spec §3). Never mutated once
/// stored; `id` gives total order across the whole store and per-aggregate
/// order (append order == `id` order).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub payload: Value,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub actor_id: Option<String>,
}

impl Event {
    pub fn event_type(&self) -> Option<EventType> {
        parse_event_type(&self.event_type)
    }
}

pub fn parse_event_type(raw: &str) -> Option<EventType> {
    use EventType::*;
    Some(match raw {
        "CorruptionDetected" => CorruptionDetected,
        "CorruptionIgnored" => CorruptionIgnored,
        "SearchQueued" => SearchQueued,
        "SearchStarted" => SearchStarted,
        "SearchCompleted" => SearchCompleted,
        "SearchFailed" => SearchFailed,
        "RemediationQueued" => RemediationQueued,
        "DownloadStarted" => DownloadStarted,
        "DownloadProgress" => DownloadProgress,
        "DownloadFailed" => DownloadFailed,
        "DeletionCompleted" => DeletionCompleted,
        "DeletionFailed" => DeletionFailed,
        "FileDetected" => FileDetected,
        "VerificationSuccess" => VerificationSuccess,
        "VerificationFailed" => VerificationFailed,
        "MaxRetriesReached" => MaxRetriesReached,
        "ImportBlocked" => ImportBlocked,
        "ManuallyRemoved" => ManuallyRemoved,
        _ => return None,
    })
}

/// Payload of the `CorruptionDetected` event — the only payload shape the
/// aggregate reads fields out of directly (I4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionDetectedPayload {
    pub file_path: String,
    pub path_id: Option<i64>,
    pub corruption_type: String,
    pub size: u64,
}

/// Request to append a new event, before an id or timestamp is assigned.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub event_type: EventType,
    pub payload: Value,
    pub version: i32,
    pub actor_id: Option<String>,
}

impl NewEvent {
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: impl Into<AggregateId>,
        event_type: EventType,
        payload: Value,
    ) -> Self {
        Self {
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            event_type,
            payload,
            version: 1,
            actor_id: None,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ends_in_failed_matches_only_failed_variants() {
        assert!(EventType::SearchFailed.ends_in_failed());
        assert!(EventType::DownloadFailed.ends_in_failed());
        assert!(EventType::DeletionFailed.ends_in_failed());
        assert!(EventType::VerificationFailed.ends_in_failed());
        assert!(!EventType::CorruptionDetected.ends_in_failed());
        assert!(!EventType::MaxRetriesReached.ends_in_failed());
    }

    #[test]
    fn terminal_states_match_spec() {
        assert!(EventType::VerificationSuccess.is_terminal());
        assert!(EventType::MaxRetriesReached.is_terminal());
        assert!(EventType::CorruptionIgnored.is_terminal());
        assert!(EventType::ManuallyRemoved.is_terminal());
        assert!(!EventType::SearchQueued.is_terminal());
    }

    #[test]
    fn round_trips_through_wire_strings() {
        for et in [
            EventType::CorruptionDetected,
            EventType::ImportBlocked,
            EventType::DownloadProgress,
        ] {
            let parsed = parse_event_type(et.as_str()).unwrap();
            assert_eq!(parsed.as_str(), et.as_str());
        }
    }

    #[test]
    fn unknown_wire_string_is_none() {
        assert!(parse_event_type("NotARealEvent").is_none());
    }
}
