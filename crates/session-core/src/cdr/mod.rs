//! Call-detail records
//!
//! The session reports membership and media-flow transitions to an
//! [`EventRecorder`]. [`CdrRecorder`] is the stock implementation: it turns
//! each notification into a [`CdrEvent`], logs it as JSON on the `cdr`
//! tracing target and keeps a bounded history in memory.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::types::SessionId;
use crate::config::{SessionConfig, DEFAULT_CDR_HISTORY_SIZE};

/// Sink for lifecycle notifications
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record_joined(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        timestamp: DateTime<Utc>,
    );

    async fn record_left(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        timestamp: DateTime<Utc>,
    );

    async fn record_publish_started(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        timestamp: DateTime<Utc>,
    );

    async fn record_publish_stopped(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        timestamp: DateTime<Utc>,
    );

    async fn record_session_destroyed(
        &self,
        _session_id: &SessionId,
        _start_time: DateTime<Utc>,
        _reason: &str,
        _timestamp: DateTime<Utc>,
    ) {
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CdrEventName {
    SessionDestroyed,
    ParticipantJoined,
    ParticipantLeft,
    PublishStarted,
    PublishStopped,
}

impl std::fmt::Display for CdrEventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CdrEventName::SessionDestroyed => "sessionDestroyed",
            CdrEventName::ParticipantJoined => "participantJoined",
            CdrEventName::ParticipantLeft => "participantLeft",
            CdrEventName::PublishStarted => "publishStarted",
            CdrEventName::PublishStopped => "publishStopped",
        };
        f.write_str(name)
    }
}

/// One call-detail record.
///
/// Timestamps are milliseconds since the Unix epoch. End events carry the
/// start time of the matching begin event and the elapsed whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdrEvent {
    pub event: CdrEventName,
    pub session_id: SessionId,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CdrEvent {
    pub fn new(event: CdrEventName, session_id: &SessionId, timestamp: DateTime<Utc>) -> Self {
        Self {
            event,
            session_id: session_id.clone(),
            timestamp: timestamp.timestamp_millis(),
            participant_id: None,
            start_time: None,
            duration: None,
            reason: None,
        }
    }

    /// End event closing an interval that began at `start_time`
    pub fn end(
        event: CdrEventName,
        session_id: &SessionId,
        start_time: DateTime<Utc>,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut cdr = Self::new(event, session_id, timestamp);
        let start = start_time.timestamp_millis();
        cdr.start_time = Some(start);
        let elapsed_secs = (cdr.timestamp - start).max(0) / 1000;
        cdr.duration = Some(u32::try_from(elapsed_secs).unwrap_or(u32::MAX));
        cdr.reason = Some(reason.to_string());
        cdr
    }

    pub fn with_participant(mut self, participant_public_id: &str) -> Self {
        self.participant_id = Some(participant_public_id.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

type IntervalKey = (SessionId, String);

/// [`EventRecorder`] producing [`CdrEvent`]s
pub struct CdrRecorder {
    history: Mutex<VecDeque<CdrEvent>>,
    capacity: usize,
    joined_at: DashMap<IntervalKey, DateTime<Utc>>,
    publishing_since: DashMap<IntervalKey, DateTime<Utc>>,
}

impl CdrRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CDR_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CDR_HISTORY_SIZE))),
            capacity: capacity.max(1),
            joined_at: DashMap::new(),
            publishing_since: DashMap::new(),
        }
    }

    /// History sized by `cdr_history_size`
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_capacity(config.cdr_history_size)
    }

    /// Records in emission order, oldest first
    pub fn events(&self) -> Vec<CdrEvent> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn events_for(&self, session_id: &SessionId) -> Vec<CdrEvent> {
        self.history
            .lock()
            .iter()
            .filter(|cdr| &cdr.session_id == session_id)
            .cloned()
            .collect()
    }

    fn emit(&self, cdr: CdrEvent) {
        info!(target: "cdr", "{}", cdr.to_json());
        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(cdr);
    }

    fn end_event(
        &self,
        open: &DashMap<IntervalKey, DateTime<Utc>>,
        event: CdrEventName,
        session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) -> CdrEvent {
        let key = (session_id.clone(), participant_public_id.to_string());
        let cdr = match open.remove(&key) {
            Some((_, started)) => CdrEvent::end(event, session_id, started, reason, timestamp),
            None => CdrEvent::new(event, session_id, timestamp).with_reason(reason),
        };
        cdr.with_participant(participant_public_id)
    }
}

impl Default for CdrRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRecorder for CdrRecorder {
    async fn record_joined(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.joined_at
            .insert((session_id.clone(), participant_public_id.to_string()), timestamp);
        self.emit(
            CdrEvent::new(CdrEventName::ParticipantJoined, session_id, timestamp)
                .with_participant(participant_public_id),
        );
    }

    async fn record_left(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) {
        let cdr = self.end_event(
            &self.joined_at,
            CdrEventName::ParticipantLeft,
            session_id,
            participant_public_id,
            reason,
            timestamp,
        );
        self.emit(cdr);
    }

    async fn record_publish_started(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.publishing_since
            .insert((session_id.clone(), participant_public_id.to_string()), timestamp);
        self.emit(
            CdrEvent::new(CdrEventName::PublishStarted, session_id, timestamp)
                .with_participant(participant_public_id),
        );
    }

    async fn record_publish_stopped(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) {
        let cdr = self.end_event(
            &self.publishing_since,
            CdrEventName::PublishStopped,
            session_id,
            participant_public_id,
            reason,
            timestamp,
        );
        self.emit(cdr);
    }

    async fn record_session_destroyed(
        &self,
        session_id: &SessionId,
        start_time: DateTime<Utc>,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.joined_at.retain(|(session, _), _| session != session_id);
        self.publishing_since.retain(|(session, _), _| session != session_id);
        self.emit(CdrEvent::end(
            CdrEventName::SessionDestroyed,
            session_id,
            start_time,
            reason,
            timestamp,
        ));
    }
}
