//! Session implementation
//!
//! Membership state machine of one multi-party session. The session owns
//! the participant set and the pipeline lifecycle, keeps the filter state
//! replayed to late joiners, and reports every transition to the recorder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info, warn};

use crate::api::types::{IceCandidate, Participant, SessionId, SessionState};
use crate::cdr::EventRecorder;
use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::events::{FilterSubsystem, PipelineErrorForwarder, SessionEventSink};
use crate::participant::{ParticipantFactory, ParticipantMap, ParticipantRef};
use crate::pipeline::{PipelineFactory, PipelineLifecycle, PipelineState};

/// External capabilities a session is built from
#[derive(Clone)]
pub struct SessionCollaborators {
    pub pipeline_factory: Arc<dyn PipelineFactory>,
    pub participant_factory: Arc<dyn ParticipantFactory>,
    pub recorder: Arc<dyn EventRecorder>,
    pub event_sink: Arc<dyn SessionEventSink>,
    pub filters: Arc<dyn FilterSubsystem>,
}

pub struct Session {
    pub(super) session_id: SessionId,
    pub(super) config: SessionConfig,
    start_time: DateTime<Utc>,

    pub(super) participants: Arc<ParticipantMap>,
    /// Private ids that left; never admitted again
    departed: DashSet<String>,
    pub(super) pipeline: PipelineLifecycle,

    filter_states: DashMap<String, String>,
    /// Stream id -> publisher private id
    pub(super) published_stream_ids: DashMap<String, String>,
    pub(super) active_publishers: AtomicUsize,

    activated: AtomicBool,
    /// Set by the one close() call that performs the teardown
    closing: AtomicBool,
    /// Set last during teardown; rejects every later operation
    closed: AtomicBool,

    pipeline_factory: Arc<dyn PipelineFactory>,
    participant_factory: Arc<dyn ParticipantFactory>,
    pub(super) recorder: Arc<dyn EventRecorder>,
    event_sink: Arc<dyn SessionEventSink>,
    filters: Arc<dyn FilterSubsystem>,
}

impl Session {
    /// Create an inactive session. No pipeline is requested until the first join.
    pub fn new(
        session_id: SessionId,
        config: SessionConfig,
        collaborators: SessionCollaborators,
    ) -> Self {
        let participants: Arc<ParticipantMap> = Arc::new(DashMap::new());
        let forwarder = PipelineErrorForwarder::new(
            session_id.clone(),
            participants.clone(),
            collaborators.event_sink.clone(),
        );
        let pipeline = PipelineLifecycle::new(
            session_id.clone(),
            collaborators.pipeline_factory.clone(),
            config.pipeline_timeout(),
            config.stats_enabled,
            forwarder,
        );

        debug!("New SESSION instance with id '{}'", session_id);

        Self {
            session_id,
            config,
            start_time: Utc::now(),
            participants,
            departed: DashSet::new(),
            pipeline,
            filter_states: DashMap::new(),
            published_stream_ids: DashMap::new(),
            active_publishers: AtomicUsize::new(0),
            activated: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pipeline_factory: collaborators.pipeline_factory,
            participant_factory: collaborators.participant_factory,
            recorder: collaborators.recorder,
            event_sink: collaborators.event_sink,
            filters: collaborators.filters,
        }
    }

    /// Admit a participant, creating the session pipeline on first use.
    pub async fn join(&self, participant: Participant) -> Result<Arc<ParticipantRef>> {
        self.check_closed()?;
        if self.closing.load(Ordering::SeqCst) {
            return Err(SessionError::closed(&self.session_id));
        }
        let private_id = participant.private_id.clone();
        if self.participants.contains_key(&private_id) || self.departed.contains(&private_id) {
            return Err(SessionError::duplicate_participant(&self.session_id, &private_id));
        }

        let pipeline = match self.pipeline.ensure_pipeline().await {
            Ok(pipeline) => pipeline,
            // close() released the pipeline under us
            Err(_) if self.closing.load(Ordering::SeqCst) => {
                return Err(SessionError::closed(&self.session_id));
            }
            Err(e) => return Err(e),
        };
        let media = self
            .participant_factory
            .create_participant(&self.session_id, &participant, pipeline);
        let participant_ref = Arc::new(ParticipantRef::new(participant.clone(), media));

        // Re-check under the shard lock: the id may have joined and left
        // while this call waited for the pipeline
        let inserted = match self.participants.entry(private_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(_) if self.departed.contains(&private_id) => false,
            Entry::Vacant(slot) => {
                slot.insert(participant_ref.clone());
                true
            }
        };
        if !inserted {
            participant_ref.media().close("duplicateJoin").await;
            return Err(SessionError::duplicate_participant(&self.session_id, &private_id));
        }

        // close() started while we were waiting for the pipeline
        if self.closing.load(Ordering::SeqCst) {
            if self.participants.remove(&private_id).is_some() {
                participant_ref.media().close("sessionClosed").await;
            }
            return Err(SessionError::closed(&self.session_id));
        }

        let filters: Vec<(String, String)> = self
            .filter_states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (filter_id, state) in filters {
            info!(
                "SESSION {}: Adding filter {} to participant {}",
                self.session_id, filter_id, participant
            );
            self.filters
                .update_filter(&self.session_id, &participant, &filter_id, &state)
                .await;
        }

        self.activated.store(true, Ordering::SeqCst);
        info!("SESSION {}: Added participant {}", self.session_id, participant);

        if !self.is_recorder(&participant.public_id) {
            self.recorder
                .record_joined(&self.session_id, &participant.public_id, Utc::now())
                .await;
        }

        Ok(participant_ref)
    }

    /// Remove a participant and stop every other participant receiving its media.
    pub async fn leave(&self, private_id: &str, reason: &str) -> Result<()> {
        self.check_closed()?;

        let participant = self
            .participants
            .get(private_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::participant_not_found(&self.session_id, private_id))?;

        self.filters.release_all_filters(participant.participant()).await;

        info!("PARTICIPANT {}: Leaving session {}", participant.public_id(), self.session_id);
        let was_publishing = participant.is_streaming() && self.deregister_publisher(&participant);

        self.remove_participant(&participant, reason).await?;
        participant.media().close(reason).await;

        if !self.is_recorder(participant.public_id()) {
            let now = Utc::now();
            if was_publishing {
                self.recorder
                    .record_publish_stopped(&self.session_id, participant.public_id(), reason, now)
                    .await;
            }
            self.recorder
                .record_left(&self.session_id, participant.public_id(), reason, now)
                .await;
        }
        Ok(())
    }

    /// Tear the session down. Only the first call does anything; it returns true.
    pub async fn close(&self, reason: &str) -> bool {
        if self
            .closing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Closing an already closed session '{}'", self.session_id);
            return false;
        }

        for participant in self.participant_refs() {
            self.filters.release_all_filters(participant.participant()).await;
            participant.media().close(reason).await;
        }
        self.participants.clear();
        self.published_stream_ids.clear();

        self.pipeline.release_pipeline().await;
        debug!("Session {} closed", self.session_id);

        if self.config.destroy_media_client {
            self.pipeline_factory.destroy().await;
        }

        self.recorder
            .record_session_destroyed(&self.session_id, self.start_time, reason, Utc::now())
            .await;

        self.closed.store(true, Ordering::SeqCst);
        true
    }

    pub async fn send_ice_candidate(
        &self,
        participant_id: &str,
        endpoint_name: &str,
        candidate: IceCandidate,
    ) {
        self.event_sink
            .on_ice_candidate(&self.session_id, participant_id, endpoint_name, candidate)
            .await;
    }

    pub async fn send_media_error(&self, participant_id: &str, description: &str) {
        self.event_sink
            .on_media_error(&self.session_id, participant_id, description)
            .await;
    }

    async fn remove_participant(&self, participant: &ParticipantRef, reason: &str) -> Result<()> {
        self.check_closed()?;

        // Mark departed first so a join still in flight cannot reuse the slot
        self.departed.insert(participant.private_id().to_string());
        let removed = self
            .participants
            .remove_if(participant.private_id(), |_, current| {
                std::ptr::eq(current.as_ref(), participant)
            })
            .is_some();
        if !removed {
            // A concurrent leave already removed it
            return Err(SessionError::participant_not_found(
                &self.session_id,
                participant.private_id(),
            ));
        }

        debug!(
            "SESSION {}: Cancel receiving media from participant '{}' for other participant",
            self.session_id,
            participant.public_id()
        );
        for other in self.participant_refs() {
            other
                .media()
                .cancel_receiving_media(participant.public_id(), reason)
                .await;
        }
        Ok(())
    }

    pub(super) fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::closed(&self.session_id));
        }
        Ok(())
    }

    pub(super) fn is_recorder(&self, public_id: &str) -> bool {
        public_id == self.config.recorder_public_id
    }

    pub(super) fn lookup(&self, private_id: &str) -> Result<Arc<ParticipantRef>> {
        self.participants
            .get(private_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::participant_not_found(&self.session_id, private_id))
    }

    /// Weakly consistent snapshot, safe to hold across awaits
    pub(super) fn participant_refs(&self) -> Vec<Arc<ParticipantRef>> {
        self.participants.iter().map(|entry| entry.value().clone()).collect()
    }

    // ---- filter state ----

    /// Store the serialized state of a session filter; returns the previous state
    pub fn set_filter_state(
        &self,
        filter_id: impl Into<String>,
        state: impl Into<String>,
    ) -> Option<String> {
        self.filter_states.insert(filter_id.into(), state.into())
    }

    pub fn remove_filter_state(&self, filter_id: &str) -> Option<String> {
        self.filter_states.remove(filter_id).map(|(_, state)| state)
    }

    pub fn filter_states(&self) -> HashMap<String, String> {
        self.filter_states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // ---- accessors ----

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else if self.activated.load(Ordering::SeqCst) {
            SessionState::Active
        } else {
            SessionState::Inactive
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .map(|entry| entry.value().participant().clone())
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant_by_private_id(&self, private_id: &str) -> Option<Arc<ParticipantRef>> {
        self.participants.get(private_id).map(|entry| entry.value().clone())
    }

    pub fn participant_by_public_id(&self, public_id: &str) -> Option<Arc<ParticipantRef>> {
        self.participants
            .iter()
            .find(|entry| entry.value().public_id() == public_id)
            .map(|entry| entry.value().clone())
    }

    pub fn active_publishers(&self) -> usize {
        self.active_publishers.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("participants", &self.participants.len())
            .field("active_publishers", &self.active_publishers())
            .field("pipeline", &self.pipeline.state())
            .finish()
    }
}
