//! Notifications leaving the session
//!
//! [`SessionEventSink`] is implemented by the signaling layer and relays
//! engine events to the remote participants. [`FilterSubsystem`] owns the
//! actual stream filters; the session only keeps their serialized state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::types::{IceCandidate, Participant, SessionId};
use crate::participant::ParticipantMap;
use crate::pipeline::{MediaPipeline, PipelineErrorEvent};

/// Receiver of asynchronous session notifications
#[async_trait]
pub trait SessionEventSink: Send + Sync {
    async fn on_ice_candidate(
        &self,
        session_id: &SessionId,
        participant_id: &str,
        endpoint_name: &str,
        candidate: IceCandidate,
    );

    async fn on_media_error(&self, session_id: &SessionId, participant_id: &str, description: &str);

    /// A running pipeline reported an internal error. The session stays up.
    async fn on_pipeline_error(
        &self,
        session_id: &SessionId,
        participants: Vec<Participant>,
        description: &str,
    );
}

/// Stream-filter subsystem
#[async_trait]
pub trait FilterSubsystem: Send + Sync {
    /// Drop every filter the participant applied
    async fn release_all_filters(&self, participant: &Participant);

    /// Apply an existing session filter to a participant
    async fn update_filter(
        &self,
        session_id: &SessionId,
        participant: &Participant,
        filter_id: &str,
        state: &str,
    );
}

/// Relays pipeline runtime errors, with the current roster, to the sink
#[derive(Clone)]
pub struct PipelineErrorForwarder {
    session_id: SessionId,
    participants: Arc<ParticipantMap>,
    sink: Arc<dyn SessionEventSink>,
}

impl PipelineErrorForwarder {
    pub fn new(
        session_id: SessionId,
        participants: Arc<ParticipantMap>,
        sink: Arc<dyn SessionEventSink>,
    ) -> Self {
        Self {
            session_id,
            participants,
            sink,
        }
    }

    /// Register on `pipeline` and start relaying. The relay task ends once
    /// the pipeline drops its listener.
    pub fn attach(&self, pipeline: &dyn MediaPipeline) {
        let (tx, rx) = mpsc::unbounded_channel();
        pipeline.add_error_listener(tx);
        tokio::spawn(self.clone().run(rx));
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<PipelineErrorEvent>) {
        while let Some(event) = rx.recv().await {
            let description = event.to_string();
            warn!("SESSION {}: Pipeline error encountered: {}", self.session_id, description);

            let roster: Vec<Participant> = self
                .participants
                .iter()
                .map(|entry| entry.value().participant().clone())
                .collect();
            self.sink.on_pipeline_error(&self.session_id, roster, &description).await;
        }
        debug!("SESSION {}: Pipeline error relay stopped", self.session_id);
    }
}
