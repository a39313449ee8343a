//! Participants of a session
//!
//! A [`ParticipantRef`] is the session's record of one connected party: its
//! identity, whether it is publishing, and the media endpoint the external
//! engine built for it on the session pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::api::types::{Participant, SessionId};
use crate::pipeline::MediaPipeline;

/// Participants keyed by private id
pub type ParticipantMap = DashMap<String, Arc<ParticipantRef>>;

/// Media side of a participant, owned by the external engine
#[async_trait]
pub trait ParticipantMedia: Send + Sync {
    /// Make sure a receiving endpoint for `publisher_public_id` exists
    async fn get_new_or_existing_subscriber(&self, publisher_public_id: &str);

    /// Stop receiving media from `sender_public_id`
    async fn cancel_receiving_media(&self, sender_public_id: &str, reason: &str);

    /// Release every endpoint of this participant
    async fn close(&self, reason: &str);
}

/// Builds the media side of joining participants
pub trait ParticipantFactory: Send + Sync {
    fn create_participant(
        &self,
        session_id: &SessionId,
        participant: &Participant,
        pipeline: Arc<dyn MediaPipeline>,
    ) -> Arc<dyn ParticipantMedia>;
}

pub struct ParticipantRef {
    participant: Participant,
    streaming: AtomicBool,
    media: Arc<dyn ParticipantMedia>,
}

impl ParticipantRef {
    pub fn new(participant: Participant, media: Arc<dyn ParticipantMedia>) -> Self {
        Self {
            participant,
            streaming: AtomicBool::new(false),
            media,
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn private_id(&self) -> &str {
        &self.participant.private_id
    }

    pub fn public_id(&self) -> &str {
        &self.participant.public_id
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Returns the previous value
    pub(crate) fn set_streaming(&self, streaming: bool) -> bool {
        self.streaming.swap(streaming, Ordering::SeqCst)
    }

    pub fn media(&self) -> &Arc<dyn ParticipantMedia> {
        &self.media
    }
}

impl std::fmt::Debug for ParticipantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRef")
            .field("participant", &self.participant)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}
