//! Publisher registration and subscriber fan-out for Session

use std::sync::atomic::Ordering;

use chrono::Utc;
use futures::future::join_all;
use tracing::debug;

use super::Session;
use crate::api::types::Participant;
use crate::errors::{Result, SessionError};
use crate::participant::ParticipantRef;

impl Session {
    /// Register `participant` as a publisher and pre-create the receiving
    /// endpoint of every other participant, so later subscriptions do not
    /// pay the setup latency.
    pub async fn new_publisher(&self, participant: &Participant) -> Result<()> {
        self.check_closed()?;
        let publisher = self.lookup(&participant.private_id)?;

        let newly_streaming = !publisher.set_streaming(true);
        if newly_streaming {
            self.active_publishers.fetch_add(1, Ordering::SeqCst);
        }

        let subscribers = self.others(&publisher);
        join_all(
            subscribers
                .iter()
                .map(|subscriber| {
                    subscriber
                        .media()
                        .get_new_or_existing_subscriber(publisher.public_id())
                }),
        )
        .await;

        debug!(
            "SESSION {}: Virtually subscribed other participants {:?} to new publisher {}",
            self.session_id,
            subscribers.iter().map(|p| p.public_id()).collect::<Vec<_>>(),
            publisher.public_id()
        );

        if newly_streaming && !self.is_recorder(publisher.public_id()) {
            self.recorder
                .record_publish_started(&self.session_id, publisher.public_id(), Utc::now())
                .await;
        }
        Ok(())
    }

    /// Deregister `participant` as a publisher and make every other
    /// participant stop receiving its media.
    pub async fn cancel_publisher(&self, participant: &Participant, reason: &str) -> Result<()> {
        self.check_closed()?;
        let publisher = self.lookup(&participant.private_id)?;

        let was_publishing = self.deregister_publisher(&publisher);

        let subscribers = self.others(&publisher);
        for subscriber in &subscribers {
            subscriber
                .media()
                .cancel_receiving_media(publisher.public_id(), reason)
                .await;
        }

        debug!(
            "SESSION {}: Unsubscribed other participants {:?} from the publisher {}",
            self.session_id,
            subscribers.iter().map(|p| p.public_id()).collect::<Vec<_>>(),
            publisher.public_id()
        );

        if was_publishing && !self.is_recorder(publisher.public_id()) {
            self.recorder
                .record_publish_stopped(&self.session_id, publisher.public_id(), reason, Utc::now())
                .await;
        }
        Ok(())
    }

    /// Map a published stream to its publisher
    pub fn register_published_stream(
        &self,
        stream_id: impl Into<String>,
        private_id: &str,
    ) -> Result<()> {
        self.check_closed()?;
        if !self.participants.contains_key(private_id) {
            return Err(SessionError::participant_not_found(&self.session_id, private_id));
        }
        self.published_stream_ids.insert(stream_id.into(), private_id.to_string());
        Ok(())
    }

    pub fn unregister_published_stream(&self, stream_id: &str) -> Option<String> {
        self.published_stream_ids.remove(stream_id).map(|(_, private_id)| private_id)
    }

    pub fn get_participant_private_id_from_stream_id(&self, stream_id: &str) -> Option<String> {
        self.published_stream_ids.get(stream_id).map(|entry| entry.value().clone())
    }

    /// Clear the streaming flag and drop the publisher's streams.
    /// Returns true if the participant was publishing.
    pub(super) fn deregister_publisher(&self, publisher: &ParticipantRef) -> bool {
        let was_publishing = publisher.set_streaming(false);
        if was_publishing {
            let _ = self
                .active_publishers
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
        }
        self.published_stream_ids
            .retain(|_, owner| owner.as_str() != publisher.private_id());
        was_publishing
    }

    fn others(&self, publisher: &ParticipantRef) -> Vec<std::sync::Arc<ParticipantRef>> {
        self.participant_refs()
            .into_iter()
            .filter(|p| p.private_id() != publisher.private_id())
            .collect()
    }
}
