//! Mock collaborators shared by the session-core integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use mediaroute_session_core::{
    EventRecorder, FilterSubsystem, IceCandidate, MediaPipeline, Participant, ParticipantFactory,
    ParticipantMedia, PipelineError, PipelineErrorEvent, PipelineErrorSender, PipelineFactory,
    Session, SessionCollaborators, SessionConfig, SessionEventSink, SessionId,
};

// ---- pipeline ----

pub struct MockPipeline {
    id: String,
    listeners: Mutex<Vec<PipelineErrorSender>>,
    pub latency_stats: AtomicBool,
}

impl MockPipeline {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            listeners: Mutex::new(Vec::new()),
            latency_stats: AtomicBool::new(false),
        }
    }

    /// Simulate an engine-side error on this pipeline
    pub fn emit_error(&self, event: PipelineErrorEvent) {
        for listener in self.listeners.lock().iter() {
            let _ = listener.send(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_error_listener(&self, listener: PipelineErrorSender) {
        self.listeners.lock().push(listener);
    }

    async fn set_latency_stats(&self, enabled: bool) -> Result<(), PipelineError> {
        self.latency_stats.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPipelineFactory {
    pub create_delay: Duration,
    pub fail_create: bool,
    pub fail_release: bool,
    pub create_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub created: Mutex<Vec<Arc<MockPipeline>>>,
}

impl MockPipelineFactory {
    pub fn succeeding_after(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn last_pipeline(&self) -> Option<Arc<MockPipeline>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl PipelineFactory for MockPipelineFactory {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, PipelineError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create {
            return Err(PipelineError::Creation("media server unreachable".to_string()));
        }
        let pipeline = Arc::new(MockPipeline::new(format!("pipeline-{}", call)));
        self.created.lock().push(pipeline.clone());
        Ok(pipeline)
    }

    async fn release_pipeline(
        &self,
        _pipeline: Arc<dyn MediaPipeline>,
    ) -> Result<(), PipelineError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(PipelineError::Release("pipeline already gone".to_string()));
        }
        Ok(())
    }

    async fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- participant media ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Subscribe { subscriber: String, publisher: String },
    CancelReceiving { subscriber: String, sender: String, reason: String },
    Close { participant: String, reason: String },
}

pub type MediaLog = Arc<Mutex<Vec<MediaCall>>>;

pub struct MockParticipantMedia {
    public_id: String,
    log: MediaLog,
}

#[async_trait]
impl ParticipantMedia for MockParticipantMedia {
    async fn get_new_or_existing_subscriber(&self, publisher_public_id: &str) {
        self.log.lock().push(MediaCall::Subscribe {
            subscriber: self.public_id.clone(),
            publisher: publisher_public_id.to_string(),
        });
    }

    async fn cancel_receiving_media(&self, sender_public_id: &str, reason: &str) {
        self.log.lock().push(MediaCall::CancelReceiving {
            subscriber: self.public_id.clone(),
            sender: sender_public_id.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn close(&self, reason: &str) {
        self.log.lock().push(MediaCall::Close {
            participant: self.public_id.clone(),
            reason: reason.to_string(),
        });
    }
}

#[derive(Default)]
pub struct MockParticipantFactory {
    pub log: MediaLog,
    pub bound_pipelines: Mutex<Vec<(String, String)>>,
    /// Blocks every call after the first, simulating a slow media server
    pub later_call_delay: Duration,
    calls: AtomicUsize,
}

impl MockParticipantFactory {
    pub fn slow_after_first(delay: Duration) -> Self {
        Self {
            later_call_delay: delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.log.lock().clone()
    }
}

impl ParticipantFactory for MockParticipantFactory {
    fn create_participant(
        &self,
        _session_id: &SessionId,
        participant: &Participant,
        pipeline: Arc<dyn MediaPipeline>,
    ) -> Arc<dyn ParticipantMedia> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 && !self.later_call_delay.is_zero() {
            std::thread::sleep(self.later_call_delay);
        }
        self.bound_pipelines
            .lock()
            .push((participant.public_id.clone(), pipeline.id().to_string()));
        Arc::new(MockParticipantMedia {
            public_id: participant.public_id.clone(),
            log: self.log.clone(),
        })
    }
}

// ---- recorder ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Joined { session_id: SessionId, participant: String },
    Left { session_id: SessionId, participant: String, reason: String },
    PublishStarted { participant: String },
    PublishStopped { participant: String, reason: String },
    SessionDestroyed { session_id: SessionId, reason: String },
}

#[derive(Default)]
pub struct MockRecorder {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl MockRecorder {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventRecorder for MockRecorder {
    async fn record_joined(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        _timestamp: DateTime<Utc>,
    ) {
        self.events.lock().push(RecordedEvent::Joined {
            session_id: session_id.clone(),
            participant: participant_public_id.to_string(),
        });
    }

    async fn record_left(
        &self,
        session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        _timestamp: DateTime<Utc>,
    ) {
        self.events.lock().push(RecordedEvent::Left {
            session_id: session_id.clone(),
            participant: participant_public_id.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn record_publish_started(
        &self,
        _session_id: &SessionId,
        participant_public_id: &str,
        _timestamp: DateTime<Utc>,
    ) {
        self.events.lock().push(RecordedEvent::PublishStarted {
            participant: participant_public_id.to_string(),
        });
    }

    async fn record_publish_stopped(
        &self,
        _session_id: &SessionId,
        participant_public_id: &str,
        reason: &str,
        _timestamp: DateTime<Utc>,
    ) {
        self.events.lock().push(RecordedEvent::PublishStopped {
            participant: participant_public_id.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn record_session_destroyed(
        &self,
        session_id: &SessionId,
        _start_time: DateTime<Utc>,
        reason: &str,
        _timestamp: DateTime<Utc>,
    ) {
        self.events.lock().push(RecordedEvent::SessionDestroyed {
            session_id: session_id.clone(),
            reason: reason.to_string(),
        });
    }
}

// ---- event sink ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    IceCandidate { participant_id: String, endpoint_name: String, candidate: IceCandidate },
    MediaError { participant_id: String, description: String },
    PipelineError { roster: Vec<String>, description: String },
}

#[derive(Default)]
pub struct MockEventSink {
    pub events: Mutex<Vec<SinkEvent>>,
}

impl MockEventSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Poll until `count` events arrived or a second passed
    pub async fn wait_for_events(&self, count: usize) -> Vec<SinkEvent> {
        for _ in 0..100 {
            if self.events.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.events()
    }
}

#[async_trait]
impl SessionEventSink for MockEventSink {
    async fn on_ice_candidate(
        &self,
        _session_id: &SessionId,
        participant_id: &str,
        endpoint_name: &str,
        candidate: IceCandidate,
    ) {
        self.events.lock().push(SinkEvent::IceCandidate {
            participant_id: participant_id.to_string(),
            endpoint_name: endpoint_name.to_string(),
            candidate,
        });
    }

    async fn on_media_error(
        &self,
        _session_id: &SessionId,
        participant_id: &str,
        description: &str,
    ) {
        self.events.lock().push(SinkEvent::MediaError {
            participant_id: participant_id.to_string(),
            description: description.to_string(),
        });
    }

    async fn on_pipeline_error(
        &self,
        _session_id: &SessionId,
        participants: Vec<Participant>,
        description: &str,
    ) {
        let mut roster: Vec<String> = participants.into_iter().map(|p| p.public_id).collect();
        roster.sort();
        self.events.lock().push(SinkEvent::PipelineError {
            roster,
            description: description.to_string(),
        });
    }
}

// ---- filters ----

#[derive(Default)]
pub struct MockFilters {
    pub released: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<(String, String, String)>>,
}

impl MockFilters {
    pub fn updates_for(&self, public_id: &str) -> Vec<(String, String)> {
        let mut updates: Vec<(String, String)> = self
            .updates
            .lock()
            .iter()
            .filter(|(participant, _, _)| participant == public_id)
            .map(|(_, filter, state)| (filter.clone(), state.clone()))
            .collect();
        updates.sort();
        updates
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl FilterSubsystem for MockFilters {
    async fn release_all_filters(&self, participant: &Participant) {
        self.released.lock().push(participant.public_id.clone());
    }

    async fn update_filter(
        &self,
        _session_id: &SessionId,
        participant: &Participant,
        filter_id: &str,
        state: &str,
    ) {
        self.updates
            .lock()
            .push((participant.public_id.clone(), filter_id.to_string(), state.to_string()));
    }
}

// ---- tracing ----

/// Route session logs to the test output. `RUST_LOG` overrides the default
/// of session debug lines plus call-detail records.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mediaroute_session_core=debug,cdr=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// In-memory log sink for asserting on emitted lines
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ---- harness ----

pub struct Harness {
    pub factory: Arc<MockPipelineFactory>,
    pub media: Arc<MockParticipantFactory>,
    pub recorder: Arc<MockRecorder>,
    pub sink: Arc<MockEventSink>,
    pub filters: Arc<MockFilters>,
}

impl Harness {
    pub fn new(factory: MockPipelineFactory) -> Self {
        Self::with_media(factory, MockParticipantFactory::default())
    }

    pub fn with_media(factory: MockPipelineFactory, media: MockParticipantFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            media: Arc::new(media),
            recorder: Arc::new(MockRecorder::default()),
            sink: Arc::new(MockEventSink::default()),
            filters: Arc::new(MockFilters::default()),
        }
    }

    pub fn collaborators(&self) -> SessionCollaborators {
        SessionCollaborators {
            pipeline_factory: self.factory.clone(),
            participant_factory: self.media.clone(),
            recorder: self.recorder.clone(),
            event_sink: self.sink.clone(),
            filters: self.filters.clone(),
        }
    }

    pub fn session(&self, session_id: &str) -> Arc<Session> {
        self.session_with_config(session_id, SessionConfig::default())
    }

    pub fn session_with_config(&self, session_id: &str, config: SessionConfig) -> Arc<Session> {
        Arc::new(Session::new(SessionId::from(session_id), config, self.collaborators()))
    }
}

pub fn participant(n: u32) -> Participant {
    Participant::new(format!("priv-{}", n), format!("P{}", n))
}
