//! # mediaroute session-core
//!
//! Session orchestration for the mediaroute media server.
//!
//! A [`Session`] is one multi-party room. It owns:
//!
//! - the participant set, safe for concurrent join / leave / iteration,
//! - the single media pipeline of the room, created lazily on first join and
//!   released exactly once on close,
//! - the serialized state of session filters, replayed to late joiners,
//! - publisher bookkeeping that tells every other participant to prepare for,
//!   or stop receiving, a publisher's media.
//!
//! The media engine, the signaling layer, the filter implementations and the
//! CDR transport are injected through the traits in [`pipeline`],
//! [`participant`], [`events`] and [`cdr`].
//!
//! ```ignore
//! let session = Session::new(SessionId::new(), SessionConfig::default(), collaborators);
//! session.join(Participant::new("priv-1", "alice")).await?;
//! session.new_publisher(&Participant::new("priv-1", "alice")).await?;
//! session.close("sessionClosedByServer").await;
//! ```

pub mod api;
pub mod cdr;
pub mod config;
pub mod errors;
pub mod events;
pub mod participant;
pub mod pipeline;
pub mod session;

pub use api::types::{
    IceCandidate, Participant, SessionId, SessionState, RECORDER_PARTICIPANT_PUBLIC_ID,
};
pub use cdr::{CdrEvent, CdrEventName, CdrRecorder, EventRecorder};
pub use config::SessionConfig;
pub use errors::{Result, SessionError};
pub use events::{FilterSubsystem, SessionEventSink};
pub use participant::{ParticipantFactory, ParticipantMedia, ParticipantRef};
pub use pipeline::{
    MediaPipeline, PipelineError, PipelineErrorEvent, PipelineErrorSender, PipelineFactory,
    PipelineLifecycle, PipelineState,
};
pub use session::{Session, SessionCollaborators};
