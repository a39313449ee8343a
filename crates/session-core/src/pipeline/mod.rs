//! Media pipeline abstraction
//!
//! A pipeline is the media-routing graph the external engine keeps for one
//! session. This crate never looks inside it: it only asks a
//! [`PipelineFactory`] to create and release it, and listens for the
//! asynchronous errors the engine reports on it.
//!
//! [`PipelineLifecycle`] guarantees that at most one pipeline is created per
//! session and that every caller waiting for it observes the same outcome.

pub mod lifecycle;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use lifecycle::PipelineLifecycle;

/// Errors reported by the external media engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline creation failed: {0}")]
    Creation(String),

    #[error("Pipeline release failed: {0}")]
    Release(String),

    #[error("Media engine error: {0}")]
    Engine(String),
}

/// Asynchronous error raised by a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineErrorEvent {
    pub error_type: String,
    pub description: String,
    pub error_code: i32,
}

impl PipelineErrorEvent {
    pub fn new(
        error_type: impl Into<String>,
        description: impl Into<String>,
        error_code: i32,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            description: description.into(),
            error_code,
        }
    }
}

impl std::fmt::Display for PipelineErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}(errCode={})", self.error_type, self.description, self.error_code)
    }
}

/// Channel end handed to a pipeline so it can report runtime errors
pub type PipelineErrorSender = mpsc::UnboundedSender<PipelineErrorEvent>;

/// Handle to one externally managed media pipeline
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Engine-assigned identifier, used in logs
    fn id(&self) -> &str;

    /// Register a standing listener for asynchronous pipeline errors
    fn add_error_listener(&self, listener: PipelineErrorSender);

    /// Toggle latency statistics collection on the pipeline
    async fn set_latency_stats(&self, enabled: bool) -> Result<(), PipelineError>;
}

/// Client of the external media engine
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, PipelineError>;

    async fn release_pipeline(&self, pipeline: Arc<dyn MediaPipeline>) -> Result<(), PipelineError>;

    /// Tear down the client itself. Only called by sessions that own it.
    async fn destroy(&self) {}
}

/// Lifecycle of a session's pipeline
#[derive(Clone)]
pub enum PipelineState {
    /// Nothing requested yet
    Idle,
    /// Creation requested, waiting for the factory
    Creating,
    Ready(Arc<dyn MediaPipeline>),
    Failed(String),
    /// Terminal
    Released,
}

impl PipelineState {
    /// True once waiters can stop waiting
    pub fn is_settled(&self) -> bool {
        !matches!(self, PipelineState::Idle | PipelineState::Creating)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineState::Ready(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Creating => "Creating",
            PipelineState::Ready(_) => "Ready",
            PipelineState::Failed(_) => "Failed",
            PipelineState::Released => "Released",
        }
    }
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Ready(pipeline) => f.debug_tuple("Ready").field(&pipeline.id()).finish(),
            PipelineState::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
            other => f.write_str(other.name()),
        }
    }
}
