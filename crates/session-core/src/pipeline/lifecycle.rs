//! Pipeline lifecycle manager
//!
//! State moves through a `watch` channel:
//!
//! ```text
//! Idle -> Creating -> Ready | Failed -> Released
//! Idle -> Released            (session closed before anyone joined)
//! ```
//!
//! Creation runs in its own task. Callers only wait on the channel, so a slow
//! factory never holds the creation lock, and a caller giving up does not
//! abandon the external request. If the factory answers after the creation
//! deadline, or after the session already settled, the late pipeline is
//! released straight away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{MediaPipeline, PipelineFactory, PipelineState};
use crate::api::types::SessionId;
use crate::errors::{Result, SessionError};
use crate::events::PipelineErrorForwarder;

pub struct PipelineLifecycle {
    session_id: SessionId,
    factory: Arc<dyn PipelineFactory>,
    timeout: Duration,
    stats_enabled: bool,
    error_forwarder: PipelineErrorForwarder,
    state_tx: Arc<watch::Sender<PipelineState>>,
    /// Guards the single creation request
    create_lock: tokio::sync::Mutex<()>,
    /// Guards the single release request
    release_lock: parking_lot::Mutex<()>,
    release_requested: AtomicBool,
}

impl PipelineLifecycle {
    pub fn new(
        session_id: SessionId,
        factory: Arc<dyn PipelineFactory>,
        timeout: Duration,
        stats_enabled: bool,
        error_forwarder: PipelineErrorForwarder,
    ) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            session_id,
            factory,
            timeout,
            stats_enabled,
            error_forwarder,
            state_tx: Arc::new(state_tx),
            create_lock: tokio::sync::Mutex::new(()),
            release_lock: parking_lot::Mutex::new(()),
            release_requested: AtomicBool::new(false),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    /// The pipeline, if it is ready
    pub fn pipeline(&self) -> Option<Arc<dyn MediaPipeline>> {
        match &*self.state_tx.borrow() {
            PipelineState::Ready(pipeline) => Some(pipeline.clone()),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request creation once, then wait for the outcome.
    pub async fn ensure_pipeline(&self) -> Result<Arc<dyn MediaPipeline>> {
        let current = self.state();
        if current.is_settled() {
            return self.outcome(&current);
        }

        {
            let _guard = self.create_lock.lock().await;
            let requested = self.state_tx.send_if_modified(|state| {
                let released = self.release_requested.load(Ordering::SeqCst);
                if matches!(state, PipelineState::Idle) && !released {
                    *state = PipelineState::Creating;
                    true
                } else {
                    false
                }
            });
            if requested {
                info!("SESSION {}: Creating media pipeline", self.session_id);
                self.spawn_creation();
            }
        }

        self.await_pipeline(self.timeout).await
    }

    /// Wait up to `timeout` for creation to settle.
    pub async fn await_pipeline(&self, timeout: Duration) -> Result<Arc<dyn MediaPipeline>> {
        let mut rx = self.state_tx.subscribe();
        let settled = tokio::time::timeout(timeout, async move {
            let state = rx.wait_for(PipelineState::is_settled).await?;
            Ok::<_, watch::error::RecvError>((*state).clone())
        })
        .await;

        match settled {
            Ok(Ok(state)) => self.outcome(&state),
            Ok(Err(_)) => Err(SessionError::unavailable(
                &self.session_id,
                "pipeline state channel closed",
            )),
            Err(_) => Err(SessionError::unavailable(
                &self.session_id,
                format!("pipeline not ready after {:?}", timeout),
            )),
        }
    }

    /// Release the pipeline once. Failures are logged, never returned.
    pub async fn release_pipeline(&self) {
        let previous = {
            let _guard = self.release_lock.lock();
            if self.release_requested.load(Ordering::SeqCst) {
                return;
            }

            let mut previous = PipelineState::Idle;
            self.state_tx.send_if_modified(|state| {
                // Set while holding the channel lock so a concurrent
                // ensure_pipeline either sees the flag or leaves Creating behind
                self.release_requested.store(true, Ordering::SeqCst);
                previous = state.clone();
                match state {
                    PipelineState::Idle | PipelineState::Failed(_) => {
                        *state = PipelineState::Released;
                        true
                    }
                    _ => false,
                }
            });
            previous
        };

        let pipeline = match previous {
            PipelineState::Ready(pipeline) => pipeline,
            PipelineState::Creating => match self.await_pipeline(self.timeout).await {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    debug!("SESSION {}: No pipeline to release ({})", self.session_id, e);
                    self.mark_released();
                    return;
                }
            },
            PipelineState::Idle | PipelineState::Failed(_) | PipelineState::Released => return,
        };

        debug!("SESSION {}: Releasing pipeline {}", self.session_id, pipeline.id());
        match tokio::time::timeout(self.timeout, self.factory.release_pipeline(pipeline)).await {
            Ok(Ok(())) => debug!("SESSION {}: Released pipeline", self.session_id),
            Ok(Err(e)) => warn!(
                "{}",
                SessionError::release_failed(&self.session_id, e.to_string())
            ),
            Err(_) => warn!(
                "{}",
                SessionError::release_failed(
                    &self.session_id,
                    format!("no answer after {:?}", self.timeout)
                )
            ),
        }
        self.mark_released();
    }

    fn mark_released(&self) {
        self.state_tx.send_modify(|state| *state = PipelineState::Released);
    }

    fn outcome(&self, state: &PipelineState) -> Result<Arc<dyn MediaPipeline>> {
        match state {
            PipelineState::Ready(pipeline) => Ok(pipeline.clone()),
            PipelineState::Failed(reason) => {
                Err(SessionError::unavailable(&self.session_id, reason.clone()))
            }
            PipelineState::Released => Err(SessionError::unavailable(
                &self.session_id,
                "pipeline already released",
            )),
            PipelineState::Idle | PipelineState::Creating => {
                Err(SessionError::unavailable(&self.session_id, "pipeline not created"))
            }
        }
    }

    fn spawn_creation(&self) {
        let session_id = self.session_id.clone();
        let factory = self.factory.clone();
        let state_tx = self.state_tx.clone();
        let timeout = self.timeout;
        let stats_enabled = self.stats_enabled;
        let forwarder = self.error_forwarder.clone();

        tokio::spawn(async move {
            let mut creation = factory.create_pipeline();
            let result = tokio::select! {
                result = &mut creation => result,
                _ = tokio::time::sleep(timeout) => {
                    error!(
                        "SESSION {}: Media pipeline not created after {:?}",
                        session_id, timeout
                    );
                    let reason = format!("pipeline not created after {:?}", timeout);
                    settle(&state_tx, PipelineState::Failed(reason));
                    if let Ok(late) = creation.await {
                        warn!(
                            "SESSION {}: Pipeline {} arrived after the deadline, releasing it",
                            session_id,
                            late.id()
                        );
                        release_orphan(&*factory, late, &session_id).await;
                    }
                    return;
                }
            };

            match result {
                Ok(pipeline) => {
                    if stats_enabled {
                        match pipeline.set_latency_stats(true).await {
                            Ok(()) => debug!("SESSION {}: Media server stats enabled", session_id),
                            Err(e) => warn!(
                                "SESSION {}: Could not enable pipeline stats: {}",
                                session_id, e
                            ),
                        }
                    }
                    forwarder.attach(pipeline.as_ref());
                    if settle(&state_tx, PipelineState::Ready(pipeline.clone())) {
                        debug!("SESSION {}: Created media pipeline {}", session_id, pipeline.id());
                    } else {
                        release_orphan(&*factory, pipeline, &session_id).await;
                    }
                }
                Err(e) => {
                    error!("SESSION {}: Failed to create media pipeline: {}", session_id, e);
                    settle(&state_tx, PipelineState::Failed(e.to_string()));
                }
            }
        });
    }
}

/// Move `Creating` to `outcome`; false if the state already moved on
fn settle(state_tx: &watch::Sender<PipelineState>, outcome: PipelineState) -> bool {
    state_tx.send_if_modified(|state| {
        if matches!(state, PipelineState::Creating) {
            *state = outcome;
            true
        } else {
            false
        }
    })
}

async fn release_orphan(
    factory: &dyn PipelineFactory,
    pipeline: Arc<dyn MediaPipeline>,
    session_id: &SessionId,
) {
    if let Err(e) = factory.release_pipeline(pipeline).await {
        warn!("{}", SessionError::release_failed(session_id, e.to_string()));
    }
}
