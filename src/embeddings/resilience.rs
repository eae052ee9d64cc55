//! Circuit breaker between the remote and local backends.
//!
//! The controller routes every batch according to the operating mode:
//!
//! | mode         | routing                                                   |
//! |--------------|-----------------------------------------------------------|
//! | `auto`       | remote until `threshold` consecutive failures, then local |
//! | `api-only`   | remote only, errors propagate                             |
//! | `local-only` | local only                                                |
//! | `disabled`   | remote only, errors propagate                             |
//!
//! In auto mode a remote failure below the threshold is returned to the
//! caller, which may resend the batch (see
//! [`EmbeddingBackend::resubmit_budget`]). Once the breaker trips it stays
//! open until [`ResilienceController::reset`], which the run orchestrator
//! calls at the start of every run.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use super::backend::{BoxedBackend, EmbeddingBackend};
use super::progress::{NoticeLevel, ProgressEvent, ProgressSink};
use super::types::{BackendInfo, OperatingMode};
use crate::error::{Error, Result};

/// Default number of consecutive remote failures before falling back.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    fallback_active: bool,
}

/// Outcome of recording a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureOutcome {
    /// Still below the threshold; the error propagates.
    Counted(u32),
    /// This call flipped the breaker.
    Tripped(u32),
    /// Another call flipped the breaker first.
    AlreadyOpen,
}

/// Breaker counters shared by every batch of a run.
///
/// All mutation happens under one mutex, so the failure count and the
/// transition to fallback are observed atomically.
#[derive(Debug, Default)]
pub struct ResilienceState {
    inner: Mutex<BreakerState>,
}

impl ResilienceState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State is two plain fields, so a poisoned lock is still consistent.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Zero the failure count and close the breaker.
    pub fn reset(&self) {
        *self.lock() = BreakerState::default();
    }

    #[must_use]
    pub fn fallback_active(&self) -> bool {
        self.lock().fallback_active
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn activate_fallback(&self) {
        self.lock().fallback_active = true;
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if !state.fallback_active {
            state.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, threshold: u32) -> FailureOutcome {
        let mut state = self.lock();
        if state.fallback_active {
            return FailureOutcome::AlreadyOpen;
        }
        state.consecutive_failures += 1;
        if state.consecutive_failures >= threshold {
            state.fallback_active = true;
            FailureOutcome::Tripped(state.consecutive_failures)
        } else {
            FailureOutcome::Counted(state.consecutive_failures)
        }
    }
}

/// Point-in-time view of the breaker for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResilienceSnapshot {
    pub mode: OperatingMode,
    pub consecutive_failures: u32,
    pub fallback_active: bool,
}

/// Routes embedding batches between the remote and local backends.
pub struct ResilienceController {
    mode: OperatingMode,
    threshold: u32,
    state: Arc<ResilienceState>,
    remote: Option<BoxedBackend>,
    local: BoxedBackend,
}

impl ResilienceController {
    /// Create a controller.
    ///
    /// `remote` is `None` when no credential is configured; modes that need
    /// it then fail in [`check_ready`](Self::check_ready).
    #[must_use]
    pub fn new(
        mode: OperatingMode,
        threshold: u32,
        remote: Option<BoxedBackend>,
        local: BoxedBackend,
    ) -> Self {
        Self {
            mode,
            threshold: threshold.max(1),
            state: Arc::new(ResilienceState::new()),
            remote,
            local,
        }
    }

    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> &Arc<ResilienceState> {
        &self.state
    }

    /// Metadata of the remote backend, if configured.
    #[must_use]
    pub fn remote_info(&self) -> Option<BackendInfo> {
        self.remote.as_ref().map(EmbeddingBackend::info)
    }

    #[must_use]
    pub fn local_info(&self) -> BackendInfo {
        self.local.info()
    }

    /// Fail fast when the mode needs a remote backend that isn't configured.
    pub fn check_ready(&self) -> Result<()> {
        if self.mode.uses_remote() && self.remote.is_none() {
            return Err(Error::MissingCredential);
        }
        Ok(())
    }

    /// Re-arm the breaker for a new run.
    pub fn reset(&self) {
        self.state.reset();
        debug!(mode = %self.mode, "Resilience state reset");
    }

    #[must_use]
    pub fn snapshot(&self) -> ResilienceSnapshot {
        let state = self.state.lock();
        ResilienceSnapshot {
            mode: self.mode,
            consecutive_failures: state.consecutive_failures,
            fallback_active: state.fallback_active,
        }
    }

    fn remote(&self) -> Result<&BoxedBackend> {
        self.remote.as_ref().ok_or(Error::MissingCredential)
    }

    async fn embed_auto(
        &self,
        texts: &[String],
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Vec<f32>>> {
        if self.state.fallback_active() {
            return self.local.embed(texts, progress).await;
        }

        let error = match self.remote()?.embed(texts, progress).await {
            Ok(rows) => {
                self.state.record_success();
                return Ok(rows);
            }
            Err(e) => e,
        };

        match self.state.record_failure(self.threshold) {
            FailureOutcome::Counted(failures) => {
                warn!(failures, threshold = self.threshold, error = %error, "Remote embedding failed");
                Err(error)
            }
            FailureOutcome::Tripped(failures) => {
                warn!(failures, error = %error, "Remote embeddings unavailable, switching to local model");
                progress.report(&ProgressEvent::notice(
                    NoticeLevel::Degraded,
                    format!(
                        "API failed after {failures} attempts. Switching to local CPU processing. \
                         Processing {} items may take several minutes.",
                        texts.len()
                    ),
                ));
                self.local.embed(texts, progress).await
            }
            FailureOutcome::AlreadyOpen => self.local.embed(texts, progress).await,
        }
    }
}

impl EmbeddingBackend for ResilienceController {
    fn info(&self) -> BackendInfo {
        match (self.mode, &self.remote) {
            (OperatingMode::LocalOnly, _) | (_, None) => self.local.info(),
            (OperatingMode::Auto, Some(_)) if self.state.fallback_active() => self.local.info(),
            (_, Some(remote)) => remote.info(),
        }
    }

    async fn embed(&self, texts: &[String], progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>> {
        match self.mode {
            OperatingMode::LocalOnly => {
                self.state.activate_fallback();
                self.local.embed(texts, progress).await
            }
            OperatingMode::ApiOnly | OperatingMode::Disabled => {
                self.remote()?.embed(texts, progress).await
            }
            OperatingMode::Auto => self.embed_auto(texts, progress).await,
        }
    }

    /// A remote failure below the threshold in auto mode may be resent until
    /// the breaker opens; the resend after that is served locally.
    fn resubmit_budget(&self, error: &Error) -> u32 {
        if self.mode == OperatingMode::Auto && error.is_remote() {
            self.threshold - 1
        } else {
            0
        }
    }
}
