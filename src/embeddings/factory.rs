//! Backend factory.
//!
//! Builds the resilience controller from resolved settings. In auto mode the
//! remote and local models must produce vectors of the same size, since a
//! run may mix rows from both once the breaker opens.

use tracing::info;

use super::backend::{BoxedBackend, EmbeddingBackend};
use super::local::LocalBackend;
use super::remote::RemoteBackend;
use super::resilience::ResilienceController;
use super::types::OperatingMode;
use crate::config::MatchSettings;
use crate::error::{Error, Result};

/// Create the remote backend, or `None` when no credential is configured.
pub fn create_remote_backend(settings: &MatchSettings) -> Result<Option<BoxedBackend>> {
    match RemoteBackend::new(settings.remote_options()) {
        Ok(backend) => Ok(Some(BoxedBackend::new(backend))),
        Err(Error::MissingCredential) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create the local backend. The model itself loads on first use.
#[must_use]
pub fn create_local_backend(settings: &MatchSettings) -> BoxedBackend {
    BoxedBackend::new(LocalBackend::new(Some(settings.local_model.clone())))
}

/// Build the controller that routes batches for a run.
pub fn create_controller(settings: &MatchSettings) -> Result<ResilienceController> {
    let remote = if settings.mode.uses_remote() {
        create_remote_backend(settings)?
    } else {
        None
    };
    let local = create_local_backend(settings);

    if let (OperatingMode::Auto, Some(remote)) = (settings.mode, &remote) {
        let (r, l) = (remote.info(), local.info());
        if r.dimensions != l.dimensions {
            return Err(Error::Config(format!(
                "auto mode needs matching vector sizes, but {} gives {} and local {} gives {}; \
                 set LOCAL_EMBEDDING_MODEL to match EMBEDDING_MODEL or pin the mode",
                r.model, r.dimensions, l.model, l.dimensions
            )));
        }
    }

    info!(
        mode = %settings.mode,
        remote = remote.is_some(),
        local_model = %settings.local_model,
        "Embedding backends configured"
    );

    Ok(ResilienceController::new(
        settings.mode,
        settings.max_failures,
        remote,
        local,
    ))
}
