//! Progress notifications for the UI layer.
//!
//! Every event renders to a human-readable line via `Display`, which is what
//! the CLI prints. Library callers can match on the typed event instead.

use std::sync::Arc;

/// Severity of a backend notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational (e.g. local model loading)
    Info,
    /// A transient remote error, the call is being retried
    Transient,
    /// The circuit breaker tripped, work continues on the slower local path
    Degraded,
    /// The run was aborted
    Fatal,
}

/// A single progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A pipeline stage started.
    Stage(String),
    /// A batch finished; `completed / total` is the fraction done for `label`.
    Batch {
        label: String,
        completed: usize,
        total: usize,
    },
    /// A backend notice.
    Notice { level: NoticeLevel, message: String },
}

impl ProgressEvent {
    /// Fraction of batches completed, for `Batch` events.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Batch { completed, total, .. } if *total > 0 => {
                Some(*completed as f64 / *total as f64)
            }
            _ => None,
        }
    }

    pub(crate) fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self::Notice {
            level,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(message) => write!(f, "{message}"),
            Self::Batch {
                label,
                completed,
                total,
            } => {
                let pct = if *total == 0 { 100 } else { completed * 100 / total };
                write!(f, "{label}: {pct}% ({completed}/{total})")
            }
            Self::Notice { level, message } => match level {
                NoticeLevel::Info => write!(f, "{message}"),
                NoticeLevel::Transient => write!(f, "[retrying] {message}"),
                NoticeLevel::Degraded => write!(f, "[degraded] {message}"),
                NoticeLevel::Fatal => write!(f, "[fatal] {message}"),
            },
        }
    }
}

/// Receiver of progress events.
///
/// Implemented for any `Fn(&ProgressEvent)` closure.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event);
    }
}

/// Shared handle to a progress sink.
pub type SharedProgress = Arc<dyn ProgressSink>;

/// A sink that drops every event.
#[must_use]
pub fn silent() -> SharedProgress {
    Arc::new(|_: &ProgressEvent| {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_rendering_and_fraction() {
        let event = ProgressEvent::Batch {
            label: "Embedding batches".to_string(),
            completed: 1,
            total: 4,
        };
        assert_eq!(event.to_string(), "Embedding batches: 25% (1/4)");
        assert_eq!(event.fraction(), Some(0.25));
    }

    #[test]
    fn test_notice_levels_are_distinguishable() {
        let transient = ProgressEvent::notice(NoticeLevel::Transient, "HTTP 503");
        let degraded = ProgressEvent::notice(NoticeLevel::Degraded, "switched");
        assert!(transient.to_string().starts_with("[retrying]"));
        assert!(degraded.to_string().starts_with("[degraded]"));
        assert_eq!(degraded.fraction(), None);
    }

    #[test]
    fn test_closure_sink() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: SharedProgress = Arc::new(move |e: &ProgressEvent| {
            sink_seen.lock().unwrap().push(e.to_string());
        });
        sink.report(&ProgressEvent::Stage("Finalizing results...".into()));
        assert_eq!(seen.lock().unwrap().as_slice(), ["Finalizing results..."]);
    }
}
