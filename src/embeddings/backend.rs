//! Embedding backend trait.
//!
//! Defines the single capability every backend provides: turn a batch of
//! strings into one vector per string, order-aligned with the input.

use std::future::Future;
use std::pin::Pin;

use super::progress::ProgressSink;
use super::types::BackendInfo;
use crate::error::{Error, Result};

/// Trait for embedding backends.
///
/// Implemented by the remote API backend, the local CPU backend and
/// the resilience controller that routes between them.
pub trait EmbeddingBackend: Send + Sync {
    /// Get backend metadata.
    fn info(&self) -> BackendInfo;

    /// Embed a batch of texts.
    ///
    /// Row `i` of the result is the embedding of `texts[i]`.
    fn embed(
        &self,
        texts: &[String],
        progress: &dyn ProgressSink,
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// How many more times a caller may send a batch that failed with `error`.
    ///
    /// Plain backends answer 0. The resilience controller answers non-zero
    /// for remote failures in auto mode, so that repeated failures reach the
    /// breaker threshold instead of aborting the run.
    fn resubmit_budget(&self, _error: &Error) -> u32 {
        0
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed backend for dynamic dispatch.
///
/// Since the trait returns `impl Future`, it is not object-safe; this wrapper
/// lets the controller hold either variant behind one type.
pub struct BoxedBackend {
    inner: Box<dyn EmbeddingBackendBoxed>,
}

/// Object-safe version of `EmbeddingBackend` for boxing.
trait EmbeddingBackendBoxed: Send + Sync {
    fn info(&self) -> BackendInfo;
    fn resubmit_budget(&self, error: &Error) -> u32;
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

impl BoxedBackend {
    /// Create a new boxed backend.
    pub fn new<B: EmbeddingBackend + 'static>(backend: B) -> Self {
        Self {
            inner: Box::new(BoxedBackendWrapper(backend)),
        }
    }
}

impl EmbeddingBackend for BoxedBackend {
    fn info(&self) -> BackendInfo {
        self.inner.info()
    }

    fn embed(
        &self,
        texts: &[String],
        progress: &dyn ProgressSink,
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move { self.inner.embed_boxed(texts, progress).await }
    }

    fn resubmit_budget(&self, error: &Error) -> u32 {
        self.inner.resubmit_budget(error)
    }
}

/// Wrapper to implement `EmbeddingBackendBoxed` for any `EmbeddingBackend`.
struct BoxedBackendWrapper<B: EmbeddingBackend + 'static>(B);

impl<B: EmbeddingBackend + 'static> EmbeddingBackendBoxed for BoxedBackendWrapper<B> {
    fn info(&self) -> BackendInfo {
        self.0.info()
    }

    fn resubmit_budget(&self, error: &Error) -> u32 {
        self.0.resubmit_budget(error)
    }

    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.0.embed(texts, progress))
    }
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
