//! Local CPU embedding backend.
//!
//! The CPU path used when the remote API is unavailable or when the operator
//! forces local mode. The default model runs through fastembed (ONNX) and
//! produces the same vectors as the remote default; Model2Vec static models
//! can be selected for faster `local-only` runs. The model is loaded lazily on first use and cached for
//! the lifetime of the backend; concurrent first callers wait on the same
//! initialisation instead of loading the model twice. Loading and encoding
//! run on the blocking pool so the scheduler stays responsive.

use std::sync::{Arc, Mutex};

use fastembed::{InitOptions, TextEmbedding};
use model2vec_rs::model::StaticModel;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::backend::{EmbeddingBackend, normalize_in_place};
use super::prepare::{CleanMode, prepare};
use super::progress::{NoticeLevel, ProgressEvent, ProgressSink};
use super::types::local_models::{self, LocalEngine};
use super::types::{BackendInfo, BackendKind};
use crate::error::{Error, Result};

/// A loaded sentence encoder.
pub trait SentenceEncoder: Send + Sync {
    /// Encode sentences into one vector each.
    fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl SentenceEncoder for StaticModel {
    fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(StaticModel::encode(self, sentences))
    }
}

/// fastembed's `embed` needs `&mut self`, so calls are serialised.
struct FastEmbedEncoder(Mutex<TextEmbedding>);

impl SentenceEncoder for FastEmbedEncoder {
    fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .0
            .lock()
            .map_err(|e| Error::LocalModel(format!("Failed to acquire model lock: {e}")))?;
        model
            .embed(sentences.to_vec(), None)
            .map_err(|e| Error::LocalModel(format!("Local encoding failed: {e}")))
    }
}

/// Loads an encoder by model name. Runs on the blocking pool.
pub type EncoderLoader = Arc<dyn Fn(&str) -> Result<Arc<dyn SentenceEncoder>> + Send + Sync>;

fn fastembed_model(model_name: &str) -> Result<fastembed::EmbeddingModel> {
    match model_name {
        "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => {
            Ok(fastembed::EmbeddingModel::BGELargeENV15)
        }
        "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => {
            Ok(fastembed::EmbeddingModel::BGEBaseENV15)
        }
        other => Err(Error::LocalModel(format!("No fastembed build of '{other}'"))),
    }
}

fn load_fastembed(model_name: &str) -> Result<Arc<dyn SentenceEncoder>> {
    let mut options =
        InitOptions::new(fastembed_model(model_name)?).with_show_download_progress(false);
    if let Some(dir) = crate::config::global_config_dir() {
        let models_dir = dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            Error::LocalModel(format!("Failed to create {}: {e}", models_dir.display()))
        })?;
        options = options.with_cache_dir(models_dir);
    }

    let model = TextEmbedding::try_new(options).map_err(|e| {
        Error::LocalModel(format!("Failed to load fastembed model '{model_name}': {e}"))
    })?;

    Ok(Arc::new(FastEmbedEncoder(Mutex::new(model))))
}

/// Load whichever runtime serves `model_name`.
fn load_encoder(model_name: &str) -> Result<Arc<dyn SentenceEncoder>> {
    match local_models::engine(model_name) {
        LocalEngine::FastEmbed => load_fastembed(model_name),
        LocalEngine::Model2Vec => load_model2vec(model_name),
    }
}

fn load_model2vec(model_name: &str) -> Result<Arc<dyn SentenceEncoder>> {
    let model = StaticModel::from_pretrained(
        model_name,
        None,       // No HF token needed for public models
        Some(true), // Unit-normalised output
        None,       // No subfolder
    )
    .map_err(|e| Error::LocalModel(format!("Failed to load Model2Vec model '{model_name}': {e}")))?;

    Ok(Arc::new(model))
}

/// Local CPU embedding backend.
pub struct LocalBackend {
    model_name: String,
    dimensions: usize,
    loader: EncoderLoader,
    encoder: OnceCell<Arc<dyn SentenceEncoder>>,
}

impl LocalBackend {
    /// Create a local backend for a registered or Model2Vec model.
    ///
    /// Nothing is loaded until the first `embed` call.
    #[must_use]
    pub fn new(model_name: Option<String>) -> Self {
        let model_name = model_name.unwrap_or_else(|| local_models::default_config().name);
        let dimensions = local_models::get_config(&model_name).dimensions;
        Self::with_loader(model_name, dimensions, Arc::new(load_encoder))
    }

    /// Create a local backend with a custom encoder loader.
    #[must_use]
    pub fn with_loader(model_name: String, dimensions: usize, loader: EncoderLoader) -> Self {
        Self {
            model_name,
            dimensions,
            loader,
            encoder: OnceCell::new(),
        }
    }

    /// Whether the model has been loaded already.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.encoder.initialized()
    }

    async fn encoder(&self, progress: &dyn ProgressSink) -> Result<Arc<dyn SentenceEncoder>> {
        let encoder = self
            .encoder
            .get_or_try_init(|| async {
                info!(model = %self.model_name, "Loading local embedding model");
                progress.report(&ProgressEvent::notice(
                    NoticeLevel::Info,
                    format!(
                        "Loading local embedding model ({}). First-time loading may need to download the model.",
                        self.model_name
                    ),
                ));

                let loader = Arc::clone(&self.loader);
                let name = self.model_name.clone();
                let encoder = tokio::task::spawn_blocking(move || loader(&name))
                    .await
                    .map_err(|e| Error::LocalModel(format!("model load task failed: {e}")))??;

                progress.report(&ProgressEvent::notice(
                    NoticeLevel::Info,
                    "Local embedding model loaded.",
                ));
                Ok::<_, Error>(encoder)
            })
            .await?;

        Ok(Arc::clone(encoder))
    }
}

impl EmbeddingBackend for LocalBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Local,
            name: match local_models::engine(&self.model_name) {
                LocalEngine::FastEmbed => "fastembed",
                LocalEngine::Model2Vec => "model2vec",
            }
            .to_string(),
            model: self.model_name.clone(),
            dimensions: self.dimensions,
        }
    }

    async fn embed(&self, texts: &[String], progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>> {
        let sentences = prepare(texts, CleanMode::Minimal);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let encoder = self.encoder(progress).await?;
        let expected = sentences.len();

        let mut rows = tokio::task::spawn_blocking(move || encoder.encode(&sentences))
            .await
            .map_err(|e| Error::LocalModel(format!("encode task failed: {e}")))??;

        if rows.len() != expected {
            return Err(Error::LocalModel(format!(
                "model returned {} embeddings for {expected} texts",
                rows.len()
            )));
        }

        for row in &mut rows {
            normalize_in_place(row);
        }

        debug!(batch_len = expected, "Local embedding batch done");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::progress::silent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthEncoder;

    impl SentenceEncoder for LengthEncoder {
        #[allow(clippy::cast_precision_loss)]
        fn encode(&self, sentences: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(sentences
                .iter()
                .map(|s| vec![s.len() as f32, 1.0])
                .collect())
        }
    }

    fn counting_backend(loads: &Arc<AtomicUsize>) -> LocalBackend {
        let loads = Arc::clone(loads);
        LocalBackend::with_loader(
            "test/length".to_string(),
            2,
            Arc::new(move |_: &str| {
                loads.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Arc::new(LengthEncoder) as Arc<dyn SentenceEncoder>)
            }),
        )
    }

    #[test]
    fn test_default_model_config() {
        let backend = LocalBackend::new(None);
        let info = backend.info();
        assert_eq!(info.kind, BackendKind::Local);
        assert_eq!(info.name, "fastembed");
        assert_eq!(info.model, "BAAI/bge-large-en-v1.5");
        assert_eq!(info.dimensions, 1024);
        assert!(!backend.is_loaded());

        let static_model = LocalBackend::new(Some("minishlab/potion-base-8M".to_string()));
        assert_eq!(static_model.info().name, "model2vec");
        assert_eq!(static_model.info().dimensions, 256);
    }

    #[test]
    fn test_fastembed_model_lookup() {
        assert!(matches!(
            fastembed_model("BAAI/bge-large-en-v1.5"),
            Ok(fastembed::EmbeddingModel::BGELargeENV15)
        ));
        assert!(matches!(
            fastembed_model("minishlab/potion-base-8M"),
            Err(Error::LocalModel(_))
        ));
    }

    #[tokio::test]
    async fn test_encode_failure_is_local_model_error() {
        struct Broken;
        impl SentenceEncoder for Broken {
            fn encode(&self, _sentences: &[String]) -> Result<Vec<Vec<f32>>> {
                Err(Error::LocalModel("onnx session failed".into()))
            }
        }

        let backend = LocalBackend::with_loader(
            "test/broken".to_string(),
            2,
            Arc::new(|_: &str| Ok(Arc::new(Broken) as Arc<dyn SentenceEncoder>)),
        );
        let sink = silent();
        let err = backend.embed(&["x".to_string()], sink.as_ref()).await.unwrap_err();
        assert!(matches!(err, Error::LocalModel(_)));
        assert!(!err.is_remote());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(counting_backend(&loads));

        let mut handles = Vec::new();
        for i in 0..8 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                let sink = silent();
                backend.embed(&[format!("text {i}")], sink.as_ref()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(backend.is_loaded());
    }

    #[tokio::test]
    async fn test_rows_are_normalized_and_text_minimally_cleaned() {
        let loads = Arc::new(AtomicUsize::new(0));
        let backend = counting_backend(&loads);
        let sink = silent();

        let rows = backend
            .embed(&["  ab   c ".to_string()], sink.as_ref())
            .await
            .unwrap();

        // "ab c" has length 4 -> [4, 1] normalised
        let norm = (17.0_f32).sqrt();
        assert!((rows[0][0] - 4.0 / norm).abs() < 1e-6);
        assert!((rows[0][1] - 1.0 / norm).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_load_failure_is_fatal_error() {
        let backend = LocalBackend::with_loader(
            "missing/model".to_string(),
            256,
            Arc::new(|name: &str| Err(Error::LocalModel(format!("cannot fetch {name}")))),
        );
        let sink = silent();
        let err = backend
            .embed(&["x".to_string()], sink.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocalModel(_)));
        assert!(!backend.is_loaded());
    }

    #[tokio::test]
    async fn test_loading_notice_is_reported() {
        use std::sync::Mutex;

        let loads = Arc::new(AtomicUsize::new(0));
        let backend = counting_backend(&loads);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = move |e: &ProgressEvent| sink_seen.lock().unwrap().push(e.to_string());

        backend.embed(&["a".to_string()], &sink).await.unwrap();
        backend.embed(&["b".to_string()], &sink).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "load notices are emitted once: {seen:?}");
        assert!(seen[0].starts_with("Loading local embedding model"));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_model_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let backend = counting_backend(&loads);
        let sink = silent();
        let rows = backend.embed(&[], sink.as_ref()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }
}
