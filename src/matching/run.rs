//! A single matching run, end to end.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::engine::{MatchResult, MatchStatus, TargetSet, match_embeddings};
use crate::config::MatchSettings;
use crate::embeddings::backend::EmbeddingBackend;
use crate::embeddings::factory::create_controller;
use crate::embeddings::prepare::{CleanMode, prepare};
use crate::embeddings::progress::{NoticeLevel, ProgressEvent, SharedProgress};
use crate::embeddings::resilience::{ResilienceController, ResilienceSnapshot};
use crate::embeddings::scheduler::{BatchPlan, EmbeddingMatrix, run_batches};
use crate::embeddings::types::{BackendInfo, OperatingMode};
use crate::error::{Error, Result};

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// What the caller wants matched.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub inputs: Vec<String>,
    pub targets: Vec<String>,
    pub threshold: f32,
    pub clean_input: bool,
    pub clean_target: bool,
}

impl MatchRequest {
    #[must_use]
    pub fn new(inputs: Vec<String>, targets: Vec<String>) -> Self {
        Self {
            inputs,
            targets,
            threshold: DEFAULT_THRESHOLD,
            clean_input: false,
            clean_target: false,
        }
    }
}

/// One row of the result table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRow {
    pub status: MatchStatus,
    pub input_text: String,
    pub matched_target: Option<String>,
    pub score: f32,
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub total_inputs: usize,
    pub matches: usize,
    pub no_matches: usize,
    /// Mean score over `Match` rows only.
    pub average_match_score: Option<f32>,
    /// The breaker opened and later batches were served locally.
    pub fallback_used: bool,
    /// The operating mode pinned every batch to the local model.
    pub local_forced: bool,
}

impl MatchSummary {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_results(results: &[MatchResult], resilience: &ResilienceSnapshot) -> Self {
        let matched: Vec<f32> = results
            .iter()
            .filter(|r| r.status == MatchStatus::Match)
            .map(|r| r.similarity_score)
            .collect();
        let average_match_score = if matched.is_empty() {
            None
        } else {
            Some(matched.iter().sum::<f32>() / matched.len() as f32)
        };

        Self {
            total_inputs: results.len(),
            matches: matched.len(),
            no_matches: results.len() - matched.len(),
            average_match_score,
            fallback_used: resilience.fallback_active && resilience.mode != OperatingMode::LocalOnly,
            local_forced: resilience.mode == OperatingMode::LocalOnly,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub threshold: f32,
    pub unique_targets: usize,
    pub backend: BackendInfo,
    pub resilience: ResilienceSnapshot,
    pub summary: MatchSummary,
    pub rows: Vec<MatchRow>,
    #[serde(skip)]
    pub results: Vec<MatchResult>,
}

/// Runs matching requests through one controller.
pub struct Matcher {
    controller: Arc<ResilienceController>,
    plan: BatchPlan,
}

impl Matcher {
    #[must_use]
    pub fn new(controller: Arc<ResilienceController>, plan: BatchPlan) -> Self {
        Self { controller, plan }
    }

    /// Build a matcher with backends created from settings.
    pub fn from_settings(settings: &MatchSettings) -> Result<Self> {
        let controller = create_controller(settings)?;
        Ok(Self::new(Arc::new(controller), settings.batch_plan()))
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<ResilienceController> {
        &self.controller
    }

    /// Match `request.inputs` against `request.targets`.
    ///
    /// A failure is reported on `progress` as a fatal notice before it is
    /// returned.
    pub async fn run(&self, request: MatchRequest, progress: SharedProgress) -> Result<MatchReport> {
        let result = self.execute(request, &progress).await;
        if let Err(e) = &result {
            error!(error = %e, "Match run aborted");
            progress.report(&ProgressEvent::Notice {
                level: NoticeLevel::Fatal,
                message: format!("Run aborted: {e}"),
            });
        }
        result
    }

    async fn execute(&self, request: MatchRequest, progress: &SharedProgress) -> Result<MatchReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        if !(0.0..=1.0).contains(&request.threshold) {
            return Err(Error::InvalidArgument(format!(
                "threshold must be between 0 and 1, got {}",
                request.threshold
            )));
        }
        self.controller.check_ready()?;
        self.controller.reset();

        info!(
            run_id = %run_id,
            inputs = request.inputs.len(),
            targets = request.targets.len(),
            mode = %self.controller.mode(),
            "Starting match run"
        );

        let embed_mode = |clean: bool| if clean { CleanMode::Minimal } else { CleanMode::None };
        let display_mode = |clean: bool| if clean { CleanMode::LightClean } else { CleanMode::None };

        let target_set = TargetSet::dedup(&request.targets);
        let target_texts: Arc<[String]> =
            prepare(target_set.labels(), embed_mode(request.clean_target)).into();
        let input_texts: Arc<[String]> =
            prepare(&request.inputs, embed_mode(request.clean_input)).into();

        progress.report(&ProgressEvent::Stage(format!(
            "Data prepared: {} inputs, {} targets",
            request.inputs.len(),
            target_set.len()
        )));

        progress.report(&ProgressEvent::Stage(
            "Computing target embeddings...".to_string(),
        ));
        let target_matrix = self
            .embed_side(target_texts, progress, "Target embeddings")
            .await?;

        progress.report(&ProgressEvent::Stage(
            "Computing input embeddings...".to_string(),
        ));
        let input_matrix = self
            .embed_side(input_texts, progress, "Input embeddings")
            .await?;

        progress.report(&ProgressEvent::Stage("Matching...".to_string()));
        let threshold = request.threshold;
        let (results, target_set) = tokio::task::spawn_blocking(move || {
            match_embeddings(&input_matrix, &target_matrix, &target_set, threshold)
                .map(|results| (results, target_set))
        })
        .await
        .map_err(|e| Error::Other(format!("matching task failed: {e}")))??;

        progress.report(&ProgressEvent::Stage("Finalizing results...".to_string()));

        let input_display = prepare(&request.inputs, display_mode(request.clean_input));
        let target_display = prepare(&request.targets, display_mode(request.clean_target));
        let rows = results
            .iter()
            .map(|r| MatchRow {
                status: r.status,
                input_text: input_display[r.input_index].clone(),
                matched_target: r.best_target_index.map(|i| target_display[i].clone()),
                score: r.similarity_score,
            })
            .collect();

        let resilience = self.controller.snapshot();
        let summary = MatchSummary::from_results(&results, &resilience);

        info!(
            run_id = %run_id,
            matches = summary.matches,
            no_matches = summary.no_matches,
            fallback = summary.fallback_used,
            local_forced = summary.local_forced,
            "Match run finished"
        );

        Ok(MatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            threshold,
            unique_targets: target_set.len(),
            backend: self.controller.info(),
            resilience,
            summary,
            rows,
            results,
        })
    }

    /// Embed one side. Batches finished before a fallback keep their rows.
    async fn embed_side(
        &self,
        texts: Arc<[String]>,
        progress: &SharedProgress,
        label: &str,
    ) -> Result<EmbeddingMatrix> {
        run_batches(
            texts,
            self.plan,
            Arc::clone(&self.controller),
            Arc::clone(progress),
            label,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::backend::BoxedBackend;
    use crate::embeddings::backend::testing::MockBackend;
    use crate::embeddings::progress::silent;
    use crate::embeddings::types::BackendKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Shared(Arc<MockBackend>);

    impl EmbeddingBackend for Shared {
        fn info(&self) -> BackendInfo {
            self.0.info()
        }

        async fn embed(
            &self,
            texts: &[String],
            progress: &dyn crate::embeddings::progress::ProgressSink,
        ) -> Result<Vec<Vec<f32>>> {
            self.0.embed(texts, progress).await
        }
    }

    /// Serves its first `ok_calls` batches, then fails every call.
    struct FailsAfter {
        inner: MockBackend,
        ok_calls: AtomicUsize,
    }

    impl EmbeddingBackend for FailsAfter {
        fn info(&self) -> BackendInfo {
            self.inner.info()
        }

        async fn embed(
            &self,
            texts: &[String],
            progress: &dyn crate::embeddings::progress::ProgressSink,
        ) -> Result<Vec<Vec<f32>>> {
            let left = self.ok_calls.load(Ordering::SeqCst);
            if left == 0 {
                return Err(Error::RemoteTimeout { secs: 45 });
            }
            self.ok_calls.store(left - 1, Ordering::SeqCst);
            self.inner.embed(texts, progress).await
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn fruit_vectors() -> Vec<(&'static str, Vec<f32>)> {
        vec![
            ("apple", vec![1.0, 0.0]),
            ("banana", vec![0.2, 0.979_795_9]),
            ("green apple", vec![0.9, 0.435_889_9]),
            ("kiwi", vec![0.0, 1.0]),
        ]
    }

    fn matcher(mode: OperatingMode, remote: Option<MockBackend>, local: MockBackend) -> Matcher {
        let controller =
            ResilienceController::new(mode, 3, remote.map(BoxedBackend::new), BoxedBackend::new(local));
        Matcher::new(Arc::new(controller), BatchPlan::new(2, 4))
    }

    #[tokio::test]
    async fn test_run_matches_and_summarizes() {
        let remote = MockBackend::new(BackendKind::Remote).with_vectors(&fruit_vectors());
        let m = matcher(
            OperatingMode::Auto,
            Some(remote),
            MockBackend::new(BackendKind::Local),
        );

        let request = MatchRequest::new(
            strings(&["green apple", "kiwi"]),
            strings(&["apple", "banana", "apple"]),
        );
        let report = m.run(request, silent()).await.unwrap();

        assert_eq!(report.unique_targets, 2);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].status, MatchStatus::Match);
        assert_eq!(report.rows[0].matched_target.as_deref(), Some("apple"));
        assert!((report.rows[0].score - 0.9).abs() < 1e-4);

        // kiwi is closest to banana (~0.98)
        assert_eq!(report.results[1].best_target_index, Some(1));
        assert_eq!(report.summary.matches, 2);
        assert!(!report.summary.fallback_used);
        assert!(!report.summary.local_forced);
        assert_eq!(report.backend.kind, BackendKind::Remote);
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_rejected() {
        let m = matcher(
            OperatingMode::LocalOnly,
            None,
            MockBackend::new(BackendKind::Local),
        );
        let mut request = MatchRequest::new(strings(&["a"]), strings(&["b"]));
        request.threshold = 1.5;
        let err = m.run(request, silent()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_dispatch() {
        let m = matcher(
            OperatingMode::ApiOnly,
            None,
            MockBackend::new(BackendKind::Local),
        );
        let err = m
            .run(MatchRequest::new(strings(&["a"]), strings(&["b"])), silent())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential));
    }

    #[tokio::test]
    async fn test_empty_targets_produce_no_match_rows() {
        let m = matcher(
            OperatingMode::LocalOnly,
            None,
            MockBackend::new(BackendKind::Local),
        );
        let report = m
            .run(MatchRequest::new(strings(&["a", "b"]), Vec::new()), silent())
            .await
            .unwrap();
        assert_eq!(report.summary.no_matches, 2);
        assert!(report.rows.iter().all(|r| r.matched_target.is_none()));
        assert_eq!(report.summary.average_match_score, None);
    }

    #[tokio::test]
    async fn test_clean_flags_split_embedding_and_display_text() {
        let local = Arc::new(MockBackend::new(BackendKind::Local));

        let controller = ResilienceController::new(
            OperatingMode::LocalOnly,
            3,
            None,
            BoxedBackend::new(Shared(Arc::clone(&local))),
        );
        let m = Matcher::new(Arc::new(controller), BatchPlan::new(10, 1));

        let mut request = MatchRequest::new(strings(&["  Green   APPLE! "]), strings(&["Apple"]));
        request.clean_input = true;
        request.threshold = 0.0;
        let report = m.run(request, silent()).await.unwrap();

        let seen = local.seen.lock().unwrap();
        assert_eq!(seen[0], vec!["Apple"]);
        assert_eq!(seen[1], vec!["Green APPLE!"]);
        assert_eq!(report.rows[0].input_text, "green apple");
        assert_eq!(report.rows[0].matched_target.as_deref(), Some("Apple"));
        assert!(report.summary.local_forced);
        assert!(!report.summary.fallback_used);
    }

    #[tokio::test]
    async fn test_progress_stages_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: SharedProgress = Arc::new(move |e: &ProgressEvent| {
            if let ProgressEvent::Stage(s) = e {
                sink_seen.lock().unwrap().push(s.clone());
            }
        });

        let m = matcher(
            OperatingMode::LocalOnly,
            None,
            MockBackend::new(BackendKind::Local),
        );
        m.run(MatchRequest::new(strings(&["a", "b"]), strings(&["c"])), sink)
            .await
            .unwrap();

        let stages = seen.lock().unwrap();
        assert_eq!(stages[0], "Data prepared: 2 inputs, 1 targets");
        assert_eq!(stages[1], "Computing target embeddings...");
        assert_eq!(stages[2], "Computing input embeddings...");
        assert_eq!(stages.last().map(String::as_str), Some("Finalizing results..."));
    }

    #[tokio::test]
    async fn test_outage_falls_back_and_completes() {
        let controller = ResilienceController::new(
            OperatingMode::Auto,
            1,
            Some(BoxedBackend::new(MockBackend::failing(BackendKind::Remote))),
            BoxedBackend::new(MockBackend::new(BackendKind::Local)),
        );
        let m = Matcher::new(Arc::new(controller), BatchPlan::new(2, 4));

        let targets = strings(&["t1", "t2", "t3", "t4", "t5"]);
        let report = m
            .run(MatchRequest::new(strings(&["t1", "t4"]), targets), silent())
            .await
            .unwrap();

        assert!(report.summary.fallback_used);
        assert_eq!(report.backend.kind, BackendKind::Local);
        assert_eq!(report.results[0].best_target_index, Some(0));
        assert_eq!(report.results[1].best_target_index, Some(3));
        assert!((report.rows[1].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_outage_at_default_threshold_falls_back_and_completes() {
        let remote = Arc::new(MockBackend::failing(BackendKind::Remote));
        let local = Arc::new(MockBackend::new(BackendKind::Local));
        let controller = ResilienceController::new(
            OperatingMode::Auto,
            crate::embeddings::resilience::DEFAULT_FAILURE_THRESHOLD,
            Some(BoxedBackend::new(Shared(Arc::clone(&remote)))),
            BoxedBackend::new(Shared(Arc::clone(&local))),
        );
        let m = Matcher::new(Arc::new(controller), BatchPlan::sequential(2));

        let targets: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        let report = m
            .run(MatchRequest::new(strings(&["t3", "t17"]), targets), silent())
            .await
            .unwrap();

        assert!(report.summary.fallback_used);
        assert!(!report.summary.local_forced);
        // The first batch is resent until the third failure opens the breaker
        assert_eq!(remote.calls(), 3);
        assert_eq!(local.calls(), 11);
        assert_eq!(report.results[0].best_target_index, Some(3));
        assert_eq!(report.results[1].best_target_index, Some(17));
    }

    #[tokio::test]
    async fn test_concurrent_outage_at_default_threshold_completes() {
        let m = matcher(
            OperatingMode::Auto,
            Some(MockBackend::failing(BackendKind::Remote)),
            MockBackend::new(BackendKind::Local),
        );
        let targets: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        let report = m
            .run(MatchRequest::new(strings(&["t5"]), targets), silent())
            .await
            .unwrap();
        assert!(report.summary.fallback_used);
        assert_eq!(report.results[0].best_target_index, Some(5));
    }

    #[tokio::test]
    async fn test_rows_finished_remotely_are_kept_after_fallback() {
        let remote = FailsAfter {
            inner: MockBackend::new(BackendKind::Remote),
            ok_calls: AtomicUsize::new(1),
        };
        let local = Arc::new(MockBackend::new(BackendKind::Local));
        let controller = ResilienceController::new(
            OperatingMode::Auto,
            1,
            Some(BoxedBackend::new(remote)),
            BoxedBackend::new(Shared(Arc::clone(&local))),
        );
        let m = Matcher::new(Arc::new(controller), BatchPlan::new(10, 1));

        let report = m
            .run(MatchRequest::new(strings(&["a"]), strings(&["t1", "t2"])), silent())
            .await
            .unwrap();

        assert!(report.summary.fallback_used);
        // Only the inputs went through the local model
        assert_eq!(*local.seen.lock().unwrap(), vec![vec!["a".to_string()]]);
    }
}
