//! The standard summarization pipeline and its front door.
//!
//! [`standard_pipeline`] assembles the analyze, extract, summarize,
//! refine and format stages. [`Summarizer`] owns one such pipeline plus the
//! configuration, cache and activity sink, and adds chunked map-reduce for
//! documents longer than one chunk.

mod prompts;

pub use prompts::PromptSet;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cache::{fingerprint, SummaryCache};
use crate::cancellation::CancellationToken;
use crate::chunking::TextChunker;
use crate::config::SummaryflowConfig;
use crate::context::{RunContext, RunIdentity, StateKey, SummaryPreferences};
use crate::core::StageOutput;
use crate::errors::{MalformedPipelineError, MissingInputError, SummaryflowError};
use crate::events::{ActivitySink, NoOpActivitySink};
use crate::observability::SpanTimer;
use crate::generation::TextGenerator;
use crate::pipeline::{LinearPipeline, PipelineReport, RefinementLoop};
use crate::stages::{GenerationStage, PromptTemplate, StageDescriptor};

/// Stage names of the standard pipeline, in execution order.
pub const STANDARD_STAGES: [&str; 5] = ["analyze", "extract", "summarize", "refine_loop", "format"];

/// Name of the stage the refinement loop drives.
pub const REFINE_STAGE: &str = "refine";

/// Builds the standard five-stage pipeline.
///
/// `refine_generator` serves the refinement stage; pass the main generator
/// again when one model does everything. `max_iterations` overrides the
/// configured loop cap.
///
/// # Errors
///
/// Returns a `MalformedPipelineError` if the prompt set reads a key that is
/// not available to the stage using it.
pub fn standard_pipeline(
    generator: Arc<dyn TextGenerator>,
    refine_generator: Arc<dyn TextGenerator>,
    prompts: &PromptSet,
    config: &SummaryflowConfig,
    max_iterations: Option<u32>,
) -> Result<LinearPipeline, MalformedPipelineError> {
    let stage = |name: &str,
                 input: StateKey,
                 output: StateKey,
                 prompt: PromptTemplate,
                 generator: &Arc<dyn TextGenerator>| {
        GenerationStage::new(
            StageDescriptor::new(name, input, output, prompt)
                .with_temperature(config.default_temperature)
                .with_max_output_tokens(config.default_max_output_tokens),
            generator.clone(),
        )
        .with_retry(config.retry.clone())
    };

    let refine = stage(
        REFINE_STAGE,
        StateKey::RefinedSummary,
        StateKey::Refinement,
        prompts.refine.clone(),
        &refine_generator,
    );
    let mut refine_loop = RefinementLoop::new(
        STANDARD_STAGES[3],
        StateKey::Summary,
        StateKey::RefinedSummary,
        Arc::new(refine),
    )?;
    if let Some(cap) = max_iterations {
        refine_loop = refine_loop.with_max_iterations(cap);
    }

    LinearPipeline::builder("standard")
        .stage(stage(
            STANDARD_STAGES[0],
            StateKey::InputText,
            StateKey::Analysis,
            prompts.analyze.clone(),
            &generator,
        ))
        .stage(stage(
            STANDARD_STAGES[1],
            StateKey::Analysis,
            StateKey::KeyPoints,
            prompts.extract.clone(),
            &generator,
        ))
        .stage(stage(
            STANDARD_STAGES[2],
            StateKey::KeyPoints,
            StateKey::Summary,
            prompts.summarize.clone(),
            &generator,
        ))
        .stage(refine_loop)
        .stage(stage(
            STANDARD_STAGES[4],
            StateKey::RefinedSummary,
            StateKey::FormattedSummary,
            prompts.format.clone(),
            &generator,
        ))
        .build()
}

/// Builds the per-chunk pipeline used by map-reduce: analyze, extract and
/// summarize, without refinement or formatting.
fn chunk_pipeline(
    generator: &Arc<dyn TextGenerator>,
    prompts: &PromptSet,
    config: &SummaryflowConfig,
) -> Result<LinearPipeline, MalformedPipelineError> {
    let stage = |name: &str, input: StateKey, output: StateKey, prompt: PromptTemplate| {
        GenerationStage::new(
            StageDescriptor::new(name, input, output, prompt)
                .with_temperature(config.default_temperature)
                .with_max_output_tokens(config.default_max_output_tokens),
            generator.clone(),
        )
        .with_retry(config.retry.clone())
    };

    LinearPipeline::builder("chunk")
        .stage(stage(
            STANDARD_STAGES[0],
            StateKey::InputText,
            StateKey::Analysis,
            prompts.analyze.clone(),
        ))
        .stage(stage(
            STANDARD_STAGES[1],
            StateKey::Analysis,
            StateKey::KeyPoints,
            prompts.extract.clone(),
        ))
        .stage(stage(
            STANDARD_STAGES[2],
            StateKey::KeyPoints,
            StateKey::Summary,
            prompts.summarize.clone(),
        ))
        .build()
}

/// The result of summarizing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    /// The run that produced the summary.
    pub run_id: Uuid,
    /// The formatted summary.
    pub text: String,
    /// Refinement passes performed.
    pub refinement_iterations: u32,
    /// Number of chunks the document was split into; 1 when not chunked.
    pub chunks: usize,
    /// True if any stage degraded or failed recoverably.
    pub degraded: bool,
    /// True if this report was served from the cache.
    pub cached: bool,
    /// Outputs of the final pipeline run.
    pub outputs: Vec<StageOutput>,
    /// Wall-clock time of the computation in milliseconds.
    pub duration_ms: f64,
}

impl SummaryReport {
    fn from_pipeline(report: PipelineReport, chunks: usize, degraded: bool, timer: SpanTimer) -> Self {
        Self {
            run_id: report.run_id,
            text: report.final_text().unwrap_or_default(),
            refinement_iterations: report.refinement_iterations().unwrap_or(0),
            chunks,
            degraded: degraded || report.is_degraded(),
            cached: false,
            outputs: report.outputs,
            duration_ms: timer.finish(),
        }
    }
}

/// Builder for [`Summarizer`].
#[derive(Default)]
pub struct SummarizerBuilder {
    generator: Option<Arc<dyn TextGenerator>>,
    refine_generator: Option<Arc<dyn TextGenerator>>,
    prompts: PromptSet,
    config: SummaryflowConfig,
    sink: Option<Arc<dyn ActivitySink>>,
    max_iterations: Option<u32>,
}

impl SummarizerBuilder {
    /// Sets the generator used by every stage.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets a separate generator for the refinement stage.
    #[must_use]
    pub fn refine_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.refine_generator = Some(generator);
        self
    }

    /// Replaces the prompt set.
    #[must_use]
    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: SummaryflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the activity sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides the refinement cap from the configuration.
    #[must_use]
    pub fn max_iterations(mut self, cap: u32) -> Self {
        self.max_iterations = Some(cap);
        self
    }

    /// Validates the configuration and assembles the pipelines.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Config` if no generator was set or the
    /// configuration is invalid, and `MalformedPipeline` if the prompts do
    /// not fit the stage wiring.
    pub fn build(self) -> Result<Summarizer, SummaryflowError> {
        let generator = self
            .generator
            .ok_or_else(|| SummaryflowError::Config("a text generator is required".into()))?;
        self.config.validate()?;

        let refine_generator = self.refine_generator.unwrap_or_else(|| generator.clone());
        let pipeline = standard_pipeline(
            generator.clone(),
            refine_generator,
            &self.prompts,
            &self.config,
            self.max_iterations,
        )?;
        let chunk_pipeline = chunk_pipeline(&generator, &self.prompts, &self.config)?;

        let mut cache = SummaryCache::new().with_max_entries(self.config.cache_max_entries);
        if self.config.cache_ttl_secs > 0 {
            cache = cache.with_ttl(Duration::from_secs(self.config.cache_ttl_secs));
        }

        Ok(Summarizer {
            pipeline,
            chunk_pipeline,
            chunker: TextChunker::new(self.config.chunking.clone()),
            config: Arc::new(self.config),
            sink: self.sink.unwrap_or_else(|| Arc::new(NoOpActivitySink)),
            cache,
        })
    }
}

/// Summarizes documents with the standard pipeline.
///
/// A `Summarizer` is immutable once built and can be shared across tasks;
/// every call gets its own state store.
pub struct Summarizer {
    pipeline: LinearPipeline,
    chunk_pipeline: LinearPipeline,
    chunker: TextChunker,
    config: Arc<SummaryflowConfig>,
    sink: Arc<dyn ActivitySink>,
    cache: SummaryCache<SummaryReport>,
}

impl std::fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarizer")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Summarizer {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> SummarizerBuilder {
        SummarizerBuilder::default()
    }

    /// Returns the full pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &LinearPipeline {
        &self.pipeline
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SummaryflowConfig {
        &self.config
    }

    /// Drops every cached summary.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Summarizes one document.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's error when a stage fails fatally, or
    /// `MissingInput` for an empty document.
    pub async fn summarize(
        &self,
        text: &str,
        preferences: &SummaryPreferences,
    ) -> Result<SummaryReport, SummaryflowError> {
        self.summarize_with_cancellation(text, preferences, Arc::new(CancellationToken::new()))
            .await
    }

    /// Summarizes one document, stopping early when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Cancelled` when the token fires, otherwise
    /// the same errors as [`Summarizer::summarize`].
    #[instrument(skip_all, fields(chars = text.len()))]
    pub async fn summarize_with_cancellation(
        &self,
        text: &str,
        preferences: &SummaryPreferences,
        token: Arc<CancellationToken>,
    ) -> Result<SummaryReport, SummaryflowError> {
        if text.trim().is_empty() {
            return Err(MissingInputError::new(STANDARD_STAGES[0], StateKey::InputText).into());
        }

        if !self.config.cache_enabled {
            return self.compute(text, preferences, token).await;
        }

        let key = fingerprint(text, preferences);
        let (mut report, hit) = self
            .cache
            .get_or_try_compute(&key, || self.compute(text, preferences, token.clone()))
            .await?;
        report.cached = hit;
        Ok(report)
    }

    /// Summarizes several documents, at most `max_concurrent_runs` at once.
    ///
    /// Results come back in input order; one failure does not stop the rest.
    pub async fn summarize_many<I>(
        &self,
        documents: I,
        preferences: &SummaryPreferences,
    ) -> Vec<Result<SummaryReport, SummaryflowError>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        stream::iter(documents)
            .map(|doc| async move { self.summarize(doc.as_ref(), preferences).await })
            .buffered(self.config.max_concurrent_runs)
            .collect()
            .await
    }

    async fn compute(
        &self,
        text: &str,
        preferences: &SummaryPreferences,
        token: Arc<CancellationToken>,
    ) -> Result<SummaryReport, SummaryflowError> {
        let timer = SpanTimer::start("summarize");

        if self.chunker.needs_chunking(text) {
            return self.map_reduce(text, preferences, token, timer).await;
        }

        let report = self
            .run(&self.pipeline, text, preferences, token, RunIdentity::new())
            .await?;
        Ok(SummaryReport::from_pipeline(report, 1, false, timer))
    }

    async fn map_reduce(
        &self,
        text: &str,
        preferences: &SummaryPreferences,
        token: Arc<CancellationToken>,
        timer: SpanTimer,
    ) -> Result<SummaryReport, SummaryflowError> {
        let chunks = self.chunker.split(text);
        let parent = RunIdentity::new();
        info!(run_id = %parent.run_id, chunks = chunks.len(), "Summarizing in chunks");

        let mapped: Vec<PipelineReport> = stream::iter(&chunks)
            .map(|chunk| {
                let identity = parent
                    .child()
                    .with_document_id(format!("chunk-{}", chunk.index));
                self.run(&self.chunk_pipeline, &chunk.text, preferences, token.clone(), identity)
            })
            .buffered(self.config.max_concurrent_runs)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        let degraded = mapped.iter().any(PipelineReport::is_degraded);
        let combined = mapped
            .iter()
            .filter_map(PipelineReport::final_text)
            .collect::<Vec<_>>()
            .join("\n\n");
        debug!(chars = combined.len(), "Chunk summaries combined");

        let report = self
            .run(&self.pipeline, &combined, preferences, token, parent)
            .await?;
        Ok(SummaryReport::from_pipeline(report, chunks.len(), degraded, timer))
    }

    async fn run(
        &self,
        pipeline: &LinearPipeline,
        input: &str,
        preferences: &SummaryPreferences,
        token: Arc<CancellationToken>,
        identity: RunIdentity,
    ) -> Result<PipelineReport, SummaryflowError> {
        let ctx = RunContext::seeded(input, preferences, self.config.clone())
            .with_sink(self.sink.clone())
            .with_cancellation(token)
            .with_identity(identity);
        pipeline.run(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::errors::GenerationErrorKind;
    use crate::generation::GenerationRequest;
    use crate::events::CollectingActivitySink;
    use crate::testing::{
        assert_stage_order, EchoGenerator, FailingGenerator, FnGenerator, MarkerRefiner,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn upper_refiner() -> Arc<dyn TextGenerator> {
        Arc::new(FnGenerator::new(|request: &GenerationRequest| {
            Ok(json!({
                "refined_summary": request.prompt.to_uppercase(),
                "needs_refinement": false,
            })
            .to_string())
        }))
    }

    #[test]
    fn test_standard_pipeline_shape() {
        let generator: Arc<dyn TextGenerator> = Arc::new(EchoGenerator::new());
        let pipeline = standard_pipeline(
            generator.clone(),
            generator,
            &PromptSet::default(),
            &SummaryflowConfig::default(),
            None,
        )
        .unwrap();

        assert_eq!(pipeline.stage_names(), STANDARD_STAGES.to_vec());
    }

    #[test]
    fn test_builder_requires_generator() {
        let err = Summarizer::builder().build().unwrap_err();
        assert!(matches!(err, SummaryflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_quick_brown_fox() {
        let summarizer = Summarizer::builder()
            .generator(Arc::new(EchoGenerator::uppercase()))
            .refine_generator(upper_refiner())
            .prompts(PromptSet::passthrough())
            .build()
            .unwrap();

        let report = summarizer
            .summarize("The quick brown fox.", &SummaryPreferences::default())
            .await
            .unwrap();

        assert_eq!(report.text, "THE QUICK BROWN FOX.");
        assert_eq!(report.refinement_iterations, 1);
        assert_eq!(report.chunks, 1);
        assert!(!report.cached);
    }

    #[tokio::test]
    async fn test_activity_follows_stage_order() {
        let sink = Arc::new(CollectingActivitySink::new());
        let summarizer = Summarizer::builder()
            .generator(Arc::new(EchoGenerator::new()))
            .refine_generator(Arc::new(MarkerRefiner::new()))
            .prompts(PromptSet::passthrough())
            .sink(sink.clone())
            .max_iterations(1)
            .build()
            .unwrap();

        summarizer
            .summarize("doc", &SummaryPreferences::default())
            .await
            .unwrap();

        assert_stage_order(
            &sink,
            &["analyze", "extract", "summarize", "refine_loop", "refine", "format"],
        );
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let generator = Arc::new(EchoGenerator::new());
        let summarizer = Summarizer::builder()
            .generator(generator.clone())
            .refine_generator(upper_refiner())
            .prompts(PromptSet::passthrough())
            .build()
            .unwrap();
        let prefs = SummaryPreferences::default();

        let first = summarizer.summarize("doc", &prefs).await.unwrap();
        let calls = generator.call_count();
        let second = summarizer.summarize("doc", &prefs).await.unwrap();

        assert!(second.cached);
        assert_eq!(second.text, first.text);
        assert_eq!(generator.call_count(), calls);
    }

    #[tokio::test]
    async fn test_cache_disabled_recomputes() {
        let generator = Arc::new(EchoGenerator::new());
        let summarizer = Summarizer::builder()
            .generator(generator.clone())
            .refine_generator(upper_refiner())
            .prompts(PromptSet::passthrough())
            .config(SummaryflowConfig::default().with_cache_enabled(false))
            .build()
            .unwrap();
        let prefs = SummaryPreferences::default();

        summarizer.summarize("doc", &prefs).await.unwrap();
        let calls = generator.call_count();
        let second = summarizer.summarize("doc", &prefs).await.unwrap();

        assert!(!second.cached);
        assert_eq!(generator.call_count(), calls * 2);
    }

    #[tokio::test]
    async fn test_cache_bound_evicts_oldest_document() {
        let summarizer = Summarizer::builder()
            .generator(Arc::new(EchoGenerator::new()))
            .refine_generator(upper_refiner())
            .prompts(PromptSet::passthrough())
            .config(SummaryflowConfig::default().with_cache_max_entries(1))
            .build()
            .unwrap();
        let prefs = SummaryPreferences::default();

        summarizer.summarize("first", &prefs).await.unwrap();
        summarizer.summarize("second", &prefs).await.unwrap();
        let again = summarizer.summarize("first", &prefs).await.unwrap();

        assert!(!again.cached);
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let summarizer = Summarizer::builder()
            .generator(Arc::new(EchoGenerator::new()))
            .build()
            .unwrap();

        let err = summarizer
            .summarize("   ", &SummaryPreferences::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryflowError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_fatal_failure_not_cached() {
        let summarizer = Summarizer::builder()
            .generator(Arc::new(FailingGenerator::new(GenerationErrorKind::AuthFailure)))
            .build()
            .unwrap();
        let prefs = SummaryPreferences::default();

        assert!(summarizer.summarize("doc", &prefs).await.is_err());
        assert!(summarizer.summarize("doc", &prefs).await.is_err());
    }

    #[tokio::test]
    async fn test_long_document_map_reduce() {
        let generator = Arc::new(EchoGenerator::new());
        let config = SummaryflowConfig::default()
            .with_chunking(ChunkingConfig::default().with_sizes(200, 20));
        let summarizer = Summarizer::builder()
            .generator(generator.clone())
            .refine_generator(upper_refiner())
            .prompts(PromptSet::passthrough())
            .config(config)
            .build()
            .unwrap();

        let text: String = (0..100).map(|i| format!("Sentence {i}. ")).collect();
        let report = summarizer
            .summarize(&text, &SummaryPreferences::default())
            .await
            .unwrap();

        assert!(report.chunks > 1);
        assert!(report.text.contains("SENTENCE 0."));
        assert!(report.text.contains("SENTENCE 99."));
        // three map stages per chunk plus analyze, extract, summarize and format once
        assert_eq!(generator.call_count(), report.chunks * 3 + 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let summarizer = Summarizer::builder()
            .generator(Arc::new(EchoGenerator::new()))
            .build()
            .unwrap();
        let token = Arc::new(CancellationToken::new());
        token.cancel("user abort");

        let err = summarizer
            .summarize_with_cancellation("doc", &SummaryPreferences::default(), token)
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryflowError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_summarize_many_keeps_order() {
        let summarizer = Summarizer::builder()
            .generator(Arc::new(EchoGenerator::new()))
            .refine_generator(upper_refiner())
            .prompts(PromptSet::passthrough())
            .build()
            .unwrap();

        let results = summarizer
            .summarize_many(["one", "", "three"], &SummaryPreferences::default())
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().text, "ONE");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().text, "THREE");
    }
}
