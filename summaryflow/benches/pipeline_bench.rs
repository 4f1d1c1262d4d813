//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use summaryflow::chunking::{ChunkingConfig, TextChunker};
use summaryflow::config::SummaryflowConfig;
use summaryflow::context::{RunContext, SummaryPreferences};
use summaryflow::generation::TextGenerator;
use summaryflow::summarizer::{standard_pipeline, PromptSet};
use summaryflow::testing::{EchoGenerator, MarkerRefiner};

fn pipeline_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = Arc::new(SummaryflowConfig::default());
    let generator: Arc<dyn TextGenerator> = Arc::new(EchoGenerator::new());
    let refiner: Arc<dyn TextGenerator> = Arc::new(MarkerRefiner::converging_after(2));
    let pipeline =
        standard_pipeline(generator, refiner, &PromptSet::default(), &config, None).unwrap();
    let prefs = SummaryPreferences::default();

    c.bench_function("standard_pipeline_echo", |b| {
        b.iter(|| {
            let ctx = RunContext::seeded("A short document. It has two sentences.", &prefs, config.clone());
            let report = rt.block_on(pipeline.run(&ctx)).unwrap();
            black_box(report.final_text())
        });
    });
}

fn chunking_benchmark(c: &mut Criterion) {
    let text: String = (0..5_000).map(|i| format!("Sentence number {i}. ")).collect();
    let chunker = TextChunker::new(ChunkingConfig::default());

    c.bench_function("split_100k_chars", |b| {
        b.iter(|| black_box(chunker.split(black_box(&text))).len());
    });
}

criterion_group!(benches, pipeline_benchmark, chunking_benchmark);
criterion_main!(benches);
