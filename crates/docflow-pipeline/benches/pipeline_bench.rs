// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the docflow-pipeline crate. Measures the work done
// on the admission path for every submission: planning and the fallback
// decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use docflow_core::{
    DocumentType, FailureKind, JobOptions, OcrMode, ServiceConfig, StageKind, StageOutcome,
    StageOutput, StageResult,
};
use docflow_pipeline::testing::{FakeRunner, Fakes};
use docflow_pipeline::{CorrectionHealth, PlanBuilder, StageSpec, decide};

/// Plan a PDF with OCR, inspection, detection and correction enabled.
fn bench_plan_build(c: &mut Criterion) {
    let mut config = ServiceConfig::default();
    config.ocr.enabled = true;
    config.correction.enable_remote_services = true;
    let builder = PlanBuilder::new(
        Arc::new(config),
        Fakes::default().capabilities(),
        Arc::new(CorrectionHealth::new()),
    );
    let options = JobOptions {
        ocr: true,
        ocr_mode: Some(OcrMode::Auto),
        correction: true,
        ..Default::default()
    };

    c.bench_function("plan_build (full pipeline)", |b| {
        b.iter(|| {
            let plan = builder.build(black_box(DocumentType::Pdf), black_box(4096), &options);
            black_box(plan.ok());
        });
    });
}

/// Fallback decision for a timed-out, fallback-eligible stage.
fn bench_decide(c: &mut Criterion) {
    let stage = StageSpec::new(
        StageKind::Ocr,
        Arc::new(FakeRunner::succeeding(StageOutput::Text(String::new()))),
        Duration::from_secs(300),
    )
    .fallback(true);
    let result = StageResult {
        stage: "ocr".into(),
        kind: StageKind::Ocr,
        outcome: StageOutcome::TimedOut,
        started_at: Utc::now(),
        start_offset: Duration::ZERO,
        duration: Duration::from_secs(300),
        message: Some("exceeded 300s".into()),
        failure: Some(FailureKind::Timeout),
        fallback_from: None,
        produced: None,
        output: None,
    };

    c.bench_function("fallback_decide", |b| {
        b.iter(|| black_box(decide(black_box(&stage), black_box(&result))));
    });
}

criterion_group!(benches, bench_plan_build, bench_decide);
criterion_main!(benches);
