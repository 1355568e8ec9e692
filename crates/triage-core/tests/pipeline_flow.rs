//! End-to-end pipeline runs with scripted inference.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use triage_core::fakes::{ScriptedBackend, StaticCollector};
use triage_core::profiles;
use triage_core::{
    read_report, CollectedEvidence, EvidenceItem, NormalizePolicy, PipelineConfig, SourceKind,
    SummaryScalar, TriageError, TriageOutcome, TriagePipeline, SECTION_NOT_PROVIDED,
};

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("parse RFC3339")
        .with_timezone(&Utc)
}

fn pod_evidence() -> CollectedEvidence {
    let mut evidence = CollectedEvidence::new("web-7d9f");
    evidence.summary = vec![
        SummaryScalar::text("phase", "Running"),
        SummaryScalar::count("restarts", 12),
    ];
    evidence.items = vec![
        EvidenceItem::new(SourceKind::PodLogs, "recent logs", "java.lang.OutOfMemoryError"),
        EvidenceItem::new(
            SourceKind::ContainerState,
            "container app: terminated (OOMKilled)",
            "exit code 137",
        )
        .with_weight(12.0),
        EvidenceItem::new(SourceKind::ClusterEvent, "BackOff", "Back-off restarting failed container")
            .with_weight(30.0)
            .with_timestamp(ts("2026-05-01T10:00:00Z")),
    ];
    evidence.follow_ups = vec!["kubectl describe pod web-7d9f -n default".to_string()];
    evidence
}

// ── diagnosis ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn pod_failure_run_builds_report() {
    let backend = Arc::new(ScriptedBackend::replying(
        "**ROOT CAUSE:** The container exceeds its memory limit.\n\n\
         **WHY THIS HAPPENS:** The JVM heap is larger than the cgroup limit.\n\n\
         **HOW TO FIX:**\nkubectl set resources deploy/web --limits=memory=1Gi\n",
    ));
    let pipeline = TriagePipeline::new(backend.clone(), PipelineConfig::default());
    let collector = StaticCollector::new("kubectl", pod_evidence());

    let report = pipeline
        .run(&collector, &profiles::pod_failure())
        .await
        .expect("run");

    let diagnosis = report.outcome.as_diagnosis().expect("diagnosis");
    assert_eq!(
        diagnosis.keys(),
        vec!["ROOT CAUSE", "WHY THIS HAPPENS", "HOW TO FIX"]
    );
    assert_eq!(
        diagnosis.get("ROOT CAUSE"),
        Some("The container exceeds its memory limit.")
    );
    assert_eq!(
        diagnosis.get("HOW TO FIX"),
        Some("kubectl set resources deploy/web --limits=memory=1Gi")
    );
    assert_eq!(report.follow_ups.len(), 1);

    // Ranked: event (30), container state (12), then the unweighted logs.
    let labels: Vec<&str> = report
        .evidence
        .items
        .iter()
        .map(|i| i.label.as_str())
        .collect();
    assert_eq!(
        labels,
        vec!["BackOff", "container app: terminated (OOMKilled)", "recent logs"]
    );

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("web-7d9f (phase Running, 12 restarts)"));
    assert_eq!(report.prompt_sha256.len(), 64);
}

#[tokio::test]
async fn missing_heading_degrades_to_sentinel() {
    let backend = Arc::new(ScriptedBackend::replying(
        "HOW TO FIX:\nIncrease the memory limit.",
    ));
    let pipeline = TriagePipeline::new(backend, PipelineConfig::default());
    let collector = StaticCollector::new("kubectl", pod_evidence());

    let report = pipeline
        .run(&collector, &profiles::pod_failure())
        .await
        .expect("run");
    let diagnosis = report.outcome.as_diagnosis().expect("diagnosis");
    assert_eq!(diagnosis.get("ROOT CAUSE"), Some(SECTION_NOT_PROVIDED));
    assert_eq!(diagnosis.get("HOW TO FIX"), Some("Increase the memory limit."));
}

#[tokio::test]
async fn budget_is_reported_as_omitted() {
    let mut evidence = CollectedEvidence::new("nginx:1.19");
    evidence.items = (0..20)
        .map(|i| {
            EvidenceItem::new(
                SourceKind::Vulnerability,
                format!("CVE-2026-{:04}", i),
                "details",
            )
            .with_weight((i % 4 + 1) as f64)
        })
        .collect();

    let config = PipelineConfig {
        normalize: NormalizePolicy {
            budget: 5,
            ..NormalizePolicy::default()
        },
        ..PipelineConfig::default()
    };
    let backend = Arc::new(ScriptedBackend::replying("SECURITY POSTURE: critical"));
    let pipeline = TriagePipeline::new(backend.clone(), config);
    let collector = StaticCollector::new("trivy", evidence);

    let report = pipeline
        .run(&collector, &profiles::image_security())
        .await
        .expect("run");
    assert_eq!(report.evidence.items.len(), 5);
    assert_eq!(report.evidence.omitted_count, 15);
    assert!(backend.prompts()[0].contains("(15 lower-ranked items omitted for brevity)"));
}

// ── abort paths ───────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_evidence_never_reaches_backend() {
    let backend = Arc::new(ScriptedBackend::replying("unused"));
    let pipeline = TriagePipeline::new(backend.clone(), PipelineConfig::default());
    let collector = StaticCollector::new("aws", CollectedEvidence::new("default"));

    let err = pipeline
        .run(&collector, &profiles::cost_optimization())
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::EvidenceEmpty { .. }));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn collector_failure_aborts_before_inference() {
    let backend = Arc::new(ScriptedBackend::replying("unused"));
    let pipeline = TriagePipeline::new(backend.clone(), PipelineConfig::default());
    let collector = StaticCollector::unavailable("trivy", "trivy: command not found");

    let err = pipeline
        .run(&collector, &profiles::image_security())
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::SourceUnavailable { .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn oversized_prompt_aborts_before_inference() {
    let backend = Arc::new(ScriptedBackend::replying("unused"));
    let config = PipelineConfig {
        max_prompt_chars: 100,
        ..PipelineConfig::default()
    };
    let pipeline = TriagePipeline::new(backend.clone(), config);
    let collector = StaticCollector::new("kubectl", pod_evidence());

    let err = pipeline
        .run(&collector, &profiles::pod_failure())
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::PromptTooLarge { limit: 100, .. }));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn empty_model_reply_is_malformed() {
    let backend = Arc::new(ScriptedBackend::replying("   \n"));
    let pipeline = TriagePipeline::new(backend, PipelineConfig::default());
    let collector = StaticCollector::new("kubectl", pod_evidence());

    let err = pipeline
        .run(&collector, &profiles::pod_failure())
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::MalformedResponse(_)));
}

// ── generation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn terraform_run_accepts_empty_evidence_and_persists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.json");

    let mut evidence = CollectedEvidence::new("an S3 bucket with versioning");
    evidence.summary = vec![SummaryScalar::text("provider", "aws")];

    let backend = Arc::new(ScriptedBackend::replying(
        "### FILE: main.tf\nresource \"aws_s3_bucket\" \"this\" {}\n\
         ### FILE: variables.tf\nvariable \"name\" {}\n\
         ### FILE: main.tf\nresource \"aws_s3_bucket\" \"logs\" {}\n",
    ));
    let config = PipelineConfig {
        persist_to: Some(path.clone()),
        ..PipelineConfig::default()
    };
    let pipeline = TriagePipeline::new(backend.clone(), config);
    let collector = StaticCollector::new("request", evidence);

    let report = pipeline
        .run(&collector, &profiles::terraform_generation())
        .await
        .expect("run");

    let files = report.outcome.as_artifacts().expect("artifacts");
    assert_eq!(files.len(), 2);
    assert_eq!(files.files()[0].filename, "main.tf");
    assert_eq!(
        files.get("main.tf"),
        Some("resource \"aws_s3_bucket\" \"logs\" {}\n")
    );
    assert!(backend.prompts()[0].contains("for the aws provider"));

    let loaded = read_report(&path).expect("read back");
    assert!(matches!(loaded.outcome, TriageOutcome::Artifacts(_)));
    assert_eq!(loaded, report);
}
