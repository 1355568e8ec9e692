//! Triage CLI
//!
//! The `triage` command collects evidence from an operational source, asks a
//! local model server to explain it and prints a structured report.
//!
//! ## Commands
//!
//! - `scan-image`: explain container image vulnerabilities (trivy)
//! - `compare-images`: rank images by vulnerability counts, no model involved
//! - `debug-pod`: diagnose a failing Kubernetes pod, or every unhealthy pod in a namespace
//! - `cost`: find savings in AWS spend (Cost Explorer)
//! - `heal-actions`: diagnose failed GitHub Actions runs
//! - `gen-terraform`: generate a Terraform module from a description

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use triage_collectors::terraform::PROVIDERS;
use triage_collectors::trivy::DEFAULT_SEVERITIES;
use triage_collectors::{
    list_pods, rank_images, render_comparison, validate_directory, AwsCostCollector,
    GitHubActionsCollector, KubernetesCollector, PodHealth, TerraformRequestCollector,
    TrivyCollector,
};
use triage_core::inference::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS};
use triage_core::{
    profiles, render, write_artifact_files, EvidenceCollector, InferenceConfig, OllamaClient,
    PipelineConfig, RunSpan, TaskProfile, TriageError, TriagePipeline, TriageReport,
};

#[derive(Parser, Debug)]
#[command(name = "triage")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Explain operational evidence with a local model", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Model server base URL (falls back to OLLAMA_HOST)
    #[arg(long, global = true, env = "TRIAGE_ENDPOINT")]
    endpoint: Option<String>,

    /// Model name
    #[arg(long, global = true, env = "TRIAGE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Per-attempt inference timeout in seconds
    #[arg(long, global = true, env = "TRIAGE_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Sampling temperature (server default when omitted)
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Maximum evidence items sent to the model
    #[arg(
        long,
        global = true,
        default_value_t = 8,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    budget: usize,

    /// Also write the report as JSON to this path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Do not check the model server before collecting
    #[arg(long, global = true)]
    skip_preflight: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Explain vulnerabilities found in a container image
    ScanImage {
        /// Image reference, e.g. nginx:1.19
        image: String,

        /// Comma-separated severities to report
        #[arg(long, default_value = DEFAULT_SEVERITIES)]
        severity: String,
    },

    /// Rank container images by vulnerability counts
    CompareImages {
        /// Image references to scan
        #[arg(required = true, num_args = 1..)]
        images: Vec<String>,

        /// Comma-separated severities to count
        #[arg(long, default_value = DEFAULT_SEVERITIES)]
        severity: String,
    },

    /// Diagnose a failing pod
    DebugPod {
        /// Pod name; every unhealthy pod in the namespace when omitted
        pod: Option<String>,

        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Log lines to fetch
        #[arg(long, default_value_t = 50)]
        tail: u32,
    },

    /// Analyze AWS spend per service
    Cost {
        /// Days of history to analyze
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// AWS CLI profile
        #[arg(long, env = "AWS_PROFILE")]
        aws_profile: Option<String>,
    },

    /// Diagnose failed GitHub Actions runs
    HealActions {
        /// Repository as OWNER/REPO
        repo: String,

        /// Number of recent failed runs to inspect
        #[arg(long, default_value_t = 5)]
        limit: u32,

        /// Inspect this run only
        #[arg(long)]
        run_id: Option<u64>,

        /// GitHub token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Generate a Terraform module from a description
    GenTerraform {
        /// What to build, in plain words
        description: String,

        #[arg(long, default_value = "aws", value_parser = PROVIDERS.to_vec())]
        provider: String,

        /// Directory the generated files are written to
        #[arg(long, default_value = "generated")]
        out_dir: PathBuf,

        /// Run terraform init and validate on the result
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    fn inference_config(&self) -> InferenceConfig {
        let endpoint = self
            .endpoint
            .clone()
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        InferenceConfig {
            endpoint,
            model: self.model.clone(),
            timeout_secs: self.timeout_secs,
            temperature: self.temperature,
            ..InferenceConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    triage_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (message, code) = describe_failure(&err);
            eprintln!("{message}");
            ExitCode::from(code)
        }
    }
}

/// Error line and process exit code for a failed invocation.
fn describe_failure(err: &anyhow::Error) -> (String, u8) {
    match err.chain().find_map(|e| e.downcast_ref::<TriageError>()) {
        Some(triage) => (
            format!("error: {} stage failed: {}", triage.stage(), triage),
            triage.exit_code(),
        ),
        None => (format!("error: {err:#}"), 1),
    }
}

/// Whether `installed` (as listed by the server) satisfies `wanted`.
fn model_installed(installed: &[String], wanted: &str) -> bool {
    installed.iter().any(|name| {
        name == wanted
            || name
                .strip_prefix(wanted)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

async fn preflight(client: &OllamaClient, model: &str) -> Result<()> {
    let models = client.ping().await?;
    if model_installed(&models, model) {
        info!(endpoint = %client.endpoint(), model = %model, "model server ready");
    } else {
        warn!(
            endpoint = %client.endpoint(),
            model = %model,
            installed = ?models,
            "model not installed on server, pull it before running"
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::CompareImages { images, severity } = &cli.command {
        return cmd_compare_images(images, severity).await;
    }

    let inference = cli.inference_config();
    let client = OllamaClient::new(&inference.endpoint)?;
    if !cli.skip_preflight {
        preflight(&client, &inference.model).await?;
    }

    let mut config = PipelineConfig::from_inference_config(&inference);
    config.normalize.budget = cli.budget;
    config.persist_to = cli.output.clone();
    let pipeline = TriagePipeline::new(Arc::new(client), config);

    match cli.command {
        Commands::ScanImage { image, severity } => {
            let collector = TrivyCollector::new(&image).with_severities(&severity);
            cmd_diagnose(&pipeline, &collector, &profiles::image_security(), &image).await
        }
        // Handled before the model client is built.
        Commands::CompareImages { .. } => Ok(()),
        Commands::DebugPod {
            pod: Some(pod),
            namespace,
            tail,
        } => {
            let collector = KubernetesCollector::new(&pod, &namespace).with_tail(tail);
            cmd_diagnose(&pipeline, &collector, &profiles::pod_failure(), &pod).await
        }
        Commands::DebugPod {
            pod: None,
            namespace,
            tail,
        } => cmd_debug_namespace(&pipeline, &namespace, tail).await,
        Commands::Cost { days, aws_profile } => {
            let collector = AwsCostCollector::new(days).with_profile(aws_profile);
            cmd_diagnose(&pipeline, &collector, &profiles::cost_optimization(), "AWS account")
                .await
        }
        Commands::HealActions {
            repo,
            limit,
            run_id,
            token,
        } => {
            let collector = GitHubActionsCollector::new(&repo, token)?
                .with_limit(limit)
                .with_run_id(run_id);
            cmd_diagnose(&pipeline, &collector, &profiles::workflow_failure(), &repo).await
        }
        Commands::GenTerraform {
            description,
            provider,
            out_dir,
            validate,
        } => cmd_gen_terraform(&pipeline, &description, &provider, &out_dir, validate).await,
    }
}

fn print_report(pipeline: &TriagePipeline, report: &TriageReport) {
    print!("{}", render(report));
    if let Some(path) = &pipeline.config().persist_to {
        info!(path = %path.display(), "report saved");
    }
}

async fn run_and_print(
    pipeline: &TriagePipeline,
    collector: &dyn EvidenceCollector,
    profile: &TaskProfile,
) -> Result<TriageReport> {
    let report = pipeline.run(collector, profile).await?;
    print_report(pipeline, &report);
    Ok(report)
}

/// Run one diagnosis. A source with nothing wrong in it is a clean result.
async fn cmd_diagnose(
    pipeline: &TriagePipeline,
    collector: &dyn EvidenceCollector,
    profile: &TaskProfile,
    subject: &str,
) -> Result<()> {
    match pipeline.run(collector, profile).await {
        Ok(report) => {
            print_report(pipeline, &report);
            Ok(())
        }
        Err(TriageError::EvidenceEmpty { .. }) => {
            println!("nothing to diagnose for {subject}");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn cmd_compare_images(images: &[String], severity: &str) -> Result<()> {
    let mut scans = Vec::with_capacity(images.len());
    for image in images {
        let evidence = TrivyCollector::new(image)
            .with_severities(severity)
            .collect()
            .await
            .with_context(|| format!("scanning {image}"))?;
        scans.push(evidence);
    }
    print!("{}", render_comparison(&rank_images(&scans)));
    Ok(())
}

/// Name, phase and restart count of each pod, aligned.
fn pod_table(pods: &[PodHealth]) -> String {
    let width = pods
        .iter()
        .map(|p| p.name.len())
        .chain(std::iter::once("NAME".len()))
        .max()
        .unwrap_or(0);
    let mut out = format!("{:<width$}  {:<10}  {:>8}\n", "NAME", "PHASE", "RESTARTS");
    for pod in pods {
        out.push_str(&format!(
            "{:<width$}  {:<10}  {:>8}\n",
            pod.name, pod.phase, pod.restarts
        ));
    }
    out
}

async fn cmd_debug_namespace(pipeline: &TriagePipeline, namespace: &str, tail: u32) -> Result<()> {
    let pods = list_pods(namespace).await?;
    if pods.is_empty() {
        anyhow::bail!("no pods found in namespace '{namespace}'");
    }

    let unhealthy: Vec<&PodHealth> = pods.iter().filter(|p| !p.is_healthy()).collect();
    if unhealthy.is_empty() {
        println!("all {} pods healthy in namespace {namespace}", pods.len());
        print!("{}", pod_table(&pods));
        return Ok(());
    }

    info!(
        namespace = %namespace,
        unhealthy = unhealthy.len(),
        total = pods.len(),
        "diagnosing unhealthy pods"
    );
    for pod in unhealthy {
        let collector = KubernetesCollector::new(&pod.name, namespace).with_tail(tail);
        cmd_diagnose(pipeline, &collector, &profiles::pod_failure(), &pod.name).await?;
    }
    Ok(())
}

async fn cmd_gen_terraform(
    pipeline: &TriagePipeline,
    description: &str,
    provider: &str,
    out_dir: &Path,
    validate: bool,
) -> Result<()> {
    let collector = TerraformRequestCollector::new(description, provider);
    let report = run_and_print(pipeline, &collector, &profiles::terraform_generation()).await?;

    let written = write_generated(&report, out_dir)?;
    for path in &written {
        println!("wrote {}", path.display());
    }

    if validate {
        let outcome = validate_directory(out_dir)
            .await
            .with_context(|| format!("validating {}", out_dir.display()))?;
        println!("{outcome}");
    }
    Ok(())
}

fn write_generated(report: &TriageReport, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let _span = RunSpan::enter(&report.run_id.to_string(), &report.tool);
    let files = report
        .outcome
        .as_artifacts()
        .context("terraform run produced a diagnosis instead of files")?;
    let written = write_artifact_files(files, out_dir)?;
    info!(count = written.len(), dir = %out_dir.display(), "generated files written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::PathBuf;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "triage",
            "debug-pod",
            "api-7f9c",
            "-n",
            "prod",
            "--budget",
            "3",
            "--endpoint",
            "http://gpu-box:11434/",
            "--skip-preflight",
        ])
        .expect("parse");

        assert_eq!(cli.budget, 3);
        assert!(cli.skip_preflight);
        assert_eq!(cli.inference_config().endpoint, "http://gpu-box:11434/");
        match cli.command {
            Commands::DebugPod {
                pod,
                namespace,
                tail,
            } => {
                assert_eq!(pod.as_deref(), Some("api-7f9c"));
                assert_eq!(namespace, "prod");
                assert_eq!(tail, 50);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_gen_terraform_defaults() {
        let cli = Cli::try_parse_from(["triage", "gen-terraform", "an S3 bucket"]).expect("parse");
        match cli.command {
            Commands::GenTerraform {
                provider,
                out_dir,
                validate,
                ..
            } => {
                assert_eq!(provider, "aws");
                assert_eq!(out_dir, PathBuf::from("generated"));
                assert!(!validate);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = Cli::try_parse_from([
            "triage",
            "gen-terraform",
            "a VPC",
            "--provider",
            "digitalocean",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_heal_actions_run_id() {
        let cli = Cli::try_parse_from([
            "triage",
            "heal-actions",
            "acme/api",
            "--run-id",
            "123456",
            "--token",
            "ghp_x",
        ])
        .expect("parse");
        match cli.command {
            Commands::HealActions {
                repo,
                limit,
                run_id,
                token,
            } => {
                assert_eq!(repo, "acme/api");
                assert_eq!(limit, 5);
                assert_eq!(run_id, Some(123456));
                assert_eq!(token.as_deref(), Some("ghp_x"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_failure_exit_codes() {
        let err = anyhow::Error::new(TriageError::source_unavailable(
            "trivy",
            "`trivy` not found on PATH",
        ));
        let (message, code) = describe_failure(&err);
        assert_eq!(code, 2);
        assert!(message.starts_with("error: collect stage failed: trivy is unavailable"));

        let err = anyhow::Error::new(TriageError::InferenceTimeout {
            attempts: 2,
            timeout_secs: 60,
        })
        .context("running pipeline");
        assert_eq!(describe_failure(&err).1, 3);

        let err = anyhow::anyhow!("bad flag");
        assert_eq!(describe_failure(&err), ("error: bad flag".to_string(), 1));
    }

    #[test]
    fn test_model_matching_ignores_tag() {
        let installed = vec!["llama3.2:latest".to_string(), "mistral:7b".to_string()];
        assert!(model_installed(&installed, "llama3.2"));
        assert!(model_installed(&installed, "mistral:7b"));
        assert!(!model_installed(&installed, "llama3"));
    }

    #[test]
    fn test_write_generated_rejects_diagnosis() {
        let bundle = triage_core::EvidenceBundle::default();
        let outcome = triage_core::parse("ROOT CAUSE: x", &profiles::pod_failure()).expect("parse");
        let report = TriageReport::new(
            uuid::Uuid::nil(),
            "pod-failure",
            "llama3.2",
            &bundle,
            "prompt",
            outcome,
            Vec::new(),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(write_generated(&report, dir.path()).is_err());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let result = Cli::try_parse_from(["triage", "scan-image", "nginx:1.19", "--budget", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_pod_without_name_scans_namespace() {
        let cli = Cli::try_parse_from(["triage", "debug-pod", "-n", "prod"]).expect("parse");
        match cli.command {
            Commands::DebugPod { pod, namespace, .. } => {
                assert_eq!(pod, None);
                assert_eq!(namespace, "prod");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_compare_images_takes_several() {
        let cli = Cli::try_parse_from(["triage", "compare-images", "nginx:1.19", "alpine:3.20"])
            .expect("parse");
        match cli.command {
            Commands::CompareImages { images, severity } => {
                assert_eq!(images, ["nginx:1.19", "alpine:3.20"]);
                assert_eq!(severity, DEFAULT_SEVERITIES);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["triage", "compare-images"]).is_err());
    }

    #[test]
    fn test_pod_table() {
        let pods = vec![
            PodHealth {
                name: "api-7f9c".to_string(),
                phase: "Running".to_string(),
                ready: true,
                restarts: 0,
            },
            PodHealth {
                name: "worker-0".to_string(),
                phase: "Running".to_string(),
                ready: true,
                restarts: 0,
            },
        ];
        let table = pod_table(&pods);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "NAME      PHASE       RESTARTS");
        assert_eq!(lines[1], "api-7f9c  Running            0");
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_clean_source_is_not_a_failure() {
        use triage_core::fakes::{ScriptedBackend, StaticCollector};
        use triage_core::CollectedEvidence;

        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let pipeline = TriagePipeline::new(backend.clone(), PipelineConfig::default());
        let collector = StaticCollector::new("trivy", CollectedEvidence::new("alpine:3.20"));

        cmd_diagnose(&pipeline, &collector, &profiles::image_security(), "alpine:3.20")
            .await
            .expect("clean image exits successfully");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_source_still_fails() {
        use triage_core::fakes::{ScriptedBackend, StaticCollector};

        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let pipeline = TriagePipeline::new(backend, PipelineConfig::default());
        let collector = StaticCollector::unavailable("trivy", "`trivy` not found on PATH");

        let err = cmd_diagnose(&pipeline, &collector, &profiles::image_security(), "nginx:1.19")
            .await
            .unwrap_err();
        assert_eq!(describe_failure(&err).1, 2);
    }
}
