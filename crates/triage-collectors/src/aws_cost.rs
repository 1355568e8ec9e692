//! Per-service spend from AWS Cost Explorer via the `aws` CLI.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use triage_core::{
    CollectedEvidence, EvidenceCollector, EvidenceItem, Result, SourceKind, SummaryScalar,
    TriageError,
};

use crate::command::ToolCommand;

const SOURCE: &str = "aws";

/// Services cheaper than this over the whole window are dropped.
pub const MIN_SERVICE_COST: f64 = 0.01;

/// Resource inventory: summary label, `aws` subcommand and JMESPath count.
const INVENTORY: &[(&str, &[&str], &str)] = &[
    ("ec2 instances", &["ec2", "describe-instances"], "length(Reservations[].Instances[])"),
    ("ebs volumes", &["ec2", "describe-volumes"], "length(Volumes)"),
    ("s3 buckets", &["s3api", "list-buckets"], "length(Buckets)"),
    ("rds instances", &["rds", "describe-db-instances"], "length(DBInstances)"),
    ("lambda functions", &["lambda", "list-functions"], "length(Functions)"),
];

/// Parse the bare number printed by an inventory `--query`.
pub fn parse_count(stdout: &str) -> Option<u64> {
    stdout.trim().parse().ok()
}

#[derive(Debug, Deserialize)]
struct CostResponse {
    #[serde(rename = "ResultsByTime", default)]
    results_by_time: Vec<CostPeriod>,
}

#[derive(Debug, Deserialize)]
struct CostPeriod {
    #[serde(rename = "Groups", default)]
    groups: Vec<CostGroup>,
}

#[derive(Debug, Deserialize)]
struct CostGroup {
    #[serde(rename = "Keys", default)]
    keys: Vec<String>,
    #[serde(rename = "Metrics")]
    metrics: CostMetrics,
}

#[derive(Debug, Deserialize)]
struct CostMetrics {
    #[serde(rename = "UnblendedCost")]
    unblended_cost: CostAmount,
}

#[derive(Debug, Deserialize)]
struct CostAmount {
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Unit", default)]
    unit: Option<String>,
}

/// Cost Explorer window `[start, end)` ending today.
pub fn date_range(days: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - chrono::Duration::days(i64::from(days)), today)
}

/// Total spend per service, highest first, services below [`MIN_SERVICE_COST`] dropped.
pub fn service_totals(json: &str) -> Result<Vec<(String, f64)>> {
    let response: CostResponse = serde_json::from_str(json).map_err(|e| {
        TriageError::source_unavailable(SOURCE, format!("unexpected Cost Explorer output: {e}"))
    })?;

    let mut totals: Vec<(String, f64)> = Vec::new();
    for period in response.results_by_time {
        for group in period.groups {
            let Some(service) = group.keys.into_iter().next() else {
                continue;
            };
            let amount: f64 = group.metrics.unblended_cost.amount.parse().map_err(|_| {
                TriageError::source_unavailable(
                    SOURCE,
                    format!(
                        "non-numeric cost '{}' for {}",
                        group.metrics.unblended_cost.amount, service
                    ),
                )
            })?;
            if let Some(unit) = group.metrics.unblended_cost.unit.as_deref() {
                if unit != "USD" {
                    debug!(service = %service, unit = %unit, "non-USD cost unit");
                }
            }
            match totals.iter_mut().find(|(name, _)| *name == service) {
                Some((_, total)) => *total += amount,
                None => totals.push((service, amount)),
            }
        }
    }

    totals.retain(|(_, cost)| *cost >= MIN_SERVICE_COST);
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(totals)
}

/// Build evidence from a `get-cost-and-usage` response.
pub fn parse_costs(json: &str, days: u32, subject: &str) -> Result<CollectedEvidence> {
    let totals = service_totals(json)?;
    let total: f64 = totals.iter().map(|(_, cost)| cost).sum();

    let mut evidence = CollectedEvidence::new(subject);
    for (service, cost) in &totals {
        let share = if total > 0.0 { cost / total * 100.0 } else { 0.0 };
        evidence.items.push(
            EvidenceItem::new(
                SourceKind::ServiceCost,
                service.clone(),
                format!("USD {cost:.2} over the last {days} days ({share:.1}% of total)"),
            )
            .with_weight(*cost),
        );
    }
    evidence.summary = vec![
        SummaryScalar::amount("total cost", total),
        SummaryScalar::count("days", u64::from(days)),
        SummaryScalar::count("services", totals.len() as u64),
    ];
    if let Some((top, _)) = totals.first() {
        evidence.follow_ups.push(format!(
            "aws ce get-cost-and-usage --granularity MONTHLY --metrics UnblendedCost \
             --filter '{{\"Dimensions\":{{\"Key\":\"SERVICE\",\"Values\":[\"{top}\"]}}}}' \
             --group-by Type=DIMENSION,Key=USAGE_TYPE --time-period Start=<start>,End=<end>"
        ));
    }
    Ok(evidence)
}

/// Collects service spend for the last `days` days.
#[derive(Debug, Clone)]
pub struct AwsCostCollector {
    days: u32,
    profile: Option<String>,
    timeout: Duration,
    program: String,
}

impl AwsCostCollector {
    pub fn new(days: u32) -> Self {
        Self {
            days,
            profile: None,
            timeout: Duration::from_secs(60),
            program: "aws".to_string(),
        }
    }

    /// Named AWS CLI profile; otherwise the CLI's own resolution applies.
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Run a different `aws` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn aws(&self) -> ToolCommand {
        let command = ToolCommand::new(SOURCE, &self.program).timeout(self.timeout);
        match &self.profile {
            Some(profile) => command.arg("--profile").arg(profile.as_str()),
            None => command,
        }
    }

    /// Best-effort resource counts; a failed call is logged and left out.
    async fn resource_counts(&self) -> Vec<SummaryScalar> {
        let mut counts = Vec::new();
        for (label, subcommand, query) in INVENTORY {
            let result = self
                .aws()
                .args(subcommand.iter().copied())
                .args(["--query", *query, "--region", "us-east-1", "--output", "json"])
                .run_checked()
                .await;
            match result.map(|stdout| parse_count(&stdout)) {
                Ok(Some(count)) => counts.push(SummaryScalar::count(*label, count)),
                Ok(None) => warn!(resource = %label, "unexpected inventory output"),
                Err(err) => warn!(resource = %label, error = %err, "inventory call failed"),
            }
        }
        counts
    }

    fn subject(&self) -> String {
        match &self.profile {
            Some(profile) => format!("AWS account (profile {profile})"),
            None => "AWS account".to_string(),
        }
    }
}

#[async_trait]
impl EvidenceCollector for AwsCostCollector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn collect(&self) -> Result<CollectedEvidence> {
        let (start, end) = date_range(self.days, Utc::now().date_naive());
        info!(start = %start, end = %end, "querying Cost Explorer");

        let command = self
            .aws()
            .args(["ce", "get-cost-and-usage", "--time-period"])
            .arg(format!(
                "Start={},End={}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ))
            .args([
                "--granularity",
                "MONTHLY",
                "--metrics",
                "UnblendedCost",
                "--group-by",
                "Type=DIMENSION,Key=SERVICE",
                "--region",
                "us-east-1",
                "--output",
                "json",
            ]);

        let stdout = command.run_checked().await?;
        let mut evidence = parse_costs(&stdout, self.days, &self.subject())?;
        evidence.summary.extend(self.resource_counts().await);
        Ok(evidence)
    }
}
