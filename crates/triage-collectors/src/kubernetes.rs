//! Pod failure evidence from `kubectl`.
//!
//! Three read-only calls: the pod object, recent logs (falling back to the
//! previous container instance) and the events involving the pod.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use triage_core::{
    CollectedEvidence, EvidenceCollector, EvidenceItem, Result, SourceKind, SummaryScalar,
    TriageError,
};

use crate::command::ToolCommand;

const SOURCE: &str = "kubectl";

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    init_container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    name: String,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    restart_count: u64,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    state: ContainerState,
    #[serde(default)]
    last_state: ContainerState,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerState {
    waiting: Option<StateDetail>,
    terminated: Option<StateDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDetail {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    first_timestamp: Option<DateTime<Utc>>,
}

/// Ranking weight for a container waiting/terminated reason.
pub fn state_weight(reason: &str) -> f64 {
    match reason {
        "OOMKilled" => 10.0,
        "CrashLoopBackOff" | "ImagePullBackOff" | "ErrImagePull" | "InvalidImageName" => 9.0,
        "CreateContainerConfigError" | "CreateContainerError" | "RunContainerError" => 8.0,
        "Error" | "ContainerCannotRun" | "DeadlineExceeded" => 7.0,
        "Completed" => 1.0,
        _ => 5.0,
    }
}

/// Pod facts extracted from `kubectl get pod -o json`.
#[derive(Debug, Clone, PartialEq)]
pub struct PodSnapshot {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub restarts: u64,
    /// Most severe waiting/terminated reason across containers, if any.
    pub worst_reason: Option<String>,
    items: Vec<EvidenceItem>,
}

fn unexpected(what: &str, e: serde_json::Error) -> TriageError {
    TriageError::source_unavailable(SOURCE, format!("unexpected {what} output: {e}"))
}

fn describe_state(kind: &str, detail: &StateDetail) -> String {
    let mut text = format!("{}: {}", kind, detail.reason.as_deref().unwrap_or("unknown"));
    if let Some(code) = detail.exit_code {
        text.push_str(&format!(" (exit code {code})"));
    }
    if let Some(message) = detail.message.as_deref().filter(|m| !m.is_empty()) {
        text.push_str(&format!("\n{message}"));
    }
    text
}

/// Parse a pod object into a snapshot with its status and container items.
pub fn parse_pod(json: &str, default_namespace: &str) -> Result<PodSnapshot> {
    let pod: Pod = serde_json::from_str(json).map_err(|e| unexpected("pod", e))?;
    let status = pod.status;
    let phase = status.phase.unwrap_or_else(|| "Unknown".to_string());

    let containers: Vec<&ContainerStatus> = status
        .init_container_statuses
        .iter()
        .chain(status.container_statuses.iter())
        .collect();
    let restarts: u64 = containers.iter().map(|c| c.restart_count).sum();
    let ready = containers.iter().filter(|c| c.ready).count();

    let mut detail = format!(
        "phase: {}\nready: {}/{} containers\nrestarts: {}",
        phase,
        ready,
        containers.len(),
        restarts
    );
    if let Some(reason) = status.reason.as_deref() {
        detail.push_str(&format!("\nreason: {reason}"));
    }
    if let Some(message) = status.message.as_deref() {
        detail.push_str(&format!("\nmessage: {message}"));
    }

    let mut items = vec![EvidenceItem::new(
        SourceKind::PodStatus,
        format!("pod {}: {}", pod.metadata.name, phase),
        detail,
    )
    .with_weight(restarts as f64)];

    let mut worst: Option<(f64, String)> = None;
    for container in &containers {
        let (kind, current) = match (&container.state.waiting, &container.state.terminated) {
            (Some(waiting), _) => ("waiting", waiting),
            (None, Some(terminated)) => ("terminated", terminated),
            (None, None) => continue,
        };
        let reason = current.reason.clone().unwrap_or_else(|| "unknown".to_string());
        let weight = state_weight(&reason) + container.restart_count as f64;
        if worst.as_ref().map_or(true, |(w, _)| weight > *w) {
            worst = Some((weight, reason.clone()));
        }

        let mut detail = describe_state(kind, current);
        if let Some(last) = &container.last_state.terminated {
            detail.push('\n');
            detail.push_str(&describe_state("last terminated", last));
        }
        if let Some(image) = container.image.as_deref() {
            detail.push_str(&format!("\nimage: {image}"));
        }
        detail.push_str(&format!("\nrestarts: {}", container.restart_count));

        let mut item = EvidenceItem::new(
            SourceKind::ContainerState,
            format!("container {}: {} ({})", container.name, kind, reason),
            detail,
        )
        .with_weight(weight);
        let finished = current
            .finished_at
            .or_else(|| container.last_state.terminated.as_ref().and_then(|t| t.finished_at));
        if let Some(at) = finished {
            item = item.with_timestamp(at);
        }
        items.push(item);
    }

    Ok(PodSnapshot {
        name: pod.metadata.name,
        namespace: pod
            .metadata
            .namespace
            .unwrap_or_else(|| default_namespace.to_string()),
        phase,
        restarts,
        worst_reason: worst.map(|(_, reason)| reason),
        items,
    })
}

/// Parse `kubectl get events -o json` into one item per event.
///
/// Warning events are weighted by how often they repeated.
pub fn parse_events(json: &str) -> Result<Vec<EvidenceItem>> {
    let list: EventList = serde_json::from_str(json).map_err(|e| unexpected("events", e))?;
    Ok(list
        .items
        .into_iter()
        .map(|event| {
            let event_type = event.event_type.unwrap_or_else(|| "Normal".to_string());
            let reason = event.reason.unwrap_or_default();
            let count = event.count.unwrap_or(1).max(1);
            let mut detail = event.message.unwrap_or_default();
            if count > 1 {
                detail.push_str(&format!(" (x{count})"));
            }
            let mut item = EvidenceItem::new(
                SourceKind::ClusterEvent,
                format!("{event_type} {reason}"),
                detail,
            );
            if event_type == "Warning" {
                item = item.with_weight(count as f64);
            }
            match event
                .last_timestamp
                .or(event.event_time)
                .or(event.first_timestamp)
            {
                Some(at) => item.with_timestamp(at),
                None => item,
            }
        })
        .collect())
}

/// Next command an operator should run, chosen from the worst container state.
pub fn suggest_next_command(snapshot: &PodSnapshot) -> String {
    let target = format!("{} -n {}", snapshot.name, snapshot.namespace);
    match snapshot.worst_reason.as_deref() {
        Some("OOMKilled") => format!("kubectl top pod {target}"),
        Some("CrashLoopBackOff") | Some("Error") => {
            format!("kubectl logs {target} --previous --all-containers=true")
        }
        Some("ImagePullBackOff") | Some("ErrImagePull") | Some("InvalidImageName") => {
            format!("kubectl get events -n {} --field-selector involvedObject.name={},reason=Failed", snapshot.namespace, snapshot.name)
        }
        _ => format!("kubectl describe pod {target}"),
    }
}

/// Assemble collected evidence from the three kubectl reads.
pub fn build_evidence(
    snapshot: PodSnapshot,
    logs: Option<(String, bool)>,
    events: Vec<EvidenceItem>,
    tail: u32,
) -> CollectedEvidence {
    let mut evidence = CollectedEvidence::new(snapshot.name.clone());
    evidence.follow_ups.push(suggest_next_command(&snapshot));
    evidence.summary = vec![
        SummaryScalar::text("phase", snapshot.phase.clone()),
        SummaryScalar::count("restarts", snapshot.restarts),
        SummaryScalar::text("namespace", snapshot.namespace.clone()),
    ];

    evidence.items = snapshot.items;
    if let Some((text, previous)) = logs.filter(|(text, _)| !text.trim().is_empty()) {
        let label = if previous {
            format!("logs from previous container (last {tail} lines)")
        } else {
            format!("logs (last {tail} lines)")
        };
        evidence
            .items
            .push(EvidenceItem::new(SourceKind::PodLogs, label, text));
    }
    evidence.items.extend(events);
    evidence
}

/// One row of a namespace scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHealth {
    pub name: String,
    pub phase: String,
    /// Every container reports ready.
    pub ready: bool,
    pub restarts: u64,
}

impl PodHealth {
    pub fn is_healthy(&self) -> bool {
        self.phase == "Running" && self.ready && self.restarts == 0
    }
}

/// Health rows from `kubectl get pods -o json`, in listing order.
pub fn parse_pod_list(json: &str) -> Result<Vec<PodHealth>> {
    let list: PodList = serde_json::from_str(json).map_err(|e| {
        TriageError::source_unavailable(SOURCE, format!("unexpected kubectl output: {e}"))
    })?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| {
            let statuses = &pod.status.container_statuses;
            PodHealth {
                ready: statuses.iter().all(|c| c.ready),
                restarts: statuses.iter().map(|c| c.restart_count).sum(),
                phase: pod.status.phase.clone().unwrap_or_else(|| "Unknown".to_string()),
                name: pod.metadata.name,
            }
        })
        .collect())
}

/// List every pod in `namespace` with its health.
pub async fn list_pods(namespace: &str) -> Result<Vec<PodHealth>> {
    info!(namespace = %namespace, "scanning namespace");
    let json = ToolCommand::new(SOURCE, "kubectl")
        .args(["get", "pods", "-n", namespace, "-o", "json"])
        .timeout(Duration::from_secs(30))
        .run_checked()
        .await?;
    parse_pod_list(&json)
}

/// Collects evidence about one pod.
#[derive(Debug, Clone)]
pub struct KubernetesCollector {
    pod: String,
    namespace: String,
    tail: u32,
    timeout: Duration,
}

impl KubernetesCollector {
    pub fn new(pod: &str, namespace: &str) -> Self {
        Self {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            tail: 50,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_tail(mut self, tail: u32) -> Self {
        self.tail = tail;
        self
    }

    fn kubectl(&self) -> ToolCommand {
        ToolCommand::new(SOURCE, "kubectl").timeout(self.timeout)
    }

    async fn logs(&self) -> Option<(String, bool)> {
        let base = self
            .kubectl()
            .args(["logs", self.pod.as_str(), "-n", self.namespace.as_str()])
            .arg(format!("--tail={}", self.tail))
            .arg("--all-containers=true");
        match base.clone().run_checked().await {
            Ok(text) if !text.trim().is_empty() => return Some((text, false)),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "current logs unavailable, trying previous container"),
        }
        match base.arg("--previous").run_checked().await {
            Ok(text) => Some((text, true)),
            Err(err) => {
                warn!(error = %err, "no logs available");
                None
            }
        }
    }

    async fn events(&self) -> Vec<EvidenceItem> {
        let result = self
            .kubectl()
            .args(["get", "events", "-n", self.namespace.as_str(), "-o", "json"])
            .arg("--field-selector")
            .arg(format!("involvedObject.name={}", self.pod))
            .run_checked()
            .await
            .and_then(|json| parse_events(&json));
        match result {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "events unavailable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl EvidenceCollector for KubernetesCollector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn collect(&self) -> Result<CollectedEvidence> {
        info!(pod = %self.pod, namespace = %self.namespace, "inspecting pod");
        let pod_json = self
            .kubectl()
            .args(["get", "pod", self.pod.as_str(), "-n", self.namespace.as_str(), "-o", "json"])
            .run_checked()
            .await?;
        let snapshot = parse_pod(&pod_json, &self.namespace)?;
        let logs = self.logs().await;
        let events = self.events().await;
        Ok(build_evidence(snapshot, logs, events, self.tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD: &str = r#"{
      "metadata": {"name": "web-7d9f", "namespace": "shop"},
      "status": {
        "phase": "Running",
        "containerStatuses": [
          {"name": "app", "ready": false, "restartCount": 7, "image": "shop/web:2.1",
           "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 5m0s restarting failed container"}},
           "lastState": {"terminated": {"reason": "OOMKilled", "exitCode": 137, "finishedAt": "2026-05-01T09:58:00Z"}}},
          {"name": "sidecar", "ready": true, "restartCount": 0, "state": {"running": {"startedAt": "2026-05-01T08:00:00Z"}}}
        ]
      }
    }"#;

    const EVENTS: &str = r#"{
      "items": [
        {"type": "Normal", "reason": "Pulled", "message": "Container image already present", "count": 8,
         "lastTimestamp": "2026-05-01T09:57:00Z"},
        {"type": "Warning", "reason": "BackOff", "message": "Back-off restarting failed container", "count": 31,
         "lastTimestamp": "2026-05-01T10:00:00Z"},
        {"type": "Warning", "reason": "FailedScheduling", "message": "0/3 nodes are available",
         "eventTime": "2026-05-01T07:00:00.123456Z"}
      ]
    }"#;

    #[test]
    fn test_parse_pod_status_and_containers() {
        let snapshot = parse_pod(POD, "default").expect("parse");
        assert_eq!(snapshot.namespace, "shop");
        assert_eq!(snapshot.phase, "Running");
        assert_eq!(snapshot.restarts, 7);
        assert_eq!(snapshot.worst_reason.as_deref(), Some("CrashLoopBackOff"));

        assert_eq!(snapshot.items.len(), 2);
        let container = &snapshot.items[1];
        assert_eq!(container.label(), "container app: waiting (CrashLoopBackOff)");
        assert_eq!(container.weight(), Some(16.0));
        assert!(container.detail().contains("last terminated: OOMKilled (exit code 137)"));
        assert!(container.observed_at().is_some());
    }

    #[test]
    fn test_parse_events_weights_warnings() {
        let items = parse_events(EVENTS).expect("parse");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].weight(), None);
        assert_eq!(items[1].label(), "Warning BackOff");
        assert_eq!(items[1].weight(), Some(31.0));
        assert!(items[1].detail().ends_with("(x31)"));
        assert_eq!(items[2].weight(), Some(1.0));
        assert!(items[2].observed_at().is_some());
    }

    #[test]
    fn test_build_evidence_with_previous_logs() {
        let snapshot = parse_pod(POD, "default").expect("parse");
        let evidence = build_evidence(
            snapshot,
            Some(("java.lang.OutOfMemoryError".to_string(), true)),
            parse_events(EVENTS).expect("events"),
            50,
        );
        assert_eq!(evidence.subject, "web-7d9f");
        assert_eq!(evidence.items.len(), 6);
        assert!(evidence
            .items
            .iter()
            .any(|i| i.label() == "logs from previous container (last 50 lines)"));
        assert_eq!(
            evidence.follow_ups,
            vec!["kubectl logs web-7d9f -n shop --previous --all-containers=true".to_string()]
        );
    }

    #[test]
    fn test_empty_logs_skipped() {
        let snapshot = parse_pod(POD, "default").expect("parse");
        let evidence = build_evidence(snapshot, Some(("  \n".to_string(), false)), vec![], 50);
        assert!(evidence.items.iter().all(|i| i.source_kind() != SourceKind::PodLogs));
    }

    #[test]
    fn test_suggest_for_oom() {
        let snapshot = PodSnapshot {
            name: "api".to_string(),
            namespace: "default".to_string(),
            phase: "Running".to_string(),
            restarts: 1,
            worst_reason: Some("OOMKilled".to_string()),
            items: vec![],
        };
        assert_eq!(suggest_next_command(&snapshot), "kubectl top pod api -n default");
    }

    #[test]
    fn test_pod_list_health() {
        let json = format!(
            r#"{{"items": [{POD},
              {{"metadata": {{"name": "db-0"}}, "status": {{"phase": "Running",
                "containerStatuses": [{{"name": "pg", "ready": true, "restartCount": 0}}]}}}},
              {{"metadata": {{"name": "job-x"}}, "status": {{"phase": "Pending"}}}}
            ]}}"#
        );
        let pods = parse_pod_list(&json).expect("parse");
        assert_eq!(pods.len(), 3);
        assert_eq!(pods[0].restarts, 7);
        assert!(!pods[0].ready);
        assert!(!pods[0].is_healthy());
        assert!(pods[1].is_healthy());
        assert_eq!(pods[2].phase, "Pending");
        assert!(!pods[2].is_healthy());
    }

    #[test]
    fn test_garbage_pod_json() {
        let err = parse_pod("Error from server (NotFound)", "default").unwrap_err();
        assert!(matches!(err, TriageError::SourceUnavailable { .. }));
    }
}
