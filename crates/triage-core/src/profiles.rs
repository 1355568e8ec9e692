//! Built-in task profiles, one per CLI tool.
//!
//! Instruction templates may reference `{subject}` and any summary label the
//! matching collector emits (see `triage-collectors`).

use crate::domain::TaskProfile;

pub const IMAGE_SECURITY: &str = "image-security";
pub const POD_FAILURE: &str = "pod-failure";
pub const COST_OPTIMIZATION: &str = "cost-optimization";
pub const WORKFLOW_FAILURE: &str = "workflow-failure";
pub const TERRAFORM_GENERATION: &str = "terraform-generation";

/// Files requested from the Terraform generator, in output order.
pub const TERRAFORM_FILES: &[&str] = &[
    "main.tf",
    "variables.tf",
    "outputs.tf",
    "terraform.tfvars.example",
];

pub fn image_security() -> TaskProfile {
    TaskProfile::diagnostic(
        IMAGE_SECURITY,
        "You are a container security consultant reviewing a vulnerability scan of \
the image {subject} ({total} findings, {critical} critical, {high} high).\n\
A \"latest\" tag is not a guarantee of a clean image: it is only the newest build \
and may still carry CVEs from its base layers.\n\
Judge the overall posture (good, concerning or critical), name the packages or \
layers responsible, and recommend a concrete fix such as a specific alternative \
tag or base image. Be specific; do not suggest \"update to latest\".",
        &["SECURITY POSTURE", "AFFECTED PACKAGES", "RECOMMENDED FIX"],
    )
}

pub fn pod_failure() -> TaskProfile {
    TaskProfile::diagnostic(
        POD_FAILURE,
        "You are a Kubernetes expert debugging the failing pod {subject} \
(phase {phase}, {restarts} restarts).\n\
Using the container states, logs and events below, explain in plain terms what \
is making the pod fail and why, then give specific kubectl commands or YAML \
changes that fix it. Call out well-known states such as ImagePullBackOff, \
CrashLoopBackOff or OOMKilled explicitly.",
        &["ROOT CAUSE", "WHY THIS HAPPENS", "HOW TO FIX"],
    )
}

pub fn cost_optimization() -> TaskProfile {
    TaskProfile::diagnostic(
        COST_OPTIMIZATION,
        "You are an AWS cost optimization expert reviewing the bill for {subject}: \
total {total cost} USD over the last {days} days across {services} services.\n\
Summarize where the money goes, list specific areas of waste, give actionable \
steps naming AWS services and features, and estimate the monthly savings. If \
spend is low, say so but still suggest what to change before it scales.",
        &[
            "COST ANALYSIS",
            "HIDDEN COSTS DETECTED",
            "OPTIMIZATION RECOMMENDATIONS",
            "ESTIMATED SAVINGS",
        ],
    )
}

pub fn workflow_failure() -> TaskProfile {
    TaskProfile::diagnostic(
        WORKFLOW_FAILURE,
        "You are a GitHub Actions expert analyzing failed CI runs of {repository} \
({failed runs} failed runs, {failed jobs} failed jobs).\n\
Address every failure present in the job excerpts below: identify each error, \
explain why it happened, give numbered steps to fix all of them, show the exact \
workflow YAML changes when applicable, and suggest how to prevent a recurrence.",
        &[
            "ROOT CAUSE",
            "WHY THIS HAPPENED",
            "HOW TO FIX",
            "YAML CHANGES",
            "PREVENTION",
        ],
    )
}

pub fn terraform_generation() -> TaskProfile {
    TaskProfile::multi_file(
        TERRAFORM_GENERATION,
        "You are a Terraform/OpenTofu expert. Generate production-ready \
infrastructure code for the {provider} provider implementing this request:\n\
{subject}\n\n\
Requirements: Terraform 1.0+ syntax, explicit resource dependencies, a short \
comment on each resource, variables with descriptions and validation for every \
configurable value, locals for computed values, consistent tagging and naming, \
data sources where appropriate. Emit only valid HCL; never hardcode secrets.",
        TERRAFORM_FILES,
    )
}

/// Look up a built-in profile by name.
pub fn by_name(name: &str) -> Option<TaskProfile> {
    match name {
        IMAGE_SECURITY => Some(image_security()),
        POD_FAILURE => Some(pod_failure()),
        COST_OPTIMIZATION => Some(cost_optimization()),
        WORKFLOW_FAILURE => Some(workflow_failure()),
        TERRAFORM_GENERATION => Some(terraform_generation()),
        _ => None,
    }
}
