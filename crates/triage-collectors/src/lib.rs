//! Triage Collectors: evidence sources for the triage pipeline
//!
//! Each collector gathers facts from one external system and hands them to
//! `triage_core` as [`CollectedEvidence`](triage_core::CollectedEvidence).
//!
//! ## Sources
//!
//! - `trivy image` vulnerability scans
//! - `kubectl` pod status, logs and events
//! - AWS Cost Explorer through the `aws` CLI
//! - the GitHub Actions REST API
//! - free-text Terraform requests (no external call)

pub mod aws_cost;
pub mod command;
pub mod github_actions;
pub mod kubernetes;
pub mod terraform;
pub mod trivy;

pub use aws_cost::AwsCostCollector;
pub use command::{classify_failure, looks_like_auth_failure, tool_available, ToolCommand};
pub use github_actions::{extract_error_blocks, GitHubActionsCollector};
pub use kubernetes::{list_pods, KubernetesCollector, PodHealth};
pub use terraform::{validate_directory, TerraformRequestCollector, Validation};
pub use trivy::{rank_images, render_comparison, ImageScore, TrivyCollector};
