//! Workspace manifests agree on one version and the internal path
//! dependencies pin that same version.

use std::path::{Path, PathBuf};

const MEMBERS: [&str; 3] = [
    "crates/triage-core",
    "crates/triage-collectors",
    "crates/triage-cli",
];

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("workspace root above crates/triage-core")
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    let text = std::fs::read_to_string(dir.join("Cargo.toml")).expect("read Cargo.toml");
    text.parse().expect("valid TOML")
}

fn workspace_version(root: &toml::Value) -> &str {
    root["workspace"]["package"]["version"]
        .as_str()
        .expect("workspace.package.version")
}

#[test]
fn members_inherit_workspace_version() {
    let root = workspace_root();
    for member in MEMBERS {
        let doc = manifest(&root.join(member));
        let inherited = doc["package"]["version"]
            .get("workspace")
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherited,
            Some(true),
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn members_listed_in_workspace() {
    let doc = manifest(&workspace_root());
    let listed: Vec<&str> = doc["workspace"]["members"]
        .as_array()
        .expect("workspace.members")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(listed, MEMBERS);
}

#[test]
fn internal_dependencies_pin_workspace_version() {
    let doc = manifest(&workspace_root());
    let version = workspace_version(&doc);
    for name in ["triage-core", "triage-collectors"] {
        let pinned = doc["workspace"]["dependencies"][name]["version"].as_str();
        assert_eq!(pinned, Some(version), "{name} pin drifted from {version}");
    }
}

#[test]
fn library_reports_workspace_version() {
    let doc = manifest(&workspace_root());
    assert_eq!(workspace_version(&doc), triage_core::VERSION);
}
