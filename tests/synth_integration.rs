//! Synthesis integration tests
//!
//! These tests drive complete synthesis passes through the public API,
//! verifying the lifecycle ordering, the dependency merge rules, the
//! task graph, and the output writer working together.

use std::fs;

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::TempDir;

use blueprint::{
    AccessLevel, DependencyKind, FileSink, JsonFile, PreContext, Project, ProjectError,
    ProjectOptions, PublishOptions, RegistryError, StepCondition, SynthContext, Synthesizable,
    TaskError, TaskStep, WriterError, YamlFile, GENERATED_MARKER,
};

/// Installs a subscriber once so failing runs can be inspected with
/// RUST_LOG.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn new_project(dir: &TempDir) -> Project {
    init_tracing();
    Project::new(ProjectOptions::new("demo", dir.path())).unwrap()
}

/// Searches an error chain for a typed engine error.
fn find_in_chain<E: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> Option<&E> {
    err.chain().find_map(|cause| cause.downcast_ref::<E>())
}

fn parse_manifest(snapshot: &blueprint::Snapshot, path: &str) -> Value {
    serde_json::from_str(&snapshot[path]).unwrap()
}

// =============================================================================
// Identity Tests
// =============================================================================

#[test]
fn duplicate_sibling_identity_fails() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .add_unit_with_id("settings", JsonFile::new("settings.json", json!({})))
        .unwrap();
    let err = project
        .add_unit_with_id("settings", JsonFile::new("other.json", json!({})))
        .unwrap_err();

    assert_eq!(
        find_in_chain::<ProjectError>(&err),
        Some(&ProjectError::DuplicateIdentity("settings".into()))
    );
}

#[test]
fn same_identity_in_different_scopes_is_allowed() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .add_unit_with_id("settings", JsonFile::new("settings.json", json!({"root": true})))
        .unwrap();
    let sub = project
        .add_subproject(ProjectOptions::new("child", "packages/child"))
        .unwrap();
    sub.add_unit_with_id("settings", JsonFile::new("settings.json", json!({"root": false})))
        .unwrap();

    let snapshot = project.synth().unwrap();
    assert!(snapshot.contains_key("settings.json"));
    assert!(snapshot.contains_key("packages/child/settings.json"));
}

#[test]
fn subproject_name_collides_with_unit_identity() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .add_unit_with_id("shared", JsonFile::new("shared.json", json!({})))
        .unwrap();
    let err = project
        .add_subproject(ProjectOptions::new("shared", "packages/shared"))
        .unwrap_err();

    assert_eq!(
        find_in_chain::<ProjectError>(&err),
        Some(&ProjectError::DuplicateIdentity("shared".into()))
    );
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn repeated_passes_are_byte_identical() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .deps_mut()
        .add("serde@^1.0", DependencyKind::Runtime)
        .unwrap();
    project
        .tasks_mut()
        .add("build")
        .unwrap()
        .exec("cargo build --release");
    project
        .add_unit(JsonFile::new("app.json", json!({"name": "demo"})))
        .unwrap();

    let first = project.synth().unwrap();
    let second = project.synth().unwrap();

    assert_eq!(first, second);
}

#[test]
fn snapshot_matches_committed_files() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);
    project
        .add_unit(JsonFile::new("nested/app.json", json!({"name": "demo"})))
        .unwrap();

    let snapshot = project.synth().unwrap();

    for (path, content) in &snapshot {
        let on_disk = fs::read_to_string(dir.path().join(path)).unwrap();
        assert_eq!(&on_disk, content, "mismatch for {path}");
    }
}

#[test]
fn post_phase_sees_committed_files() {
    struct VerifiesCommit;

    impl Synthesizable for VerifiesCommit {
        fn post_synthesize(&mut self, ctx: &SynthContext<'_>) -> Result<()> {
            anyhow::ensure!(
                ctx.outdir.join(".blueprint/tasks.json").is_file(),
                "task manifest was not committed before the post phase"
            );
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);
    project.add_unit(VerifiesCommit).unwrap();

    project.synth().unwrap();
}

#[test]
fn pre_phase_derived_config_reaches_the_manifests() {
    struct DerivesDeps;

    impl Synthesizable for DerivesDeps {
        fn pre_synthesize(&mut self, ctx: &mut PreContext<'_>) -> Result<()> {
            ctx.deps.add("derived@^3.1", DependencyKind::Runtime)?;
            ctx.tasks.add("derived-check")?.exec("run-checks");
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);
    project.add_unit(DerivesDeps).unwrap();

    let snapshot = project.synth().unwrap();
    let deps = parse_manifest(&snapshot, ".blueprint/deps.json");
    let tasks = parse_manifest(&snapshot, ".blueprint/tasks.json");

    assert_eq!(deps["runtime"]["derived"], "^3.1");
    assert_eq!(tasks["tasks"]["derived-check"]["steps"][0]["exec"], "run-checks");
}

#[test]
fn failing_hook_commits_nothing() {
    struct Failing;

    impl Synthesizable for Failing {
        fn synthesize(&self, _ctx: &SynthContext<'_>, _files: &mut FileSink<'_>) -> Result<()> {
            anyhow::bail!("refusing to render")
        }
    }

    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);
    project
        .add_unit(JsonFile::new("app.json", json!({"ok": true})))
        .unwrap();
    project.add_unit(Failing).unwrap();

    assert!(project.synth().is_err());
    assert!(!dir.path().join("app.json").exists());
    assert!(!dir.path().join(".blueprint").exists());
}

// =============================================================================
// Dependency Ledger Tests
// =============================================================================

#[test]
fn later_request_overwrites_earlier_range() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project.deps_mut().add("aaa@^1", DependencyKind::Runtime).unwrap();
    project.deps_mut().add("aaa@^2", DependencyKind::Runtime).unwrap();

    let snapshot = project.synth().unwrap();
    let deps = parse_manifest(&snapshot, ".blueprint/deps.json");

    assert_eq!(deps["runtime"]["aaa"], "^2");
    assert_eq!(deps["runtime"].as_object().unwrap().len(), 1);
}

#[test]
fn bundled_packages_mirror_into_runtime() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project.deps_mut().add("hey@2.1.1", DependencyKind::Bundled).unwrap();
    project.deps_mut().add("foo@^1.2.3", DependencyKind::Bundled).unwrap();
    project.deps_mut().add("bar@~1.0.0", DependencyKind::Bundled).unwrap();

    let snapshot = project.synth().unwrap();
    let deps = parse_manifest(&snapshot, ".blueprint/deps.json");

    assert_eq!(deps["runtime"]["bar"], "~1.0.0");
    assert_eq!(deps["runtime"]["foo"], "^1.2.3");
    assert_eq!(deps["runtime"]["hey"], "2.1.1");
    assert_eq!(deps["bundled"], json!(["bar", "foo", "hey"]));
}

#[test]
fn runtime_entry_suppresses_peer_dev_mirror() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project.deps_mut().add("ccc@^2", DependencyKind::Peer).unwrap();
    project.deps_mut().add("ccc@^2.3.3", DependencyKind::Runtime).unwrap();

    let snapshot = project.synth().unwrap();
    let deps = parse_manifest(&snapshot, ".blueprint/deps.json");

    assert_eq!(deps["peer"]["ccc"], "^2");
    assert_eq!(deps["runtime"]["ccc"], "^2.3.3");
    assert!(deps.get("dev").map_or(true, |dev| dev.get("ccc").is_none()));
}

#[test]
fn peer_packages_mirror_pinned_dev_entries() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project.deps_mut().add("aaa@^1.2.3", DependencyKind::Peer).unwrap();
    project.deps_mut().add("bbb@~4.5.6", DependencyKind::Peer).unwrap();

    let snapshot = project.synth().unwrap();
    let deps = parse_manifest(&snapshot, ".blueprint/deps.json");

    assert_eq!(deps["dev"]["aaa"], "1.2.3");
    assert_eq!(deps["dev"]["bbb"], "4.5.6");
    assert_eq!(deps["peer"]["aaa"], "^1.2.3");
}

#[test]
fn unpinned_peer_mirrors_stay_wildcard() {
    let dir = TempDir::new().unwrap();
    let mut options = ProjectOptions::new("demo", dir.path());
    options.pin_peer_mirrors = false;
    let mut project = Project::new(options).unwrap();

    project.deps_mut().add("aaa@^1.2.3", DependencyKind::Peer).unwrap();

    let snapshot = project.synth().unwrap();
    let deps = parse_manifest(&snapshot, ".blueprint/deps.json");

    assert_eq!(deps["dev"]["aaa"], "*");
}

// =============================================================================
// Publish Policy Tests
// =============================================================================

#[test]
fn restricted_unscoped_package_fails_at_construction() {
    let dir = TempDir::new().unwrap();
    let mut options = ProjectOptions::new("my-package", dir.path());
    options.publish = Some(PublishOptions {
        access: Some(AccessLevel::Restricted),
        ..Default::default()
    });

    let err = Project::new(options).unwrap_err();
    assert_eq!(
        find_in_chain::<RegistryError>(&err),
        Some(&RegistryError::InvalidAccessLevel("my-package".into()))
    );
}

#[test]
fn scoped_package_defaults_to_restricted() {
    let dir = TempDir::new().unwrap();
    let mut options = ProjectOptions::new("@myorg/tools", dir.path());
    options.publish = Some(PublishOptions::default());

    let project = Project::new(options).unwrap();
    let target = project.publish_target().unwrap();

    assert_eq!(target.access, AccessLevel::Restricted);
    assert_eq!(target.registry_host, "registry.npmjs.org/");
}

// =============================================================================
// Task Graph Tests
// =============================================================================

#[test]
fn spawn_cycle_aborts_the_pass() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project.tasks_mut().add("a").unwrap().spawn("b");
    project.tasks_mut().add("b").unwrap().spawn("a");

    let err = project.synth().unwrap_err();
    let cycle = find_in_chain::<TaskError>(&err).unwrap();

    match cycle {
        TaskError::CyclicTaskGraph { path } => {
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"b".to_string()));
        }
        other => panic!("expected cycle, got {other:?}"),
    }
    assert!(!dir.path().join(".blueprint").exists());
}

#[test]
fn manifest_preserves_spawn_and_required_env() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project.tasks_mut().add("build").unwrap().exec("cargo build");
    project
        .tasks_mut()
        .add("release")
        .unwrap()
        .describe("Cut a release")
        .spawn("build")
        .step(TaskStep::builtin("bump-version").with_arg("part", "minor"))
        .require_env("RELEASE_TOKEN")
        .require_env("REGISTRY_URL");

    let snapshot = project.synth().unwrap();
    let tasks = parse_manifest(&snapshot, ".blueprint/tasks.json");
    let release = &tasks["tasks"]["release"];

    assert_eq!(release["steps"][0]["spawn"], "build");
    assert_eq!(release["steps"][1]["builtin"], "bump-version");
    assert_eq!(release["steps"][1]["args"]["part"], "minor");
    assert_eq!(release["required_env"], json!(["RELEASE_TOKEN", "REGISTRY_URL"]));
}

#[test]
fn root_only_steps_are_filtered_in_subprojects() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .tasks_mut()
        .add("deploy")
        .unwrap()
        .exec("build-artifact")
        .step(TaskStep::exec("publish-site").only_if(StepCondition::RootOnly));

    let sub = project
        .add_subproject(ProjectOptions::new("child", "packages/child"))
        .unwrap();
    sub.tasks_mut()
        .add("deploy")
        .unwrap()
        .exec("build-artifact")
        .step(TaskStep::exec("publish-site").only_if(StepCondition::RootOnly));

    let snapshot = project.synth().unwrap();
    let root_tasks = parse_manifest(&snapshot, ".blueprint/tasks.json");
    let sub_tasks = parse_manifest(&snapshot, "packages/child/.blueprint/tasks.json");

    let root_steps = root_tasks["tasks"]["deploy"]["steps"].as_array().unwrap();
    let sub_steps = sub_tasks["tasks"]["deploy"]["steps"].as_array().unwrap();

    assert_eq!(root_steps.len(), 2);
    assert_eq!(sub_steps.len(), 1);
    assert_eq!(sub_steps[0]["exec"], "build-artifact");
}

#[test]
fn feature_gated_steps_follow_project_features() {
    let dir = TempDir::new().unwrap();
    let mut options = ProjectOptions::new("demo", dir.path());
    options.features.insert("docs".to_string());
    let mut project = Project::new(options).unwrap();

    project
        .tasks_mut()
        .add("build")
        .unwrap()
        .step(TaskStep::exec("render-docs").only_if(StepCondition::FeatureEnabled("docs".into())))
        .step(TaskStep::exec("run-bench").only_if(StepCondition::FeatureEnabled("bench".into())));

    let snapshot = project.synth().unwrap();
    let tasks = parse_manifest(&snapshot, ".blueprint/tasks.json");
    let steps = tasks["tasks"]["build"]["steps"].as_array().unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["exec"], "render-docs");
}

// =============================================================================
// Output Writer Tests
// =============================================================================

#[test]
fn path_collision_names_both_units_and_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .add_unit_with_id("left", JsonFile::new("shared.json", json!({"from": "left"})))
        .unwrap();
    project
        .add_unit_with_id("right", JsonFile::new("shared.json", json!({"from": "right"})))
        .unwrap();

    let err = project.synth().unwrap_err();
    let collision = find_in_chain::<WriterError>(&err).unwrap();

    assert_eq!(
        collision,
        &WriterError::OutputCollision {
            path: "shared.json".into(),
            first: "left".into(),
            second: "right".into(),
        }
    );
    assert!(!dir.path().join("shared.json").exists());
    assert!(!dir.path().join(".blueprint").exists());
}

#[test]
fn generated_marker_is_embedded_on_request() {
    let dir = TempDir::new().unwrap();
    let mut project = new_project(&dir);

    project
        .add_unit(JsonFile::new("marked.json", json!({"a": 1})))
        .unwrap();
    project
        .add_unit(JsonFile::new("plain.json", json!({"a": 1})).without_marker())
        .unwrap();
    project
        .add_unit(YamlFile::new("pipeline/stages.yml", json!({"stages": ["build"]})))
        .unwrap();

    let snapshot = project.synth().unwrap();

    assert!(snapshot["marked.json"].contains(GENERATED_MARKER));
    assert!(!snapshot["plain.json"].contains(GENERATED_MARKER));
    assert!(snapshot["pipeline/stages.yml"].starts_with(&format!("# {}", GENERATED_MARKER)));
}
