//! Project tree and synthesis driver
//!
//! A [`Project`] is the root of an ownership tree of units and
//! subprojects. It owns the dependency ledger and the task graph, and
//! drives the three-phase synthesis lifecycle: `pre_synthesize` top-down,
//! `synthesize` in registration order into a buffered writer, a single
//! flush, then `post_synthesize` bottom-up. Any hook failure aborts the
//! pass before anything is committed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use crate::deps::{Dependencies, DependencyManifestFile};
use crate::ident::next_unit_id;
use crate::registry::{PublishOptions, PublishTarget};
use crate::tasks::{TaskManifestFile, Tasks};
use crate::unit::{Phase, Synthesizable};
use crate::writer::{FileSink, OutputBuffer};

/// Path → content view of one synthesis pass, as committed to disk.
pub type Snapshot = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectError {
    #[error("A unit with id '{0}' is already registered in this scope")]
    DuplicateIdentity(String),
}

/// Configuration surface of a project. Frozen once the project is
/// constructed; synthesis never mutates it.
#[derive(Debug, Clone)]
pub struct ProjectOptions {
    /// Project name. For a subproject it doubles as the unit id within
    /// the parent.
    pub name: String,

    /// Output root for the root project; directory relative to the
    /// parent's output root for a subproject.
    pub outdir: PathBuf,

    /// Enabled feature flags, consulted by conditional task steps.
    pub features: BTreeSet<String>,

    /// Whether dev entries mirrored from peer dependencies are pinned to
    /// concrete versions.
    pub pin_peer_mirrors: bool,

    /// Publish configuration, resolved against the project name at
    /// construction time.
    pub publish: Option<PublishOptions>,
}

impl ProjectOptions {
    pub fn new(name: impl Into<String>, outdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            outdir: outdir.into(),
            features: BTreeSet::new(),
            pin_peer_mirrors: true,
            publish: None,
        }
    }
}

/// Mutable view of shared project state handed to `pre_synthesize`.
pub struct PreContext<'a> {
    pub deps: &'a mut Dependencies,
    pub tasks: &'a mut Tasks,
    pub options: &'a ProjectOptions,
    pub is_root: bool,
}

/// Read-only view of frozen project state handed to `synthesize` and
/// `post_synthesize`.
pub struct SynthContext<'a> {
    pub deps: &'a Dependencies,
    pub tasks: &'a Tasks,
    pub options: &'a ProjectOptions,
    pub is_root: bool,
    pub publish: Option<&'a PublishTarget>,

    /// Absolute output directory of the owning project. During
    /// `post_synthesize` the committed files exist underneath it.
    pub outdir: &'a Path,
}

struct UnitSlot {
    id: String,
    phase: Phase,
    unit: Box<dyn Synthesizable>,
}

impl std::fmt::Debug for UnitSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitSlot")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Ordered children of a project: leaf units and nested subprojects,
/// in registration order.
#[derive(Debug)]
enum Child {
    Unit(UnitSlot),
    Project(Project),
}

impl Child {
    fn id(&self) -> &str {
        match self {
            Child::Unit(slot) => &slot.id,
            Child::Project(sub) => &sub.options.name,
        }
    }
}

/// Root aggregate: owns the unit tree, the dependency ledger, and the
/// task graph, and runs synthesis passes.
#[derive(Debug)]
pub struct Project {
    options: ProjectOptions,
    is_root: bool,
    deps: Dependencies,
    tasks: Tasks,
    publish: Option<PublishTarget>,
    children: Vec<Child>,
}

impl Project {
    /// Creates a root project. The dependency and task manifest units
    /// are always present and registered first.
    pub fn new(options: ProjectOptions) -> Result<Self> {
        Self::build(options, true)
    }

    fn build(options: ProjectOptions, is_root: bool) -> Result<Self> {
        let publish = match &options.publish {
            Some(opts) => Some(PublishTarget::resolve(&options.name, opts)?),
            None => None,
        };

        let mut project = Self {
            deps: Dependencies::with_pinning(options.pin_peer_mirrors),
            tasks: Tasks::new(),
            publish,
            children: Vec::new(),
            is_root,
            options,
        };
        project.add_unit(DependencyManifestFile)?;
        project.add_unit(TaskManifestFile)?;
        Ok(project)
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn options(&self) -> &ProjectOptions {
        &self.options
    }

    /// Output directory as configured (absolute for the root, relative
    /// to the parent for subprojects).
    pub fn outdir(&self) -> &Path {
        &self.options.outdir
    }

    pub fn deps(&self) -> &Dependencies {
        &self.deps
    }

    pub fn deps_mut(&mut self) -> &mut Dependencies {
        &mut self.deps
    }

    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut Tasks {
        &mut self.tasks
    }

    /// The resolved publish target, when publishing is configured.
    pub fn publish_target(&self) -> Option<&PublishTarget> {
        self.publish.as_ref()
    }

    /// Registers a unit under a fallback identity from the process-wide
    /// allocator.
    pub fn add_unit(&mut self, unit: impl Synthesizable + 'static) -> Result<String> {
        let id = next_unit_id(unit.kind());
        self.register_unit(id, Box::new(unit))
    }

    /// Registers a unit under an explicit identity. Identities must be
    /// unique among siblings.
    pub fn add_unit_with_id(
        &mut self,
        id: impl Into<String>,
        unit: impl Synthesizable + 'static,
    ) -> Result<String> {
        self.register_unit(id.into(), Box::new(unit))
    }

    fn register_unit(&mut self, id: String, unit: Box<dyn Synthesizable>) -> Result<String> {
        self.ensure_unique(&id)?;
        debug!(unit = %id, project = %self.options.name, "registered unit");
        self.children.push(Child::Unit(UnitSlot {
            id: id.clone(),
            phase: Phase::Unsynthesized,
            unit,
        }));
        Ok(id)
    }

    /// Registers a nested subproject. Its name is its unit id within
    /// this project, and its output directory must be relative so it
    /// lands inside the parent's output root.
    pub fn add_subproject(&mut self, options: ProjectOptions) -> Result<&mut Project> {
        ensure!(
            options.outdir.is_relative(),
            "subproject output directory must be relative: {}",
            options.outdir.display()
        );
        self.ensure_unique(&options.name)?;

        let sub = Project::build(options, false)?;
        self.children.push(Child::Project(sub));
        match self.children.last_mut() {
            Some(Child::Project(sub)) => Ok(sub),
            _ => unreachable!("subproject was just pushed"),
        }
    }

    fn ensure_unique(&self, id: &str) -> Result<(), ProjectError> {
        if self.children.iter().any(|c| c.id() == id) {
            return Err(ProjectError::DuplicateIdentity(id.to_string()));
        }
        Ok(())
    }

    /// Identities of the direct children, in registration order.
    pub fn child_ids(&self) -> Vec<&str> {
        self.children.iter().map(Child::id).collect()
    }

    /// Lifecycle phase of a direct child unit, if it exists.
    pub fn unit_phase(&self, id: &str) -> Option<Phase> {
        self.children.iter().find_map(|c| match c {
            Child::Unit(slot) if slot.id == id => Some(slot.phase),
            _ => None,
        })
    }

    /// Runs one full synthesis pass and returns the committed snapshot.
    ///
    /// Each call is a fresh pass over the unchanged tree; with no
    /// configuration changes in between, passes produce byte-identical
    /// output.
    pub fn synth(&mut self) -> Result<Snapshot> {
        info!(project = %self.options.name, outdir = %self.options.outdir.display(), "starting synthesis pass");
        self.reset_phases();
        let root_dir = self.options.outdir.clone();

        self.run_pre()?;

        let mut out = OutputBuffer::new();
        self.run_synthesize("", &root_dir, &mut out)?;

        out.flush(&root_dir)?;

        self.run_post(&root_dir)?;

        Ok(out.snapshot())
    }

    fn reset_phases(&mut self) {
        for child in &mut self.children {
            match child {
                Child::Unit(slot) => slot.phase = Phase::Unsynthesized,
                Child::Project(sub) => sub.reset_phases(),
            }
        }
    }

    /// Pre phase: strictly top-down, siblings in registration order.
    /// Once a project's subtree completes, its configuration is frozen
    /// and the task graph is finalized.
    fn run_pre(&mut self) -> Result<()> {
        for child in &mut self.children {
            match child {
                Child::Unit(slot) => {
                    debug!(unit = %slot.id, "pre-synthesize");
                    let mut ctx = PreContext {
                        deps: &mut self.deps,
                        tasks: &mut self.tasks,
                        options: &self.options,
                        is_root: self.is_root,
                    };
                    slot.unit
                        .pre_synthesize(&mut ctx)
                        .with_context(|| format!("pre-synthesize failed for unit '{}'", slot.id))?;
                    slot.phase = Phase::PreSynthesized;
                }
                Child::Project(sub) => sub.run_pre()?,
            }
        }

        self.tasks.finalize(self.is_root, &self.options.features)?;
        Ok(())
    }

    /// Synthesize phase: registration order, every unit writes only
    /// through its own sink. No inter-unit order is guaranteed.
    fn run_synthesize(&mut self, prefix: &str, dir: &Path, out: &mut OutputBuffer) -> Result<()> {
        for child in &mut self.children {
            match child {
                Child::Unit(slot) => {
                    debug!(unit = %slot.id, "synthesize");
                    let ctx = SynthContext {
                        deps: &self.deps,
                        tasks: &self.tasks,
                        options: &self.options,
                        is_root: self.is_root,
                        publish: self.publish.as_ref(),
                        outdir: dir,
                    };
                    let mut sink = FileSink::new(out, &slot.id, prefix);
                    slot.unit
                        .synthesize(&ctx, &mut sink)
                        .with_context(|| format!("synthesize failed for unit '{}'", slot.id))?;
                    slot.phase = Phase::Synthesized;
                }
                Child::Project(sub) => {
                    let rel = sub
                        .options
                        .outdir
                        .to_str()
                        .with_context(|| {
                            format!(
                                "subproject output directory is not valid UTF-8: {}",
                                sub.options.outdir.display()
                            )
                        })?
                        .to_string();
                    let child_prefix = if prefix.is_empty() {
                        rel
                    } else {
                        format!("{}/{}", prefix, rel)
                    };
                    let child_dir = dir.join(&sub.options.outdir);
                    sub.run_synthesize(&child_prefix, &child_dir, out)?;
                }
            }
        }
        Ok(())
    }

    /// Post phase: strictly bottom-up. Sibling order is unspecified;
    /// reverse registration order is used so nothing can come to rely on
    /// the pre-phase ordering.
    fn run_post(&mut self, dir: &Path) -> Result<()> {
        for child in self.children.iter_mut().rev() {
            match child {
                Child::Unit(slot) => {
                    debug!(unit = %slot.id, "post-synthesize");
                    let ctx = SynthContext {
                        deps: &self.deps,
                        tasks: &self.tasks,
                        options: &self.options,
                        is_root: self.is_root,
                        publish: self.publish.as_ref(),
                        outdir: dir,
                    };
                    slot.unit
                        .post_synthesize(&ctx)
                        .with_context(|| format!("post-synthesize failed for unit '{}'", slot.id))?;
                    slot.phase = Phase::PostSynthesized;
                }
                Child::Project(sub) => {
                    let child_dir = dir.join(&sub.options.outdir);
                    sub.run_post(&child_dir)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DependencyKind;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn project_in(dir: &TempDir) -> Project {
        Project::new(ProjectOptions::new("demo", dir.path())).unwrap()
    }

    /// Records hook invocations into a shared log.
    struct Probe {
        label: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Synthesizable for Probe {
        fn kind(&self) -> &'static str {
            "Probe"
        }

        fn pre_synthesize(&mut self, _ctx: &mut PreContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("pre:{}", self.label));
            Ok(())
        }

        fn synthesize(&self, _ctx: &SynthContext<'_>, _files: &mut FileSink<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("synth:{}", self.label));
            Ok(())
        }

        fn post_synthesize(&mut self, _ctx: &SynthContext<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("post:{}", self.label));
            Ok(())
        }
    }

    #[test]
    fn manifest_units_are_always_present() {
        let dir = TempDir::new().unwrap();
        let project = project_in(&dir);

        let ids = project.child_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].starts_with("DependencyManifest#"));
        assert!(ids[1].starts_with("TaskManifest#"));
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);

        project.add_unit_with_id("readme", Probe {
            label: "a",
            log: Rc::new(RefCell::new(Vec::new())),
        })
        .unwrap();

        let err = project
            .add_unit_with_id("readme", Probe {
                label: "b",
                log: Rc::new(RefCell::new(Vec::new())),
            })
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ProjectError>(),
            Some(&ProjectError::DuplicateIdentity("readme".into()))
        );
    }

    #[test]
    fn fallback_identities_are_unique() {
        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = project.add_unit(Probe { label: "a", log: log.clone() }).unwrap();
        let b = project.add_unit(Probe { label: "b", log: log.clone() }).unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with("Probe#"));
    }

    #[test]
    fn subproject_outdir_must_be_relative() {
        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);

        let result = project.add_subproject(ProjectOptions::new("child", "/absolute"));
        assert!(result.is_err());
    }

    #[test]
    fn pre_runs_top_down_and_post_bottom_up() {
        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);
        let log = Rc::new(RefCell::new(Vec::new()));

        project
            .add_unit_with_id("first", Probe { label: "first", log: log.clone() })
            .unwrap();
        let sub = project
            .add_subproject(ProjectOptions::new("child", "packages/child"))
            .unwrap();
        sub.add_unit_with_id("nested", Probe { label: "nested", log: log.clone() })
            .unwrap();
        project
            .add_unit_with_id("last", Probe { label: "last", log: log.clone() })
            .unwrap();

        project.synth().unwrap();
        let entries = log.borrow();

        let pos = |needle: &str| entries.iter().position(|e| e == needle).unwrap();
        assert!(pos("pre:first") < pos("pre:nested"));
        assert!(pos("pre:nested") < pos("pre:last"));
        assert!(pos("post:last") < pos("post:nested"));
        assert!(pos("post:nested") < pos("post:first"));
        assert!(pos("synth:first") < pos("post:first"));
    }

    #[test]
    fn synth_commits_manifests_and_advances_phases() {
        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);
        project.deps_mut().add("foo@^1", DependencyKind::Runtime).unwrap();

        let snapshot = project.synth().unwrap();

        assert!(snapshot.contains_key(".blueprint/deps.json"));
        assert!(snapshot.contains_key(".blueprint/tasks.json"));
        assert!(dir.path().join(".blueprint/deps.json").is_file());

        for id in project.child_ids() {
            assert_eq!(project.unit_phase(id), Some(Phase::PostSynthesized));
        }
    }

    #[test]
    fn failing_hook_aborts_before_commit() {
        struct Failing;
        impl Synthesizable for Failing {
            fn synthesize(&self, _ctx: &SynthContext<'_>, _files: &mut FileSink<'_>) -> Result<()> {
                anyhow::bail!("boom")
            }
        }

        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);
        project.add_unit(Failing).unwrap();

        assert!(project.synth().is_err());
        assert!(!dir.path().join(".blueprint/deps.json").exists());
    }

    #[test]
    fn pre_hook_mutations_are_visible_to_synthesize() {
        struct AddsDep;
        impl Synthesizable for AddsDep {
            fn pre_synthesize(&mut self, ctx: &mut PreContext<'_>) -> Result<()> {
                ctx.deps.add("derived@^3", DependencyKind::Runtime)?;
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let mut project = project_in(&dir);
        project.add_unit(AddsDep).unwrap();

        let snapshot = project.synth().unwrap();
        assert!(snapshot[".blueprint/deps.json"].contains("derived"));
    }
}
