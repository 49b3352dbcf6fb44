//! Dependency ledger
//!
//! Requested packages are recorded as an ordered log of
//! `(name, range, kind)` events. Nothing is merged at insertion time:
//! every view consumers read (runtime, dev, peer, ...) is reduced from the
//! log on demand, which keeps the overwrite and mirroring rules in one
//! place. Within a kind, the last request for a name wins. Bundled
//! packages mirror into the runtime view; peer packages mirror a pinned
//! entry into the dev view unless the name already resolves at runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::render_json;
use crate::project::SynthContext;
use crate::unit::Synthesizable;
use crate::writer::FileSink;

/// Where the dependency manifest is synthesized, relative to the owning
/// project's output directory.
pub const DEPS_MANIFEST_PATH: &str = ".blueprint/deps.json";

#[derive(Debug, Error, PartialEq)]
pub enum DepsError {
    #[error("'{name}' cannot be added as a {requested} dependency: it is already {existing}")]
    ConflictingCategory {
        name: String,
        requested: DependencyKind,
        existing: DependencyKind,
    },

    #[error("Invalid dependency spec '{0}'")]
    InvalidSpec(String),
}

/// Semantic category of a dependency request.
///
/// Categories are not just labels: they control which views a package
/// surfaces in and how conflicting requests are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Needed at run time by consumers of the project.
    Runtime,
    /// Expected to be provided by the consumer.
    Peer,
    /// Needed only to develop and test the project.
    Dev,
    /// Needed only while building.
    Build,
    /// Optional tooling for the development environment.
    Devenv,
    /// Shipped inside the published artifact; implies a runtime entry.
    Bundled,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Runtime => "runtime",
            DependencyKind::Peer => "peer",
            DependencyKind::Dev => "dev",
            DependencyKind::Build => "build",
            DependencyKind::Devenv => "devenv",
            DependencyKind::Bundled => "bundled",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed dependency request: package name plus optional version range.
/// A missing range means "any version" and renders as `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepCoordinates {
    pub name: String,
    pub version: Option<String>,
}

impl DepCoordinates {
    /// Parses a dependency spec.
    ///
    /// Accepted forms: `name`, `name@range`, `scope@name@range`, and the
    /// registry-native `@scope/name` / `@scope/name@range`. Scoped forms
    /// normalize to `@scope/name`.
    pub fn parse(spec: &str) -> Result<Self, DepsError> {
        let invalid = || DepsError::InvalidSpec(spec.to_string());

        let (name, version) = if let Some(rest) = spec.strip_prefix('@') {
            let parts: Vec<&str> = rest.split('@').collect();
            match parts.as_slice() {
                [name] => (format!("@{}", name), None),
                [name, range] => (format!("@{}", name), Some(range.to_string())),
                _ => return Err(invalid()),
            }
        } else {
            let parts: Vec<&str> = spec.split('@').collect();
            match parts.as_slice() {
                [name] => (name.to_string(), None),
                [name, range] => (name.to_string(), Some(range.to_string())),
                [scope, name, range] => {
                    if scope.is_empty() || name.is_empty() {
                        return Err(invalid());
                    }
                    (format!("@{}/{}", scope, name), Some(range.to_string()))
                }
                _ => return Err(invalid()),
            }
        };

        if name.trim_matches(&['@', '/'][..]).is_empty() {
            return Err(invalid());
        }
        if matches!(&version, Some(v) if v.is_empty()) {
            return Err(invalid());
        }

        Ok(Self { name, version })
    }

    /// The version range, with the `"*"` fallback applied.
    pub fn range(&self) -> &str {
        self.version.as_deref().unwrap_or("*")
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DepEvent {
    name: String,
    version: Option<String>,
    kind: DependencyKind,
}

/// Ordered log of dependency requests with reduced per-category views.
#[derive(Debug)]
pub struct Dependencies {
    events: Vec<DepEvent>,
    pin_peer_mirrors: bool,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl Dependencies {
    /// Creates an empty ledger with peer mirrors pinned to concrete
    /// versions (the default).
    pub fn new() -> Self {
        Self::with_pinning(true)
    }

    /// Creates an empty ledger. With `pin_peer_mirrors` disabled, dev
    /// entries mirrored from peer dependencies keep `"*"` instead of a
    /// pinned version.
    pub fn with_pinning(pin_peer_mirrors: bool) -> Self {
        Self {
            events: Vec::new(),
            pin_peer_mirrors,
        }
    }

    /// Records a dependency request.
    ///
    /// Never fails for a new name: re-adding a name within the same kind
    /// is a benign overwrite (last write wins). The one misuse case is a
    /// package requested as both `Bundled` and `Peer`, which cannot be
    /// reconciled and fails with [`DepsError::ConflictingCategory`].
    pub fn add(&mut self, spec: &str, kind: DependencyKind) -> Result<DepCoordinates, DepsError> {
        let coords = DepCoordinates::parse(spec)?;

        let conflicting = match kind {
            DependencyKind::Bundled => DependencyKind::Peer,
            DependencyKind::Peer => DependencyKind::Bundled,
            _ => kind,
        };
        if conflicting != kind && self.has(&coords.name, conflicting) {
            return Err(DepsError::ConflictingCategory {
                name: coords.name,
                requested: kind,
                existing: conflicting,
            });
        }

        self.events.push(DepEvent {
            name: coords.name.clone(),
            version: coords.version.clone(),
            kind,
        });
        Ok(coords)
    }

    /// Removes every request for `name` within `kind`. Returns true if
    /// anything was removed.
    pub fn remove(&mut self, name: &str, kind: DependencyKind) -> bool {
        let before = self.events.len();
        self.events.retain(|e| !(e.name == name && e.kind == kind));
        self.events.len() != before
    }

    /// Returns true if `name` has at least one request within `kind`.
    pub fn has(&self, name: &str, kind: DependencyKind) -> bool {
        self.events.iter().any(|e| e.name == name && e.kind == kind)
    }

    /// Last-write-wins fold of the event log over the given kinds.
    fn reduce(&self, kinds: &[DependencyKind]) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for event in &self.events {
            if kinds.contains(&event.kind) {
                map.insert(
                    event.name.clone(),
                    event.version.clone().unwrap_or_else(|| "*".to_string()),
                );
            }
        }
        map
    }

    /// Effective runtime view: runtime requests plus the automatic mirror
    /// of every bundled package.
    pub fn runtime(&self) -> BTreeMap<String, String> {
        self.reduce(&[DependencyKind::Runtime, DependencyKind::Bundled])
    }

    /// Effective dev view: dev and build-time requests, then a mirrored
    /// entry for each peer package that has no runtime entry and no
    /// explicit dev entry. Mirrors are pinned to the range's lower bound
    /// unless pinning is disabled, in which case they stay `"*"`.
    pub fn dev(&self) -> BTreeMap<String, String> {
        let mut map = self.reduce(&[DependencyKind::Dev, DependencyKind::Build]);
        let runtime = self.runtime();

        for (name, range) in self.peer() {
            if runtime.contains_key(&name) || map.contains_key(&name) {
                continue;
            }
            let mirrored = if self.pin_peer_mirrors {
                pin_range(&range)
            } else {
                "*".to_string()
            };
            map.insert(name, mirrored);
        }
        map
    }

    /// Effective peer view.
    pub fn peer(&self) -> BTreeMap<String, String> {
        self.reduce(&[DependencyKind::Peer])
    }

    /// Effective view of optional build-environment tooling.
    pub fn devenv(&self) -> BTreeMap<String, String> {
        self.reduce(&[DependencyKind::Devenv])
    }

    /// Alphabetically ordered names of bundled packages.
    pub fn bundled_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .events
            .iter()
            .filter(|e| e.kind == DependencyKind::Bundled)
            .map(|e| e.name.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Returns true if no requests were recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The persisted manifest shape.
    pub fn manifest(&self) -> DependencyManifest {
        DependencyManifest {
            runtime: self.runtime(),
            dev: self.dev(),
            peer: self.peer(),
            optional_build: self.devenv(),
            bundled: self.bundled_names(),
        }
    }
}

/// Persisted dependency manifest: four name→range mappings plus the
/// alphabetical bundled-name list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyManifest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_build: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundled: Vec<String>,
}

/// Reduces a version range to the concrete version at its lower bound:
/// `^1.2.3` and `~1.2.3` pin to `1.2.3`, `>=1.2 <2` pins to `1.2`.
/// `"*"` has no lower bound and is kept as-is.
fn pin_range(range: &str) -> String {
    let range = range.trim();
    if range.is_empty() || range == "*" {
        return "*".to_string();
    }

    let first = range.split_whitespace().next().unwrap_or(range);
    let stripped = first.trim_start_matches(|c: char| !c.is_ascii_digit());
    if stripped.is_empty() {
        range.to_string()
    } else {
        stripped.to_string()
    }
}

/// Always-present unit that synthesizes the project's dependency manifest.
#[derive(Debug, Default)]
pub(crate) struct DependencyManifestFile;

impl Synthesizable for DependencyManifestFile {
    fn kind(&self) -> &'static str {
        "DependencyManifest"
    }

    fn synthesize(&self, ctx: &SynthContext<'_>, files: &mut FileSink<'_>) -> Result<()> {
        let value = serde_json::to_value(ctx.deps.manifest())?;
        files.write(DEPS_MANIFEST_PATH, render_json(&value, true)?, true)?;
        Ok(())
    }
}
