//! blueprint - declarative synthesis of project configuration files
//!
//! A [`Project`] owns a tree of units (files, manifests, nested
//! subprojects) and drives them through an ordered lifecycle:
//! `pre_synthesize` top-down, `synthesize` into a buffered writer, one
//! atomic-per-pass flush, then `post_synthesize` bottom-up. Units consult
//! the project's dependency ledger and task graph to render their output;
//! both are persisted as manifests for external tooling to consume.

pub mod deps;
pub mod files;
pub mod ident;
pub mod project;
pub mod registry;
pub mod tasks;
pub mod unit;
pub mod writer;

pub use deps::{DepCoordinates, Dependencies, DependencyKind, DependencyManifest, DepsError};
pub use files::{JsonFile, TomlFile, YamlFile};
pub use project::{PreContext, Project, ProjectError, ProjectOptions, Snapshot, SynthContext};
pub use registry::{
    AccessLevel, AuthMode, PublishOptions, PublishTarget, RegistryCredentials, RegistryError,
};
pub use tasks::{StepCondition, Task, TaskError, TaskManifest, TaskStep, Tasks};
pub use unit::{Phase, Synthesizable};
pub use writer::{FileSink, OutputBuffer, WriterError, GENERATED_MARKER};
