//! Synthesis capability and lifecycle phases
//!
//! A unit is a node in a project tree that can contribute configuration
//! output. Units implement [`Synthesizable`], a set of three lifecycle
//! hooks the project driver calls in phase order. The hook signatures
//! carry the side-effect rules: only `pre_synthesize` can mutate shared
//! project state, and only `synthesize` can write files.

use anyhow::Result;

use crate::project::{PreContext, SynthContext};
use crate::writer::FileSink;

/// Lifecycle phase of a unit within one synthesis pass.
///
/// Phases advance monotonically and are never revisited within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Phase {
    #[default]
    Unsynthesized,
    PreSynthesized,
    Synthesized,
    PostSynthesized,
}

/// A unit that participates in the synthesis lifecycle.
///
/// All hooks default to no-ops; implement the ones the unit needs. Any
/// hook returning an error aborts the whole pass before output is
/// committed.
pub trait Synthesizable {
    /// Short type name used when allocating a fallback identifier.
    fn kind(&self) -> &'static str {
        "unit"
    }

    /// Invoked top-down (parent before children) before any output is
    /// produced. The only hook that may mutate shared project state, e.g.
    /// to register dependencies derived from the final shape of the tree.
    fn pre_synthesize(&mut self, ctx: &mut PreContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Produces this unit's files into the sink. Called once per unit in
    /// registration order; must be idempotent and must not depend on any
    /// other unit having synthesized in the same pass.
    fn synthesize(&self, ctx: &SynthContext<'_>, files: &mut FileSink<'_>) -> Result<()> {
        let _ = (ctx, files);
        Ok(())
    }

    /// Invoked bottom-up (children before parent) after the pass output
    /// has been committed. Sibling order is unspecified; implementations
    /// must not rely on it.
    fn post_synthesize(&mut self, ctx: &SynthContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}
