//! Fallback identity allocation for units
//!
//! Units registered without an explicit identifier receive a `<kind>#<n>`
//! name. The counter is process-wide and monotonic, so fallback identifiers
//! stay unique even when several project trees are synthesized in the same
//! run. It is never reset mid-run; independent runs start from a fresh
//! process and therefore a fresh counter.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

/// Returns the next fallback identifier for a unit of the given kind,
/// e.g. `JsonFile#7`.
///
/// Synthesis is single-threaded; the atomic only makes the process-wide
/// sharing explicit and lock-free.
pub fn next_unit_id(kind: &str) -> String {
    let n = NEXT_UNIT.fetch_add(1, Ordering::Relaxed);
    format!("{}#{}", kind, n)
}
