//! Synthesis-time output buffering
//!
//! Units never touch the filesystem directly. During the synthesize phase
//! they write into an [`OutputBuffer`] through a per-unit [`FileSink`];
//! the buffer is committed in one batch after the phase completes, so a
//! failed pass leaves nothing behind. Each entry remembers which unit
//! produced it, which makes path collisions reportable with both writers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

/// Marker line embedded in machine-generated files.
pub const GENERATED_MARKER: &str =
    "~~ Generated by blueprint. Manual edits will be overwritten on the next synthesis run.";

#[derive(Debug, Error, PartialEq)]
pub enum WriterError {
    #[error("Output collision on '{path}': '{first}' and '{second}' both produced this file")]
    OutputCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("Output path must be relative and stay inside the output directory: '{0}'")]
    InvalidPath(String),
}

/// A single buffered output entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub content: String,

    /// Whether the file is machine-generated and safe to regenerate. The
    /// writer persists the flag; its semantics belong to downstream
    /// tooling.
    pub generated: bool,

    /// Identity of the unit that produced the entry.
    pub writer: String,
}

/// Buffered file output for one synthesis pass.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    entries: BTreeMap<String, FileEntry>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry under a normalized relative path.
    ///
    /// Fails with [`WriterError::OutputCollision`] if the path was already
    /// written in this pass. Collisions are never silently resolved.
    pub(crate) fn insert(
        &mut self,
        writer: &str,
        path: &str,
        content: String,
        generated: bool,
    ) -> Result<(), WriterError> {
        let path = normalize(path)?;

        if let Some(existing) = self.entries.get(&path) {
            return Err(WriterError::OutputCollision {
                path,
                first: existing.writer.clone(),
                second: writer.to_string(),
            });
        }

        debug!(path = %path, writer = %writer, generated, "buffered output file");
        self.entries.insert(
            path,
            FileEntry {
                content,
                generated,
                writer: writer.to_string(),
            },
        );
        Ok(())
    }

    /// Returns the buffered entry for a path, if any.
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    /// Returns the number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was written in this pass.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path → content view of the buffer, for comparing passes.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.content.clone()))
            .collect()
    }

    /// Commits every buffered entry under the given root directory,
    /// creating parent directories as needed. Returns the written paths.
    pub fn flush(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.entries.len());

        for (path, entry) in &self.entries {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory: {}", parent.display())
                })?;
            }
            fs::write(&target, &entry.content)
                .with_context(|| format!("Failed to write output file: {}", target.display()))?;
            written.push(target);
        }

        info!(files = written.len(), root = %root.display(), "committed synthesis output");
        Ok(written)
    }
}

/// A write handle scoped to one unit during its synthesize hook.
///
/// The sink stamps the unit's identity on every entry and prefixes paths
/// with the owning project's directory, so subproject output lands under
/// the subproject and collisions name the offending units.
pub struct FileSink<'a> {
    buf: &'a mut OutputBuffer,
    writer: &'a str,
    prefix: &'a str,
}

impl<'a> FileSink<'a> {
    pub(crate) fn new(buf: &'a mut OutputBuffer, writer: &'a str, prefix: &'a str) -> Self {
        Self {
            buf,
            writer,
            prefix,
        }
    }

    /// Buffers a file at a path relative to the owning project's output
    /// directory. `generated` marks the file as machine-produced and
    /// safely regenerable.
    pub fn write(
        &mut self,
        path: &str,
        content: impl Into<String>,
        generated: bool,
    ) -> Result<(), WriterError> {
        let full = if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        };
        self.buf.insert(self.writer, &full, content.into(), generated)
    }
}

/// Normalizes a relative path to `/`-separated form, rejecting anything
/// that would escape the output root.
fn normalize(path: &str) -> Result<String, WriterError> {
    let mut parts = Vec::new();

    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(WriterError::InvalidPath(path.to_string())),
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WriterError::InvalidPath(path.to_string()));
            }
        }
    }

    if parts.is_empty() {
        return Err(WriterError::InvalidPath(path.to_string()));
    }

    Ok(parts.join("/"))
}
