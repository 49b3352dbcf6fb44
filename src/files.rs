//! Generic typed configuration files
//!
//! Thin consumers of the synthesis core: each unit owns a structured
//! value and renders it deterministically at synthesize time. No
//! ecosystem schema lives here; emitters for concrete manifest formats
//! are expected to be built out of the same contract these follow.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::project::SynthContext;
use crate::unit::Synthesizable;
use crate::writer::{FileSink, GENERATED_MARKER};

/// Renders a JSON value with sorted keys and a trailing newline. With
/// `marker` set, top-level objects carry the generated marker under a
/// `"//"` key.
pub(crate) fn render_json(value: &Value, marker: bool) -> Result<String> {
    let mut value = value.clone();
    if marker {
        if let Value::Object(map) = &mut value {
            map.insert(
                "//".to_string(),
                Value::String(GENERATED_MARKER.to_string()),
            );
        }
    }
    let mut rendered =
        serde_json::to_string_pretty(&value).context("Failed to render JSON value")?;
    rendered.push('\n');
    Ok(rendered)
}

/// Renders a YAML document, prefixed with the generated marker as a
/// comment when `marker` is set.
pub(crate) fn render_yaml(value: &Value, marker: bool) -> Result<String> {
    let body = serde_yaml::to_string(value).context("Failed to render YAML value")?;
    if marker {
        Ok(format!("# {}\n{}", GENERATED_MARKER, body))
    } else {
        Ok(body)
    }
}

/// Renders a TOML document, prefixed with the generated marker as a
/// comment when `marker` is set. The value must serialize to a table.
pub(crate) fn render_toml(value: &Value, marker: bool) -> Result<String> {
    let body = toml::to_string_pretty(value).context("Failed to render TOML value")?;
    if marker {
        Ok(format!("# {}\n{}", GENERATED_MARKER, body))
    } else {
        Ok(body)
    }
}

/// A JSON file synthesized from a structured value.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: String,
    value: Value,
    marker: bool,
}

impl JsonFile {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            marker: true,
        }
    }

    /// Omits the generated marker, for files the user is expected to
    /// take ownership of.
    pub fn without_marker(mut self) -> Self {
        self.marker = false;
        self
    }
}

impl Synthesizable for JsonFile {
    fn kind(&self) -> &'static str {
        "JsonFile"
    }

    fn synthesize(&self, _ctx: &SynthContext<'_>, files: &mut FileSink<'_>) -> Result<()> {
        files.write(&self.path, render_json(&self.value, self.marker)?, self.marker)?;
        Ok(())
    }
}

/// A YAML file synthesized from a structured value.
#[derive(Debug, Clone)]
pub struct YamlFile {
    path: String,
    value: Value,
    marker: bool,
}

impl YamlFile {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            marker: true,
        }
    }

    pub fn without_marker(mut self) -> Self {
        self.marker = false;
        self
    }
}

impl Synthesizable for YamlFile {
    fn kind(&self) -> &'static str {
        "YamlFile"
    }

    fn synthesize(&self, _ctx: &SynthContext<'_>, files: &mut FileSink<'_>) -> Result<()> {
        files.write(&self.path, render_yaml(&self.value, self.marker)?, self.marker)?;
        Ok(())
    }
}

/// A TOML file synthesized from a structured value.
#[derive(Debug, Clone)]
pub struct TomlFile {
    path: String,
    value: Value,
    marker: bool,
}

impl TomlFile {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            marker: true,
        }
    }

    pub fn without_marker(mut self) -> Self {
        self.marker = false;
        self
    }
}

impl Synthesizable for TomlFile {
    fn kind(&self) -> &'static str {
        "TomlFile"
    }

    fn synthesize(&self, _ctx: &SynthContext<'_>, files: &mut FileSink<'_>) -> Result<()> {
        files.write(&self.path, render_toml(&self.value, self.marker)?, self.marker)?;
        Ok(())
    }
}
