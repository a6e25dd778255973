//! Generator options read from a YAML file.

use crate::codegen::GeneratorOptions;
use anyhow::Context;
use std::path::Path;

pub fn load_options(path: &Path) -> anyhow::Result<GeneratorOptions> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_options(&text).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_options(text: &str) -> anyhow::Result<GeneratorOptions> {
    if text.trim().is_empty() {
        return Ok(GeneratorOptions::default());
    }
    Ok(serde_yml::from_str(text)?)
}

/// Options for one run: the config file, if any, overlaid with the flags.
pub fn resolve_options(
    config: Option<&Path>,
    flags: &GeneratorOptions,
) -> anyhow::Result<GeneratorOptions> {
    let base = match config {
        Some(path) => load_options(path)?,
        None => GeneratorOptions::default(),
    };
    Ok(base.merged_with(flags))
}
