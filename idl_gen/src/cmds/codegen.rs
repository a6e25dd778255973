/* Codegen command - generate enums and demarshallers from a protocol file */

use crate::codegen::{GeneratorOptions, generate};
use crate::model;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /* keep-identical-file found the same content already in place */
    Unchanged,
}

/* Execute the codegen command */
pub fn run(protocol: &Path, dest: &Path, options: &GeneratorOptions) -> anyhow::Result<WriteOutcome> {
    let source = std::fs::read_to_string(protocol)
        .with_context(|| format!("failed to read {}", protocol.display()))?;
    let model = model::load(&source).with_context(|| format!("in {}", protocol.display()))?;
    debug!(
        types = model.types.len(),
        channels = model.channels.len(),
        "model loaded"
    );

    /* Output is produced in memory first so a failure never leaves a partial file */
    let source_name = protocol
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| protocol.display().to_string());
    let text = generate(&model, options, &source_name)?;

    let outcome = write_output(dest, &text, options.keep_identical_file)?;
    match outcome {
        WriteOutcome::Written => println!("Wrote {}", dest.display()),
        WriteOutcome::Unchanged => println!("No changes to {}", dest.display()),
    }
    Ok(outcome)
}

pub fn write_output(dest: &Path, text: &str, keep_identical: bool) -> anyhow::Result<WriteOutcome> {
    if keep_identical {
        if let Ok(existing) = std::fs::read_to_string(dest) {
            if existing == text {
                info!(dest = %dest.display(), "output unchanged");
                return Ok(WriteOutcome::Unchanged);
            }
        }
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = temp_path(dest);
    std::fs::write(&tmp, text).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, dest)
        .with_context(|| format!("failed to move output into {}", dest.display()))?;
    Ok(WriteOutcome::Written)
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_identical_leaves_file_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("out.rs");
        assert_eq!(write_output(&dest, "a\n", true).expect("write"), WriteOutcome::Written);
        assert_eq!(write_output(&dest, "a\n", true).expect("write"), WriteOutcome::Unchanged);
        assert_eq!(write_output(&dest, "a\n", false).expect("write"), WriteOutcome::Written);
        assert_eq!(write_output(&dest, "b\n", true).expect("write"), WriteOutcome::Written);
        assert_eq!(std::fs::read_to_string(&dest).expect("read"), "b\n");
        assert!(!temp_path(&dest).exists());
    }

    #[test]
    fn model_errors_write_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let protocol = dir.path().join("bad.yaml");
        std::fs::write(&protocol, "name: x\ntypes:\n  - name: A\n    kind: { type-ref: { name: Missing } }\n")
            .expect("write");
        let dest = dir.path().join("out.rs");
        let options = GeneratorOptions {
            generate_enums: true,
            ..Default::default()
        };
        assert!(run(&protocol, &dest, &options).is_err());
        assert!(!dest.exists());
    }
}
