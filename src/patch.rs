//! Find/replace application over an extracted script tree

use std::path::{Path, PathBuf};

use crate::config::Replacement;
use crate::error::SwfPatchResult;

/// Which script files actually changed during one application
#[derive(Debug, Clone, Default)]
pub struct PatchReport {
    pub modified_files: Vec<PathBuf>,
    pub any_modified: bool,
}

/// Apply an ordered list of replacement rules to the listed scripts
///
/// For each script path that exists under `scripts_dir`, rules are applied in
/// order, each replacing only the first occurrence of its `find` text. The
/// file is written back only when at least one rule matched. Script paths that
/// do not exist are skipped with a warning - a hack may target different files
/// depending on the asset variant.
///
/// A report with `any_modified == false` means the upstream asset no longer
/// contains any expected pattern; the caller escalates that to a hard failure.
pub fn apply_replacements(
    scripts_dir: &Path,
    script_paths: &[&str],
    replacements: &[Replacement],
) -> SwfPatchResult<PatchReport> {
    let mut report = PatchReport::default();

    for script_path in script_paths {
        let file_path = scripts_dir.join(script_path);
        if !file_path.is_file() {
            tracing::warn!(script = %script_path, "script not found in extracted tree, skipping");
            continue;
        }

        let mut content = std::fs::read_to_string(&file_path)?;
        let mut modified = false;

        for rule in replacements {
            if content.contains(&rule.find) {
                content = content.replacen(&rule.find, &rule.replace, 1);
                modified = true;
            }
        }

        if modified {
            std::fs::write(&file_path, &content)?;
            tracing::info!(script = %script_path, "applied replacements");
            report.modified_files.push(PathBuf::from(script_path));
            report.any_modified = true;
        }
    }

    Ok(report)
}
