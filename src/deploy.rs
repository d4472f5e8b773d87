//! Deployment orchestrator
//!
//! Reconciles desired per-hack state against the serving directory. For each
//! hack: enabled and not installed → deploy; disabled and installed →
//! undeploy; otherwise skip. Presence of the installed artifact file IS the
//! deployed bit - there is no separate ledger. One hack's failure never
//! aborts the pass.
//!
//! Deploy pipeline: fetch original asset into a work area → export scripts →
//! apply replacements → rebuild → atomic install (write a temp sibling inside
//! the serving tree, then rename), so a reader never observes a partially
//! patched artifact.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Hack, Toggles};
use crate::error::{SwfPatchError, SwfPatchResult};
use crate::fetch::{Fetch, DEFAULT_TIMEOUT};
use crate::ffdec::ScriptTool;
use crate::patch::apply_replacements;
use crate::workarea::{WorkArea, WorkAreaRegistry};

/// Per-hack outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Pipeline ran to completion; these scripts were modified
    Deployed { modified: Vec<PathBuf> },
    /// Enabled and the artifact already exists
    AlreadyDeployed,
    /// Installed artifact was removed
    Undeployed,
    /// Disabled and no artifact exists
    AlreadyAbsent,
    /// Definition failed validation and was not reconciled
    SkippedInvalid { reason: String },
    /// Deploy or undeploy failed; the filesystem is unchanged
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Deployed { modified } => {
                write!(f, "deployed ({} script(s) modified)", modified.len())
            }
            SyncOutcome::AlreadyDeployed => write!(f, "skipped (already deployed)"),
            SyncOutcome::Undeployed => write!(f, "undeployed"),
            SyncOutcome::AlreadyAbsent => write!(f, "skipped (already absent)"),
            SyncOutcome::SkippedInvalid { reason } => write!(f, "skipped (invalid: {reason})"),
            SyncOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Deployment orchestrator
///
/// Generic over the fetcher and tool seams so the whole pipeline can be
/// exercised in tests without a network or a Java runtime.
pub struct Deployer<F: Fetch, T: ScriptTool> {
    fetcher: F,
    tool: T,
    serving_root: PathBuf,
    work_root: PathBuf,
    registry: WorkAreaRegistry,
    timeout: Duration,
}

impl<F: Fetch, T: ScriptTool> Deployer<F, T> {
    pub fn new(
        fetcher: F,
        tool: T,
        serving_root: PathBuf,
        work_root: PathBuf,
        registry: WorkAreaRegistry,
    ) -> Self {
        Self {
            fetcher,
            tool,
            serving_root,
            work_root,
            registry,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One reconciliation pass over all hacks, sequentially
    ///
    /// Idempotent: a second pass with unchanged inputs and unchanged remote
    /// content reports `Already*` for every hack.
    pub async fn sync(&self, hacks: &[Hack], toggles: &Toggles) -> BTreeMap<String, SyncOutcome> {
        let mut results = BTreeMap::new();
        for hack in hacks {
            let outcome = self.reconcile_one(hack, toggles).await;
            if let SyncOutcome::Failed { reason } = &outcome {
                tracing::error!(hack = %hack.id, %reason, "reconciliation failed");
            }
            results.insert(hack.id.clone(), outcome);
        }
        results
    }

    async fn reconcile_one(&self, hack: &Hack, toggles: &Toggles) -> SyncOutcome {
        if let Err(e) = hack.validate() {
            tracing::warn!(hack = %hack.id, error = %e, "skipping invalid hack definition");
            return SyncOutcome::SkippedInvalid {
                reason: e.to_string(),
            };
        }
        let result = if toggles.is_enabled(&hack.id) {
            self.deploy(hack).await
        } else {
            self.undeploy(hack).await
        };
        result.unwrap_or_else(|e| SyncOutcome::Failed {
            reason: e.to_string(),
        })
    }

    /// Run the full patch pipeline for one hack unless it is already installed
    pub async fn deploy(&self, hack: &Hack) -> SwfPatchResult<SyncOutcome> {
        let install_path = self.install_path(hack)?;
        if install_path.exists() {
            tracing::debug!(hack = %hack.id, "already deployed");
            return Ok(SyncOutcome::AlreadyDeployed);
        }

        tracing::info!(hack = %hack.id, title = %hack.title, "deploying");
        let area = WorkArea::create(&self.work_root, &self.registry)?;
        // WorkArea removal happens on drop, on every path out of here
        let result = self.run_pipeline(hack, area.path(), &install_path).await;
        drop(area);

        let modified = result?;
        tracing::info!(hack = %hack.id, artifact = %install_path.display(), "deployed");
        Ok(SyncOutcome::Deployed { modified })
    }

    async fn run_pipeline(
        &self,
        hack: &Hack,
        work: &Path,
        install_path: &Path,
    ) -> SwfPatchResult<Vec<PathBuf>> {
        let file_name = install_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SwfPatchError::InvalidUrl {
                url: hack.url.clone(),
                message: "URL has no file name".to_string(),
            })?;

        let original = work.join(&file_name);
        self.fetcher
            .fetch(&hack.url, &original, self.timeout)
            .await?;

        let scripts_dir = work.join("scripts_export");
        self.tool.extract(&original, &scripts_dir).await?;

        let report = apply_replacements(&scripts_dir, &hack.script_paths(), &hack.replacements)?;
        if !report.any_modified {
            return Err(SwfPatchError::NoReplacementApplied {
                hack_id: hack.id.clone(),
            });
        }

        let rebuilt = work.join(format!("modified_{file_name}"));
        self.tool.rebuild(&original, &rebuilt, &scripts_dir).await?;

        install_artifact(&rebuilt, install_path).await?;
        Ok(report.modified_files)
    }

    /// Remove the installed artifact if present
    pub async fn undeploy(&self, hack: &Hack) -> SwfPatchResult<SyncOutcome> {
        let install_path = self.install_path(hack)?;
        if !install_path.exists() {
            return Ok(SyncOutcome::AlreadyAbsent);
        }
        tokio::fs::remove_file(&install_path).await?;
        tracing::info!(hack = %hack.id, artifact = %install_path.display(), "undeployed");
        Ok(SyncOutcome::Undeployed)
    }

    fn install_path(&self, hack: &Hack) -> SwfPatchResult<PathBuf> {
        Ok(self.serving_root.join(hack.install_rel_path()?))
    }
}

/// Publish the rebuilt asset into the serving tree
///
/// The artifact is copied to a temp sibling first and renamed into place, so
/// the final path either holds the complete file or nothing. Any failure
/// removes the temp file before propagating.
async fn install_artifact(rebuilt: &Path, dest: &Path) -> SwfPatchResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = dest.with_file_name(format!(".{file_name}.part"));

    let staged: SwfPatchResult<()> = async {
        tokio::fs::copy(rebuilt, &tmp).await?;
        tokio::fs::rename(&tmp, dest).await?;
        Ok(())
    }
    .await;

    if staged.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    staged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Replacement;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    /// Fetcher that writes canned bytes
    struct MockFetcher {
        body: &'static str,
    }

    #[async_trait]
    impl Fetch for MockFetcher {
        async fn fetch(&self, _url: &str, dest: &Path, _timeout: Duration) -> SwfPatchResult<()> {
            tokio::fs::write(dest, self.body).await?;
            Ok(())
        }
    }

    /// Fetcher that always fails with an HTTP error
    struct FailingFetcher;

    #[async_trait]
    impl Fetch for FailingFetcher {
        async fn fetch(&self, url: &str, _dest: &Path, _timeout: Duration) -> SwfPatchResult<()> {
            Err(SwfPatchError::Http {
                url: url.to_string(),
                status: 500,
            })
        }
    }

    /// Tool that materializes a fixed script tree on extract and concatenates
    /// the (possibly patched) scripts into the rebuilt asset
    struct MockTool {
        scripts: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl ScriptTool for MockTool {
        async fn extract(&self, asset: &Path, out_dir: &Path) -> SwfPatchResult<()> {
            assert!(asset.is_file(), "extract should see the downloaded asset");
            for (rel, content) in &self.scripts {
                let path = out_dir.join(rel);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, content)?;
            }
            Ok(())
        }

        async fn rebuild(
            &self,
            input: &Path,
            output: &Path,
            scripts_dir: &Path,
        ) -> SwfPatchResult<()> {
            let original = std::fs::read_to_string(input)?;
            let mut rebuilt = format!("REBUILT[{original}]");
            for (rel, _) in &self.scripts {
                rebuilt.push_str(&std::fs::read_to_string(scripts_dir.join(rel))?);
            }
            std::fs::write(output, rebuilt)?;
            Ok(())
        }
    }

    /// Tool whose rebuild step always fails
    struct BrokenRebuildTool {
        inner: MockTool,
    }

    #[async_trait]
    impl ScriptTool for BrokenRebuildTool {
        async fn extract(&self, asset: &Path, out_dir: &Path) -> SwfPatchResult<()> {
            self.inner.extract(asset, out_dir).await
        }

        async fn rebuild(&self, _: &Path, _: &Path, _: &Path) -> SwfPatchResult<()> {
            Err(SwfPatchError::ToolInvocation {
                exit_code: Some(1),
                stderr_excerpt: "simulated import failure".to_string(),
            })
        }
    }

    fn hack(id: &str, url_path: &str, find: &str, replace: &str) -> Hack {
        Hack {
            id: id.to_string(),
            title: id.to_string(),
            description: None,
            url: format!("https://cdn.example.com{url_path}"),
            script_path: Some("scripts/Player.as".to_string()),
            script_paths: None,
            replacements: vec![Replacement {
                find: find.to_string(),
                replace: replace.to_string(),
            }],
        }
    }

    fn make_deployer<F: Fetch, T: ScriptTool>(
        root: &TempDir,
        fetcher: F,
        tool: T,
    ) -> (Deployer<F, T>, PathBuf, PathBuf) {
        let serving_root = root.path().join("server");
        let work_root = root.path().join("work");
        let deployer = Deployer::new(
            fetcher,
            tool,
            serving_root.clone(),
            work_root.clone(),
            WorkAreaRegistry::new(),
        );
        (deployer, serving_root, work_root)
    }

    fn work_root_is_empty(work_root: &Path) -> bool {
        match fs::read_dir(work_root) {
            Ok(entries) => entries.count() == 0,
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn deploy_then_undeploy_round_trip() {
        let root = tempdir().unwrap();
        let tool = MockTool {
            scripts: vec![("scripts/Player.as", "hp -= dmg;")],
        };
        let (deployer, serving_root, work_root) =
            make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let h = hack("god-mode", "/game/client.swf", "hp -= dmg", "hp -= 0");
        let mut toggles = Toggles::default();
        toggles.set("god-mode", true);

        let results = deployer.sync(&[h.clone()], &toggles).await;
        assert_eq!(
            results["god-mode"],
            SyncOutcome::Deployed {
                modified: vec![PathBuf::from("scripts/Player.as")]
            }
        );

        let artifact = serving_root.join("game/client.swf");
        let content = fs::read_to_string(&artifact).unwrap();
        assert!(content.contains("hp -= 0"), "patched text should be baked in");
        assert!(work_root_is_empty(&work_root));

        toggles.set("god-mode", false);
        let results = deployer.sync(&[h], &toggles).await;
        assert_eq!(results["god-mode"], SyncOutcome::Undeployed);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let root = tempdir().unwrap();
        let tool = MockTool {
            scripts: vec![("scripts/Player.as", "hp -= dmg;")],
        };
        let (deployer, _, _) = make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let enabled = hack("on", "/on.swf", "hp -= dmg", "hp -= 0");
        let disabled = hack("off", "/off.swf", "hp -= dmg", "hp -= 0");
        let mut toggles = Toggles::default();
        toggles.set("on", true);

        let first = deployer.sync(&[enabled.clone(), disabled.clone()], &toggles).await;
        assert!(matches!(first["on"], SyncOutcome::Deployed { .. }));
        assert_eq!(first["off"], SyncOutcome::AlreadyAbsent);

        let second = deployer.sync(&[enabled, disabled], &toggles).await;
        assert_eq!(second["on"], SyncOutcome::AlreadyDeployed);
        assert_eq!(second["off"], SyncOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn stale_patch_set_fails_without_artifact() {
        let root = tempdir().unwrap();
        let tool = MockTool {
            scripts: vec![("scripts/Player.as", "completely different content")],
        };
        let (deployer, serving_root, work_root) =
            make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let h = hack("stale", "/game/client.swf", "hp -= dmg", "hp -= 0");
        let mut toggles = Toggles::default();
        toggles.set("stale", true);

        let results = deployer.sync(&[h], &toggles).await;
        match &results["stale"] {
            SyncOutcome::Failed { reason } => {
                assert!(reason.contains("no replacement applied"), "got: {reason}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!serving_root.join("game/client.swf").exists());
        assert!(work_root_is_empty(&work_root));
    }

    #[tokio::test]
    async fn one_enabled_one_disabled_deploys_exactly_one() {
        let root = tempdir().unwrap();
        let tool = MockTool {
            scripts: vec![("scripts/Player.as", "hp -= dmg;")],
        };
        let (deployer, serving_root, _) = make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let a = hack("a", "/a.swf", "hp -= dmg", "hp -= 0");
        let b = hack("b", "/b.swf", "hp -= dmg", "hp -= 0");
        let mut toggles = Toggles::default();
        toggles.set("a", true);

        let results = deployer.sync(&[a, b], &toggles).await;
        assert!(matches!(results["a"], SyncOutcome::Deployed { .. }));
        assert_eq!(results["b"], SyncOutcome::AlreadyAbsent);
        assert!(serving_root.join("a.swf").exists());
        assert!(!serving_root.join("b.swf").exists());
    }

    #[tokio::test]
    async fn invalid_definition_is_skipped_and_pass_continues() {
        let root = tempdir().unwrap();
        let tool = MockTool {
            scripts: vec![("scripts/Player.as", "hp -= dmg;")],
        };
        let (deployer, serving_root, _) = make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let mut invalid = hack("invalid", "/x.swf", "f", "r");
        invalid.replacements.clear();
        let valid = hack("valid", "/y.swf", "hp -= dmg", "hp -= 0");

        let mut toggles = Toggles::default();
        toggles.set("invalid", true);
        toggles.set("valid", true);

        let results = deployer.sync(&[invalid, valid], &toggles).await;
        assert!(matches!(
            results["invalid"],
            SyncOutcome::SkippedInvalid { .. }
        ));
        assert!(matches!(results["valid"], SyncOutcome::Deployed { .. }));
        assert!(serving_root.join("y.swf").exists());
    }

    #[tokio::test]
    async fn fetch_failure_cleans_up_and_reports() {
        let root = tempdir().unwrap();
        let tool = MockTool {
            scripts: vec![("scripts/Player.as", "hp -= dmg;")],
        };
        let (deployer, serving_root, work_root) = make_deployer(&root, FailingFetcher, tool);

        let h = hack("down", "/game/client.swf", "hp -= dmg", "hp -= 0");
        let mut toggles = Toggles::default();
        toggles.set("down", true);

        let results = deployer.sync(&[h], &toggles).await;
        match &results["down"] {
            SyncOutcome::Failed { reason } => assert!(reason.contains("HTTP 500")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!serving_root.join("game/client.swf").exists());
        assert!(work_root_is_empty(&work_root));
    }

    #[tokio::test]
    async fn rebuild_failure_leaves_no_partial_install() {
        let root = tempdir().unwrap();
        let tool = BrokenRebuildTool {
            inner: MockTool {
                scripts: vec![("scripts/Player.as", "hp -= dmg;")],
            },
        };
        let (deployer, serving_root, work_root) =
            make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let h = hack("broken", "/game/client.swf", "hp -= dmg", "hp -= 0");
        let mut toggles = Toggles::default();
        toggles.set("broken", true);

        let results = deployer.sync(&[h], &toggles).await;
        assert!(results["broken"].is_failure());
        assert!(!serving_root.join("game/client.swf").exists());
        // No stray temp files anywhere under the serving tree
        if serving_root.join("game").is_dir() {
            assert_eq!(fs::read_dir(serving_root.join("game")).unwrap().count(), 0);
        }
        assert!(work_root_is_empty(&work_root));
    }

    #[tokio::test]
    async fn undeploy_missing_artifact_is_already_absent() {
        let root = tempdir().unwrap();
        let tool = MockTool { scripts: vec![] };
        let (deployer, _, _) = make_deployer(&root, MockFetcher { body: "FWS" }, tool);

        let h = hack("gone", "/gone.swf", "f", "r");
        let outcome = deployer.undeploy(&h).await.unwrap();
        assert_eq!(outcome, SyncOutcome::AlreadyAbsent);
    }
}
