//! FFDec tool adapter
//!
//! Wraps the JPEXS Free Flash Decompiler as an opaque subprocess. The adapter
//! owns all the fragile parts of that boundary: locating a Java runtime,
//! parsing its version banner, installing the FFDec distribution, and mapping
//! subprocess exits onto typed errors. Nothing else in the crate shells out.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::{SwfPatchError, SwfPatchResult};
use crate::fetch::{Fetch, DEFAULT_TIMEOUT};

/// Pinned FFDec release used by `setup`
pub const FFDEC_URL: &str = "https://github.com/jindrapetrik/jpexs-decompiler/releases/download/version24.1.1/ffdec_24.1.1.zip";

/// How much subprocess stderr to keep in error reports
const STDERR_EXCERPT_LEN: usize = 500;

/// Decompile/recompile operations on a SWF asset
///
/// Trait seam over the external tool so the orchestrator can be tested
/// without Java installed.
#[async_trait]
pub trait ScriptTool: Send + Sync {
    /// Export the asset's scripts as an ActionScript source tree under `out_dir`
    async fn extract(&self, asset: &Path, out_dir: &Path) -> SwfPatchResult<()>;

    /// Import `scripts_dir` back into `input`, writing the result to `output`
    async fn rebuild(&self, input: &Path, output: &Path, scripts_dir: &Path)
        -> SwfPatchResult<()>;
}

/// Resolved Java runtime used to launch FFDec
#[derive(Debug, Clone)]
pub struct JavaInfo {
    pub path: PathBuf,
    pub version: String,
}

/// The real FFDec adapter
pub struct Ffdec {
    tool_dir: PathBuf,
    java_override: Option<PathBuf>,
    // Probe result, computed once per process lifetime
    java: OnceCell<JavaInfo>,
}

impl Ffdec {
    pub fn new(tool_dir: PathBuf) -> Self {
        Self {
            tool_dir,
            java_override: None,
            java: OnceCell::new(),
        }
    }

    /// Use a specific Java binary instead of probing common locations
    pub fn with_java_path(mut self, path: PathBuf) -> Self {
        self.java_override = Some(path);
        self
    }

    pub fn jar_path(&self) -> PathBuf {
        self.tool_dir.join("ffdec.jar")
    }

    /// Ensure the FFDec distribution is installed under the tool directory
    ///
    /// Idempotent: a re-run that finds `ffdec.jar` already present returns
    /// immediately. Otherwise the pinned release zip is downloaded, verified
    /// against `pinned_sha256` when one is supplied, and extracted; the zip is
    /// removed afterwards whether or not extraction succeeded.
    pub async fn setup(
        &self,
        fetcher: &dyn Fetch,
        pinned_sha256: Option<&str>,
    ) -> SwfPatchResult<()> {
        let jar = self.jar_path();
        if jar.exists() {
            tracing::debug!(jar = %jar.display(), "FFDec already installed");
            return Ok(());
        }

        tracing::info!("setting up FFDec");
        tokio::fs::create_dir_all(&self.tool_dir).await?;
        let zip_path = self.tool_dir.join("ffdec.zip");

        fetcher.fetch(FFDEC_URL, &zip_path, DEFAULT_TIMEOUT).await?;

        let result = install_archive(&zip_path, &self.tool_dir, pinned_sha256).await;
        let _ = tokio::fs::remove_file(&zip_path).await;
        result?;

        if !jar.exists() {
            return Err(SwfPatchError::ExtractionIncomplete { expected: jar });
        }
        tracing::info!(dir = %self.tool_dir.display(), "FFDec setup complete");
        Ok(())
    }

    /// Probe the Java runtime, caching the result for the process lifetime
    pub async fn java(&self) -> SwfPatchResult<&JavaInfo> {
        self.java
            .get_or_try_init(|| async {
                let path = match &self.java_override {
                    Some(p) => p.clone(),
                    None => find_java(),
                };
                probe_java(&path).await
            })
            .await
    }

    async fn run_tool(&self, args: &[&str]) -> SwfPatchResult<()> {
        let jar = self.jar_path();
        if !jar.exists() {
            return Err(SwfPatchError::ToolMissing {
                reason: format!("FFDec not installed at {} - run setup first", jar.display()),
            });
        }
        let java = self.java().await?;

        let output = Command::new(&java.path)
            .arg("-jar")
            .arg(&jar)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SwfPatchError::ToolMissing {
                reason: format!("failed to launch {}: {e}", java.path.display()),
            })?;

        if !output.status.success() {
            return Err(SwfPatchError::ToolInvocation {
                exit_code: output.status.code(),
                stderr_excerpt: excerpt(&output.stderr),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScriptTool for Ffdec {
    async fn extract(&self, asset: &Path, out_dir: &Path) -> SwfPatchResult<()> {
        tracing::info!(asset = %asset.display(), "exporting scripts");
        self.run_tool(&[
            "-format",
            "script:as",
            "-export",
            "script",
            &out_dir.to_string_lossy(),
            &asset.to_string_lossy(),
        ])
        .await?;

        if !out_dir.is_dir() {
            return Err(SwfPatchError::ExtractionIncomplete {
                expected: out_dir.to_path_buf(),
            });
        }
        Ok(())
    }

    async fn rebuild(
        &self,
        input: &Path,
        output: &Path,
        scripts_dir: &Path,
    ) -> SwfPatchResult<()> {
        tracing::info!(output = %output.display(), "importing modified scripts");
        self.run_tool(&[
            "-importScript",
            &input.to_string_lossy(),
            &output.to_string_lossy(),
            &scripts_dir.to_string_lossy(),
        ])
        .await?;

        if !output.is_file() {
            return Err(SwfPatchError::ExtractionIncomplete {
                expected: output.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Locate a Java binary, checking the usual install locations before falling
/// back to whatever `java` resolves to on PATH
fn find_java() -> PathBuf {
    const CANDIDATES: &[&str] = &[
        "/opt/homebrew/opt/openjdk/bin/java",
        "/usr/local/opt/openjdk/bin/java",
        "/usr/bin/java",
    ];
    for loc in CANDIDATES {
        if Path::new(loc).exists() {
            return PathBuf::from(loc);
        }
    }
    PathBuf::from("java")
}

async fn probe_java(path: &Path) -> SwfPatchResult<JavaInfo> {
    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SwfPatchError::ToolMissing {
            reason: format!("java not found at {}: {e}", path.display()),
        })?;

    if !output.status.success() {
        return Err(SwfPatchError::ToolMissing {
            reason: format!(
                "java -version failed (exit {:?}): {}",
                output.status.code(),
                excerpt(&output.stderr)
            ),
        });
    }

    // The version banner goes to stderr on every mainstream JVM
    let banner = if output.stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        String::from_utf8_lossy(&output.stderr).into_owned()
    };
    let version = parse_java_version(&banner).unwrap_or_else(|| "unknown".to_string());
    tracing::debug!(java = %path.display(), %version, "java probe succeeded");

    Ok(JavaInfo {
        path: path.to_path_buf(),
        version,
    })
}

/// Pull the quoted version out of a `java -version` banner
fn parse_java_version(banner: &str) -> Option<String> {
    let rest = banner.split("version \"").nth(1)?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Verify the downloaded archive (when a digest is pinned) and unpack it
async fn install_archive(
    zip_path: &Path,
    dest_dir: &Path,
    pinned_sha256: Option<&str>,
) -> SwfPatchResult<()> {
    let zip_path = zip_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    let pinned = pinned_sha256.map(|s| s.to_lowercase());

    tokio::task::spawn_blocking(move || {
        if let Some(expected) = pinned {
            let bytes = std::fs::read(&zip_path)?;
            let actual = format!("{:x}", Sha256::digest(&bytes));
            if actual != expected {
                return Err(SwfPatchError::ChecksumMismatch {
                    path: zip_path,
                    expected,
                    actual,
                });
            }
        }
        extract_zip_archive(&zip_path, &dest_dir)
    })
    .await
    .map_err(|e| SwfPatchError::Io(std::io::Error::other(e)))?
}

fn extract_zip_archive(zip_path: &Path, dest_dir: &Path) -> SwfPatchResult<()> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| SwfPatchError::Io(std::io::Error::other(e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| SwfPatchError::Io(std::io::Error::other(e)))?;
        // Zip entries are attacker-ish input; refuse anything that would land
        // outside the destination
        let rel = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                tracing::warn!(entry = %entry.name(), "skipping unsafe zip entry");
                continue;
            }
        };
        let out = dest_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut out_file)?;
    }
    Ok(())
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_EXCERPT_LEN {
        trimmed.to_string()
    } else {
        let mut end = STDERR_EXCERPT_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Fetcher that copies a prepared archive into place
    struct ArchiveFetcher {
        archive: PathBuf,
    }

    #[async_trait]
    impl Fetch for ArchiveFetcher {
        async fn fetch(&self, _url: &str, dest: &Path, _timeout: Duration) -> SwfPatchResult<()> {
            tokio::fs::copy(&self.archive, dest).await?;
            Ok(())
        }
    }

    /// Fetcher that must never be called
    struct RefusingFetcher;

    #[async_trait]
    impl Fetch for RefusingFetcher {
        async fn fetch(&self, url: &str, _dest: &Path, _timeout: Duration) -> SwfPatchResult<()> {
            Err(SwfPatchError::Network {
                url: url.to_string(),
                message: "unexpected fetch in test".to_string(),
            })
        }
    }

    fn make_ffdec_zip(dir: &Path) -> PathBuf {
        let zip_path = dir.join("dist.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("ffdec.jar", options).unwrap();
        writer.write_all(b"PK-fake-jar").unwrap();
        writer.start_file("lib/helper.jar", options).unwrap();
        writer.write_all(b"helper").unwrap();
        writer.finish().unwrap();
        zip_path
    }

    #[tokio::test]
    async fn setup_short_circuits_when_jar_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ffdec.jar"), "jar").unwrap();

        let ffdec = Ffdec::new(dir.path().to_path_buf());
        // RefusingFetcher errors on any call, so success proves no download ran
        ffdec.setup(&RefusingFetcher, None).await.unwrap();
    }

    #[tokio::test]
    async fn setup_downloads_and_extracts() {
        let fixture_dir = tempdir().unwrap();
        let archive = make_ffdec_zip(fixture_dir.path());

        let tool_dir = tempdir().unwrap();
        let ffdec = Ffdec::new(tool_dir.path().to_path_buf());
        ffdec
            .setup(&ArchiveFetcher { archive }, None)
            .await
            .unwrap();

        assert!(tool_dir.path().join("ffdec.jar").exists());
        assert!(tool_dir.path().join("lib/helper.jar").exists());
        assert!(
            !tool_dir.path().join("ffdec.zip").exists(),
            "archive should be cleaned up"
        );
    }

    #[tokio::test]
    async fn setup_rejects_checksum_mismatch() {
        let fixture_dir = tempdir().unwrap();
        let archive = make_ffdec_zip(fixture_dir.path());

        let tool_dir = tempdir().unwrap();
        let ffdec = Ffdec::new(tool_dir.path().to_path_buf());
        let wrong = "0".repeat(64);
        let err = ffdec
            .setup(&ArchiveFetcher { archive }, Some(wrong.as_str()))
            .await
            .unwrap_err();

        assert!(matches!(err, SwfPatchError::ChecksumMismatch { .. }));
        assert!(!tool_dir.path().join("ffdec.jar").exists());
        assert!(
            !tool_dir.path().join("ffdec.zip").exists(),
            "archive should be cleaned up even on failure"
        );
    }

    #[tokio::test]
    async fn extract_requires_installed_jar() {
        let dir = tempdir().unwrap();
        let ffdec = Ffdec::new(dir.path().join("ffdec"));
        let err = ffdec
            .extract(&dir.path().join("a.swf"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, SwfPatchError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn java_probe_fails_for_bogus_path() {
        let dir = tempdir().unwrap();
        let ffdec = Ffdec::new(dir.path().to_path_buf())
            .with_java_path(PathBuf::from("/nonexistent/java-for-swfpatch-test"));
        let err = ffdec.java().await.unwrap_err();
        assert!(matches!(err, SwfPatchError::ToolMissing { .. }));
    }

    #[test]
    fn parse_java_version_openjdk_banner() {
        let banner = "openjdk version \"17.0.2\" 2022-01-18\nOpenJDK Runtime Environment";
        assert_eq!(parse_java_version(banner).unwrap(), "17.0.2");
    }

    #[test]
    fn parse_java_version_missing() {
        assert!(parse_java_version("not a java banner").is_none());
    }

    #[test]
    fn excerpt_truncates_long_stderr() {
        let long = "e".repeat(2000);
        let out = excerpt(long.as_bytes());
        assert!(out.len() <= STDERR_EXCERPT_LEN + 3);
        assert!(out.ends_with("..."));
    }
}
