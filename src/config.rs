//! External configuration collaborators
//!
//! Two JSON files drive reconciliation:
//! - `hacks.json`: the available hack definitions, keyed by identifier
//! - `config.json`: the desired on/off state per identifier
//!
//! Both are read once per reconciliation pass and treated as immutable for its
//! duration. A malformed hack entry is skipped with a warning rather than
//! failing the whole load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SwfPatchError, SwfPatchResult};

/// A single ordered find/replace rule applied to script text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
}

/// One patchable asset: where to get it, which scripts to edit, and how
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hack {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    /// Single script path variant (older definitions)
    #[serde(default)]
    pub script_path: Option<String>,
    /// Multi script path variant; takes precedence over `script_path`
    #[serde(default)]
    pub script_paths: Option<Vec<String>>,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

impl Hack {
    /// Relative script paths this hack targets inside the extracted tree
    pub fn script_paths(&self) -> Vec<&str> {
        match (&self.script_paths, &self.script_path) {
            (Some(paths), _) => paths.iter().map(|s| s.as_str()).collect(),
            (None, Some(path)) => vec![path.as_str()],
            (None, None) => vec![],
        }
    }

    /// A definition is deployable only with at least one script path and one
    /// replacement rule
    pub fn validate(&self) -> SwfPatchResult<()> {
        if self.script_paths().is_empty() {
            return Err(SwfPatchError::InvalidHack {
                hack_id: self.id.clone(),
                reason: "no script paths".to_string(),
            });
        }
        if self.replacements.is_empty() {
            return Err(SwfPatchError::InvalidHack {
                hack_id: self.id.clone(),
                reason: "no replacements".to_string(),
            });
        }
        Ok(())
    }

    /// Install location relative to the serving root, derived from the source
    /// URL path. `https://cdn.example.com/game/client.swf` → `game/client.swf`.
    pub fn install_rel_path(&self) -> SwfPatchResult<PathBuf> {
        let url = Url::parse(&self.url).map_err(|e| SwfPatchError::InvalidUrl {
            url: self.url.clone(),
            message: e.to_string(),
        })?;
        let rel = url.path().trim_start_matches('/');
        if rel.is_empty() {
            return Err(SwfPatchError::InvalidUrl {
                url: self.url.clone(),
                message: "URL has no file path".to_string(),
            });
        }
        Ok(PathBuf::from(rel))
    }
}

/// Load hack definitions from `hacks.json`
///
/// The file is an object keyed by hack id. Entries that fail to parse or carry
/// a conflicting embedded id are skipped with a warning so one bad definition
/// cannot block the rest.
pub fn load_hacks(path: &Path) -> SwfPatchResult<Vec<Hack>> {
    let content = std::fs::read_to_string(path)?;
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)?;

    let mut hacks = Vec::with_capacity(raw.len());
    for (id, value) in raw {
        match serde_json::from_value::<Hack>(value) {
            Ok(mut hack) => {
                if hack.id.is_empty() {
                    hack.id = id;
                } else if hack.id != id {
                    tracing::warn!(key = %id, id = %hack.id, "hack id mismatch, skipping");
                    continue;
                }
                hacks.push(hack);
            }
            Err(e) => {
                tracing::warn!(key = %id, error = %e, "skipping malformed hack definition");
            }
        }
    }
    Ok(hacks)
}

/// Desired per-hack enabled state, persisted as a flat JSON map in `config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Toggles(BTreeMap<String, bool>);

impl Toggles {
    /// Load toggle state from `config.json`
    ///
    /// If the file does not exist but `config.json.example` does, the example
    /// is copied into place first. A missing file yields the default (all off).
    pub fn load(config_path: &Path) -> SwfPatchResult<Self> {
        if !config_path.exists() {
            let example = example_path(config_path);
            if example.exists() {
                std::fs::copy(&example, config_path)?;
                tracing::info!(path = %config_path.display(), "created config from example");
            } else {
                return Ok(Self::default());
            }
        }
        let content = std::fs::read_to_string(config_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, config_path: &Path) -> SwfPatchResult<()> {
        let content = serde_json::to_string_pretty(&self.0)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn is_enabled(&self, hack_id: &str) -> bool {
        self.0.get(hack_id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, hack_id: &str, enabled: bool) {
        self.0.insert(hack_id.to_string(), enabled);
    }
}

fn example_path(config_path: &Path) -> PathBuf {
    let mut name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".to_string());
    name.push_str(".example");
    config_path.with_file_name(name)
}

/// Well-known locations inside the application root directory
#[derive(Debug, Clone)]
pub struct AppDirs {
    root: PathBuf,
}

impl AppDirs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Platform data directory (`~/.local/share/swfpatch` or equivalent),
    /// falling back to the current directory
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("swfpatch"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hacks_file(&self) -> PathBuf {
        self.root.join("hacks.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Directory tree exposed by the local origin server
    pub fn serving_root(&self) -> PathBuf {
        self.root.join("server")
    }

    /// Where the external tool distribution is installed
    pub fn tool_dir(&self) -> PathBuf {
        self.root.join("ffdec")
    }

    /// Parent of all ephemeral per-deployment work areas
    pub fn work_root(&self) -> PathBuf {
        self.root.join("work")
    }
}
