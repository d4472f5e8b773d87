//! swfpatch - patch remote SWF game assets and serve them locally
//!
//! swfpatch downloads a SWF from its CDN, decompiles it with FFDec, applies
//! declarative find/replace rules to the extracted ActionScript sources,
//! recompiles it, and installs the result under a local origin server. A
//! client's request for the original URL can then be rewritten to the local
//! copy without touching the remote server.

pub mod config;
pub mod deploy;
pub mod error;
pub mod fetch;
pub mod ffdec;
pub mod patch;
pub mod redirect;
pub mod server;
pub mod workarea;

// Re-exports for convenience
pub use config::{load_hacks, AppDirs, Hack, Replacement, Toggles};
pub use deploy::{Deployer, SyncOutcome};
pub use error::{SwfPatchError, SwfPatchResult};
pub use fetch::{Fetch, HttpFetcher};
pub use ffdec::{Ffdec, ScriptTool};
pub use patch::{apply_replacements, PatchReport};
pub use redirect::Redirector;
pub use server::OriginServer;
pub use workarea::{WorkArea, WorkAreaRegistry};
