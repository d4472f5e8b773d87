//! Request interception
//!
//! Decides, per request URL, whether the client should be sent to the local
//! origin instead of the remote CDN. Pure lookup: exact URL match against the
//! known hacks, gated on the current desired state. Deliberately does not
//! check that the installed artifact exists - reconciliation normally
//! completes before any client request, and a miss just 404s locally.

use std::collections::BTreeMap;

use url::Url;

use crate::config::{Hack, Toggles};

/// Reverse index from source URL to hack id, bound to the server port
#[derive(Debug, Clone)]
pub struct Redirector {
    by_url: BTreeMap<String, String>,
    port: u16,
}

impl Redirector {
    pub fn new(hacks: &[Hack], port: u16) -> Self {
        let by_url = hacks
            .iter()
            .map(|h| (h.url.clone(), h.id.clone()))
            .collect();
        Self { by_url, port }
    }

    /// Rewritten local URL for `request_url`, or `None` to pass the request
    /// through unmodified
    pub fn should_redirect(&self, request_url: &str, toggles: &Toggles) -> Option<String> {
        let hack_id = self.by_url.get(request_url)?;
        if !toggles.is_enabled(hack_id) {
            return None;
        }
        let parsed = Url::parse(request_url).ok()?;
        let mut target = format!("http://127.0.0.1:{}{}", self.port, parsed.path());
        if let Some(query) = parsed.query() {
            target.push('?');
            target.push_str(query);
        }
        tracing::debug!(from = %request_url, to = %target, "redirecting request");
        Some(target)
    }

    /// All (source URL, hack id) pairs, for startup logging
    pub fn mappings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_url
            .iter()
            .map(|(url, id)| (url.as_str(), id.as_str()))
    }
}
