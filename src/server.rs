//! Local origin server
//!
//! Serves installed artifacts from the serving root over loopback HTTP so a
//! client's request for the original CDN URL can be redirected here. GET
//! only; anything resolving outside the serving root is refused.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::error::{SwfPatchError, SwfPatchResult};

/// First port tried when binding
pub const DEFAULT_PORT: u16 = 8420;

/// How many consecutive ports are tried before giving up
pub const PORT_RANGE: u16 = 10;

/// Everything served is a compiled Flash asset
const SWF_CONTENT_TYPE: &str = "application/x-shockwave-flash";

/// A bound (but not yet running) origin server
///
/// Binding and serving are split so the caller can learn the port - the
/// interception layer needs it to build redirect targets - before the accept
/// loop starts.
#[derive(Debug)]
pub struct OriginServer {
    listener: TcpListener,
    port: u16,
    serving_root: PathBuf,
}

impl OriginServer {
    /// Bind to the first free loopback port in the default range
    pub async fn bind(serving_root: PathBuf) -> SwfPatchResult<Self> {
        Self::bind_in_range(serving_root, DEFAULT_PORT, PORT_RANGE).await
    }

    /// Bind to the first free loopback port in `[start, start + count)`
    ///
    /// The successful listener is kept, so there is no probe-then-rebind
    /// window for another process to steal the port.
    pub async fn bind_in_range(
        serving_root: PathBuf,
        start: u16,
        count: u16,
    ) -> SwfPatchResult<Self> {
        for port in start..start.saturating_add(count) {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    tracing::info!(port, root = %serving_root.display(), "origin server bound");
                    return Ok(Self {
                        listener,
                        port,
                        serving_root,
                    });
                }
                Err(e) => {
                    tracing::debug!(port, error = %e, "port unavailable, trying next");
                }
            }
        }
        Err(SwfPatchError::NoAvailablePort {
            start,
            end: start.saturating_add(count).saturating_sub(1),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the accept loop until `shutdown` resolves
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> SwfPatchResult<()> {
        let state = Arc::new(ServeState {
            root: self.serving_root,
        });
        let router = Router::new()
            .fallback(get(serve_asset))
            .with_state(state);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

struct ServeState {
    root: PathBuf,
}

async fn serve_asset(State(state): State<Arc<ServeState>>, uri: Uri) -> Response {
    let request_path = uri.path();

    let file_path = match resolve_under_root(&state.root, request_path) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(path = %request_path, error = %e, "blocked request");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
    };

    match tokio::fs::read(&file_path).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, SWF_CONTENT_TYPE)
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::debug!(path = %request_path, error = %e, "asset not found");
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
    }
}

/// Resolve a request path against the serving root, refusing escapes
///
/// The lexical check rejects any `..` component before touching the
/// filesystem; the canonicalized prefix check backstops it against symlinks
/// once the file exists.
fn resolve_under_root(root: &Path, request_path: &str) -> SwfPatchResult<PathBuf> {
    let rel = Path::new(request_path.trim_start_matches('/'));

    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(SwfPatchError::PathEscape {
                    path: rel.to_path_buf(),
                    root: root.to_path_buf(),
                });
            }
        }
    }

    let candidate = root.join(rel);
    if let (Ok(canonical), Ok(root_canonical)) = (candidate.canonicalize(), root.canonicalize()) {
        if !canonical.starts_with(&root_canonical) {
            return Err(SwfPatchError::PathEscape {
                path: rel.to_path_buf(),
                root: root.to_path_buf(),
            });
        }
    }
    Ok(candidate)
}
