//! Dual-mode rendering of routes through the live router.
//!
//! Each page route is dispatched twice, once as a direct navigation and once
//! as a partial-navigation fetch, using the same handlers `serve` runs. The
//! bodies then go through a link rewrite so partial navigation keeps working
//! once the site is served from static files.

use std::{cell::RefCell, collections::BTreeSet, rc::Rc, time::Duration};

use axum::{Router, body::Body, http::StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use lol_html::{RewriteStrSettings, element, rewrite_str};
use thiserror::Error;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tracing::debug;

use crate::{
    application::context::{ContextError, synthesize},
    domain::routes::{RenderMode, Route, fragment_url_for},
};

/// Attribute carrying a partial-navigation action.
pub const NAV_ATTRIBUTE: &str = "data-on:click__prevent";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("could not build request for `{route}`: {source}")]
    Context {
        route: String,
        #[source]
        source: ContextError,
    },
    #[error("`{route}` ({mode}) answered {status}")]
    Status {
        route: String,
        mode: &'static str,
        status: StatusCode,
    },
    #[error("handler for `{route}` ({mode}) panicked")]
    Panicked { route: String, mode: &'static str },
    #[error("failed to read body of `{route}`: {message}")]
    Body { route: String, message: String },
    #[error("failed to rewrite links of `{route}`: {message}")]
    Rewrite { route: String, message: String },
    #[error("`{route}` did not render within {limit:?}")]
    Timeout { route: String, limit: Duration },
}

/// Output of rendering one route.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub full: Bytes,
    /// Absent for auxiliary routes.
    pub fragment: Option<Bytes>,
    /// Same-site partial-navigation targets found (and rewritten) in the bodies.
    pub nav_targets: BTreeSet<String>,
}

/// Renders routes by dispatching synthetic requests through a router.
#[derive(Clone)]
pub struct Renderer {
    router: Router,
}

impl Renderer {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub async fn render(&self, route: &Route, base_url: &str) -> Result<RenderResult, RenderError> {
        let full = self.dispatch(route, RenderMode::Full, base_url).await?;
        if !route.is_page() {
            return Ok(RenderResult {
                full,
                fragment: None,
                nav_targets: BTreeSet::new(),
            });
        }

        let fragment = self.dispatch(route, RenderMode::Fragment, base_url).await?;

        let mut nav_targets = BTreeSet::new();
        let full = rewrite_nav_links(route, &full, &mut nav_targets)?;
        let fragment = rewrite_nav_links(route, &fragment, &mut nav_targets)?;

        Ok(RenderResult {
            full,
            fragment: Some(fragment),
            nav_targets,
        })
    }

    async fn dispatch(
        &self,
        route: &Route,
        mode: RenderMode,
        base_url: &str,
    ) -> Result<Bytes, RenderError> {
        let request = synthesize(route, mode, base_url)
            .and_then(|ctx| ctx.into_request())
            .map_err(|source| RenderError::Context {
                route: route.path.clone(),
                source,
            })?;

        // The handler runs in its own task so a panic surfaces as a join error
        // instead of tearing down the build.
        let router = self.router.clone();
        let mut handler = HandlerTask(tokio::spawn(async move { router.oneshot(request).await }));
        let response = match (&mut handler.0).await {
            Ok(Ok(response)) => response,
            Ok(Err(never)) => match never {},
            Err(_) => {
                return Err(RenderError::Panicked {
                    route: route.path.clone(),
                    mode: mode.as_str(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Status {
                route: route.path.clone(),
                mode: mode.as_str(),
                status,
            });
        }

        let body: Body = response.into_body();
        let bytes = body
            .collect()
            .await
            .map_err(|err| RenderError::Body {
                route: route.path.clone(),
                message: err.to_string(),
            })?
            .to_bytes();

        debug!(
            target = "quire::render",
            route = %route.path,
            mode = mode.as_str(),
            bytes = bytes.len(),
            "rendered route"
        );

        Ok(bytes)
    }
}

/// Spawned handler that is aborted once nobody waits for it, e.g. when the
/// caller's per-route timeout fires.
struct HandlerTask<T>(JoinHandle<T>);

impl<T> Drop for HandlerTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Point partial-navigation actions at static fragment files.
///
/// `@get('/posts/a')` becomes `@get('/posts/a/fragment.html')`. Only actions
/// of the exact `@get('<absolute path>')` shape are touched; plain `href`
/// values are left alone so direct navigation still lands on `index.html`.
pub fn rewrite_nav_links(
    route: &Route,
    body: &[u8],
    targets: &mut BTreeSet<String>,
) -> Result<Bytes, RenderError> {
    let html = std::str::from_utf8(body).map_err(|err| RenderError::Body {
        route: route.path.clone(),
        message: err.to_string(),
    })?;

    let found = Rc::new(RefCell::new(Vec::new()));
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", {
                let found = Rc::clone(&found);
                move |el| {
                    let Some(action) = el.get_attribute(NAV_ATTRIBUTE) else {
                        return Ok(());
                    };
                    if let Some(target) = same_site_get_target(&action) {
                        el.set_attribute(NAV_ATTRIBUTE, &format!("@get('{}')", fragment_url_for(&target)))?;
                        found.borrow_mut().push(target);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::Rewrite {
        route: route.path.clone(),
        message: err.to_string(),
    })?;

    let found = Rc::try_unwrap(found)
        .map(RefCell::into_inner)
        .unwrap_or_else(|rc| rc.borrow().clone());
    targets.extend(found);

    Ok(Bytes::from(rewritten))
}

/// Extract `<path>` from `@get('<path>')` when it is a same-site absolute path
/// that does not already point at a file.
fn same_site_get_target(action: &str) -> Option<String> {
    let inner = action
        .trim()
        .strip_prefix("@get('")?
        .strip_suffix("')")?;

    let is_same_site = inner.starts_with('/') && !inner.starts_with("//");
    let has_extras = inner.contains(['?', '#', '\'']);
    let last_segment = inner.rsplit('/').next().unwrap_or_default();
    if !is_same_site || has_extras || last_segment.contains('.') {
        return None;
    }

    let normalized = inner.trim_end_matches('/');
    Some(if normalized.is_empty() {
        "/".to_string()
    } else {
        normalized.to_string()
    })
}
