//! Static build: enumerate routes, render them in both modes, write the
//! artifact tree.

use std::{
    collections::{BTreeSet, HashSet},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use futures::{StreamExt, stream};
use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    application::{
        context::{ContextError, parse_base_url},
        render::{RenderError, Renderer},
        repos::{ArtifactWriter, ContentRepo, RepoError},
        routes::{EnumerationError, InputValidationError, enumerate_scan},
    },
    domain::routes::{RenderMode, Route, fragment_url_for},
};

/// Output prefix for passthrough assets.
pub const STATIC_PREFIX: &str = "static";

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub base_url: String,
    pub concurrency: NonZeroUsize,
    pub route_timeout: Duration,
    pub strict: bool,
    /// Directory copied verbatim under `static/`.
    pub static_dir: Option<PathBuf>,
    /// Emit the well-known publication descriptor.
    pub publication_descriptor: bool,
}

/// Errors that abort a build before any artifact is written.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid base url: {0}")]
    Context(#[from] ContextError),
    #[error("failed to list content records: {0}")]
    Content(#[source] RepoError),
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
}

#[derive(Debug, Error)]
#[error("failed to write `{path}`: {source}")]
pub struct WriteError {
    pub path: String,
    #[source]
    pub source: RepoError,
}

#[derive(Debug, Error)]
pub enum BuildFailure {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// A route (or asset) that did not make it into the tree.
#[derive(Debug)]
pub struct RouteFailure {
    pub target: String,
    pub error: BuildFailure,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    /// Artifact paths relative to the output root, sorted.
    pub written: Vec<String>,
    pub failures: Vec<RouteFailure>,
    pub rejected: Vec<InputValidationError>,
    pub assets_copied: usize,
    /// Partial-navigation targets with no fragment artifact in the tree.
    pub dangling_links: Vec<String>,
    /// Set when auxiliary artifacts were written although some pages failed.
    pub aux_after_page_failures: bool,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.rejected.is_empty() && self.dangling_links.is_empty()
    }
}

/// Per-path async locks so two writers never interleave on one artifact.
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub async fn write(
        &self,
        writer: &dyn ArtifactWriter,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), WriteError> {
        let lock = self.inner.entry(path.to_string()).or_default().clone();
        let _guard = lock.lock().await;
        writer.write(path, bytes).await.map_err(|source| WriteError {
            path: path.to_string(),
            source,
        })
    }
}

struct RouteOutcome {
    route: Route,
    written: Vec<String>,
    nav_targets: BTreeSet<String>,
    failure: Option<BuildFailure>,
}

#[derive(Clone)]
pub struct BuildService {
    content: Arc<dyn ContentRepo>,
    renderer: Renderer,
    writer: Arc<dyn ArtifactWriter>,
    locks: PathLocks,
}

impl BuildService {
    pub fn new(
        content: Arc<dyn ContentRepo>,
        renderer: Renderer,
        writer: Arc<dyn ArtifactWriter>,
    ) -> Self {
        Self {
            content,
            renderer,
            writer,
            locks: PathLocks::default(),
        }
    }

    pub async fn build(&self, config: &BuildConfig) -> Result<BuildReport, BuildError> {
        parse_base_url(&config.base_url)?;

        let scan = self.content.scan().await.map_err(BuildError::Content)?;
        let enumeration = enumerate_scan(scan, config.strict)?;

        let (pages, mut auxiliary): (Vec<Route>, Vec<Route>) = enumeration
            .routes
            .into_iter()
            .partition(Route::is_page);
        if config.publication_descriptor {
            auxiliary.push(Route::publication_descriptor());
        }

        info!(
            target = "quire::build",
            pages = pages.len(),
            auxiliary = auxiliary.len(),
            rejected = enumeration.rejected.len(),
            concurrency = config.concurrency.get(),
            "starting build"
        );

        let mut report = BuildReport {
            rejected: enumeration.rejected,
            ..BuildReport::default()
        };
        let mut nav_targets = BTreeSet::new();

        let page_outcomes: Vec<RouteOutcome> = stream::iter(pages)
            .map(|route| self.materialize(route, config))
            .buffer_unordered(config.concurrency.get())
            .collect()
            .await;
        for outcome in page_outcomes {
            absorb(&mut report, &mut nav_targets, outcome);
        }

        // Auxiliary artifacts list the pages, so they go strictly after them.
        report.aux_after_page_failures = !report.failures.is_empty();
        for route in auxiliary {
            let outcome = self.materialize(route, config).await;
            absorb(&mut report, &mut nav_targets, outcome);
        }

        if let Some(dir) = config.static_dir.as_deref() {
            self.copy_assets(dir, &mut report).await;
        }

        let written: HashSet<&str> = report.written.iter().map(String::as_str).collect();
        report.dangling_links = nav_targets
            .into_iter()
            .filter(|target| {
                let artifact = fragment_url_for(target);
                !written.contains(artifact.trim_start_matches('/'))
            })
            .collect();

        report.written.sort();
        report
            .failures
            .sort_by(|a, b| a.target.cmp(&b.target));

        counter!("quire_build_artifacts_written_total").increment(report.written.len() as u64);
        counter!("quire_build_failures_total").increment(report.failures.len() as u64);
        info!(
            target = "quire::build",
            written = report.written.len(),
            failures = report.failures.len(),
            rejected = report.rejected.len(),
            assets = report.assets_copied,
            dangling = report.dangling_links.len(),
            "build finished"
        );

        Ok(report)
    }

    async fn materialize(&self, route: Route, config: &BuildConfig) -> RouteOutcome {
        let mut outcome = RouteOutcome {
            route,
            written: Vec::new(),
            nav_targets: BTreeSet::new(),
            failure: None,
        };

        let rendered = match tokio::time::timeout(
            config.route_timeout,
            self.renderer.render(&outcome.route, &config.base_url),
        )
        .await
        {
            Ok(Ok(rendered)) => rendered,
            Ok(Err(err)) => {
                outcome.failure = Some(err.into());
                return outcome;
            }
            Err(_) => {
                outcome.failure = Some(
                    RenderError::Timeout {
                        route: outcome.route.path.clone(),
                        limit: config.route_timeout,
                    }
                    .into(),
                );
                return outcome;
            }
        };

        let mut artifacts = Vec::with_capacity(2);
        if let Some(path) = outcome.route.artifact_path(RenderMode::Full) {
            artifacts.push((path, rendered.full));
        }
        if let (Some(path), Some(fragment)) = (
            outcome.route.artifact_path(RenderMode::Fragment),
            rendered.fragment,
        ) {
            artifacts.push((path, fragment));
        }

        for (path, bytes) in artifacts {
            if let Err(err) = self.locks.write(self.writer.as_ref(), &path, &bytes).await {
                outcome.failure = Some(err.into());
                return outcome;
            }
            outcome.written.push(path);
        }

        outcome.nav_targets = rendered.nav_targets;
        outcome
    }

    async fn copy_assets(&self, dir: &Path, report: &mut BuildReport) {
        let root = dir.to_path_buf();
        let listed = tokio::task::spawn_blocking(move || list_assets(&root)).await;
        let assets = match listed {
            Ok(Ok(assets)) => assets,
            Ok(Err(err)) => {
                warn!(
                    target = "quire::build",
                    dir = %dir.display(),
                    error = %err,
                    "skipping passthrough assets"
                );
                return;
            }
            Err(err) => {
                warn!(target = "quire::build", error = %err, "asset listing task failed");
                return;
            }
        };

        for (relative, absolute) in assets {
            let target = format!("{STATIC_PREFIX}/{relative}");
            let result = match tokio::fs::read(&absolute).await {
                Ok(bytes) => self.locks.write(self.writer.as_ref(), &target, &bytes).await,
                Err(err) => Err(WriteError {
                    path: target.clone(),
                    source: RepoError::from_persistence(err),
                }),
            };
            match result {
                Ok(()) => {
                    report.assets_copied += 1;
                    report.written.push(target);
                }
                Err(err) => report.failures.push(RouteFailure {
                    target,
                    error: err.into(),
                }),
            }
        }
    }
}

fn absorb(report: &mut BuildReport, nav_targets: &mut BTreeSet<String>, outcome: RouteOutcome) {
    report.written.extend(outcome.written);
    nav_targets.extend(outcome.nav_targets);
    if let Some(error) = outcome.failure {
        warn!(
            target = "quire::build",
            route = %outcome.route,
            error = %error,
            "route failed"
        );
        report.failures.push(RouteFailure {
            target: outcome.route.path,
            error,
        });
    } else {
        debug!(target = "quire::build", route = %outcome.route, "route written");
    }
}

/// Files under `root` as (`/`-separated relative path, absolute path), sorted.
fn list_assets(root: &Path) -> Result<Vec<(String, PathBuf)>, walkdir::Error> {
    let mut assets = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        assets.push((relative, entry.path().to_path_buf()));
    }
    Ok(assets)
}
