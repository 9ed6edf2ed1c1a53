//! Mirror of the local content to a decentralized record store.
//!
//! `publish` walks local records to the remote, `pull` walks remote records
//! back into the content directory, `verify` checks the ownership signals the
//! site exposes, and `forget` drops a mapping once the remote record is gone.

mod publish;
mod pull;
mod verify;

use std::{fmt, sync::Arc, time::Duration};

use quire_lexicon::{AtUri, AtUriError, DOCUMENT_COLLECTION, DocumentRecord};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    application::repos::{
        ContentRepo, MappingRepo, RemoteError, RemoteStore, RepoError, SiteProbe,
    },
    domain::entities::{ContentRecord, PublicationMapping},
};

pub use pull::ConsistencyError;
pub use verify::{VerificationItem, VerificationReport, VerificationStatus};

/// Credentials and identity used by mirror passes.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub identifier: String,
    pub secret: String,
    /// DID the site claims; a session for another repository is refused.
    pub expected_did: Option<String>,
    pub publication_rkey: String,
    pub site_url: String,
    pub site_name: String,
    pub site_description: Option<String>,
    pub pass_deadline: Duration,
}

/// Errors that abort a whole mirror pass.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("authentication failed: {0}")]
    Auth(#[source] RemoteError),
    #[error("session belongs to `{actual}`, expected `{expected}`")]
    IdentityMismatch { expected: String, actual: String },
    #[error("failed to ensure publication record: {0}")]
    Publication(#[source] RemoteError),
    #[error("failed to list remote records: {0}")]
    Listing(#[source] RemoteError),
    #[error("remote call failed: {0}")]
    Remote(#[source] RemoteError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("no mapping exists for `{0}`")]
    NotMapped(String),
    #[error("remote record `{uri}` still exists; refusing to forget `{slug}`")]
    StillPresent { slug: String, uri: String },
    #[error("stored mapping for `{slug}` has a malformed uri: {source}")]
    MalformedMapping {
        slug: String,
        #[source]
        source: AtUriError,
    },
    #[error("no repository identity configured; set `mirror.did` or credentials")]
    MissingIdentity,
}

/// What happened to one record during a pass.
#[derive(Debug)]
pub enum SyncOutcome {
    Created { uri: String },
    Updated { uri: String },
    Pulled { uri: String },
    Skipped { reason: &'static str },
    Errored { message: String, retryable: bool },
    Conflicted(ConsistencyError),
    Deferred,
}

impl SyncOutcome {
    fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Created { .. } => "created",
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Pulled { .. } => "pulled",
            SyncOutcome::Skipped { .. } => "skipped",
            SyncOutcome::Errored { .. } => "errored",
            SyncOutcome::Conflicted(_) => "conflicted",
            SyncOutcome::Deferred => "deferred",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Created { uri }
            | SyncOutcome::Updated { uri }
            | SyncOutcome::Pulled { uri } => write!(f, "{} {uri}", self.label()),
            SyncOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            SyncOutcome::Errored { message, retryable } => {
                let kind = if *retryable { "retryable" } else { "fatal" };
                write!(f, "errored [{kind}]: {message}")
            }
            SyncOutcome::Conflicted(err) => write!(f, "conflicted: {err}"),
            SyncOutcome::Deferred => f.write_str("deferred"),
        }
    }
}

#[derive(Debug)]
pub struct SyncItem {
    pub slug: String,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub synced: usize,
    pub skipped: usize,
    pub errored: usize,
    pub conflicted: usize,
    pub deferred: usize,
}

/// Per-item outcomes of one mirror pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub items: Vec<SyncItem>,
}

impl SyncReport {
    fn push(&mut self, slug: impl Into<String>, outcome: SyncOutcome) {
        let slug = slug.into();
        info!(
            target = "quire::mirror",
            slug = %slug,
            outcome = outcome.label(),
            "record processed"
        );
        metrics::counter!("quire_mirror_records_total", "outcome" => outcome.label())
            .increment(1);
        self.items.push(SyncItem { slug, outcome });
    }

    pub fn counts(&self) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for item in &self.items {
            match item.outcome {
                SyncOutcome::Created { .. }
                | SyncOutcome::Updated { .. }
                | SyncOutcome::Pulled { .. } => counts.synced += 1,
                SyncOutcome::Skipped { .. } => counts.skipped += 1,
                SyncOutcome::Errored { .. } => counts.errored += 1,
                SyncOutcome::Conflicted(_) => counts.conflicted += 1,
                SyncOutcome::Deferred => counts.deferred += 1,
            }
        }
        counts
    }

    pub fn outcome_for(&self, slug: &str) -> Option<&SyncOutcome> {
        self.items
            .iter()
            .find(|item| item.slug == slug)
            .map(|item| &item.outcome)
    }

    /// Errors, conflicts and deferrals all need another pass or an operator.
    pub fn is_success(&self) -> bool {
        let counts = self.counts();
        counts.errored == 0 && counts.conflicted == 0 && counts.deferred == 0
    }
}

/// Result of `forget`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forgotten {
    pub slug: String,
    pub uri: String,
}

#[derive(Clone)]
pub struct MirrorService {
    content: Arc<dyn ContentRepo>,
    mappings: Arc<dyn MappingRepo>,
    remote: Arc<dyn RemoteStore>,
    settings: MirrorSettings,
}

impl MirrorService {
    pub fn new(
        content: Arc<dyn ContentRepo>,
        mappings: Arc<dyn MappingRepo>,
        remote: Arc<dyn RemoteStore>,
        settings: MirrorSettings,
    ) -> Self {
        Self {
            content,
            mappings,
            remote,
            settings,
        }
    }

    /// Remove the mapping for `slug`, but only once the remote store confirms
    /// the document record no longer exists.
    pub async fn forget(&self, slug: &str) -> Result<Forgotten, MirrorError> {
        let mapping = self
            .mappings
            .get(slug)
            .await?
            .ok_or_else(|| MirrorError::NotMapped(slug.to_string()))?;

        let uri: AtUri = mapping
            .remote_uri
            .parse()
            .map_err(|source| MirrorError::MalformedMapping {
                slug: slug.to_string(),
                source,
            })?;

        match self
            .remote
            .get_record(&uri.did, DOCUMENT_COLLECTION, &uri.rkey)
            .await
        {
            Ok(_) => Err(MirrorError::StillPresent {
                slug: slug.to_string(),
                uri: mapping.remote_uri,
            }),
            Err(RemoteError::NotFound) => {
                self.mappings.remove(slug).await?;
                info!(target = "quire::mirror", slug, uri = %uri, "mapping forgotten");
                Ok(Forgotten {
                    slug: slug.to_string(),
                    uri: mapping.remote_uri,
                })
            }
            Err(err) => Err(MirrorError::Remote(err)),
        }
    }
}

/// Remote payload for a local record.
pub fn document_for(record: &ContentRecord, publication_uri: &str) -> DocumentRecord {
    DocumentRecord {
        record_type: DOCUMENT_COLLECTION.to_string(),
        site: publication_uri.to_string(),
        path: record.path(),
        title: record.title.clone(),
        description: record.description.clone(),
        text_content: record.body_markdown.clone(),
        tags: record.tags.clone(),
        published_at: record.published_at,
        updated_at: record.updated_at,
    }
}

/// Local record for a remote payload; the slug is the record key.
pub fn record_from_document(slug: &str, document: DocumentRecord) -> ContentRecord {
    ContentRecord {
        slug: slug.to_string(),
        title: document.title,
        description: document.description,
        body_markdown: document.text_content,
        tags: document.tags,
        published_at: document.published_at,
        updated_at: document.updated_at,
    }
}

fn mapping_for(slug: &str, uri: String, cid: String, content_hash: String) -> PublicationMapping {
    PublicationMapping {
        slug: slug.to_string(),
        remote_uri: uri,
        remote_cid: cid,
        content_hash,
        synced_at: OffsetDateTime::now_utc(),
    }
}
