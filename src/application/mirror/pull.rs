use quire_lexicon::{AtUri, DOCUMENT_COLLECTION, DocumentRecord};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{MirrorError, MirrorService, SyncOutcome, SyncReport, mapping_for, record_from_document};
use crate::domain::{entities::RemoteRecord, slug::ensure_canonical};

/// A post edited on both sides since the last sync. The local file is left
/// untouched; an operator has to pick a side.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "`{slug}` diverged: local {local_hash}, remote {remote_hash}, last synced {}",
    .mapped_hash.as_deref().unwrap_or("never")
)]
pub struct ConsistencyError {
    pub slug: String,
    pub local_hash: String,
    pub remote_hash: String,
    pub mapped_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PullDecision {
    /// Overwrite (or create) the local file with the remote content.
    Write,
    /// Local already matches the remote; store the mapping if it is stale.
    InSync,
    /// Remote is what we last synced; keep local edits for the next publish.
    KeepLocal,
    Conflict,
}

/// Decide what pulling a remote record does to the local copy.
pub(crate) fn pull_decision(local: Option<&str>, remote: &str, mapped: Option<&str>) -> PullDecision {
    let Some(local) = local else {
        return PullDecision::Write;
    };
    if local == remote {
        return PullDecision::InSync;
    }
    match mapped {
        Some(mapped) if mapped == remote => PullDecision::KeepLocal,
        Some(mapped) if mapped == local => PullDecision::Write,
        _ => PullDecision::Conflict,
    }
}

impl MirrorService {
    /// List document records of the configured repository.
    pub async fn fetch_remote_documents(&self) -> Result<Vec<RemoteRecord>, MirrorError> {
        let did = match &self.settings.expected_did {
            Some(did) => did.clone(),
            None => self.authenticate().await?.did,
        };
        self.remote
            .list_records(&did, DOCUMENT_COLLECTION)
            .await
            .map_err(MirrorError::Listing)
    }

    /// Bring remote documents into the local content repository without ever
    /// clobbering local edits made since the last sync.
    pub async fn pull(&self, remote_records: Vec<RemoteRecord>) -> Result<SyncReport, MirrorError> {
        let deadline = Instant::now() + self.settings.pass_deadline;
        let stored_publication = self.mappings.publication().await?.map(|p| p.uri);

        let mut remote_records = remote_records;
        remote_records.sort_by(|a, b| a.uri.cmp(&b.uri));

        let mut report = SyncReport::default();
        for remote in remote_records {
            let uri: AtUri = match remote.uri.parse() {
                Ok(uri) => uri,
                Err(err) => {
                    report.push(
                        remote.uri.clone(),
                        SyncOutcome::Errored {
                            message: err.to_string(),
                            retryable: false,
                        },
                    );
                    continue;
                }
            };
            if uri.collection != DOCUMENT_COLLECTION {
                continue;
            }
            let slug = uri.rkey.clone();

            if Instant::now() >= deadline {
                report.push(slug, SyncOutcome::Deferred);
                continue;
            }

            let document: DocumentRecord = match serde_json::from_value(remote.value.clone()) {
                Ok(document) => document,
                Err(err) => {
                    report.push(
                        slug,
                        SyncOutcome::Errored {
                            message: format!("undecodable document: {err}"),
                            retryable: false,
                        },
                    );
                    continue;
                }
            };

            let expected_site = AtUri::publication(&uri.did, &self.settings.publication_rkey).to_string();
            let belongs = document.site == expected_site
                || stored_publication.as_deref() == Some(document.site.as_str());
            if !belongs {
                debug!(
                    target = "quire::mirror::pull",
                    slug = %slug,
                    site = %document.site,
                    "ignoring document of another publication"
                );
                continue;
            }

            if let Err(err) = ensure_canonical(&slug) {
                report.push(
                    slug,
                    SyncOutcome::Errored {
                        message: err.to_string(),
                        retryable: false,
                    },
                );
                continue;
            }

            let outcome = self.pull_one(&slug, remote, document).await;
            report.push(slug, outcome);
        }

        let counts = report.counts();
        info!(
            target = "quire::mirror::pull",
            synced = counts.synced,
            skipped = counts.skipped,
            conflicted = counts.conflicted,
            errored = counts.errored,
            deferred = counts.deferred,
            "pull pass finished"
        );
        Ok(report)
    }

    async fn pull_one(&self, slug: &str, remote: RemoteRecord, document: DocumentRecord) -> SyncOutcome {
        let incoming = record_from_document(slug, document);
        let remote_hash = incoming.content_hash();

        let local = match self.content.find_record(slug).await {
            Ok(local) => local,
            Err(err) => return local_failure(&err),
        };
        let mapping = match self.mappings.get(slug).await {
            Ok(mapping) => mapping,
            Err(err) => return local_failure(&err),
        };

        let local_hash = local.as_ref().map(|record| record.content_hash());
        let mapped_hash = mapping.as_ref().map(|m| m.content_hash.clone());

        match pull_decision(local_hash.as_deref(), &remote_hash, mapped_hash.as_deref()) {
            PullDecision::Write => {
                if let Err(err) = self.content.write_record(&incoming).await {
                    return local_failure(&err);
                }
                let mapping = mapping_for(slug, remote.uri.clone(), remote.cid, remote_hash);
                if let Err(err) = self.mappings.upsert(mapping).await {
                    return local_failure(&err);
                }
                SyncOutcome::Pulled { uri: remote.uri }
            }
            PullDecision::InSync => {
                if mapped_hash.as_deref() != Some(remote_hash.as_str()) {
                    let mapping = mapping_for(slug, remote.uri, remote.cid, remote_hash);
                    if let Err(err) = self.mappings.upsert(mapping).await {
                        return local_failure(&err);
                    }
                }
                SyncOutcome::Skipped { reason: "in sync" }
            }
            PullDecision::KeepLocal => SyncOutcome::Skipped {
                reason: "local edits pending publish",
            },
            PullDecision::Conflict => SyncOutcome::Conflicted(ConsistencyError {
                slug: slug.to_string(),
                local_hash: local_hash.unwrap_or_default(),
                remote_hash,
                mapped_hash,
            }),
        }
    }
}

fn local_failure(err: &impl std::fmt::Display) -> SyncOutcome {
    SyncOutcome::Errored {
        message: format!("local store: {err}"),
        retryable: true,
    }
}
