use quire_lexicon::{DOCUMENT_COLLECTION, DocumentRecord, PUBLICATION_COLLECTION, PublicationRecord};
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use super::{
    MirrorError, MirrorService, SyncOutcome, SyncReport, document_for, mapping_for,
    record_from_document,
};
use crate::{
    application::{
        repos::{RemoteError, RemoteSession},
        routes::validate_records,
    },
    domain::entities::{ContentRecord, PublicationIdentity, RemoteRecord},
};

impl MirrorService {
    /// Push local records to the remote store.
    ///
    /// Authentication failure aborts the pass; every other failure is recorded
    /// against the record it happened on. Records still waiting when the pass
    /// deadline expires are reported as deferred, and mappings already stored
    /// stay in place.
    pub async fn publish(&self, records: Vec<ContentRecord>) -> Result<SyncReport, MirrorError> {
        let deadline = Instant::now() + self.settings.pass_deadline;
        let mut session = self.authenticate().await?;
        let publication = self.ensure_publication(&session).await?;

        let mut report = SyncReport::default();
        let (records, rejected) = validate_records(records);
        for error in rejected {
            report.push(
                error.subject().to_string(),
                SyncOutcome::Errored {
                    message: error.to_string(),
                    retryable: false,
                },
            );
        }

        let mut session_lost: Option<String> = None;
        for record in records {
            if let Some(message) = &session_lost {
                report.push(
                    record.slug,
                    SyncOutcome::Errored {
                        message: message.clone(),
                        retryable: true,
                    },
                );
                continue;
            }
            if Instant::now() >= deadline {
                report.push(record.slug, SyncOutcome::Deferred);
                continue;
            }

            let attempt = timeout_at(
                deadline,
                self.publish_one(&session, &publication.uri, &record),
            )
            .await;
            let outcome = match attempt {
                Err(_) => SyncOutcome::Deferred,
                Ok(Ok(outcome)) => outcome,
                Ok(Err(RemoteError::SessionExpired)) => {
                    warn!(
                        target = "quire::mirror::publish",
                        slug = %record.slug,
                        "session expired; re-authenticating"
                    );
                    match self.authenticate().await {
                        Ok(fresh) => {
                            session = fresh;
                            match timeout_at(
                                deadline,
                                self.publish_one(&session, &publication.uri, &record),
                            )
                            .await
                            {
                                Err(_) => SyncOutcome::Deferred,
                                Ok(Ok(outcome)) => outcome,
                                Ok(Err(err)) => errored(&err),
                            }
                        }
                        Err(err) => {
                            let message = format!("re-authentication failed: {err}");
                            session_lost = Some(message.clone());
                            SyncOutcome::Errored {
                                message,
                                retryable: true,
                            }
                        }
                    }
                }
                Ok(Err(err)) => errored(&err),
            };
            report.push(record.slug, outcome);
        }

        let counts = report.counts();
        info!(
            target = "quire::mirror::publish",
            synced = counts.synced,
            skipped = counts.skipped,
            errored = counts.errored,
            deferred = counts.deferred,
            "publish pass finished"
        );
        Ok(report)
    }

    pub(super) async fn authenticate(&self) -> Result<RemoteSession, MirrorError> {
        if self.settings.identifier.is_empty() {
            return Err(MirrorError::MissingIdentity);
        }
        let session = self
            .remote
            .authenticate(&self.settings.identifier, &self.settings.secret)
            .await
            .map_err(MirrorError::Auth)?;

        if let Some(expected) = &self.settings.expected_did
            && expected != &session.did
        {
            return Err(MirrorError::IdentityMismatch {
                expected: expected.clone(),
                actual: session.did,
            });
        }

        Ok(session)
    }

    /// Stored publication identity, or the remote one adopted or created on
    /// first run.
    async fn ensure_publication(
        &self,
        session: &RemoteSession,
    ) -> Result<PublicationIdentity, MirrorError> {
        if let Some(identity) = self.mappings.publication().await? {
            return Ok(identity);
        }

        let rkey = &self.settings.publication_rkey;
        let identity = match self
            .remote
            .get_record(&session.did, PUBLICATION_COLLECTION, rkey)
            .await
        {
            Ok(existing) => PublicationIdentity {
                uri: existing.uri,
                cid: existing.cid,
            },
            Err(RemoteError::NotFound) => {
                let record = PublicationRecord::new(
                    self.settings.site_url.clone(),
                    self.settings.site_name.clone(),
                    self.settings.site_description.clone(),
                );
                let created = self
                    .remote
                    .create_publication(session, rkey, &record)
                    .await
                    .map_err(MirrorError::Publication)?;
                info!(
                    target = "quire::mirror::publish",
                    uri = %created.uri,
                    "publication record created"
                );
                PublicationIdentity {
                    uri: created.uri,
                    cid: created.cid,
                }
            }
            Err(err) => return Err(MirrorError::Publication(err)),
        };

        self.mappings.set_publication(identity.clone()).await?;
        Ok(identity)
    }

    async fn publish_one(
        &self,
        session: &RemoteSession,
        publication_uri: &str,
        record: &ContentRecord,
    ) -> Result<SyncOutcome, RemoteError> {
        let hash = record.content_hash();
        let mapping = match self.mappings.get(&record.slug).await {
            Ok(mapping) => mapping,
            Err(err) => return Ok(store_failure(&err)),
        };

        let document = document_for(record, publication_uri);
        let (written, created) = match mapping {
            Some(existing) if existing.content_hash == hash => {
                return Ok(SyncOutcome::Skipped { reason: "unchanged" });
            }
            Some(_) => (
                self.remote
                    .update_document(session, &record.slug, &document)
                    .await?,
                false,
            ),
            None => match self
                .remote
                .get_record(&session.did, DOCUMENT_COLLECTION, &record.slug)
                .await
            {
                // Left behind by a pass that stopped before storing its mapping.
                Ok(existing) => {
                    if remote_matches(&existing, publication_uri, record, &hash) {
                        let mapping = mapping_for(&record.slug, existing.uri, existing.cid, hash);
                        if let Err(err) = self.mappings.upsert(mapping).await {
                            return Ok(store_failure(&err));
                        }
                        return Ok(SyncOutcome::Skipped { reason: "adopted" });
                    }
                    (
                        self.remote
                            .update_document(session, &record.slug, &document)
                            .await?,
                        false,
                    )
                }
                Err(RemoteError::NotFound) => (
                    self.remote
                        .create_document(session, &record.slug, &document)
                        .await?,
                    true,
                ),
                Err(err) => return Err(err),
            },
        };

        let mapping = mapping_for(&record.slug, written.uri.clone(), written.cid, hash);
        if let Err(err) = self.mappings.upsert(mapping).await {
            return Ok(store_failure(&err));
        }

        Ok(if created {
            SyncOutcome::Created { uri: written.uri }
        } else {
            SyncOutcome::Updated { uri: written.uri }
        })
    }
}

/// Whether a remote document already carries `record` for this publication.
fn remote_matches(
    existing: &RemoteRecord,
    publication_uri: &str,
    record: &ContentRecord,
    hash: &str,
) -> bool {
    serde_json::from_value::<DocumentRecord>(existing.value.clone())
        .map(|document| {
            document.site == publication_uri
                && record_from_document(&record.slug, document).content_hash() == hash
        })
        .unwrap_or(false)
}

fn errored(err: &RemoteError) -> SyncOutcome {
    SyncOutcome::Errored {
        message: err.to_string(),
        retryable: err.is_retryable(),
    }
}

fn store_failure(err: &impl std::fmt::Display) -> SyncOutcome {
    SyncOutcome::Errored {
        message: format!("mapping store: {err}"),
        retryable: true,
    }
}
