//! In-memory adapters for tests and dry runs.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use quire_lexicon::{AtUri, DocumentRecord, PUBLICATION_COLLECTION, PublicationRecord, RecordRef, DOCUMENT_COLLECTION};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::{
    application::repos::{
        ArtifactWriter, ContentRepo, MappingRepo, RemoteError, RemoteSession, RemoteStore,
        RepoError,
    },
    domain::entities::{ContentRecord, PublicationIdentity, PublicationMapping, RemoteRecord},
};

#[derive(Debug, Default)]
pub struct InMemoryContentRepo {
    records: RwLock<Vec<ContentRecord>>,
}

impl InMemoryContentRepo {
    pub fn with_records(records: Vec<ContentRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl ContentRepo for InMemoryContentRepo {
    async fn list_records(&self) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.records.read().await.clone())
    }

    async fn find_record(&self, slug: &str) -> Result<Option<ContentRecord>, RepoError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|record| record.slug == slug)
            .cloned())
    }

    async fn write_record(&self, record: &ContentRecord) -> Result<(), RepoError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|stored| stored.slug == record.slug) {
            Some(stored) => *stored = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}

/// Artifact tree kept in a map, keyed by relative path.
#[derive(Debug, Default, Clone)]
pub struct InMemoryArtifacts {
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryArtifacts {
    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(path).cloned()
    }

    /// Every written path, sorted.
    pub async fn paths(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.read().await.clone()
    }
}

#[async_trait]
impl ArtifactWriter for InMemoryArtifacts {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), RepoError> {
        self.files
            .write()
            .await
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, RepoError> {
        Ok(self.files.read().await.contains_key(path))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMappings {
    publication: RwLock<Option<PublicationIdentity>>,
    documents: RwLock<BTreeMap<String, PublicationMapping>>,
}

#[async_trait]
impl MappingRepo for InMemoryMappings {
    async fn publication(&self) -> Result<Option<PublicationIdentity>, RepoError> {
        Ok(self.publication.read().await.clone())
    }

    async fn set_publication(&self, identity: PublicationIdentity) -> Result<(), RepoError> {
        *self.publication.write().await = Some(identity);
        Ok(())
    }

    async fn get(&self, slug: &str) -> Result<Option<PublicationMapping>, RepoError> {
        Ok(self.documents.read().await.get(slug).cloned())
    }

    async fn list(&self) -> Result<Vec<PublicationMapping>, RepoError> {
        Ok(self.documents.read().await.values().cloned().collect())
    }

    async fn upsert(&self, mapping: PublicationMapping) -> Result<(), RepoError> {
        self.documents
            .write()
            .await
            .insert(mapping.slug.clone(), mapping);
        Ok(())
    }

    async fn remove(&self, slug: &str) -> Result<Option<PublicationMapping>, RepoError> {
        Ok(self.documents.write().await.remove(slug))
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<(String, String), (String, serde_json::Value)>,
    sessions_issued: usize,
    /// Tokens numbered below this are rejected as expired.
    valid_from: usize,
    refuse_auth: bool,
    writes: usize,
}

/// A single-repository record store behaving like a PDS for the calls the
/// mirror makes. Sessions can be expired and authentication refused on demand.
#[derive(Debug)]
pub struct InMemoryRemote {
    did: String,
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            state: Mutex::new(RemoteState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Invalidate every session issued so far.
    pub fn expire_sessions(&self) {
        let mut state = self.state();
        state.valid_from = state.sessions_issued;
    }

    pub fn refuse_auth(&self, refuse: bool) {
        self.state().refuse_auth = refuse;
    }

    pub fn sessions_issued(&self) -> usize {
        self.state().sessions_issued
    }

    /// Number of successful create/put calls.
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    /// Store a record directly, as another client of the repository would.
    pub fn put_raw(&self, collection: &str, rkey: &str, value: serde_json::Value) -> RecordRef {
        let cid = cid_for(&value);
        self.state().records.insert(
            (collection.to_string(), rkey.to_string()),
            (cid.clone(), value),
        );
        RecordRef {
            uri: AtUri::new(&self.did, collection, rkey).to_string(),
            cid,
        }
    }

    pub fn delete(&self, collection: &str, rkey: &str) -> bool {
        self.state()
            .records
            .remove(&(collection.to_string(), rkey.to_string()))
            .is_some()
    }

    pub fn document(&self, rkey: &str) -> Option<DocumentRecord> {
        let state = self.state();
        let (_, value) = state
            .records
            .get(&(DOCUMENT_COLLECTION.to_string(), rkey.to_string()))?;
        serde_json::from_value(value.clone()).ok()
    }

    fn check(&self, session: &RemoteSession) -> Result<(), RemoteError> {
        let state = self.state();
        let issued: usize = session
            .access_token
            .strip_prefix("token-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| RemoteError::Auth("unknown token".to_string()))?;
        if issued < state.valid_from {
            return Err(RemoteError::SessionExpired);
        }
        if session.did != self.did {
            return Err(RemoteError::Server {
                status: 403,
                error: "repo does not belong to session".to_string(),
            });
        }
        Ok(())
    }

    fn store<T: Serialize>(
        &self,
        session: &RemoteSession,
        collection: &str,
        rkey: &str,
        record: &T,
        must_be_new: bool,
    ) -> Result<RecordRef, RemoteError> {
        self.check(session)?;
        let value = serde_json::to_value(record).map_err(|err| RemoteError::Decode(err.to_string()))?;
        let key = (collection.to_string(), rkey.to_string());
        let mut state = self.state();
        if must_be_new && state.records.contains_key(&key) {
            return Err(RemoteError::Server {
                status: 400,
                error: "RecordAlreadyExists".to_string(),
            });
        }
        let cid = cid_for(&value);
        state.records.insert(key, (cid.clone(), value));
        state.writes += 1;
        Ok(RecordRef {
            uri: AtUri::new(&self.did, collection, rkey).to_string(),
            cid,
        })
    }
}

fn cid_for(value: &serde_json::Value) -> String {
    let digest = Sha256::digest(value.to_string().as_bytes());
    format!("bafy{}", &hex::encode(digest)[..24])
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn authenticate(&self, _identifier: &str, _secret: &str) -> Result<RemoteSession, RemoteError> {
        let mut state = self.state();
        if state.refuse_auth {
            return Err(RemoteError::Auth("AuthenticationRequired".to_string()));
        }
        let token = state.sessions_issued;
        state.sessions_issued += 1;
        Ok(RemoteSession {
            did: self.did.clone(),
            handle: "owner.test".to_string(),
            access_token: format!("token-{token}"),
        })
    }

    async fn create_publication(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &PublicationRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.store(session, PUBLICATION_COLLECTION, rkey, record, true)
    }

    async fn create_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.store(session, DOCUMENT_COLLECTION, rkey, record, true)
    }

    async fn update_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.store(session, DOCUMENT_COLLECTION, rkey, record, false)
    }

    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<RemoteRecord, RemoteError> {
        if repo != self.did {
            return Err(RemoteError::NotFound);
        }
        let state = self.state();
        let (cid, value) = state
            .records
            .get(&(collection.to_string(), rkey.to_string()))
            .ok_or(RemoteError::NotFound)?;
        Ok(RemoteRecord {
            uri: AtUri::new(&self.did, collection, rkey).to_string(),
            cid: cid.clone(),
            value: value.clone(),
        })
    }

    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        if repo != self.did {
            return Ok(Vec::new());
        }
        let state = self.state();
        Ok(state
            .records
            .iter()
            .filter(|((stored, _), _)| stored == collection)
            .map(|((collection, rkey), (cid, value))| RemoteRecord {
                uri: AtUri::new(&self.did, collection, rkey).to_string(),
                cid: cid.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
