//! Repository traits describing persistence and transport adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    application::routes::InputValidationError,
    domain::entities::{ContentRecord, PublicationIdentity, PublicationMapping, RemoteRecord},
};
use quire_lexicon::{DocumentRecord, PublicationRecord, RecordRef};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Everything a content listing turned up: the records that parsed and the
/// sources that did not.
#[derive(Debug, Default)]
pub struct ContentScan {
    pub records: Vec<ContentRecord>,
    pub malformed: Vec<InputValidationError>,
}

/// Authored content. Listing is the only read the build needs; the mirror's
/// pull direction also writes records back.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Records that parsed. Malformed sources are left out.
    async fn list_records(&self) -> Result<Vec<ContentRecord>, RepoError>;

    async fn scan(&self) -> Result<ContentScan, RepoError> {
        Ok(ContentScan {
            records: self.list_records().await?,
            malformed: Vec::new(),
        })
    }

    async fn find_record(&self, slug: &str) -> Result<Option<ContentRecord>, RepoError>;

    async fn write_record(&self, record: &ContentRecord) -> Result<(), RepoError>;
}

/// Destination of build artifacts. Paths are relative to the output root and
/// use `/` separators.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), RepoError>;

    async fn exists(&self, path: &str) -> Result<bool, RepoError>;
}

/// Mapping table between local posts and remote records, keyed by slug.
#[async_trait]
pub trait MappingRepo: Send + Sync {
    async fn publication(&self) -> Result<Option<PublicationIdentity>, RepoError>;

    async fn set_publication(&self, identity: PublicationIdentity) -> Result<(), RepoError>;

    async fn get(&self, slug: &str) -> Result<Option<PublicationMapping>, RepoError>;

    async fn list(&self) -> Result<Vec<PublicationMapping>, RepoError>;

    async fn upsert(&self, mapping: PublicationMapping) -> Result<(), RepoError>;

    async fn remove(&self, slug: &str) -> Result<Option<PublicationMapping>, RepoError>;
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("session expired")]
    SessionExpired,
    #[error("record not found")]
    NotFound,
    #[error("remote returned {status}: {error}")]
    Server { status: u16, error: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected payload: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Errors worth retrying on the next pass without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::SessionExpired | RemoteError::Transport(_)
        ) || matches!(self, RemoteError::Server { status, .. } if *status >= 500)
    }
}

/// Authenticated session against the remote record store.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub did: String,
    pub handle: String,
    pub access_token: String,
}

/// Record operations of the decentralized store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn authenticate(&self, identifier: &str, secret: &str)
    -> Result<RemoteSession, RemoteError>;

    async fn create_publication(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &PublicationRecord,
    ) -> Result<RecordRef, RemoteError>;

    async fn create_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError>;

    async fn update_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError>;

    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("resource `{0}` is not available")]
    Missing(String),
    #[error("failed to fetch `{path}`: {message}")]
    Fetch { path: String, message: String },
}

/// Read access to a published site (live or a built output tree).
#[async_trait]
pub trait SiteProbe: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<String, ProbeError>;
}
