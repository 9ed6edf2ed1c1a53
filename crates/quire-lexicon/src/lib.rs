//! Record and XRPC payload types exchanged with an AT Protocol personal data server.
//!
//! The publisher writes two record collections: one `site.standard.publication`
//! record describing the site, and one `site.standard.document` record per post.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub const PUBLICATION_COLLECTION: &str = "site.standard.publication";
pub const DOCUMENT_COLLECTION: &str = "site.standard.document";

/// Path of the site-level descriptor that names the publication record.
pub const PUBLICATION_DESCRIPTOR_PATH: &str = "/.well-known/site.standard.publication";

/// `rel` value of the per-document back-link emitted in full pages.
pub const DOCUMENT_LINK_REL: &str = "site.standard.document";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationRecord {
    #[serde(rename = "$type")]
    pub record_type: String,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PublicationRecord {
    pub fn new(url: impl Into<String>, name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            record_type: PUBLICATION_COLLECTION.to_string(),
            url: url.into(),
            name: name.into(),
            description,
        }
    }
}

/// Per-post payload. `text_content` carries the raw markdown body so the
/// record can be turned back into an authored post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    #[serde(rename = "$type")]
    pub record_type: String,
    pub site: String,
    pub path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub text_content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest<T> {
    pub repo: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rkey: Option<String>,
    pub record: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRecordRequest<T> {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
    pub record: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_record: Option<String>,
}

/// Strong reference returned by record writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRecordResponse {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedRecord {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRecordsResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    pub records: Vec<ListedRecord>,
}

/// Error body returned by XRPC endpoints on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrpcErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AtUriError {
    #[error("at-uri must start with `at://`: `{0}`")]
    Scheme(String),
    #[error("at-uri authority must be a DID: `{0}`")]
    Authority(String),
    #[error("at-uri must name a collection and record key: `{0}`")]
    Incomplete(String),
}

/// `at://<did>/<collection>/<rkey>` record address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtUri {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn new(did: impl Into<String>, collection: impl Into<String>, rkey: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }

    pub fn document(did: &str, rkey: &str) -> Self {
        Self::new(did, DOCUMENT_COLLECTION, rkey)
    }

    pub fn publication(did: &str, rkey: &str) -> Self {
        Self::new(did, PUBLICATION_COLLECTION, rkey)
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

impl FromStr for AtUri {
    type Err = AtUriError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let rest = trimmed
            .strip_prefix("at://")
            .ok_or_else(|| AtUriError::Scheme(trimmed.to_string()))?;

        let mut segments = rest.split('/');
        let did = segments.next().unwrap_or_default();
        if !did.starts_with("did:") || did.len() <= 4 {
            return Err(AtUriError::Authority(trimmed.to_string()));
        }

        let collection = segments.next().unwrap_or_default();
        let rkey = segments.next().unwrap_or_default();
        if collection.is_empty() || rkey.is_empty() || segments.next().is_some() {
            return Err(AtUriError::Incomplete(trimmed.to_string()));
        }

        Ok(Self::new(did, collection, rkey))
    }
}
