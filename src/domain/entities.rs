//! Domain entities shared by the build and mirror passes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One authored post. The slug is its identity; everything else feeds the
/// content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub body_markdown: String,
    pub tags: Vec<String>,
    pub published_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

impl ContentRecord {
    /// SHA-256 over a length-prefixed serialization of every field.
    ///
    /// Any edit to a record changes this value; the mirror relies on that to
    /// decide whether a remote copy is stale.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let published = format_timestamp(self.published_at);
        let updated = self.updated_at.map(format_timestamp).unwrap_or_default();

        let fields: [&str; 6] = [
            &self.slug,
            &self.title,
            self.description.as_deref().unwrap_or(""),
            &published,
            &updated,
            &self.body_markdown,
        ];
        for field in fields {
            hash_field(&mut hasher, field);
        }

        hasher.update((self.tags.len() as u64).to_be_bytes());
        for tag in &self.tags {
            hash_field(&mut hasher, tag);
        }

        hex::encode(hasher.finalize())
    }

    /// Most recent of `published_at` and `updated_at`.
    pub fn last_modified(&self) -> OffsetDateTime {
        match self.updated_at {
            Some(updated) if updated > self.published_at => updated,
            _ => self.published_at,
        }
    }

    /// Live path of the post's full page.
    pub fn path(&self) -> String {
        format!("/posts/{}", self.slug)
    }
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp_nanos().to_string())
}

/// Correlates a local post with its remote document record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationMapping {
    pub slug: String,
    pub remote_uri: String,
    pub remote_cid: String,
    /// Local content hash at the time of the last successful sync.
    pub content_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

/// Remote identity of the site-level publication record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationIdentity {
    pub uri: String,
    pub cid: String,
}

/// A record as listed from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> ContentRecord {
        ContentRecord {
            slug: "hello".to_string(),
            title: "Hello".to_string(),
            description: None,
            body_markdown: "# Hello".to_string(),
            tags: vec!["rust".to_string()],
            published_at: datetime!(2024-01-01 00:00 UTC),
            updated_at: None,
        }
    }

    #[test]
    fn content_hash_is_stable_for_identical_records() {
        assert_eq!(record().content_hash(), record().content_hash());
        assert_eq!(record().content_hash().len(), 64);
    }

    #[test]
    fn content_hash_changes_on_edit() {
        let original = record();
        let mut edited = original.clone();
        edited.body_markdown.push_str("\n\nMore.");
        assert_ne!(original.content_hash(), edited.content_hash());

        let mut retagged = original.clone();
        retagged.tags.push("web".to_string());
        assert_ne!(original.content_hash(), retagged.content_hash());
    }

    #[test]
    fn content_hash_separates_adjacent_fields() {
        let mut left = record();
        left.title = "ab".to_string();
        left.description = Some("c".to_string());
        let mut right = record();
        right.title = "a".to_string();
        right.description = Some("bc".to_string());
        assert_ne!(left.content_hash(), right.content_hash());
    }

    #[test]
    fn last_modified_prefers_later_update() {
        let mut rec = record();
        assert_eq!(rec.last_modified(), rec.published_at);
        rec.updated_at = Some(datetime!(2024-02-01 00:00 UTC));
        assert_eq!(rec.last_modified(), datetime!(2024-02-01 00:00 UTC));
    }
}
