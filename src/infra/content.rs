//! Markdown content repository backed by `content/posts/*.md`.
//!
//! Each file opens with TOML front matter fenced by `+++` lines:
//!
//! ```text
//! +++
//! title = "Hello"
//! published = "2024-01-01T00:00:00Z"
//! tags = ["rust"]
//! +++
//! Body in markdown.
//! ```
//!
//! The slug comes from the `slug` key, or the file stem when the key is absent.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    application::{
        repos::{ContentRepo, ContentScan, RepoError},
        routes::InputValidationError,
    },
    domain::entities::ContentRecord,
    infra::artifacts::write_atomic,
};

const FENCE: &str = "+++";
const MARKDOWN_EXTENSION: &str = "md";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrontMatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slug: Option<String>,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    published: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    updated: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct FsContentRepo {
    posts_dir: PathBuf,
}

/// Post files in the content directory, split by whether they parse.
#[derive(Debug, Default)]
struct PostFiles {
    parsed: Vec<(PathBuf, ContentRecord)>,
    malformed: Vec<(PathBuf, String)>,
}

impl FsContentRepo {
    pub fn new(posts_dir: impl Into<PathBuf>) -> Self {
        Self {
            posts_dir: posts_dir.into(),
        }
    }

    async fn load_all(&self) -> Result<PostFiles, RepoError> {
        let dir = self.posts_dir.clone();
        let files = tokio::task::spawn_blocking(move || read_posts(&dir))
            .await
            .map_err(RepoError::from_persistence)??;
        for (path, reason) in &files.malformed {
            warn!(
                target = "quire::infra::content",
                path = %path.display(),
                reason = %reason,
                "skipping malformed post"
            );
        }
        Ok(files)
    }
}

#[async_trait]
impl ContentRepo for FsContentRepo {
    async fn list_records(&self) -> Result<Vec<ContentRecord>, RepoError> {
        Ok(self.scan().await?.records)
    }

    async fn scan(&self) -> Result<ContentScan, RepoError> {
        let files = self.load_all().await?;
        let scan = ContentScan {
            records: files.parsed.into_iter().map(|(_, record)| record).collect(),
            malformed: files
                .malformed
                .into_iter()
                .map(|(path, reason)| InputValidationError::Malformed {
                    source_name: path.display().to_string(),
                    reason,
                })
                .collect(),
        };
        debug!(
            target = "quire::infra::content",
            dir = %self.posts_dir.display(),
            records = scan.records.len(),
            malformed = scan.malformed.len(),
            "listed content records"
        );
        Ok(scan)
    }

    async fn find_record(&self, slug: &str) -> Result<Option<ContentRecord>, RepoError> {
        Ok(self
            .load_all()
            .await?
            .parsed
            .into_iter()
            .map(|(_, record)| record)
            .find(|record| record.slug == slug))
    }

    async fn write_record(&self, record: &ContentRecord) -> Result<(), RepoError> {
        let files = self.load_all().await?;
        let existing = files
            .parsed
            .into_iter()
            .find(|(_, stored)| stored.slug == record.slug)
            .map(|(path, _)| path);
        let target = existing.unwrap_or_else(|| {
            self.posts_dir
                .join(format!("{}.{MARKDOWN_EXTENSION}", record.slug))
        });
        if files.malformed.iter().any(|(path, _)| path == &target) {
            return Err(RepoError::invalid_input(format!(
                "refusing to overwrite malformed post `{}`",
                target.display()
            )));
        }

        let stem_matches =
            target.file_stem().and_then(|stem| stem.to_str()) == Some(record.slug.as_str());
        let document = serialize_post(record, !stem_matches)?;
        tokio::task::spawn_blocking(move || write_atomic(&target, document.as_bytes()))
            .await
            .map_err(RepoError::from_persistence)?
            .map_err(RepoError::from_persistence)
    }
}

fn read_posts(dir: &Path) -> Result<PostFiles, RepoError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(PostFiles::default()),
        Err(err) => return Err(RepoError::from_persistence(err)),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(RepoError::from_persistence)?.path();
        let is_markdown = path.extension().and_then(|ext| ext.to_str()) == Some(MARKDOWN_EXTENSION);
        if is_markdown && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = PostFiles::default();
    for path in paths {
        let source = std::fs::read_to_string(&path).map_err(RepoError::from_persistence)?;
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        match parse_post(&stem, &source) {
            Ok(record) => files.parsed.push((path, record)),
            Err(reason) => files.malformed.push((path, reason)),
        }
    }
    Ok(files)
}

/// Parse a post file. The body is everything after the closing fence line,
/// byte for byte.
fn parse_post(stem: &str, source: &str) -> Result<ContentRecord, String> {
    let rest = source
        .strip_prefix(FENCE)
        .and_then(|rest| rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')))
        .ok_or_else(|| format!("post must begin with a `{FENCE}` line"))?;

    let mut offset = 0;
    let mut closing = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FENCE {
            closing = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (front_end, body_start) = closing.ok_or_else(|| format!("missing closing `{FENCE}` line"))?;

    let front: FrontMatter =
        toml::from_str(&rest[..front_end]).map_err(|err| format!("invalid front matter: {err}"))?;

    Ok(ContentRecord {
        slug: front.slug.unwrap_or_else(|| stem.to_string()),
        title: front.title,
        description: front.description,
        body_markdown: rest[body_start..].to_string(),
        tags: front.tags,
        published_at: front.published,
        updated_at: front.updated,
    })
}

fn serialize_post(record: &ContentRecord, explicit_slug: bool) -> Result<String, RepoError> {
    let front = FrontMatter {
        slug: explicit_slug.then(|| record.slug.clone()),
        title: record.title.clone(),
        description: record.description.clone(),
        tags: record.tags.clone(),
        published: record.published_at,
        updated: record.updated_at,
    };
    let front = toml::to_string(&front).map_err(|err| RepoError::Encoding(err.to_string()))?;
    Ok(format!("{FENCE}\n{front}{FENCE}\n{}", record.body_markdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const SAMPLE: &str = "+++\ntitle = \"Hello\"\ntags = [\"rust\", \"web\"]\npublished = \"2024-01-02T03:04:05Z\"\n+++\n# Hello\n\nBody.\n";

    #[test]
    fn parses_front_matter_and_body() {
        let record = parse_post("hello", SAMPLE).expect("parse");
        assert_eq!(record.slug, "hello");
        assert_eq!(record.title, "Hello");
        assert_eq!(record.tags, vec!["rust", "web"]);
        assert_eq!(record.published_at, datetime!(2024-01-02 03:04:05 UTC));
        assert_eq!(record.body_markdown, "# Hello\n\nBody.\n");
    }

    #[test]
    fn explicit_slug_overrides_file_stem() {
        let source = "+++\nslug = \"custom\"\ntitle = \"T\"\npublished = \"2024-01-01T00:00:00Z\"\n+++\n";
        let record = parse_post("file-name", source).expect("parse");
        assert_eq!(record.slug, "custom");
        assert_eq!(record.body_markdown, "");
    }

    #[test]
    fn rejects_missing_fences() {
        assert!(parse_post("x", "title = \"x\"").is_err());
        assert!(parse_post("x", "+++\ntitle = \"x\"\n").is_err());
    }

    #[tokio::test]
    async fn written_records_read_back_identically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FsContentRepo::new(dir.path().join("posts"));
        let record = ContentRecord {
            slug: "pulled".to_string(),
            title: "Pulled \"quoted\"".to_string(),
            description: Some("from the remote".to_string()),
            body_markdown: "Line one\n\n+++ not a fence\n".to_string(),
            tags: vec!["atproto".to_string()],
            published_at: datetime!(2024-05-06 07:08:09 UTC),
            updated_at: Some(datetime!(2024-05-07 00:00 UTC)),
        };

        repo.write_record(&record).await.expect("write");
        let stored = repo.find_record("pulled").await.expect("find").expect("present");
        assert_eq!(stored, record);
        assert_eq!(stored.content_hash(), record.content_hash());
    }

    #[tokio::test]
    async fn overwrite_keeps_the_original_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("2024-custom.md"),
            "+++\nslug = \"custom\"\ntitle = \"Old\"\npublished = \"2024-01-01T00:00:00Z\"\n+++\nold\n",
        )
        .expect("seed");
        let repo = FsContentRepo::new(dir.path());

        let mut record = repo.find_record("custom").await.expect("find").expect("present");
        record.title = "New".to_string();
        repo.write_record(&record).await.expect("write");

        let listed = repo.list_records().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "New");
        assert!(!dir.path().join("custom.md").exists());
    }

    #[tokio::test]
    async fn malformed_posts_are_reported_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("good.md"), SAMPLE).expect("seed good");
        std::fs::write(
            dir.path().join("bad.md"),
            "+++\npublished = \"2024-01-01T00:00:00Z\"\n+++\nno title\n",
        )
        .expect("seed bad");
        let repo = FsContentRepo::new(dir.path());

        let scan = repo.scan().await.expect("scan");
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].slug, "good");
        assert_eq!(scan.malformed.len(), 1);
        assert!(scan.malformed[0].subject().ends_with("bad.md"));

        assert_eq!(repo.list_records().await.expect("list").len(), 1);
        assert!(repo.find_record("good").await.expect("find").is_some());

        let mut replacement = scan.records[0].clone();
        replacement.slug = "bad".to_string();
        let err = repo.write_record(&replacement).await.err().expect("refused");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = FsContentRepo::new(dir.path().join("absent"));
        assert!(repo.list_records().await.expect("list").is_empty());
    }
}
