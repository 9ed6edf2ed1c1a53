//! Route enumeration: which logical routes a build materializes.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::warn;

use crate::{
    application::repos::ContentScan,
    domain::{
        entities::ContentRecord,
        routes::Route,
        slug::{SlugError, ensure_canonical, tag_segment},
    },
};

/// A content record that cannot be published as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputValidationError {
    #[error("record titled `{title}` has no slug")]
    MissingSlug { title: String },
    #[error("record `{slug}` has an invalid slug: {reason}")]
    InvalidSlug { slug: String, reason: SlugError },
    #[error("slug `{slug}` is claimed by {count} records")]
    DuplicateSlug { slug: String, count: usize },
    #[error("record `{slug}` has tag `{tag}` with no usable path segment")]
    InvalidTag { slug: String, tag: String },
    #[error("`{source_name}` is not a readable post: {reason}")]
    Malformed { source_name: String, reason: String },
}

impl InputValidationError {
    /// Slug the error is about, or the title when the record has no slug.
    pub fn subject(&self) -> &str {
        match self {
            InputValidationError::MissingSlug { title } => title,
            InputValidationError::InvalidSlug { slug, .. }
            | InputValidationError::DuplicateSlug { slug, .. }
            | InputValidationError::InvalidTag { slug, .. } => slug,
            InputValidationError::Malformed { source_name, .. } => source_name,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("strict mode rejected the content set: {0}")]
    Strict(InputValidationError),
}

/// Result of a successful enumeration.
#[derive(Debug, Clone)]
pub struct Enumeration {
    /// Routes sorted by path.
    pub routes: Vec<Route>,
    /// Records that passed validation, sorted by slug.
    pub records: Vec<ContentRecord>,
    /// Records excluded from the build.
    pub rejected: Vec<InputValidationError>,
}

/// Split records into publishable ones and validation failures.
///
/// Every record sharing a duplicated slug is rejected; picking a winner would
/// make the output depend on listing order.
pub fn validate_records(
    records: Vec<ContentRecord>,
) -> (Vec<ContentRecord>, Vec<InputValidationError>) {
    let mut rejected = Vec::new();
    let mut claims: HashMap<String, usize> = HashMap::new();
    for record in &records {
        *claims.entry(record.slug.clone()).or_insert(0) += 1;
    }

    let mut duplicates: BTreeMap<String, usize> = BTreeMap::new();
    let mut valid = Vec::with_capacity(records.len());

    for record in records {
        if record.slug.trim().is_empty() {
            rejected.push(InputValidationError::MissingSlug {
                title: record.title.clone(),
            });
            continue;
        }

        let count = claims.get(&record.slug).copied().unwrap_or(0);
        if count > 1 {
            duplicates.insert(record.slug.clone(), count);
            continue;
        }

        if let Err(reason) = ensure_canonical(&record.slug) {
            rejected.push(InputValidationError::InvalidSlug {
                slug: record.slug.clone(),
                reason,
            });
            continue;
        }

        if let Some(tag) = record.tags.iter().find(|tag| tag_segment(tag).is_err()) {
            rejected.push(InputValidationError::InvalidTag {
                slug: record.slug.clone(),
                tag: tag.clone(),
            });
            continue;
        }

        valid.push(record);
    }

    rejected.extend(
        duplicates
            .into_iter()
            .map(|(slug, count)| InputValidationError::DuplicateSlug { slug, count }),
    );

    valid.sort_by(|a, b| a.slug.cmp(&b.slug));
    (valid, rejected)
}

/// Distinct tags keyed by path segment. When two spellings share a segment,
/// the spelling from the lowest slug wins.
pub fn tag_index(records: &[ContentRecord]) -> BTreeMap<String, String> {
    let mut sorted: Vec<&ContentRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.slug.cmp(&b.slug));

    let mut tags = BTreeMap::new();
    for record in sorted {
        for tag in &record.tags {
            if let Ok(segment) = tag_segment(tag) {
                tags.entry(segment).or_insert_with(|| tag.trim().to_string());
            }
        }
    }
    tags
}

/// Produce every route for the given content set.
///
/// One route per valid record, one per distinct tag, the index, and the
/// feed/sitemap/robots auxiliaries, sorted by path. In strict mode the first
/// validation error aborts the enumeration.
pub fn enumerate(
    records: Vec<ContentRecord>,
    strict: bool,
) -> Result<Enumeration, EnumerationError> {
    enumerate_scan(
        ContentScan {
            records,
            malformed: Vec::new(),
        },
        strict,
    )
}

/// Like [`enumerate`], with sources that failed to parse counted as
/// validation errors ahead of the record-level ones.
pub fn enumerate_scan(scan: ContentScan, strict: bool) -> Result<Enumeration, EnumerationError> {
    let (records, invalid) = validate_records(scan.records);
    let mut rejected = scan.malformed;
    rejected.extend(invalid);

    if strict && let Some(first) = rejected.first() {
        return Err(EnumerationError::Strict(first.clone()));
    }

    for error in &rejected {
        warn!(
            target = "quire::routes",
            error = %error,
            "excluding content record from build"
        );
    }

    let mut routes = Vec::with_capacity(records.len() + 4);
    routes.push(Route::index());
    routes.extend(records.iter().map(|record| Route::post(&record.slug)));
    routes.extend(
        tag_index(&records)
            .iter()
            .map(|(segment, tag)| Route::tag(tag, segment)),
    );
    routes.push(Route::feed());
    routes.push(Route::sitemap());
    routes.push(Route::robots());
    routes.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(Enumeration {
        routes,
        records,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(slug: &str, tags: &[&str]) -> ContentRecord {
        ContentRecord {
            slug: slug.to_string(),
            title: format!("Title {slug}"),
            description: None,
            body_markdown: format!("Body of {slug}"),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            published_at: datetime!(2024-05-01 08:00 UTC),
            updated_at: None,
        }
    }

    #[test]
    fn three_posts_two_tags_yield_nine_routes() {
        let records = vec![
            record("gamma", &["rust"]),
            record("alpha", &["rust", "web"]),
            record("beta", &["web"]),
        ];

        let enumeration = enumerate(records, false).expect("enumerate");
        let paths: Vec<&str> = enumeration.routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/",
                "/feed.xml",
                "/posts/alpha",
                "/posts/beta",
                "/posts/gamma",
                "/robots.txt",
                "/sitemap.xml",
                "/tags/rust",
                "/tags/web",
            ]
        );
        assert!(enumeration.rejected.is_empty());
    }

    #[test]
    fn enumeration_is_independent_of_input_order() {
        let forward = vec![record("a", &["x"]), record("b", &["y"])];
        let backward = vec![record("b", &["y"]), record("a", &["x"])];
        assert_eq!(
            enumerate(forward, false).expect("forward").routes,
            enumerate(backward, false).expect("backward").routes
        );
    }

    #[test]
    fn duplicate_slugs_are_excluded_and_reported() {
        let records = vec![record("same", &[]), record("same", &[]), record("ok", &[])];
        let enumeration = enumerate(records, false).expect("lenient enumerate");

        assert_eq!(
            enumeration.rejected,
            vec![InputValidationError::DuplicateSlug {
                slug: "same".to_string(),
                count: 2
            }]
        );
        assert!(enumeration.routes.iter().any(|r| r.path == "/posts/ok"));
        assert!(!enumeration.routes.iter().any(|r| r.path == "/posts/same"));
    }

    #[test]
    fn strict_mode_fails_on_first_invalid_record() {
        let records = vec![record("", &[]), record("fine", &[])];
        let err = enumerate(records, true).expect_err("strict must fail");
        assert!(matches!(
            err,
            EnumerationError::Strict(InputValidationError::MissingSlug { .. })
        ));
    }

    #[test]
    fn non_canonical_slug_is_rejected() {
        let (valid, rejected) = validate_records(vec![record("Not Canonical", &[])]);
        assert!(valid.is_empty());
        assert!(matches!(
            rejected.as_slice(),
            [InputValidationError::InvalidSlug { .. }]
        ));
    }

    #[test]
    fn tag_spellings_sharing_a_segment_collapse() {
        let records = vec![record("a", &["Static Sites"]), record("b", &["static-sites"])];
        let tags = tag_index(&records);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("static-sites").map(String::as_str), Some("Static Sites"));
    }
}
