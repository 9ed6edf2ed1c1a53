//! Read-side services backing the public routes.
//!
//! Every handler of the live router goes through [`SiteService`], and so does
//! the static build, which dispatches synthetic requests through that same
//! router.

use std::{collections::BTreeMap, sync::Arc};

use quire_lexicon::AtUri;
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use url::Url;

use crate::{
    application::{
        context::{ContextError, parse_base_url},
        markdown::{excerpt, render_markdown},
        repos::{ContentRepo, RepoError},
        routes::{tag_index, validate_records},
        sitemap, syndication,
    },
    domain::{entities::ContentRecord, slug::tag_segment},
    presentation::views::{
        BrandView, LayoutChrome, ListingView, PageMetaView, PostCard, PostDetailView,
        TagBadge, TagSummary, build_tag_badges,
    },
};

const DISPLAY_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[month repr:long] [day padding:none], [year]");
const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const CARD_EXCERPT_CHARS: usize = 200;

/// Site identity shared by the live router, the build and the mirror.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub title: String,
    pub description: String,
    pub base_url: Url,
    /// Repository DID of the mirrored publication, when one is configured.
    pub did: Option<String>,
    pub publication_rkey: String,
}

impl SiteProfile {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        base_url: &str,
    ) -> Result<Self, ContextError> {
        Ok(Self {
            title: title.into(),
            description: description.into(),
            base_url: parse_base_url(base_url)?,
            did: None,
            publication_rkey: "self".to_string(),
        })
    }

    pub fn with_identity(self, did: impl Into<String>, publication_rkey: impl Into<String>) -> Self {
        Self {
            did: Some(did.into()),
            publication_rkey: publication_rkey.into(),
            ..self
        }
    }

    /// Origin with exactly one trailing slash.
    pub fn base_with_slash(&self) -> String {
        let trimmed = self.base_url.as_str().trim_end_matches('/');
        format!("{trimmed}/")
    }

    pub fn canonical_url(&self, path: &str) -> String {
        let base = self.base_with_slash();
        let trimmed = path.trim_start_matches('/');
        format!("{base}{trimmed}")
    }

    pub fn publication_uri(&self) -> Option<AtUri> {
        self.did
            .as_deref()
            .map(|did| AtUri::publication(did, &self.publication_rkey))
    }

    /// Back-link target for a post. Derived from configuration only, never
    /// from the mirror's mapping table.
    pub fn document_uri(&self, slug: &str) -> Option<AtUri> {
        self.did.as_deref().map(|did| AtUri::document(did, slug))
    }
}

#[derive(Debug, Error)]
pub enum SiteError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct SiteService {
    content: Arc<dyn ContentRepo>,
    profile: SiteProfile,
}

impl SiteService {
    pub fn new(content: Arc<dyn ContentRepo>, profile: SiteProfile) -> Self {
        Self { content, profile }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Layout chrome with site-wide defaults; handlers refine it per page.
    pub fn chrome(&self) -> LayoutChrome {
        LayoutChrome {
            brand: BrandView {
                title: self.profile.title.clone(),
                href: "/".to_string(),
            },
            meta: PageMetaView {
                title: self.profile.title.clone(),
                description: self.profile.description.clone(),
                canonical: self.profile.canonical_url("/"),
                document_link: None,
            },
        }
    }

    /// Records that pass validation, sorted by slug. Invalid records are
    /// invisible to the site, as they are to the build.
    pub async fn published(&self) -> Result<Vec<ContentRecord>, SiteError> {
        let (records, _) = validate_records(self.content.list_records().await?);
        Ok(records)
    }

    pub async fn index(&self) -> Result<ListingView, SiteError> {
        let records = self.published().await?;
        Ok(ListingView {
            heading: self.profile.title.clone(),
            description: Some(self.profile.description.clone()).filter(|d| !d.is_empty()),
            posts: post_cards(records.iter()),
            tags: tag_summaries(&records, None),
        })
    }

    /// Listing for one tag segment, `None` when no published post carries it.
    pub async fn tag(&self, segment: &str) -> Result<Option<ListingView>, SiteError> {
        let records = self.published().await?;
        let tags = tag_index(&records);
        let Some(label) = tags.get(segment) else {
            return Ok(None);
        };

        let tagged = records.iter().filter(|record| has_segment(record, segment));
        Ok(Some(ListingView {
            heading: format!("#{label}"),
            description: None,
            posts: post_cards(tagged),
            tags: tag_summaries(&records, Some(segment)),
        }))
    }

    pub async fn post(&self, slug: &str) -> Result<Option<PostDetailView>, SiteError> {
        let records = self.published().await?;
        let Some(record) = records.into_iter().find(|record| record.slug == slug) else {
            return Ok(None);
        };

        let badges = badges_for(&record);
        Ok(Some(PostDetailView {
            slug: record.slug.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            published: format_display(record.published_at),
            iso_date: format_iso(record.published_at),
            updated: record.updated_at.map(format_display),
            badges,
            body_html: render_markdown(&record.body_markdown),
        }))
    }

    pub async fn feed_xml(&self) -> Result<String, SiteError> {
        let records = self.published().await?;
        Ok(syndication::rss_feed(&self.profile, &records))
    }

    pub async fn sitemap_xml(&self) -> Result<String, SiteError> {
        let records = self.published().await?;
        Ok(sitemap::sitemap_xml(&self.profile, &records))
    }

    pub fn robots_txt(&self) -> String {
        sitemap::robots_txt(&self.profile)
    }

    /// Body of the well-known publication descriptor: the publication AT-URI.
    pub fn publication_descriptor(&self) -> Option<String> {
        self.profile
            .publication_uri()
            .map(|uri| format!("{uri}\n"))
    }
}

fn has_segment(record: &ContentRecord, segment: &str) -> bool {
    record
        .tags
        .iter()
        .any(|tag| tag_segment(tag).is_ok_and(|candidate| candidate == segment))
}

fn badges_for(record: &ContentRecord) -> Vec<TagBadge> {
    let mut seen = BTreeMap::new();
    for tag in &record.tags {
        if let Ok(segment) = tag_segment(tag) {
            seen.entry(segment).or_insert_with(|| tag.trim().to_string());
        }
    }
    build_tag_badges(
        seen.iter()
            .map(|(segment, label)| (segment.as_str(), label.as_str())),
    )
}

fn post_cards<'a>(records: impl Iterator<Item = &'a ContentRecord>) -> Vec<PostCard> {
    let mut ordered: Vec<&ContentRecord> = records.collect();
    ordered.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.slug.cmp(&b.slug))
    });

    ordered
        .into_iter()
        .map(|record| PostCard {
            title: record.title.clone(),
            path: record.path(),
            excerpt: record
                .description
                .clone()
                .unwrap_or_else(|| excerpt(&record.body_markdown, CARD_EXCERPT_CHARS)),
            iso_date: format_iso(record.published_at),
            published: format_display(record.published_at),
            badges: badges_for(record),
        })
        .collect()
}

fn tag_summaries(records: &[ContentRecord], active: Option<&str>) -> Vec<TagSummary> {
    tag_index(records)
        .into_iter()
        .map(|(segment, label)| TagSummary {
            count: records
                .iter()
                .filter(|record| has_segment(record, &segment))
                .count(),
            is_active: active == Some(segment.as_str()),
            path: format!("/tags/{segment}"),
            label,
        })
        .collect()
}

fn format_display(value: OffsetDateTime) -> String {
    value
        .format(DISPLAY_DATE)
        .unwrap_or_else(|_| value.date().to_string())
}

fn format_iso(value: OffsetDateTime) -> String {
    value
        .format(ISO_DATE)
        .unwrap_or_else(|_| value.date().to_string())
}
