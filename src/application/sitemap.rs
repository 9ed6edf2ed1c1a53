//! Sitemap and robots.txt generation.

use std::collections::BTreeMap;

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
    application::{routes::tag_index, site::SiteProfile},
    domain::{entities::ContentRecord, slug::tag_segment},
};

/// Render `sitemap.xml`: the index, every post and every tag listing.
///
/// Entries are ordered by path and carry the newest modification time of the
/// content they list.
pub fn sitemap_xml(profile: &SiteProfile, records: &[ContentRecord]) -> String {
    let mut entries: BTreeMap<String, Option<OffsetDateTime>> = BTreeMap::new();

    let newest = records.iter().map(ContentRecord::last_modified).max();
    entries.insert("/".to_string(), newest);

    for record in records {
        entries.insert(record.path(), Some(record.last_modified()));
    }

    for segment in tag_index(records).into_keys() {
        let lastmod = records
            .iter()
            .filter(|record| {
                record
                    .tags
                    .iter()
                    .any(|tag| tag_segment(tag).is_ok_and(|s| s == segment))
            })
            .map(ContentRecord::last_modified)
            .max();
        entries.insert(format!("/tags/{segment}"), lastmod);
    }

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for (path, lastmod) in entries {
        xml.push_str(&sitemap_entry(profile, &path, lastmod));
    }
    xml.push_str("</urlset>\n");
    xml
}

/// Render `robots.txt`, pointing crawlers at the sitemap.
pub fn robots_txt(profile: &SiteProfile) -> String {
    let sitemap_url = profile.canonical_url("/sitemap.xml");
    format!("User-agent: *\nAllow: /\nSitemap: {sitemap_url}\n")
}

fn sitemap_entry(profile: &SiteProfile, path: &str, lastmod: Option<OffsetDateTime>) -> String {
    let loc = profile.canonical_url(path);
    let lastmod_str = lastmod
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_default();
    if lastmod_str.is_empty() {
        format!("  <url><loc>{loc}</loc></url>\n")
    } else {
        format!("  <url><loc>{loc}</loc><lastmod>{lastmod_str}</lastmod></url>\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use time::macros::datetime;

    fn profile() -> SiteProfile {
        SiteProfile::new("Quire", "Notes", "https://blog.example/").expect("profile")
    }

    fn record(slug: &str, tags: &[&str]) -> ContentRecord {
        ContentRecord {
            slug: slug.to_string(),
            title: slug.to_string(),
            description: None,
            body_markdown: String::new(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            published_at: datetime!(2024-04-01 12:00 UTC),
            updated_at: None,
        }
    }

    #[test]
    fn sitemap_lists_index_posts_and_tags() {
        let xml = sitemap_xml(&profile(), &[record("b", &["web"]), record("a", &["Rust"])]);
        assert!(xml.contains("<loc>https://blog.example/</loc>"));
        assert!(xml.contains("<loc>https://blog.example/posts/a</loc>"));
        assert!(xml.contains("<loc>https://blog.example/tags/rust</loc>"));
        let a = xml.find("/posts/a").expect("a");
        let b = xml.find("/posts/b").expect("b");
        assert!(a < b);
    }

    #[test]
    fn robots_points_at_sitemap() {
        assert_snapshot!(
            robots_txt(&profile()).replace('\n', "|"),
            @"User-agent: *|Allow: /|Sitemap: https://blog.example/sitemap.xml|"
        );
    }
}
