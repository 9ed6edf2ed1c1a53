//! RSS 2.0 feed generation.

use time::format_description::well_known::Rfc2822;

use crate::{
    application::{markdown::excerpt, site::SiteProfile},
    domain::entities::ContentRecord,
};

/// Upper bound on items carried by the feed.
pub const FEED_ITEM_LIMIT: usize = 50;

const FEED_EXCERPT_CHARS: usize = 280;

/// Render the RSS feed for `records`, newest first.
///
/// `lastBuildDate` is the newest modification among the records, so the feed
/// is stable across rebuilds of unchanged content.
pub fn rss_feed(profile: &SiteProfile, records: &[ContentRecord]) -> String {
    let base = profile.base_with_slash();
    let mut ordered: Vec<&ContentRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.slug.cmp(&b.slug))
    });

    let last_build = ordered
        .iter()
        .map(|record| record.last_modified())
        .max()
        .and_then(|dt| dt.format(&Rfc2822).ok());

    let mut items = String::new();
    for record in ordered.into_iter().take(FEED_ITEM_LIMIT) {
        let pub_date = record
            .published_at
            .format(&Rfc2822)
            .unwrap_or_else(|_| record.published_at.to_string());
        let link = format!("{base}posts/{}", record.slug);
        let summary = record
            .description
            .clone()
            .unwrap_or_else(|| excerpt(&record.body_markdown, FEED_EXCERPT_CHARS));
        items.push_str(&format!(
            "    <item>\n      <title>{}</title>\n      <link>{}</link>\n      <guid isPermaLink=\"true\">{}</guid>\n      <pubDate>{}</pubDate>\n      <description>{}</description>\n",
            xml_escape(&record.title),
            link,
            link,
            pub_date,
            xml_escape(&summary),
        ));
        for tag in &record.tags {
            items.push_str(&format!("      <category>{}</category>\n", xml_escape(tag)));
        }
        items.push_str("    </item>\n");
    }

    let last_build = last_build
        .map(|date| format!("    <lastBuildDate>{date}</lastBuildDate>\n"))
        .unwrap_or_default();

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n  <channel>\n    <title>{}</title>\n    <link>{}</link>\n    <description>{}</description>\n{}{}  </channel>\n</rss>\n",
        xml_escape(&profile.title),
        base,
        xml_escape(&profile.description),
        last_build,
        items
    )
}

pub(crate) fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn profile() -> SiteProfile {
        SiteProfile::new("Quire & Co", "Notes", "https://blog.example").expect("profile")
    }

    fn record(slug: &str, published: time::OffsetDateTime) -> ContentRecord {
        ContentRecord {
            slug: slug.to_string(),
            title: format!("Post <{slug}>"),
            description: None,
            body_markdown: "Hello world".to_string(),
            tags: vec!["rust".to_string()],
            published_at: published,
            updated_at: None,
        }
    }

    #[test]
    fn items_are_newest_first_and_escaped() {
        let feed = rss_feed(
            &profile(),
            &[
                record("older", datetime!(2024-01-01 0:00 UTC)),
                record("newer", datetime!(2024-02-01 0:00 UTC)),
            ],
        );

        let newer = feed.find("posts/newer").expect("newer item");
        let older = feed.find("posts/older").expect("older item");
        assert!(newer < older);
        assert!(feed.contains("<title>Quire &amp; Co</title>"));
        assert!(feed.contains("Post &lt;newer&gt;"));
        assert!(feed.contains("<category>rust</category>"));
    }

    #[test]
    fn last_build_date_follows_content() {
        let records = [record("a", datetime!(2024-03-05 10:00 UTC))];
        let first = rss_feed(&profile(), &records);
        let second = rss_feed(&profile(), &records);
        assert_eq!(first, second);
        assert!(first.contains("<lastBuildDate>Tue, 05 Mar 2024 10:00:00 +0000</lastBuildDate>"));
    }

    #[test]
    fn empty_feed_has_channel_only() {
        let feed = rss_feed(&profile(), &[]);
        assert!(!feed.contains("<item>"));
        assert!(!feed.contains("lastBuildDate"));
    }
}
