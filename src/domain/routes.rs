//! Logical routes of the public site and their static output paths.

use std::fmt;

use quire_lexicon::PUBLICATION_DESCRIPTOR_PATH;

/// File name of the full-document artifact inside a route directory.
pub const FULL_ARTIFACT: &str = "index.html";
/// File name of the partial-navigation artifact inside a route directory.
pub const FRAGMENT_ARTIFACT: &str = "fragment.html";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    Index,
    Post { slug: String },
    Tag { tag: String, segment: String },
    Feed,
    Sitemap,
    Robots,
    /// Publication descriptor; written only when a remote identity is configured.
    PublicationDescriptor,
}

/// A path on the public site plus the content it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub kind: RouteKind,
    pub path: String,
}

/// Rendering intent: a directly navigable document or the inner content
/// swapped in by partial navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Full,
    Fragment,
}

impl RenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Full => "full",
            RenderMode::Fragment => "fragment",
        }
    }
}

impl Route {
    pub fn index() -> Self {
        Self {
            kind: RouteKind::Index,
            path: "/".to_string(),
        }
    }

    pub fn post(slug: &str) -> Self {
        Self {
            kind: RouteKind::Post {
                slug: slug.to_string(),
            },
            path: format!("/posts/{slug}"),
        }
    }

    pub fn tag(tag: &str, segment: &str) -> Self {
        Self {
            kind: RouteKind::Tag {
                tag: tag.to_string(),
                segment: segment.to_string(),
            },
            path: format!("/tags/{segment}"),
        }
    }

    pub fn feed() -> Self {
        Self::auxiliary(RouteKind::Feed, "/feed.xml")
    }

    pub fn sitemap() -> Self {
        Self::auxiliary(RouteKind::Sitemap, "/sitemap.xml")
    }

    pub fn robots() -> Self {
        Self::auxiliary(RouteKind::Robots, "/robots.txt")
    }

    pub fn publication_descriptor() -> Self {
        Self::auxiliary(RouteKind::PublicationDescriptor, PUBLICATION_DESCRIPTOR_PATH)
    }

    fn auxiliary(kind: RouteKind, path: &str) -> Self {
        Self {
            kind,
            path: path.to_string(),
        }
    }

    /// Page routes render in both modes; auxiliary routes emit one file.
    pub fn is_page(&self) -> bool {
        matches!(
            self.kind,
            RouteKind::Index | RouteKind::Post { .. } | RouteKind::Tag { .. }
        )
    }

    /// Output path, relative to the tree root, for the given mode.
    ///
    /// Returns `None` for the fragment of an auxiliary route.
    pub fn artifact_path(&self, mode: RenderMode) -> Option<String> {
        let trimmed = self.path.trim_matches('/');
        if !self.is_page() {
            return match mode {
                RenderMode::Full => Some(trimmed.to_string()),
                RenderMode::Fragment => None,
            };
        }

        let file = match mode {
            RenderMode::Full => FULL_ARTIFACT,
            RenderMode::Fragment => FRAGMENT_ARTIFACT,
        };
        if trimmed.is_empty() {
            Some(file.to_string())
        } else {
            Some(format!("{trimmed}/{file}"))
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Static URL of the fragment artifact for a live partial-navigation target.
pub fn fragment_url_for(target: &str) -> String {
    let trimmed = target.trim_end_matches('/');
    format!("{trimmed}/{FRAGMENT_ARTIFACT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_routes_map_to_directory_index_pairs() {
        let post = Route::post("hello");
        assert_eq!(
            post.artifact_path(RenderMode::Full).as_deref(),
            Some("posts/hello/index.html")
        );
        assert_eq!(
            post.artifact_path(RenderMode::Fragment).as_deref(),
            Some("posts/hello/fragment.html")
        );
    }

    #[test]
    fn index_route_writes_at_tree_root() {
        let index = Route::index();
        assert_eq!(index.artifact_path(RenderMode::Full).as_deref(), Some("index.html"));
        assert_eq!(
            index.artifact_path(RenderMode::Fragment).as_deref(),
            Some("fragment.html")
        );
    }

    #[test]
    fn auxiliary_routes_have_no_fragment() {
        let feed = Route::feed();
        assert!(!feed.is_page());
        assert_eq!(feed.artifact_path(RenderMode::Full).as_deref(), Some("feed.xml"));
        assert_eq!(feed.artifact_path(RenderMode::Fragment), None);

        let descriptor = Route::publication_descriptor();
        assert_eq!(
            descriptor.artifact_path(RenderMode::Full).as_deref(),
            Some(".well-known/site.standard.publication")
        );
    }

    #[test]
    fn fragment_url_for_root_and_nested_targets() {
        assert_eq!(fragment_url_for("/"), "/fragment.html");
        assert_eq!(fragment_url_for("/posts/a"), "/posts/a/fragment.html");
        assert_eq!(fragment_url_for("/tags/rust/"), "/tags/rust/fragment.html");
    }
}
