use crate::application::error::{ErrorReport, HttpError};
use askama::{Error as AskamaError, Template};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::application::context::PARTIAL_REQUEST_HEADER;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

/// True when the request came from partial navigation and only wants the
/// `<main id="content">` payload.
pub fn wants_fragment(headers: &HeaderMap) -> bool {
    headers.contains_key(PARTIAL_REQUEST_HEADER)
}

/// Render a content partial, then either return it as-is (partial
/// navigation) or embed it verbatim in the full document.
pub fn render_page_response<T: Template>(
    partial: T,
    chrome: LayoutChrome,
    headers: &HeaderMap,
    status: StatusCode,
) -> Response {
    let Html(main) = match render_template(partial) {
        Ok(html) => html,
        Err(err) => return err.into_response(),
    };

    if wants_fragment(headers) {
        return (status, Html(main)).into_response();
    }

    let document = DocumentTemplate {
        view: LayoutContext::new(chrome, main),
    };
    match render_template(document) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(chrome: LayoutChrome, headers: &HeaderMap) -> Response {
    let content = ErrorPageView::not_found();
    let chrome = chrome.with_title(content.title.clone());
    let mut response = render_page_response(
        ErrorPartial { content },
        chrome,
        headers,
        StatusCode::NOT_FOUND,
    );
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

#[derive(Clone)]
pub struct BrandView {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct PageMetaView {
    pub title: String,
    pub description: String,
    pub canonical: String,
    /// AT-URI of the mirrored document, emitted as a `site.standard.document` link.
    pub document_link: Option<String>,
}

impl PageMetaView {
    pub fn with_canonical(self, canonical: String) -> Self {
        Self { canonical, ..self }
    }
}

#[derive(Clone)]
pub struct LayoutChrome {
    pub brand: BrandView,
    pub meta: PageMetaView,
}

impl LayoutChrome {
    pub fn with_canonical(self, canonical: String) -> Self {
        Self {
            meta: self.meta.with_canonical(canonical),
            ..self
        }
    }

    pub fn with_title(self, title: String) -> Self {
        let site = self.brand.title.clone();
        Self {
            meta: PageMetaView {
                title: format!("{title} · {site}"),
                ..self.meta
            },
            ..self
        }
    }

    pub fn with_description(self, description: String) -> Self {
        Self {
            meta: PageMetaView {
                description,
                ..self.meta
            },
            ..self
        }
    }

    pub fn with_document_link(self, document_link: Option<String>) -> Self {
        Self {
            meta: PageMetaView {
                document_link,
                ..self.meta
            },
            ..self
        }
    }
}

#[derive(Clone)]
pub struct LayoutContext<T> {
    pub brand: BrandView,
    pub meta: PageMetaView,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(chrome: LayoutChrome, content: T) -> Self {
        Self {
            brand: chrome.brand,
            meta: chrome.meta,
            content,
        }
    }
}

/// Full HTML document wrapping an already rendered `<main>` element.
#[derive(Template)]
#[template(path = "document.html")]
pub struct DocumentTemplate {
    pub view: LayoutContext<String>,
}

#[derive(Clone)]
pub struct TagBadge {
    pub label: String,
    pub path: String,
}

#[derive(Clone)]
pub struct PostCard {
    pub title: String,
    pub path: String,
    pub excerpt: String,
    pub iso_date: String,
    pub published: String,
    pub badges: Vec<TagBadge>,
}

#[derive(Clone)]
pub struct TagSummary {
    pub label: String,
    pub path: String,
    pub count: usize,
    pub is_active: bool,
}

pub struct ListingView {
    pub heading: String,
    pub description: Option<String>,
    pub posts: Vec<PostCard>,
    pub tags: Vec<TagSummary>,
}

#[derive(Template)]
#[template(path = "partials/listing.html")]
pub struct ListingPartial {
    pub content: ListingView,
}

pub struct PostDetailView {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub published: String,
    pub iso_date: String,
    pub updated: Option<String>,
    pub badges: Vec<TagBadge>,
    pub body_html: String,
}

#[derive(Template)]
#[template(path = "partials/post.html")]
pub struct PostPartial {
    pub content: PostDetailView,
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
    pub action: ErrorAction,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "The page you requested does not exist.".to_string(),
            action: ErrorAction::home(),
        }
    }
}

pub struct ErrorAction {
    pub href: String,
    pub label: String,
}

impl ErrorAction {
    pub fn home() -> Self {
        Self {
            href: "/".to_string(),
            label: "Back to home".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "partials/error.html")]
pub struct ErrorPartial {
    pub content: ErrorPageView,
}

pub fn build_tag_badges<'a, T>(tags: T) -> Vec<TagBadge>
where
    T: IntoIterator<Item = (&'a str, &'a str)>,
{
    tags.into_iter()
        .map(|(segment, label)| TagBadge {
            label: label.to_string(),
            path: format!("/tags/{segment}"),
        })
        .collect()
}
