use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use quire_lexicon::PUBLICATION_DESCRIPTOR_PATH;

use crate::{
    application::{error::HttpError, site::SiteService},
    infra::assets,
    presentation::views::{
        ListingPartial, PostPartial, render_not_found_response, render_page_response,
    },
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub site: Arc<SiteService>,
    pub static_dir: Option<PathBuf>,
}

/// The public router. `serve` binds it to a socket; the build drives it with
/// synthetic requests.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/tags/{tag}", get(tag_index))
        .route("/posts/{slug}", get(post_detail))
        .route("/feed.xml", get(rss_feed))
        .route("/sitemap.xml", get(sitemap))
        .route("/robots.txt", get(robots_txt))
        .route(PUBLICATION_DESCRIPTOR_PATH, get(publication_descriptor))
        .route("/static/{*path}", get(static_asset))
        .fallback(fallback_router)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index(State(state): State<HttpState>, headers: HeaderMap) -> Result<Response, HttpError> {
    let content = state.site.index().await?;
    let chrome = state.site.chrome();
    Ok(render_page_response(
        ListingPartial { content },
        chrome,
        &headers,
        StatusCode::OK,
    ))
}

async fn tag_index(
    State(state): State<HttpState>,
    Path(tag): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let chrome = state.site.chrome();
    let Some(content) = state.site.tag(&tag).await? else {
        return Ok(render_not_found_response(chrome, &headers));
    };

    let canonical = state.site.profile().canonical_url(&format!("/tags/{tag}"));
    let chrome = chrome
        .with_title(content.heading.clone())
        .with_canonical(canonical);
    Ok(render_page_response(
        ListingPartial { content },
        chrome,
        &headers,
        StatusCode::OK,
    ))
}

async fn post_detail(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let chrome = state.site.chrome();
    let Some(content) = state.site.post(&slug).await? else {
        return Ok(render_not_found_response(chrome, &headers));
    };

    let profile = state.site.profile();
    let mut chrome = chrome
        .with_title(content.title.clone())
        .with_canonical(profile.canonical_url(&format!("/posts/{slug}")))
        .with_document_link(profile.document_uri(&slug).map(|uri| uri.to_string()));
    if let Some(description) = content.description.clone() {
        chrome = chrome.with_description(description);
    }

    Ok(render_page_response(
        PostPartial { content },
        chrome,
        &headers,
        StatusCode::OK,
    ))
}

async fn rss_feed(State(state): State<HttpState>) -> Result<Response, HttpError> {
    let body = state.site.feed_xml().await?;
    Ok(text_response(body, "application/rss+xml; charset=utf-8"))
}

async fn sitemap(State(state): State<HttpState>) -> Result<Response, HttpError> {
    let body = state.site.sitemap_xml().await?;
    Ok(text_response(body, "application/xml; charset=utf-8"))
}

async fn robots_txt(State(state): State<HttpState>) -> Response {
    text_response(state.site.robots_txt(), "text/plain; charset=utf-8")
}

async fn publication_descriptor(State(state): State<HttpState>) -> Result<Response, HttpError> {
    match state.site.publication_descriptor() {
        Some(body) => Ok(text_response(body, "text/plain; charset=utf-8")),
        None => Err(HttpError::new(
            "infra::http::publication_descriptor",
            StatusCode::NOT_FOUND,
            "Not found",
            "no repository identity configured",
        )),
    }
}

async fn static_asset(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    assets::serve_static(state.static_dir.as_deref(), &path).await
}

async fn fallback_router(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    render_not_found_response(state.site.chrome(), &headers)
}

fn text_response(body: String, content_type: &'static str) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
