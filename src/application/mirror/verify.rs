use std::{cell::RefCell, fmt, rc::Rc};

use lol_html::{RewriteStrSettings, element, rewrite_str};
use quire_lexicon::{AtUri, DOCUMENT_COLLECTION, DOCUMENT_LINK_REL, PUBLICATION_COLLECTION, PUBLICATION_DESCRIPTOR_PATH};
use tracing::{info, warn};

use super::{MirrorError, MirrorService};
use crate::application::repos::{ProbeError, SiteProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerificationStatus {
    Verified,
    Warning,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Warning => "warning",
            VerificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationItem {
    pub slug: String,
    pub status: VerificationStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// Publication named by the well-known descriptor, when it was readable.
    pub publication: Option<AtUri>,
    pub items: Vec<VerificationItem>,
}

impl VerificationReport {
    /// Worst status across all items; an empty report verifies.
    pub fn status(&self) -> VerificationStatus {
        self.items
            .iter()
            .map(|item| item.status)
            .max()
            .unwrap_or(VerificationStatus::Verified)
    }

    /// Only a fully verified report passes; a single ownership signal needs an
    /// operator as much as a mismatch does.
    pub fn is_success(&self) -> bool {
        self.status() == VerificationStatus::Verified
    }
}

/// What the descriptor channel yielded.
enum Descriptor {
    Present(AtUri),
    Unavailable(String),
    Malformed(String),
}

impl MirrorService {
    /// Check the ownership signals a published site exposes for `slugs`.
    pub async fn verify(
        &self,
        probe: &dyn SiteProbe,
        slugs: &[String],
    ) -> Result<VerificationReport, MirrorError> {
        let descriptor = read_descriptor(probe).await;
        let stored = self.mappings.publication().await?.map(|identity| identity.uri);
        let mut report = VerificationReport {
            publication: match &descriptor {
                Descriptor::Present(uri) => Some(uri.clone()),
                _ => None,
            },
            items: Vec::with_capacity(slugs.len()),
        };

        for slug in slugs {
            let link = match probe.fetch(&format!("/posts/{slug}")).await {
                Ok(html) => document_link(&html),
                Err(err) => {
                    warn!(target = "quire::mirror::verify", slug = %slug, error = %err, "page unavailable");
                    None
                }
            };
            let mapped = self.mappings.get(slug).await?.map(|m| m.remote_uri);

            let (status, detail) = self.judge(
                slug,
                &descriptor,
                stored.as_deref(),
                link.as_deref(),
                mapped.as_deref(),
            );
            info!(
                target = "quire::mirror::verify",
                slug = %slug,
                status = status.as_str(),
                detail = %detail,
                "document checked"
            );
            report.items.push(VerificationItem {
                slug: slug.clone(),
                status,
                detail,
            });
        }

        Ok(report)
    }

    fn judge(
        &self,
        slug: &str,
        descriptor: &Descriptor,
        stored: Option<&str>,
        link: Option<&str>,
        mapped: Option<&str>,
    ) -> (VerificationStatus, String) {
        use VerificationStatus::{Failed, Verified, Warning};

        let link = match link.map(str::parse::<AtUri>) {
            Some(Ok(uri)) => Some(uri),
            Some(Err(err)) => return (Failed, format!("document link is malformed: {err}")),
            None => None,
        };

        if let Some(uri) = &link {
            if uri.collection != DOCUMENT_COLLECTION || uri.rkey != slug {
                return (Failed, format!("document link `{uri}` names another record"));
            }
            if let Some(mapped) = mapped
                && mapped != uri.to_string()
            {
                return (Failed, format!("document link `{uri}` differs from mapping `{mapped}`"));
            }
        }

        if let (Descriptor::Present(publication), Some(stored)) = (descriptor, stored)
            && publication.to_string() != stored
        {
            return (
                Failed,
                format!("descriptor names `{publication}`, the mapping table holds `{stored}`"),
            );
        }

        let claimed_did = match (descriptor, &link) {
            (Descriptor::Present(publication), _) => Some(&publication.did),
            (_, Some(uri)) => Some(&uri.did),
            _ => None,
        };
        if let (Some(expected), Some(claimed)) = (&self.settings.expected_did, claimed_did)
            && expected != claimed
        {
            return (Failed, format!("site claims `{claimed}`, expected `{expected}`"));
        }

        match (descriptor, link) {
            (Descriptor::Present(publication), Some(uri)) if publication.did == uri.did => {
                (Verified, uri.to_string())
            }
            (Descriptor::Present(publication), Some(uri)) => (
                Failed,
                format!("document `{uri}` and publication `{publication}` disagree on the DID"),
            ),
            (Descriptor::Present(publication), None) => (
                Warning,
                format!("no document link; publication `{publication}` only"),
            ),
            (Descriptor::Unavailable(reason), Some(uri)) => (
                Warning,
                format!("document link `{uri}` only; descriptor {reason}"),
            ),
            (Descriptor::Unavailable(reason), None) => (
                Failed,
                format!("no ownership signal: descriptor {reason} and no document link"),
            ),
            (Descriptor::Malformed(reason), _) => {
                (Failed, format!("descriptor is malformed: {reason}"))
            }
        }
    }
}

async fn read_descriptor(probe: &dyn SiteProbe) -> Descriptor {
    let body = match probe.fetch(PUBLICATION_DESCRIPTOR_PATH).await {
        Ok(body) => body,
        Err(ProbeError::Missing(_)) => return Descriptor::Unavailable("is missing".to_string()),
        Err(err) => return Descriptor::Unavailable(format!("unreadable ({err})")),
    };
    match body.trim().parse::<AtUri>() {
        Ok(uri) if uri.collection == PUBLICATION_COLLECTION => Descriptor::Present(uri),
        Ok(uri) => Descriptor::Malformed(format!("`{uri}` is not a publication record")),
        Err(err) => Descriptor::Malformed(err.to_string()),
    }
}

/// `href` of the first `<link rel="site.standard.document">` in a page.
fn document_link(html: &str) -> Option<String> {
    let found: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let selector = format!("link[rel=\"{DOCUMENT_LINK_REL}\"]");
    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, {
                let found = Rc::clone(&found);
                move |el| {
                    let mut slot = found.borrow_mut();
                    if slot.is_none() {
                        *slot = el.get_attribute("href");
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    );
    if result.is_err() {
        return None;
    }
    found.borrow_mut().take()
}
