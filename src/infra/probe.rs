//! Site probes used by ownership verification.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::{
    application::repos::{ProbeError, SiteProbe},
    domain::routes::FULL_ARTIFACT,
    infra::error::InfraError,
};

/// Fetches pages from the live site.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    base: Url,
}

impl HttpProbe {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("quire-verify/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client, base })
    }
}

#[async_trait]
impl SiteProbe for HttpProbe {
    async fn fetch(&self, path: &str) -> Result<String, ProbeError> {
        let fetch_error = |message: String| ProbeError::Fetch {
            path: path.to_string(),
            message,
        };
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|err| fetch_error(err.to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ProbeError::Missing(path.to_string())),
            status if !status.is_success() => Err(fetch_error(format!("status {status}"))),
            _ => response.text().await.map_err(|err| fetch_error(err.to_string())),
        }
    }
}

/// Reads pages from a built output tree.
#[derive(Debug, Clone)]
pub struct DirectoryProbe {
    root: PathBuf,
}

impl DirectoryProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File a live path is served from: directory routes map to their
    /// `index.html`, paths naming a file map to that file.
    fn file_for(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.trim_matches('/');
        if trimmed.split('/').any(|segment| segment == "..") {
            return None;
        }
        let names_file = trimmed.starts_with(".well-known/")
            || trimmed.rsplit('/').next().is_some_and(|last| last.contains('.'));
        Some(if names_file {
            self.root.join(trimmed)
        } else if trimmed.is_empty() {
            self.root.join(FULL_ARTIFACT)
        } else {
            self.root.join(trimmed).join(FULL_ARTIFACT)
        })
    }
}

#[async_trait]
impl SiteProbe for DirectoryProbe {
    async fn fetch(&self, path: &str) -> Result<String, ProbeError> {
        let file = self
            .file_for(path)
            .ok_or_else(|| ProbeError::Missing(path.to_string()))?;
        match tokio::fs::read_to_string(&file).await {
            Ok(body) => Ok(body),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ProbeError::Missing(path.to_string()))
            }
            Err(err) => Err(ProbeError::Fetch {
                path: path.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn directory_probe_maps_routes_to_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("posts/a")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join(".well-known")).expect("mkdir");
        std::fs::write(dir.path().join("posts/a/index.html"), "<html>a</html>").expect("write");
        std::fs::write(
            dir.path().join(".well-known/site.standard.publication"),
            "at://did:plc:x/site.standard.publication/self\n",
        )
        .expect("write");

        let probe = DirectoryProbe::new(dir.path());
        assert_eq!(probe.fetch("/posts/a").await.expect("page"), "<html>a</html>");
        assert!(
            probe
                .fetch("/.well-known/site.standard.publication")
                .await
                .expect("descriptor")
                .starts_with("at://")
        );
        assert!(matches!(
            probe.fetch("/posts/b").await,
            Err(ProbeError::Missing(_))
        ));
        assert!(matches!(
            probe.fetch("/../etc/passwd").await,
            Err(ProbeError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn http_probe_distinguishes_missing_from_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/posts/a");
                then.status(200).body("<html>a</html>");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/posts/broken");
                then.status(502);
            })
            .await;

        let base = Url::parse(&server.base_url()).expect("url");
        let probe = HttpProbe::new(base, Duration::from_secs(5)).expect("probe");

        assert_eq!(probe.fetch("/posts/a").await.expect("page"), "<html>a</html>");
        assert!(matches!(
            probe.fetch("/posts/missing").await,
            Err(ProbeError::Missing(_))
        ));
        assert!(matches!(
            probe.fetch("/posts/broken").await,
            Err(ProbeError::Fetch { .. })
        ));
    }
}
