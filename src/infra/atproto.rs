//! XRPC client for an AT Protocol personal data server.

use std::time::Duration;

use async_trait::async_trait;
use quire_lexicon::{
    CreateRecordRequest, CreateSessionRequest, DOCUMENT_COLLECTION, DocumentRecord,
    GetRecordResponse, ListRecordsResponse, PUBLICATION_COLLECTION, PublicationRecord,
    PutRecordRequest, RecordRef, SessionResponse, XrpcErrorBody,
};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    application::repos::{RemoteError, RemoteSession, RemoteStore},
    domain::entities::RemoteRecord,
    infra::error::InfraError,
};

const LIST_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
pub struct XrpcClient {
    client: Client,
    base: Url,
}

impl XrpcClient {
    pub fn new(service: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base = Url::parse(service)
            .and_then(|url| url.join("/xrpc/"))
            .map_err(|err| InfraError::configuration(format!("invalid PDS url `{service}`: {err}")))?;
        let client = Client::builder()
            .user_agent(concat!("quire/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, method: &str) -> Result<Url, RemoteError> {
        self.base
            .join(method)
            .map_err(|err| RemoteError::Transport(err.to_string()))
    }

    fn query_endpoint(&self, method: &str, query: &[(&str, &str)]) -> Result<Url, RemoteError> {
        let mut url = self.endpoint(method)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        let status = response.status();
        debug!(target = "quire::infra::atproto", method, status = status.as_u16(), "xrpc call");
        if !status.is_success() {
            return Err(error_from(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }

    async fn write<T: Serialize>(
        &self,
        method: &str,
        session: &RemoteSession,
        body: &T,
    ) -> Result<RecordRef, RemoteError> {
        let request = self
            .client
            .post(self.endpoint(method)?)
            .bearer_auth(&session.access_token)
            .json(body);
        self.call(method, request).await
    }
}

/// Map an XRPC error response onto the remote taxonomy.
async fn error_from(response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body: Option<XrpcErrorBody> = serde_json::from_str(&text).ok();
    let name = body.as_ref().map(|b| b.error.as_str()).unwrap_or_default();
    let detail = body
        .as_ref()
        .map(|b| match &b.message {
            Some(message) => format!("{}: {message}", b.error),
            None => b.error.clone(),
        })
        .unwrap_or(text);

    match (status, name) {
        (_, "ExpiredToken") => RemoteError::SessionExpired,
        (_, "RecordNotFound") | (404, _) => RemoteError::NotFound,
        (401, _) | (_, "AuthenticationRequired") => RemoteError::Auth(detail),
        _ => RemoteError::Server {
            status,
            error: detail,
        },
    }
}

#[async_trait]
impl RemoteStore for XrpcClient {
    async fn authenticate(&self, identifier: &str, secret: &str) -> Result<RemoteSession, RemoteError> {
        let method = "com.atproto.server.createSession";
        let request = self.client.post(self.endpoint(method)?).json(&CreateSessionRequest {
            identifier: identifier.to_string(),
            password: secret.to_string(),
        });
        let session: SessionResponse = self.call(method, request).await.map_err(|err| match err {
            RemoteError::Server { error, .. } => RemoteError::Auth(error),
            other => other,
        })?;
        Ok(RemoteSession {
            did: session.did,
            handle: session.handle,
            access_token: session.access_jwt,
        })
    }

    async fn create_publication(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &PublicationRecord,
    ) -> Result<RecordRef, RemoteError> {
        let body = CreateRecordRequest {
            repo: session.did.clone(),
            collection: PUBLICATION_COLLECTION.to_string(),
            rkey: Some(rkey.to_string()),
            record,
        };
        self.write("com.atproto.repo.createRecord", session, &body).await
    }

    async fn create_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        let body = CreateRecordRequest {
            repo: session.did.clone(),
            collection: DOCUMENT_COLLECTION.to_string(),
            rkey: Some(rkey.to_string()),
            record,
        };
        self.write("com.atproto.repo.createRecord", session, &body).await
    }

    async fn update_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        let body = PutRecordRequest {
            repo: session.did.clone(),
            collection: DOCUMENT_COLLECTION.to_string(),
            rkey: rkey.to_string(),
            record,
            swap_record: None,
        };
        self.write("com.atproto.repo.putRecord", session, &body).await
    }

    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<RemoteRecord, RemoteError> {
        let method = "com.atproto.repo.getRecord";
        let url = self.query_endpoint(
            method,
            &[("repo", repo), ("collection", collection), ("rkey", rkey)],
        )?;
        let request = self.client.get(url);
        let record: GetRecordResponse = self.call(method, request).await?;
        Ok(RemoteRecord {
            uri: record.uri,
            cid: record.cid.unwrap_or_default(),
            value: record.value,
        })
    }

    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let method = "com.atproto.repo.listRecords";
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("repo", repo),
                ("collection", collection),
                ("limit", LIST_PAGE_SIZE),
            ];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }
            let request = self.client.get(self.query_endpoint(method, &query)?);
            let page: ListRecordsResponse = self.call(method, request).await?;

            let fetched = page.records.len();
            records.extend(page.records.into_iter().map(|record| RemoteRecord {
                uri: record.uri,
                cid: record.cid,
                value: record.value,
            }));

            match page.cursor {
                Some(next) if fetched > 0 && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(records)
    }
}
