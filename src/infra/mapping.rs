//! TOML-file mapping store for the mirror.
//!
//! The whole table lives in memory behind one async mutex and is rewritten
//! atomically after every mutation, so an interrupted pass leaves every
//! mapping it already applied on disk.

use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    application::repos::{MappingRepo, RepoError},
    domain::entities::{PublicationIdentity, PublicationMapping},
    infra::artifacts::write_atomic,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MappingFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publication: Option<PublicationIdentity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    documents: Vec<PublicationMapping>,
}

#[derive(Debug, Default)]
struct MappingTable {
    publication: Option<PublicationIdentity>,
    documents: BTreeMap<String, PublicationMapping>,
}

impl MappingTable {
    fn to_file(&self) -> MappingFile {
        MappingFile {
            publication: self.publication.clone(),
            documents: self.documents.values().cloned().collect(),
        }
    }
}

pub struct TomlMappingStore {
    path: PathBuf,
    table: Mutex<MappingTable>,
}

impl TomlMappingStore {
    /// Load the table from `path`; a missing file is an empty table.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let path = path.into();
        let table = match tokio::fs::read_to_string(&path).await {
            Ok(source) => {
                let file: MappingFile = toml::from_str(&source).map_err(|err| {
                    RepoError::Encoding(format!("{}: {err}", path.display()))
                })?;
                MappingTable {
                    publication: file.publication,
                    documents: file
                        .documents
                        .into_iter()
                        .map(|mapping| (mapping.slug.clone(), mapping))
                        .collect(),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => MappingTable::default(),
            Err(err) => return Err(RepoError::from_persistence(err)),
        };

        debug!(
            target = "quire::infra::mapping",
            path = %path.display(),
            documents = table.documents.len(),
            "mapping table loaded"
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    async fn persist(&self, table: &MappingTable) -> Result<(), RepoError> {
        let encoded = toml::to_string_pretty(&table.to_file())
            .map_err(|err| RepoError::Encoding(err.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, encoded.as_bytes()))
            .await
            .map_err(RepoError::from_persistence)?
            .map_err(RepoError::from_persistence)
    }
}

#[async_trait]
impl MappingRepo for TomlMappingStore {
    async fn publication(&self) -> Result<Option<PublicationIdentity>, RepoError> {
        Ok(self.table.lock().await.publication.clone())
    }

    async fn set_publication(&self, identity: PublicationIdentity) -> Result<(), RepoError> {
        let mut table = self.table.lock().await;
        let previous = table.publication.replace(identity);
        if let Err(err) = self.persist(&table).await {
            table.publication = previous;
            return Err(err);
        }
        Ok(())
    }

    async fn get(&self, slug: &str) -> Result<Option<PublicationMapping>, RepoError> {
        Ok(self.table.lock().await.documents.get(slug).cloned())
    }

    async fn list(&self) -> Result<Vec<PublicationMapping>, RepoError> {
        Ok(self.table.lock().await.documents.values().cloned().collect())
    }

    async fn upsert(&self, mapping: PublicationMapping) -> Result<(), RepoError> {
        let mut table = self.table.lock().await;
        let slug = mapping.slug.clone();
        let previous = table.documents.insert(slug.clone(), mapping);
        if let Err(err) = self.persist(&table).await {
            // The table must never hold a mapping the file does not.
            match previous {
                Some(previous) => table.documents.insert(slug, previous),
                None => table.documents.remove(&slug),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn remove(&self, slug: &str) -> Result<Option<PublicationMapping>, RepoError> {
        let mut table = self.table.lock().await;
        let Some(removed) = table.documents.remove(slug) else {
            return Ok(None);
        };
        if let Err(err) = self.persist(&table).await {
            table.documents.insert(removed.slug.clone(), removed);
            return Err(err);
        }
        Ok(Some(removed))
    }
}
