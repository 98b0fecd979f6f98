//! Persistence boundary.
//!
//! The gateway only needs record CRUD to render replies; the storage engine
//! behind [`Repository`] is someone else's concern. [`InMemoryRepository`]
//! backs the standalone gateway and the tests.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub type RecordId = u64;
pub type RecordFields = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: RecordFields,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: RecordId },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get(&self, entity: &str, id: RecordId) -> RepositoryResult<Record>;

    /// Records whose fields equal every entry of `filter`.
    async fn list(&self, entity: &str, filter: &RecordFields) -> RepositoryResult<Vec<Record>>;

    /// Adds a record. An `id` field, when given, must be free.
    async fn add(&self, entity: &str, fields: RecordFields) -> RepositoryResult<Record>;

    /// Merges `fields` into an existing record.
    async fn update(&self, entity: &str, id: RecordId, fields: RecordFields)
    -> RepositoryResult<Record>;

    async fn delete(&self, entity: &str, id: RecordId) -> RepositoryResult<Record>;
}

pub struct InMemoryRepository {
    tables: DashMap<String, BTreeMap<RecordId, Record>>,
    next_id: AtomicU64,
}

impl InMemoryRepository {
    pub fn new<S: Into<String>>(entities: impl IntoIterator<Item = S>) -> Self {
        Self {
            tables: entities
                .into_iter()
                .map(|entity| (entity.into(), BTreeMap::new()))
                .collect(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        entities.sort();
        entities
    }

    fn unknown(entity: &str) -> RepositoryError {
        RepositoryError::UnknownEntity(entity.to_string())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get(&self, entity: &str, id: RecordId) -> RepositoryResult<Record> {
        let table = self.tables.get(entity).ok_or_else(|| Self::unknown(entity))?;
        table.get(&id).cloned().ok_or(RepositoryError::NotFound {
            entity: entity.to_string(),
            id,
        })
    }

    async fn list(&self, entity: &str, filter: &RecordFields) -> RepositoryResult<Vec<Record>> {
        let table = self.tables.get(entity).ok_or_else(|| Self::unknown(entity))?;
        Ok(table
            .values()
            .filter(|record| {
                filter
                    .iter()
                    .all(|(key, value)| record.fields.get(key) == Some(value))
            })
            .cloned()
            .collect())
    }

    async fn add(&self, entity: &str, mut fields: RecordFields) -> RepositoryResult<Record> {
        let mut table = self
            .tables
            .get_mut(entity)
            .ok_or_else(|| Self::unknown(entity))?;
        let id = match fields.remove("id") {
            Some(raw) => {
                let id = raw
                    .parse::<RecordId>()
                    .map_err(|_| RepositoryError::Conflict(format!("invalid id '{}'", raw)))?;
                if table.contains_key(&id) {
                    return Err(RepositoryError::Conflict(format!(
                        "{} {} already exists",
                        entity, id
                    )));
                }
                self.next_id.fetch_max(id + 1, Ordering::SeqCst);
                id
            }
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        let record = Record { id, fields };
        table.insert(id, record.clone());
        debug!(entity, id, "Added record");
        Ok(record)
    }

    async fn update(
        &self,
        entity: &str,
        id: RecordId,
        fields: RecordFields,
    ) -> RepositoryResult<Record> {
        let mut table = self
            .tables
            .get_mut(entity)
            .ok_or_else(|| Self::unknown(entity))?;
        let record = table.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: entity.to_string(),
            id,
        })?;
        record.fields.extend(fields);
        Ok(record.clone())
    }

    async fn delete(&self, entity: &str, id: RecordId) -> RepositoryResult<Record> {
        let mut table = self
            .tables
            .get_mut(entity)
            .ok_or_else(|| Self::unknown(entity))?;
        table.remove(&id).ok_or(RepositoryError::NotFound {
            entity: entity.to_string(),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields(pairs: &[(&str, &str)]) -> RecordFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let repo = InMemoryRepository::new(["area", "room"]);

        let area = repo
            .add("area", fields(&[("name", "ground floor")]))
            .await
            .unwrap();
        assert_eq!(area.id, 1);

        let room = repo
            .add("room", fields(&[("name", "kitchen"), ("area_id", "1")]))
            .await
            .unwrap();
        let updated = repo
            .update("room", room.id, fields(&[("description", "north side")]))
            .await
            .unwrap();
        assert_eq!(updated.fields["name"], "kitchen");
        assert_eq!(updated.fields["description"], "north side");

        let in_area = repo.list("room", &fields(&[("area_id", "1")])).await.unwrap();
        assert_eq!(in_area, vec![updated.clone()]);

        assert_eq!(repo.delete("room", room.id).await.unwrap(), updated);
        assert_eq!(
            repo.get("room", room.id).await,
            Err(RepositoryError::NotFound {
                entity: "room".to_string(),
                id: room.id,
            })
        );
    }

    #[tokio::test]
    async fn test_explicit_id_conflict() {
        let repo = InMemoryRepository::new(["device"]);
        repo.add("device", fields(&[("id", "7"), ("name", "lamp")]))
            .await
            .unwrap();
        let clash = repo.add("device", fields(&[("id", "7")])).await;
        assert!(matches!(clash, Err(RepositoryError::Conflict(_))));

        // generated ids skip past explicit ones
        let next = repo.add("device", fields(&[("name", "tv")])).await.unwrap();
        assert_eq!(next.id, 8);
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let repo = InMemoryRepository::new(["device"]);
        assert_eq!(
            repo.list("spaceship", &RecordFields::new()).await,
            Err(RepositoryError::UnknownEntity("spaceship".to_string()))
        );
        assert_eq!(repo.entities(), vec!["device"]);
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = Record {
            id: 3,
            fields: fields(&[("name", "kitchen")]),
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({"id": 3, "name": "kitchen"})
        );
    }
}
