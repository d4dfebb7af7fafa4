use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DbConn, DbErr, EntityTrait, SqlErr};
use thiserror::Error;
use tracing::instrument;

use crate::{
    config::{db_conn_capsule, storage_timeout_capsule},
    orm::url_mapping,
    token::ShortToken,
};

/// A short token together with the long URL it redirects to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlMapping {
    pub short_token: ShortToken,
    /// Stored verbatim; never validated.
    pub long_url: String,
}

#[derive(Debug, Error)]
pub enum InsertMappingError {
    #[error("short token is already taken")]
    TokenTaken,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(anyhow::Error),
}

#[derive(Debug, Error)]
#[error("storage unavailable: {0}")]
pub struct StorageUnavailable(pub anyhow::Error);

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlMappingRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    let timeout = *get.as_ref(storage_timeout_capsule);
    sea_orm_url_repository(db, timeout)
}

pub(crate) fn sea_orm_url_repository(
    db: DbConn,
    timeout: Duration,
) -> Arc<dyn UrlMappingRepository> {
    Arc::new(UrlMappingRepositoryImpl { db, timeout })
}

#[async_trait]
pub trait UrlMappingRepository: Send + Sync {
    /// Persists a new [`UrlMapping`].
    /// Fails with [`InsertMappingError::TokenTaken`] rather than overwriting an existing mapping.
    async fn insert_mapping(&self, mapping: UrlMapping) -> Result<UrlMapping, InsertMappingError>;

    async fn find_by_token(
        &self,
        short_token: &ShortToken,
    ) -> Result<Option<UrlMapping>, StorageUnavailable>;
}

struct UrlMappingRepositoryImpl {
    db: DbConn,
    timeout: Duration,
}

#[async_trait]
impl UrlMappingRepository for UrlMappingRepositoryImpl {
    #[instrument(skip(self))]
    async fn insert_mapping(&self, mapping: UrlMapping) -> Result<UrlMapping, InsertMappingError> {
        let to_insert = url_mapping::ActiveModel {
            short_token: Set(mapping.short_token.into_inner()),
            long_url: Set(mapping.long_url),
        };

        match bounded(self.timeout, to_insert.insert(&self.db))
            .await
            .map_err(InsertMappingError::StorageUnavailable)?
        {
            Ok(model) => from_model(model).map_err(InsertMappingError::StorageUnavailable),
            Err(db_err) if is_unique_violation(&db_err) => Err(InsertMappingError::TokenTaken),
            Err(db_err) => Err(InsertMappingError::StorageUnavailable(
                anyhow::Error::new(db_err).context("Failed to insert url mapping"),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_token(
        &self,
        short_token: &ShortToken,
    ) -> Result<Option<UrlMapping>, StorageUnavailable> {
        let lookup = url_mapping::Entity::find_by_id(short_token.as_str()).one(&self.db);
        bounded(self.timeout, lookup)
            .await
            .map_err(StorageUnavailable)?
            .context("Failed to look up url mapping")
            .and_then(|model| model.map(from_model).transpose())
            .map_err(StorageUnavailable)
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: impl Future<Output = Result<T, DbErr>>,
) -> anyhow::Result<Result<T, DbErr>> {
    tokio::time::timeout(timeout, operation)
        .await
        .with_context(|| format!("Database call timed out after {timeout:?}"))
}

fn is_unique_violation(db_err: &DbErr) -> bool {
    matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn from_model(
    url_mapping::Model {
        short_token,
        long_url,
    }: url_mapping::Model,
) -> anyhow::Result<UrlMapping> {
    Ok(UrlMapping {
        short_token: ShortToken::new(short_token).context("Stored short token is malformed")?,
        long_url,
    })
}
