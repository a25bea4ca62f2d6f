//! Generic data access over REST collections.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::http::{ApiClient, ApiError};

/// CRUD access to a collection of `T`.
#[async_trait]
pub trait DataAccess<T>: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<T, ApiError>;
    async fn get_all(&self) -> Result<Vec<T>, ApiError>;
    async fn create<P: Serialize + Sync + ?Sized>(&self, data: &P) -> Result<T, ApiError>;
    async fn update<P: Serialize + Sync + ?Sized>(&self, id: &str, data: &P) -> Result<T, ApiError>;
    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

/// [`DataAccess`] mapped onto a REST collection rooted at `base`:
/// `GET base`, `GET base/{id}`, `POST base`, `PATCH base/{id}`,
/// `DELETE base/{id}`.
pub struct RestResource<T> {
    client: ApiClient,
    base: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RestResource<T> {
    pub fn new(client: ApiClient, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            _marker: PhantomData,
        }
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/{}", self.base, id)
    }
}

#[async_trait]
impl<T> DataAccess<T> for RestResource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    #[tracing::instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> Result<T, ApiError> {
        self.client.get(&self.item_url(id), None).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<T>, ApiError> {
        self.client.get(&self.base, None).await
    }

    #[tracing::instrument(skip(self, data))]
    async fn create<P: Serialize + Sync + ?Sized>(&self, data: &P) -> Result<T, ApiError> {
        self.client.post(&self.base, Some(data), None).await
    }

    #[tracing::instrument(skip(self, data))]
    async fn update<P: Serialize + Sync + ?Sized>(&self, id: &str, data: &P) -> Result<T, ApiError> {
        self.client.patch(&self.item_url(id), Some(data), None).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        // The body, if any, is not interesting
        self.client
            .delete::<serde_json::Value>(&self.item_url(id), None)
            .await
            .map(|_| ())
    }
}
