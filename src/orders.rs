//! Writes against the order collection: status changes and deletion.

use crate::model::OrderStatus;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("order store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid order store url: {0}")]
    Url(String),
    #[error("order not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<(), OrderStoreError>;
    async fn delete(&self, order_id: &str) -> Result<(), OrderStoreError>;
}

#[derive(Clone)]
pub struct HttpOrderStore {
    http: Client,
    base_url: Url,
    collection: String,
}

impl fmt::Debug for HttpOrderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOrderStore")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl HttpOrderStore {
    pub fn new(base_url: &str, collection: &str) -> Result<Self, OrderStoreError> {
        let base_url = Url::parse(base_url).map_err(|e| OrderStoreError::Url(e.to_string()))?;
        let http = Client::builder().user_agent("order-bell/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            collection: collection.to_string(),
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, OrderStoreError> {
        Self::new(&cfg.feed.base_url, &cfg.feed.collection)
    }

    pub fn document_url(&self, order_id: &str) -> Result<Url, OrderStoreError> {
        let mut url = self
            .base_url
            .join(&format!("v1/collections/{}/", self.collection))
            .map_err(|e| OrderStoreError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| OrderStoreError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .push(order_id);
        Ok(url)
    }

    async fn check(order_id: &str, res: reqwest::Response) -> Result<(), OrderStoreError> {
        let status = res.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(OrderStoreError::NotFound(order_id.to_string()));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(OrderStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for HttpOrderStore {
    #[instrument(skip_all, fields(order_id = %order_id, status = status.as_str()))]
    async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<(), OrderStoreError> {
        let res = self
            .http
            .patch(self.document_url(order_id)?)
            .json(&json!({ "status": status }))
            .send()
            .await?;
        Self::check(order_id, res).await?;
        info!("order status updated");
        Ok(())
    }

    #[instrument(skip_all, fields(order_id = %order_id))]
    async fn delete(&self, order_id: &str) -> Result<(), OrderStoreError> {
        let res = self.http.delete(self.document_url(order_id)?).send().await?;
        Self::check(order_id, res).await?;
        info!("order deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_escapes_the_id() {
        let store = HttpOrderStore::new("http://localhost:8080/", "orders").unwrap();
        assert_eq!(
            store.document_url("ord-1").unwrap().as_str(),
            "http://localhost:8080/v1/collections/orders/ord-1"
        );
        assert_eq!(
            store.document_url("a/b").unwrap().as_str(),
            "http://localhost:8080/v1/collections/orders/a%2Fb"
        );
    }

    #[tokio::test]
    async fn unreachable_store_is_a_transport_error() {
        let store = HttpOrderStore::new("http://127.0.0.1:9/", "orders").unwrap();
        assert!(matches!(
            store.update_status("ord-1", OrderStatus::Accepted).await,
            Err(OrderStoreError::Transport(_))
        ));
    }
}
