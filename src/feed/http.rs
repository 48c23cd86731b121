use super::{ChangeFeed, FeedDelivery, FeedError, SnapshotDiffer, Subscription};
use crate::model::Order;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Polls the document store's REST endpoint and diffs successive snapshots.
#[derive(Clone)]
pub struct HttpChangeFeed {
    http: Client,
    base_url: Url,
    collection: String,
    poll_interval: Duration,
}

impl fmt::Debug for HttpChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChangeFeed")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl HttpChangeFeed {
    pub fn new(base_url: &str, collection: &str, poll_interval: Duration) -> Result<Self, FeedError> {
        let base_url = Url::parse(base_url).map_err(|e| FeedError::Url(e.to_string()))?;
        let http = Client::builder()
            .user_agent("order-bell/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url,
            collection: collection.to_string(),
            poll_interval,
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, FeedError> {
        Self::new(
            &cfg.feed.base_url,
            &cfg.feed.collection,
            Duration::from_millis(cfg.feed.poll_interval_ms),
        )
    }

    pub fn snapshot_url(&self) -> Result<Url, FeedError> {
        let mut url = self
            .base_url
            .join(&format!("v1/collections/{}", self.collection))
            .map_err(|e| FeedError::Url(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("orderBy", "timestamp")
            .append_pair("direction", "desc");
        Ok(url)
    }

    /// Fetch the whole collection, newest first. Documents that do not
    /// decode are skipped; only a failed request or a non-array body is an
    /// error.
    #[instrument(skip_all)]
    pub async fn fetch_snapshot(&self) -> Result<Vec<Order>, FeedError> {
        let res = self.http.get(self.snapshot_url()?).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }
        Ok(parse_snapshot(res.json::<Vec<Value>>().await?))
    }
}

fn parse_snapshot(raw: Vec<Value>) -> Vec<Order> {
    raw.into_iter()
        .filter_map(|v| {
            let id = v.get("id").and_then(Value::as_str).map(str::to_string);
            match serde_json::from_value::<Order>(v) {
                Ok(order) => Some(order),
                Err(err) => {
                    warn!(?id, %err, "malformed order document skipped");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl ChangeFeed for HttpChangeFeed {
    async fn subscribe(&self, sink: mpsc::Sender<FeedDelivery>) -> Result<Subscription, FeedError> {
        let feed = self.clone();
        let task = tokio::spawn(async move {
            let mut differ = SnapshotDiffer::new();
            info!(collection = %feed.collection, "order feed subscribed");
            loop {
                let snapshot = match feed.fetch_snapshot().await {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        warn!(?err, "order feed failed; closing subscription");
                        let _ = sink.send(FeedDelivery::Closed(Some(err.to_string()))).await;
                        return;
                    }
                };
                let delivery = differ.apply(snapshot);
                let deliver = match &delivery {
                    FeedDelivery::Changes { events, initial } => *initial || !events.is_empty(),
                    FeedDelivery::Closed(_) => true,
                };
                if deliver {
                    debug!("order feed delivery");
                    if sink.send(delivery).await.is_err() {
                        debug!("order feed receiver gone");
                        return;
                    }
                }
                tokio::time::sleep(feed.poll_interval).await;
            }
        });
        Ok(Subscription::new(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeKind, OrderStatus};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every request with `body` as JSON.
    async fn serve_json(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    let res = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(res.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn bad_documents_are_skipped_not_fatal() {
        let orders = parse_snapshot(vec![
            json!({"id": "ord-1", "status": "Pending", "totalAmount": 599}),
            json!({"status": "Pending"}),
            json!({"id": 42, "status": "Pending"}),
            json!("not an object"),
            json!({"id": "legacy", "status": "Pending", "totalAmount": "250"}),
        ]);
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["ord-1", "legacy"]);
        assert_eq!(orders[1].total_amount, Some(250.0));
    }

    #[tokio::test]
    async fn legacy_document_does_not_close_the_subscription() {
        let body = json!([
            {"id": "ord-1", "status": "Pending", "userName": "Asha", "totalAmount": 599},
            {"id": "legacy", "status": "Pending", "totalAmount": "250"},
            {"id": "broken", "status": "Pending", "items": "none"}
        ])
        .to_string();
        let base = serve_json(body).await;
        let feed = HttpChangeFeed::new(&base, "orders", Duration::from_secs(60)).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let _sub = feed.subscribe(tx).await.unwrap();

        match rx.recv().await {
            Some(FeedDelivery::Changes { events, initial }) => {
                assert!(initial);
                let got: Vec<(&str, ChangeKind, OrderStatus)> = events
                    .iter()
                    .map(|e| (e.order.id.as_str(), e.kind, e.order.status))
                    .collect();
                assert_eq!(
                    got,
                    vec![
                        ("ord-1", ChangeKind::Added, OrderStatus::Pending),
                        ("legacy", ChangeKind::Added, OrderStatus::Pending)
                    ]
                );
            }
            other => panic!("expected the initial snapshot, got {:?}", other),
        }
    }

    #[test]
    fn snapshot_url_orders_by_timestamp() {
        let feed = HttpChangeFeed::new("http://localhost:8080/", "orders", Duration::from_secs(1)).unwrap();
        let url = feed.snapshot_url().unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/collections/orders?orderBy=timestamp&direction=desc"
        );
    }

    #[test]
    fn invalid_base_url_rejected() {
        let err = HttpChangeFeed::new("not a url", "orders", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, FeedError::Url(_)));
    }

    #[tokio::test]
    async fn unreachable_feed_closes_subscription() {
        let feed = HttpChangeFeed::new("http://127.0.0.1:9/", "orders", Duration::from_millis(10)).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let _sub = feed.subscribe(tx).await.unwrap();
        match rx.recv().await {
            Some(FeedDelivery::Closed(Some(_))) => {}
            other => panic!("expected close, got {:?}", other),
        }
    }
}
