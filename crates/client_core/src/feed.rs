use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    error::FeedError,
    protocol::{FeedMessage, VerdictEvent},
};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// What a subscription hands to its delivery handler: decoded verdicts in
/// arrival order, then at most one `Lost` when the feed connection goes away.
#[derive(Debug, Clone)]
pub enum FeedDelivery {
    Verdict(VerdictEvent),
    Lost,
}

/// Callback a subscriber registers to receive deliveries. Invoked from the
/// feed's reader task, so it must hand off rather than block.
pub type DeliveryHandler = Box<dyn Fn(FeedDelivery) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    event_name: String,
}

impl SubscriptionHandle {
    pub fn new(id: u64, event_name: impl Into<String>) -> Self {
        Self {
            id,
            event_name: event_name.into(),
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

/// Seam to the live event feed. One active subscription per event name:
/// subscribing an already-subscribed name replaces the prior subscription,
/// and unsubscribing a handle that is no longer active is a no-op.
#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn subscribe(
        &self,
        event_name: &str,
        handler: DeliveryHandler,
    ) -> Result<SubscriptionHandle, FeedError>;

    async fn unsubscribe(&self, handle: &SubscriptionHandle);
}

pub struct MissingEventFeed;

#[async_trait]
impl EventFeed for MissingEventFeed {
    async fn subscribe(
        &self,
        _event_name: &str,
        _handler: DeliveryHandler,
    ) -> Result<SubscriptionHandle, FeedError> {
        Err(FeedError::Connect("event feed is unavailable".into()))
    }

    async fn unsubscribe(&self, _handle: &SubscriptionHandle) {}
}

#[derive(Debug)]
struct ActiveSubscription {
    id: u64,
    reader_task: JoinHandle<()>,
}

/// WebSocket-backed event feed. Each subscription opens one connection and
/// spawns a reader task that filters frames by event name and passes decoded
/// verdicts to the handler. No reconnect: when the connection drops the
/// subscription emits `Lost` once and ends; re-arming is the caller's policy.
#[derive(Debug)]
pub struct WsEventFeed {
    feed_url: String,
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<String, ActiveSubscription>>>,
}

impl WsEventFeed {
    /// `feed_url` is the http(s) endpoint of the feed service; it is rewritten
    /// to ws(s) for the socket connection.
    pub fn new(feed_url: &str) -> Result<Self, FeedError> {
        let ws_url = if feed_url.starts_with("https://") {
            feed_url.replacen("https://", "wss://", 1)
        } else if feed_url.starts_with("http://") {
            feed_url.replacen("http://", "ws://", 1)
        } else {
            return Err(FeedError::Connect(
                "feed url must start with http:// or https://".into(),
            ));
        };
        Ok(Self {
            feed_url: ws_url.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl EventFeed for WsEventFeed {
    async fn subscribe(
        &self,
        event_name: &str,
        handler: DeliveryHandler,
    ) -> Result<SubscriptionHandle, FeedError> {
        let ws_url = format!("{}/events?name={event_name}", self.feed_url);
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|err| FeedError::Connect(format!("{ws_url}: {err}")))?;
        let (_, mut ws_reader) = ws_stream.split();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = event_name.to_string();
        let registry = Arc::clone(&self.active);

        // The reader parks until its registry entry exists; otherwise an
        // immediately-closing connection could run the tail cleanup before
        // the insert below and leave a dead entry behind.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let reader_task = {
            let name = name.clone();
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                if registered_rx.await.is_err() {
                    return;
                }
                loop {
                    match ws_reader.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<FeedMessage>(&text) {
                                Ok(FeedMessage::Event {
                                    event_name, verdict, ..
                                }) => {
                                    if event_name != name {
                                        debug!(
                                            event = %event_name,
                                            subscribed = %name,
                                            "feed: ignoring non-matching event"
                                        );
                                        continue;
                                    }
                                    handler(FeedDelivery::Verdict(verdict));
                                }
                                Ok(FeedMessage::Subscribed { event_name }) => {
                                    debug!(event = %event_name, "feed: subscription confirmed");
                                }
                                Ok(FeedMessage::Error { message }) => {
                                    warn!(event = %name, %message, "feed: server reported error");
                                }
                                Err(err) => {
                                    warn!(event = %name, %err, "feed: undecodable frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            handler(FeedDelivery::Lost);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = %name, %err, "feed: receive failed");
                            handler(FeedDelivery::Lost);
                            break;
                        }
                    }
                }

                let mut guard = registry.lock().await;
                if guard.get(&name).is_some_and(|sub| sub.id == id) {
                    guard.remove(&name);
                }
            })
        };

        let mut guard = registry.lock().await;
        if let Some(previous) = guard.insert(name.clone(), ActiveSubscription { id, reader_task }) {
            debug!(event = %name, "feed: replacing prior subscription");
            previous.reader_task.abort();
        }
        drop(guard);
        let _ = registered_tx.send(());

        Ok(SubscriptionHandle {
            id,
            event_name: name,
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut guard = self.active.lock().await;
        if guard
            .get(&handle.event_name)
            .is_some_and(|sub| sub.id == handle.id)
        {
            if let Some(sub) = guard.remove(&handle.event_name) {
                sub.reader_task.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
