/*!
 * Realtime Module
 * In-process change feed for the submissions table, replacing the hosted
 * per-table realtime subscription. Writes publish a change event; the admin
 * inbox holds a WebSocket open and decides how to react (typically a full
 * re-fetch, deletes are applied locally).
 */
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Bounded buffer; a subscriber that lags past this many events observes a
/// lag error and should fall back to a full re-fetch.
const CHANGE_FEED_CAPACITY: usize = 256;

static CHANGE_FEED: Lazy<ChangeFeed> = Lazy::new(|| ChangeFeed::new(CHANGE_FEED_CAPACITY));

/// What happened to a submission row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// A single submission change, as pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionChange {
    pub action: ChangeAction,
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SubmissionChange {
    pub fn new(action: ChangeAction, id: Uuid, status: Option<String>) -> Self {
        Self {
            action,
            id,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast-backed fan-out hub. Every subscriber independently receives
/// every published change.
pub struct ChangeFeed {
    sender: broadcast::Sender<SubmissionChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a change to all current subscribers. A send error only means
    /// there are zero receivers, which is fine: the inbox re-fetches on open.
    pub fn publish(&self, change: SubmissionChange) {
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionChange> {
        self.sender.subscribe()
    }
}

/// Publish a change on the process-wide feed.
pub fn publish(change: SubmissionChange) {
    CHANGE_FEED.publish(change);
}

/// Subscribe to the process-wide feed.
pub fn subscribe() -> broadcast::Receiver<SubmissionChange> {
    CHANGE_FEED.subscribe()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let feed = ChangeFeed::new(8);
        let mut rx1 = feed.subscribe();
        let mut rx2 = feed.subscribe();

        let id = Uuid::new_v4();
        feed.publish(SubmissionChange::new(
            ChangeAction::Created,
            id,
            Some("new".to_string()),
        ));

        let got1 = rx1.recv().await.unwrap();
        let got2 = rx2.recv().await.unwrap();
        assert_eq!(got1.id, id);
        assert_eq!(got2.action, ChangeAction::Created);
        assert_eq!(got2.status.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let feed = ChangeFeed::new(8);
        feed.publish(SubmissionChange::new(
            ChangeAction::Deleted,
            Uuid::new_v4(),
            None,
        ));
    }

    #[test]
    fn test_change_serializes_with_lowercase_action() {
        let change = SubmissionChange::new(ChangeAction::Updated, Uuid::new_v4(), None);
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"updated\""));
        assert!(!json.contains("\"status\""));
    }
}
