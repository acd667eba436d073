//! Shop notification feed.
//!
//! A small shared feed over the fallback store (`shared-notifications`
//! key): order, payment, and customer events land here for the dashboard
//! bell. Stored newest-first and capped, so the feed is a rolling window,
//! not an audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{LocalStore, KEY_NOTIFICATIONS};
use crate::error::Result;

/// Oldest entries beyond this are dropped on every push.
pub const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Order,
    Payment,
    Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            read: false,
            order_id: None,
            customer_id: None,
        }
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
}

/// Prepend a notification and enforce the cap.
pub fn push(store: &LocalStore, notification: Notification) -> Result<()> {
    let mut feed: Vec<Notification> = store.get_list(KEY_NOTIFICATIONS)?;
    feed.insert(0, notification);
    feed.truncate(MAX_NOTIFICATIONS);
    store.put_list(KEY_NOTIFICATIONS, &feed)
}

/// The feed, newest first.
pub fn list(store: &LocalStore) -> Result<Vec<Notification>> {
    store.get_list(KEY_NOTIFICATIONS)
}

pub fn unread_count(store: &LocalStore) -> Result<usize> {
    Ok(list(store)?.iter().filter(|n| !n.read).count())
}

pub fn mark_read(store: &LocalStore, id: &str) -> Result<()> {
    let mut feed: Vec<Notification> = store.get_list(KEY_NOTIFICATIONS)?;
    if let Some(n) = feed.iter_mut().find(|n| n.id == id) {
        n.read = true;
    }
    store.put_list(KEY_NOTIFICATIONS, &feed)
}

pub fn mark_all_read(store: &LocalStore) -> Result<()> {
    let mut feed: Vec<Notification> = store.get_list(KEY_NOTIFICATIONS)?;
    for n in &mut feed {
        n.read = true;
    }
    store.put_list(KEY_NOTIFICATIONS, &feed)
}

pub fn clear(store: &LocalStore) -> Result<()> {
    store.delete_value(KEY_NOTIFICATIONS)
}

// ===========================================================================
// Tests
// ===========================================================================
