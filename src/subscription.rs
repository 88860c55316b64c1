//! Notification events pushed by the notification subsystem and the
//! per-connection filters deciding who receives them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use ts_rs::TS;

use crate::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notification {
    pub id: String,
    /// Recipient; `None` addresses every subscribed connection.
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub title: String,
    pub message: String,
    pub category: String,
    #[serde(default)]
    pub module: Option<String>,
    pub priority: String,
    #[serde(default)]
    pub data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Empty sets match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub modules: BTreeSet<String>,
    #[serde(default)]
    pub priorities: BTreeSet<String>,
}

impl NotificationFilter {
    pub fn new(
        categories: BTreeSet<String>,
        modules: BTreeSet<String>,
        priorities: BTreeSet<String>,
    ) -> Self {
        Self {
            categories,
            modules,
            priorities,
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        let module_ok = self.modules.is_empty()
            || notification
                .module
                .as_ref()
                .is_some_and(|module| self.modules.contains(module));

        (self.categories.is_empty() || self.categories.contains(&notification.category))
            && module_ok
            && (self.priorities.is_empty() || self.priorities.contains(&notification.priority))
    }

    /// Whether a connection of `user_id` with this filter should receive `notification`.
    pub fn accepts(&self, user_id: Option<&str>, notification: &Notification) -> bool {
        let addressed = match notification.user_id.as_deref() {
            Some(recipient) => user_id == Some(recipient),
            None => true,
        };
        addressed && self.matches(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(category: &str, module: Option<&str>, priority: &str) -> Notification {
        Notification {
            id: "n1".into(),
            user_id: None,
            title: "Invoice approved".into(),
            message: "Invoice #12 was approved".into(),
            category: category.into(),
            module: module.map(str::to_string),
            priority: priority.into(),
            data: None,
            created_at: Utc::now(),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = NotificationFilter::default();
        assert!(filter.matches(&notification("system", None, "low")));
    }

    #[test]
    fn test_filter_requires_every_non_empty_dimension() {
        let filter = NotificationFilter::new(set(&["billing"]), set(&["invoices"]), set(&["high", "urgent"]));
        assert!(filter.matches(&notification("billing", Some("invoices"), "high")));
        assert!(!filter.matches(&notification("billing", Some("invoices"), "low")));
        assert!(!filter.matches(&notification("billing", None, "high")));
        assert!(!filter.matches(&notification("system", Some("invoices"), "high")));
    }

    #[test]
    fn test_addressed_notifications_only_reach_recipient() {
        let mut event = notification("billing", None, "high");
        event.user_id = Some("u1".into());
        let filter = NotificationFilter::default();
        assert!(filter.accepts(Some("u1"), &event));
        assert!(!filter.accepts(Some("u2"), &event));
    }
}
