//! Notification documents and the fire-and-forget sink that carries them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use graft_core::field::FieldMap;
use graft_core::PipelineError;

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationAction {
    Create,
    Update,
    Delete,
}

/// Caller-supplied routing for who should see the notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberRouting {
    #[serde(default)]
    pub subscribe_user: Vec<String>,
    #[serde(default)]
    pub subscribe_role: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional: Option<Value>,
}

/// The document posted to the notification sink: action, actor, and the
/// before/after snapshots of the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub category: String,
    pub action: NotificationAction,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<FieldMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<FieldMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<FieldMap>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub routing: Option<SubscriberRouting>,
}

/// Fire-and-forget delivery. Failures are reported but never escalate past
/// a warning in the pipeline.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, notification: &Notification) -> Result<(), PipelineError>;

    async fn post_batch(&self, notifications: &[Notification]) -> Result<(), PipelineError> {
        for notification in notifications {
            self.post(notification).await?;
        }
        Ok(())
    }
}

/// HTTP sink posting notification documents as JSON.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    batch_endpoint: String,
}

impl HttpNotifier {
    /// `base_url` is the notifier service root, e.g. `http://notifier:9010`.
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{base}/api/notifications"),
            batch_endpoint: format!("{base}/api/notifications/batch"),
        }
    }
}

#[async_trait]
impl NotificationSink for HttpNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), PipelineError> {
        self.client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| PipelineError::Notification(err.to_string()))?;
        Ok(())
    }

    async fn post_batch(&self, notifications: &[Notification]) -> Result<(), PipelineError> {
        self.client
            .post(&self.batch_endpoint)
            .json(notifications)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| PipelineError::Notification(err.to_string()))?;
        Ok(())
    }
}

/// Sink that drops everything, for callers that opt out of notification.
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn post(&self, _notification: &Notification) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_wire_shape() {
        let notification = Notification {
            category: "PhysicalServer".into(),
            action: NotificationAction::Update,
            user: "ops@example.com".into(),
            source: Some("cmdb-1".into()),
            new: json!({"model": "b11"}).as_object().cloned(),
            old: json!({"model": "b10"}).as_object().cloned(),
            update: json!({"model": "b11"}).as_object().cloned(),
            routing: Some(SubscriberRouting {
                subscribe_user: vec!["admin".into()],
                subscribe_role: vec![],
                additional: None,
            }),
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], json!("PhysicalServer"));
        assert_eq!(value["action"], json!("UPDATE"));
        assert_eq!(value["subscribe_user"], json!(["admin"]));
        assert!(value.get("additional").is_none());
    }

    #[test]
    fn delete_notification_omits_new() {
        let notification = Notification {
            category: "Software".into(),
            action: NotificationAction::Delete,
            user: "ops".into(),
            source: None,
            new: None,
            old: json!({"name": "ubuntu"}).as_object().cloned(),
            update: None,
            routing: None,
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["action"], json!("DELETE"));
        assert!(value.get("new").is_none());
        assert!(value.get("source").is_none());
    }
}
