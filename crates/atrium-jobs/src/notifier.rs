//! Fire-and-forget notification sending.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use atrium_core::{Notification, NotificationEvent, NotificationPublisher, NotificationTarget};

/// Sends notifications after the data change they describe has been
/// persisted. Failures are logged and never returned.
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn NotificationPublisher>,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn send<P: Serialize + Sync>(
        &self,
        target: NotificationTarget,
        event: NotificationEvent,
        payload: &P,
    ) {
        let notification = match Notification::new(target, event, payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "notifier",
                    event_name = event.as_str(),
                    error = %e,
                    "Notification payload could not be serialized"
                );
                return;
            }
        };
        let target = notification.target.clone();
        if let Err(e) = self.publisher.publish(notification).await {
            warn!(
                subsystem = "jobs",
                component = "notifier",
                event_name = event.as_str(),
                target = ?target,
                error = %e,
                "Notification delivery failed"
            );
        }
    }

    pub async fn to_user<P: Serialize + Sync>(
        &self,
        user_id: &str,
        event: NotificationEvent,
        payload: &P,
    ) {
        self.send(NotificationTarget::user(user_id), event, payload)
            .await
    }

    pub async fn to_group<P: Serialize + Sync>(
        &self,
        workspace_id: &str,
        event: NotificationEvent,
        payload: &P,
    ) {
        self.send(NotificationTarget::group(workspace_id), event, payload)
            .await
    }
}
