// src/core/database/notifications.rs

//! Minting of change notifications. Notifications are produced only after
//! a successful driver mutation and delivered best-effort: routing
//! failures are logged and dropped.

use super::Database;
use crate::core::object::{Event, Object};
use crate::core::protocol::Notification;
use crate::core::url::Url;
use tracing::{debug, warn};

impl Database {
    /// Reloads the freshly committed object and fans out notifications to
    /// its subscribers.
    pub(super) async fn notify_after_commit(&self, event: Event, url: &Url) {
        match self.driver.get_object_with_parents(url).await {
            Ok(object) => self.dispatch_notifications(event, object),
            Err(e) => warn!("Cannot load {url} for notification: {e}"),
        }
    }

    /// Notifies every user whose subscription covers `event` on `object`.
    /// Each subscriber gets their own view of the object; DELETED
    /// notifications carry no body. Runs detached so a slow route never
    /// blocks the mutation that caused it.
    pub(super) fn dispatch_notifications(&self, event: Event, object: Object) {
        let Some(state) = self.server.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let subscribers = object.subscribed_users(event, 0);
            debug!(
                "Event {event} on {} notifies {} subscriber(s)",
                object.url,
                subscribers.len()
            );
            for user in subscribers {
                let mut notification = Notification::new(event, object.url.clone());
                if event != Event::Deleted {
                    let groups = state.database.groups_for(&user, &object.url).await;
                    let view = object.user_view(&user, &groups);
                    match serde_json::to_vec(&view) {
                        Ok(body) => notification.body = body.into(),
                        Err(e) => {
                            warn!("Cannot serialize {} for notification: {e}", object.url);
                            continue;
                        }
                    }
                }
                state
                    .registry
                    .route_notification(&state, &user, notification)
                    .await;
            }
        });
    }
}
