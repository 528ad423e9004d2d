//! Notification Queue (spec §4.5): outbound event messenger with outage
//! buffering and FIFO recovery drain.

pub mod queue;
pub mod telegram;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::NotificationConfig;
use crate::notifications::queue::{NotificationQueue, NotificationQueueItem};
use crate::notifications::telegram::{DeliveryError, TelegramClient};

/// Fixed set of events the engine may raise (spec §4.5 "Event kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The config file changed on disk and was reloaded.
    ConfigChanged,
    /// Static or live validation rejected a row.
    ValidationError,
    /// A rule's threshold condition evaluated true.
    TriggerReached,
    /// A trailing-stop order was accepted by the exchange.
    TslCreated,
    /// An armed rule's order reached the `closed` terminal state.
    TslFilled,
    /// The process is shutting down.
    AppExit,
    /// An exchange call failed with a classified [`crate::error::ExchangeError`].
    ApiError,
    /// Pre-flight balance check failed.
    InsufficientBalance,
    /// Order submission was rejected outright by the exchange.
    OrderFailed,
    /// A chained successor rule was enabled on its parent's fill.
    LinkedOrderActivated,
}

impl EventKind {
    /// Every variant, in declaration order; used to enumerate INI sections.
    pub const ALL: [EventKind; 10] = [
        EventKind::ConfigChanged,
        EventKind::ValidationError,
        EventKind::TriggerReached,
        EventKind::TslCreated,
        EventKind::TslFilled,
        EventKind::AppExit,
        EventKind::ApiError,
        EventKind::InsufficientBalance,
        EventKind::OrderFailed,
        EventKind::LinkedOrderActivated,
    ];

    /// Stable lower-`snake_case` name, used both for the `[notify.<name>]`
    /// INI section and serialized queue entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ConfigChanged => "config_changed",
            EventKind::ValidationError => "validation_error",
            EventKind::TriggerReached => "trigger_reached",
            EventKind::TslCreated => "tsl_created",
            EventKind::TslFilled => "tsl_filled",
            EventKind::AppExit => "app_exit",
            EventKind::ApiError => "api_error",
            EventKind::InsufficientBalance => "insufficient_balance",
            EventKind::OrderFailed => "order_failed",
            EventKind::LinkedOrderActivated => "linked_order_activated",
        }
    }
}

#[derive(Debug, Default)]
struct OutageState {
    /// Set when a reachability failure is first observed; cleared on recovery.
    unreachable_since: Option<DateTime<Utc>>,
}

/// Outbound messenger: synchronous best-effort delivery, falling back to a
/// disk-backed FIFO queue during an outage (spec §4.5).
pub struct NotificationService {
    config: NotificationConfig,
    telegram: Option<TelegramClient>,
    queue: Mutex<NotificationQueue>,
    outage: Mutex<OutageState>,
}

impl NotificationService {
    /// Build a service from a routing config, an optional Telegram
    /// transport (absent in dry-run / credential-less test setups), and the
    /// outage queue's on-disk location.
    ///
    /// # Errors
    ///
    /// Returns an error if the on-disk queue exists but fails to parse.
    pub async fn load(
        config: NotificationConfig,
        telegram: Option<TelegramClient>,
        queue_path: std::path::PathBuf,
    ) -> anyhow::Result<Self> {
        let queue = NotificationQueue::load(queue_path).await?;
        Ok(Self {
            config,
            telegram,
            queue: Mutex::new(queue),
            outage: Mutex::new(OutageState::default()),
        })
    }

    /// Raise `kind` with `body` to every destination subscribed to it (spec
    /// §4.5 "Routing"). A destination with no subscription is silently
    /// skipped; this call never fails the caller's operation.
    pub async fn notify(&self, kind: EventKind, body: impl Into<String>) {
        let body = body.into();
        let destinations = self.config.destinations_for(kind);
        if destinations.is_empty() {
            return;
        }
        for recipient in destinations {
            self.send_or_queue(recipient, kind, body.clone(), Utc::now()).await;
        }
    }

    async fn send_or_queue(
        &self,
        recipient: String,
        kind: EventKind,
        body: String,
        enqueued_at: DateTime<Utc>,
    ) {
        match self.deliver(&recipient, &body).await {
            Ok(()) => self.on_delivery_success().await,
            Err(DeliveryError::Reachability(reason)) => {
                log::warn!("notification delivery to {recipient} unreachable: {reason}");
                self.on_reachability_failure().await;
                let mut queue = self.queue.lock().await;
                if let Err(e) =
                    queue.push(NotificationQueueItem { recipient, event_kind: kind, body, enqueued_at }).await
                {
                    log::error!("failed to persist notification queue: {e}");
                }
            }
            Err(DeliveryError::Rejected(reason)) => {
                log::error!("notification to {recipient} rejected: {reason}");
            }
        }
    }

    async fn deliver(&self, recipient: &str, body: &str) -> Result<(), DeliveryError> {
        let Some(telegram) = &self.telegram else {
            return Err(DeliveryError::Reachability("no telegram transport configured".to_owned()));
        };
        telegram.send(recipient, body).await
    }

    async fn on_reachability_failure(&self) {
        let mut outage = self.outage.lock().await;
        if outage.unreachable_since.is_none() {
            outage.unreachable_since = Some(Utc::now());
        }
    }

    /// On any successful send, drain the outage queue in enqueue order (spec
    /// §8 property 7) and, if an outage was in progress, announce recovery
    /// to every registered destination with the downtime duration.
    async fn on_delivery_success(&self) {
        let first_failure = {
            let mut outage = self.outage.lock().await;
            outage.unreachable_since.take()
        };

        let mut queue = self.queue.lock().await;
        if queue.is_empty() && first_failure.is_none() {
            return;
        }

        let mut delivered = 0;
        for item in queue.items().to_vec() {
            let prefixed = format!("[Queued from {}] {}", item.enqueued_at.to_rfc3339(), item.body);
            match self.deliver(&item.recipient, &prefixed).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!("queue drain stopped: {e}");
                    break;
                }
            }
        }
        if delivered > 0 {
            if let Err(e) = queue.pop_front(delivered).await {
                log::error!("failed to persist notification queue after drain: {e}");
            }
        }
        drop(queue);

        if let Some(since) = first_failure {
            let downtime = Utc::now() - since;
            let message = format!(
                "notifications restored after {}s downtime",
                downtime.num_seconds().max(0)
            );
            for recipient in self.config.all_destinations() {
                if let Err(e) = self.deliver(&recipient, &message).await {
                    log::warn!("recovery announcement to {recipient} failed: {e}");
                }
            }
        }
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_as_str() {
        for kind in EventKind::ALL {
            let parsed = EventKind::ALL.iter().find(|k| k.as_str() == kind.as_str());
            assert_eq!(parsed, Some(&kind));
        }
    }

    #[tokio::test]
    async fn notify_with_no_subscribers_is_a_no_op() {
        let service = NotificationService::load(
            NotificationConfig::default(),
            None,
            tempfile::tempdir().unwrap().path().join("q.json"),
        )
        .await
        .unwrap();
        service.notify(EventKind::AppExit, "bye").await;
    }
}
