use std::sync::Mutex;

use crate::config::NotificationConfig;
use crate::domain::entity::EntityRef;
use crate::domain::principal::UserId;

/// One message for one user about one governed entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationIntent {
    pub user_id: UserId,
    pub message: String,
    pub target: EntityRef,
}

impl NotificationIntent {
    pub fn new(user_id: UserId, message: impl Into<String>, target: EntityRef) -> Self {
        Self { user_id, message: message.into(), target }
    }
}

/// Delivery is fire and forget: a sink must never fail the workflow
/// operation that produced the intent.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, intent: NotificationIntent);
}

/// Collects intents for assertions in tests.
#[derive(Default)]
pub struct InMemoryNotificationSink {
    sent: Mutex<Vec<NotificationIntent>>,
}

impl InMemoryNotificationSink {
    pub fn sent(&self) -> Vec<NotificationIntent> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, intent: NotificationIntent) {
        match self.sent.lock() {
            Ok(mut guard) => guard.push(intent),
            Err(poisoned) => poisoned.into_inner().push(intent),
        }
    }
}

/// Logs each intent instead of delivering it anywhere.
#[derive(Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, intent: NotificationIntent) {
        tracing::info!(
            event_name = "notification_sent",
            user_id = %intent.user_id,
            target = %intent.target,
            message = %intent.message,
        );
    }
}

/// Absorbs intents when delivery is disabled by configuration.
#[derive(Default)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn notify(&self, _intent: NotificationIntent) {}
}

/// Sink chosen by the notifications config section.
pub enum ConfiguredSink {
    Tracing(TracingNotificationSink),
    Disabled(NoopNotificationSink),
}

impl ConfiguredSink {
    pub fn from_config(config: &NotificationConfig) -> Self {
        if config.enabled {
            Self::Tracing(TracingNotificationSink)
        } else {
            Self::Disabled(NoopNotificationSink)
        }
    }
}

impl NotificationSink for ConfiguredSink {
    fn notify(&self, intent: NotificationIntent) {
        match self {
            Self::Tracing(sink) => sink.notify(intent),
            Self::Disabled(sink) => sink.notify(intent),
        }
    }
}

/// Buffers intents produced while an operation runs so they can be flushed
/// only after its writes have committed. A dropped outbox delivers nothing.
#[derive(Default)]
pub struct NotificationOutbox {
    intents: Vec<NotificationIntent>,
}

impl NotificationOutbox {
    pub fn push(&mut self, intent: NotificationIntent) {
        self.intents.push(intent);
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn flush(self, sink: &dyn NotificationSink) {
        for intent in self.intents {
            sink.notify(intent);
        }
    }
}
