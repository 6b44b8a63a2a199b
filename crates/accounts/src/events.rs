// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry change notifications.
//!
//! Events carry no payload. Listeners re-query the registry for details.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the account registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// An account was created, updated, or removed.
    AccountsUpdated,
}

impl RegistryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountsUpdated => "accounts_updated",
        }
    }
}

/// Fire-and-forget sink for registry events.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: RegistryEvent);
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    pub fn from_sender(event_tx: broadcast::Sender<RegistryEvent>) -> Self {
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn notify(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_format() -> anyhow::Result<()> {
        let json = serde_json::to_value(RegistryEvent::AccountsUpdated)?;
        assert_eq!(json, serde_json::json!({ "event": "accounts_updated" }));
        assert_eq!(RegistryEvent::AccountsUpdated.as_str(), "accounts_updated");

        let parsed: RegistryEvent = serde_json::from_value(json)?;
        assert_eq!(parsed, RegistryEvent::AccountsUpdated);
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_receive_events() -> anyhow::Result<()> {
        let notifier = BroadcastNotifier::new(8);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.notify(RegistryEvent::AccountsUpdated);

        assert_eq!(rx1.recv().await?, RegistryEvent::AccountsUpdated);
        assert_eq!(rx2.recv().await?, RegistryEvent::AccountsUpdated);
        Ok(())
    }

    #[test]
    fn notify_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::default();
        notifier.notify(RegistryEvent::AccountsUpdated);
    }

    #[test]
    fn from_sender_shares_channel() {
        let (tx, mut rx) = broadcast::channel(4);
        let notifier = BroadcastNotifier::from_sender(tx);
        notifier.notify(RegistryEvent::AccountsUpdated);
        assert!(matches!(rx.try_recv(), Ok(RegistryEvent::AccountsUpdated)));
    }
}
