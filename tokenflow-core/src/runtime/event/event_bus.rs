use dashmap::DashMap;
use tokenflow_common::prelude::*;
use tokenflow_common::{EventDefinition, EventKind};
use tokio::sync::oneshot;

/// Address of a notification channel: the event kind and its reference key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: EventKind,
    pub reference: InlineStr,
}

impl EventKey {
    pub fn new(kind: EventKind, reference: impl Into<InlineStr>) -> Self {
        Self {
            kind,
            reference: reference.into(),
        }
    }
}

impl From<&EventDefinition> for EventKey {
    fn from(definition: &EventDefinition) -> Self {
        Self::new(definition.kind(), definition.reference().clone())
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind.as_ref(), self.reference)
    }
}

struct Subscription {
    subscription_id: u64,
    sender: oneshot::Sender<Object>,
}

/// In-process notification channels. A subscription receives at most one payload and is
/// removed on delivery.
#[derive(Default)]
pub struct EventBus {
    subscriptions: DashMap<EventKey, Vec<Subscription>>,
    next_subscription_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: EventKey) -> (u64, oneshot::Receiver<Object>) {
        let (sender, receiver) = oneshot::channel();
        let subscription_id = self.next_subscription_id.fetch_add(1, AtomicOrdering::Relaxed);
        trace!("Subscription {} on {}", subscription_id, key);
        self.subscriptions
            .entry(key)
            .or_default()
            .push(Subscription {
                subscription_id,
                sender,
            });
        (subscription_id, receiver)
    }

    pub fn unsubscribe(&self, key: &EventKey, subscription_id: u64) -> bool {
        let Some(mut subscriptions) = self.subscriptions.get_mut(key) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|x| x.subscription_id != subscription_id);
        before != subscriptions.len()
    }

    /// Delivers `payload` and returns the number of subscribers reached. Messages are
    /// point-to-point and go to the oldest live subscriber, every other kind is broadcast.
    pub fn publish(&self, key: &EventKey, payload: Object) -> usize {
        let Some(mut subscriptions) = self.subscriptions.get_mut(key) else {
            return 0;
        };

        let mut delivered = 0;
        if key.kind == EventKind::Message {
            while !subscriptions.is_empty() {
                let subscription = subscriptions.remove(0);
                if subscription.sender.send(payload.clone()).is_ok() {
                    delivered = 1;
                    break;
                }
            }
        } else {
            for subscription in subscriptions.drain(..) {
                if subscription.sender.send(payload.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Published {} to {} subscribers", key, delivered);
        delivered
    }

    pub fn subscriber_count(&self, key: &EventKey) -> usize {
        self.subscriptions
            .get(key)
            .map(|x| x.iter().filter(|x| !x.sender.is_closed()).count())
            .unwrap_or(0)
    }
}
