use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use tokenflow_common::prelude::*;
use tokenflow_common::EventKind;

use super::{EventBus, EventKey};

#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    pub key: EventKey,
    pub payload: Object,
    pub create_time: i64,
}

impl EventMessage {
    pub fn new(kind: EventKind, reference: impl Into<InlineStr>, payload: Object) -> Self {
        Self {
            key: EventKey::new(kind, reference),
            payload,
            create_time: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MessageFetchRequest {
    pub key: EventKey,
    pub max_messages: usize,
}

/// The messaging collaborator feeding message and signal event definitions.
#[async_trait]
pub trait EventMessageService: Send + Sync {
    /// Fails with `UnresolvedEventRef` when the reference is unknown to the messaging system.
    fn resolve_ref(&self, key: &EventKey) -> FlowResult<()>;

    /// Takes up to `max_messages` messages that arrived while nobody was waiting for them.
    async fn fetch(&self, request: MessageFetchRequest) -> FlowResult<Vec<EventMessage>>;

    /// Delivers a message to the waiting catchers and returns how many were reached.
    async fn publish(&self, message: EventMessage) -> FlowResult<usize>;

    /// Hands back messages a catcher took but did not consume, in the order they were taken.
    /// They reach waiting catchers first and otherwise return to the head of their queue. Runs
    /// from synchronous cleanup and must not block.
    fn requeue(&self, messages: Vec<EventMessage>) -> FlowResult<usize>;
}

/// Messaging on top of the engine's `EventBus`. Message refs and signal refs have to be
/// registered before they resolve. Messages nobody waits for are queued until fetched, signals
/// nobody waits for are dropped.
pub struct InMemoryEventMessageService {
    bus: Arc<EventBus>,
    known_refs: DashSet<EventKey>,
    queued: Mutex<HashMap<EventKey, VecDeque<EventMessage>>>,
}

impl InMemoryEventMessageService {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            known_refs: DashSet::new(),
            queued: Mutex::new(HashMap::default()),
        }
    }

    pub fn register_ref(&self, kind: EventKind, reference: impl Into<InlineStr>) {
        let key = EventKey::new(kind, reference);
        debug!("Event reference registered: {}", key);
        self.known_refs.insert(key);
    }

    pub fn queued_messages(&self, key: &EventKey) -> usize {
        self.queued.lock().get(key).map(|x| x.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventMessageService for InMemoryEventMessageService {
    fn resolve_ref(&self, key: &EventKey) -> FlowResult<()> {
        match key.kind {
            EventKind::Message | EventKind::Signal if !self.known_refs.contains(key) => {
                fmt_err!(UnresolvedEventRef, "Event reference {} is not registered", key)
            }
            _ => Ok(()),
        }
    }

    async fn fetch(&self, request: MessageFetchRequest) -> FlowResult<Vec<EventMessage>> {
        self.resolve_ref(&request.key)?;
        let mut queued = self.queued.lock();
        let Some(messages) = queued.get_mut(&request.key) else {
            return Ok(Vec::default());
        };
        let count = request.max_messages.min(messages.len());
        let fetched = messages.drain(..count).collect::<Vec<_>>();
        if messages.is_empty() {
            queued.remove(&request.key);
        }
        Ok(fetched)
    }

    async fn publish(&self, message: EventMessage) -> FlowResult<usize> {
        self.resolve_ref(&message.key)?;
        // delivery and queueing are one step with respect to fetch
        let mut queued = self.queued.lock();
        let delivered = self.bus.publish(&message.key, message.payload.clone());
        if delivered == 0 && message.key.kind == EventKind::Message {
            debug!("No catcher waits for {}, message queued", message.key);
            queued.entry(message.key.clone()).or_default().push_back(message);
        }
        Ok(delivered)
    }

    fn requeue(&self, messages: Vec<EventMessage>) -> FlowResult<usize> {
        for message in &messages {
            self.resolve_ref(&message.key)?;
        }
        let mut queued = self.queued.lock();
        let mut delivered = 0;
        let mut held = HashMap::<EventKey, Vec<EventMessage>>::default();
        for message in messages {
            let reached = self.bus.publish(&message.key, message.payload.clone());
            if reached == 0 && message.key.kind == EventKind::Message {
                held.entry(message.key.clone()).or_default().push(message);
            }
            delivered += reached;
        }
        for (key, messages) in held {
            debug!("{} unclaimed messages of {} requeued", messages.len(), key);
            let queue = queued.entry(key).or_default();
            for message in messages.into_iter().rev() {
                queue.push_front(message);
            }
        }
        Ok(delivered)
    }
}
