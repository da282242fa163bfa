use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{select_all, AbortHandle, AbortRegistration, Abortable, BoxFuture};
use futures::FutureExt;
use tokenflow_common::prelude::*;
use tokenflow_common::{EventDefinition, EventKind};
use tokio::sync::oneshot;

use super::{EventBus, EventKey, EventMessage, EventMessageService, MessageFetchRequest};
use crate::model::MultipleEventAware;
use crate::runtime::scheduler::{CronExpression, TriggerScheduler};

/// The definition that won the race for an entity, with the payload it delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct EventStart {
    pub index: usize,
    pub definition: EventDefinition,
    pub payload: Object,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    Started(EventStart),
    Thrown { delivered: usize },
}

struct DispatcherShared {
    bus: Arc<EventBus>,
    messages: Arc<dyn EventMessageService>,
    scheduler: Arc<TriggerScheduler>,
    /// execution id -> entity instance key -> abort handle of its pending race
    pending: DashMap<InlineStr, HashMap<InlineStr, AbortHandle>>,
}

/// Runs the catching races and throwing broadcasts of `MultipleEventAware` entities.
pub struct EventDispatcher {
    shared: Arc<DispatcherShared>,
    fetch_batch: usize,
}

impl EventDispatcher {
    pub fn new(
        bus: Arc<EventBus>,
        messages: Arc<dyn EventMessageService>,
        scheduler: Arc<TriggerScheduler>,
        fetch_batch: usize,
    ) -> Self {
        Self {
            shared: Arc::new(DispatcherShared {
                bus,
                messages,
                scheduler,
                pending: DashMap::new(),
            }),
            fetch_batch: fetch_batch.max(1),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    pub fn messages(&self) -> &Arc<dyn EventMessageService> {
        &self.shared.messages
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.shared.scheduler
    }

    /// Catches when the entity is catching, broadcasts `payload` when it is throwing.
    pub async fn dispatch(
        &self,
        entity: Arc<MultipleEventAware>,
        payload: Object,
    ) -> FlowResult<DispatchOutcome> {
        if entity.is_throwing() {
            let delivered = self.throw(&entity, payload).await?;
            Ok(DispatchOutcome::Thrown { delivered })
        } else {
            let start = self.catch(entity).await?.wait().await?;
            Ok(DispatchOutcome::Started(start))
        }
    }

    /// Registers one listener per definition of a catching entity. Nothing is registered when a
    /// message or signal ref does not resolve or a timer expression is invalid.
    pub async fn catch(&self, entity: Arc<MultipleEventAware>) -> FlowResult<CatchRegistration> {
        flow_ensure!(
            !entity.is_throwing(),
            IllegalArgument,
            "{} is a throwing entity and cannot catch",
            entity.instance_key()
        );
        flow_ensure!(
            !entity.definitions().is_empty(),
            IllegalArgument,
            "{} has no event definitions",
            entity.instance_key()
        );
        if let Some(started_by) = entity.started_by() {
            return fmt_err!(
                Conflict,
                "{} was already started by {}",
                entity.instance_key(),
                started_by
            );
        }

        for definition in entity.definitions() {
            match definition {
                EventDefinition::Message { .. } | EventDefinition::Signal { .. } => {
                    self.shared.messages.resolve_ref(&EventKey::from(definition))?
                }
                EventDefinition::Timer { cron } => {
                    CronExpression::parse(cron)?;
                }
                EventDefinition::Link { .. } => {}
            }
        }

        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        if let Some(previous) = self
            .shared
            .pending
            .entry(entity.execution_id().clone())
            .or_default()
            .insert(entity.instance_key().clone(), abort_handle)
        {
            warn!("Replacing pending race of {}", entity.instance_key());
            previous.abort();
        }

        let mut registration = CatchRegistration {
            entity,
            arms: Vec::default(),
            immediate: None,
            surplus: Vec::default(),
            abort_registration: Some(abort_registration),
            shared: self.shared.clone(),
            released: false,
        };

        let now = Utc::now();
        let definitions = registration.entity.definitions().to_vec();
        for (index, definition) in definitions.iter().enumerate() {
            match definition {
                EventDefinition::Timer { cron } => {
                    let (registration_id, receiver) = self.shared.scheduler.register(cron, &now)?;
                    registration.arms.push(CatchArm::Timer {
                        index,
                        registration_id,
                        receiver,
                    });
                }
                _ => {
                    let key = EventKey::from(definition);
                    let (subscription_id, receiver) = self.shared.bus.subscribe(key.clone());
                    registration.arms.push(CatchArm::Bus {
                        index,
                        key,
                        subscription_id,
                        receiver,
                    });
                }
            }
        }

        // messages that arrived before the subscription, in declared order
        for (index, definition) in definitions.iter().enumerate() {
            if definition.kind() != EventKind::Message {
                continue;
            }
            let mut fetched = self
                .shared
                .messages
                .fetch(MessageFetchRequest {
                    key: EventKey::from(definition),
                    max_messages: self.fetch_batch,
                })
                .await?
                .into_iter();
            if let Some(message) = fetched.next() {
                registration.immediate = Some((index, message));
                registration.surplus.extend(fetched);
                break;
            }
        }

        debug!(
            "{} waits for {} event definitions",
            registration.entity.instance_key(),
            registration.arms.len()
        );
        Ok(registration)
    }

    /// Emits `payload` against every definition of a throwing entity. Nothing is emitted when one
    /// of the refs does not resolve.
    pub async fn throw(&self, entity: &MultipleEventAware, payload: Object) -> FlowResult<usize> {
        flow_ensure!(
            entity.is_throwing(),
            IllegalArgument,
            "{} is a catching entity and cannot throw",
            entity.instance_key()
        );
        for definition in entity.definitions() {
            match definition {
                EventDefinition::Message { .. } | EventDefinition::Signal { .. } => {
                    self.shared.messages.resolve_ref(&EventKey::from(definition))?
                }
                EventDefinition::Timer { .. } => {
                    return fmt_err!(
                        IllegalArgument,
                        "{} cannot throw {}",
                        entity.instance_key(),
                        definition
                    )
                }
                EventDefinition::Link { .. } => {}
            }
        }

        let mut delivered = 0;
        for definition in entity.definitions() {
            let key = EventKey::from(definition);
            delivered += match key.kind {
                EventKind::Link => self.shared.bus.publish(&key, payload.clone()),
                _ => {
                    self.shared
                        .messages
                        .publish(EventMessage {
                            key,
                            payload: payload.clone(),
                            create_time: Utc::now().timestamp_millis(),
                        })
                        .await?
                }
            };
        }
        info!(
            "{} threw {} definitions, {} catchers reached",
            entity.instance_key(),
            entity.definitions().len(),
            delivered
        );
        Ok(delivered)
    }

    /// Aborts every pending race of an execution. Returns the number of races aborted.
    pub fn cancel_pending(&self, execution_id: &str) -> usize {
        let Some((_, handles)) = self.shared.pending.remove(execution_id) else {
            return 0;
        };
        for (instance_key, handle) in &handles {
            debug!("Cancelling pending race of {}", instance_key);
            handle.abort();
        }
        handles.len()
    }

    pub fn pending_count(&self, execution_id: &str) -> usize {
        self.shared
            .pending
            .get(execution_id)
            .map(|x| x.len())
            .unwrap_or(0)
    }
}

enum CatchArm {
    Bus {
        index: usize,
        key: EventKey,
        subscription_id: u64,
        receiver: oneshot::Receiver<Object>,
    },
    Timer {
        index: usize,
        registration_id: InlineStr,
        receiver: oneshot::Receiver<DateTime<Utc>>,
    },
}

impl CatchArm {
    /// Resolves with the arm's definition index, and `None` when its source was closed.
    async fn recv(&mut self) -> (usize, Option<Object>) {
        match self {
            CatchArm::Bus { index, receiver, .. } => {
                let index = *index;
                (index, receiver.await.ok())
            }
            CatchArm::Timer {
                index, receiver, ..
            } => {
                let index = *index;
                let fired = receiver.await.ok();
                (index, fired.map(|x| Object::Long(x.timestamp_millis())))
            }
        }
    }
}

/// The listeners of one catching entity. Listeners are released once the race is decided or
/// the registration is dropped. Messages taken from the messaging collaborator that did not
/// start the entity are handed back to it on release.
pub struct CatchRegistration {
    entity: Arc<MultipleEventAware>,
    arms: Vec<CatchArm>,
    /// a queued message fetched while registering, it wins the race
    immediate: Option<(usize, EventMessage)>,
    surplus: Vec<EventMessage>,
    abort_registration: Option<AbortRegistration>,
    shared: Arc<DispatcherShared>,
    released: bool,
}

impl CatchRegistration {
    pub fn entity(&self) -> &Arc<MultipleEventAware> {
        &self.entity
    }

    /// Waits for the first definition to fire and records it as the entity's `started_by`. The
    /// other listeners are released before this returns.
    pub async fn wait(mut self) -> FlowResult<EventStart> {
        let abort_registration = self.abort_registration.take().ok_or_else(|| {
            ErrorCode::IllegalState(format!("{} was already awaited", self.entity.instance_key()))
        })?;
        let immediate = self
            .immediate
            .as_ref()
            .map(|(index, message)| (*index, message.payload.clone()));
        let result = Abortable::new(Self::race(&mut self.arms, immediate), abort_registration).await;
        let outcome = match result {
            Ok(Some((index, payload))) => {
                // a queued message always wins, so it is consumed here
                self.immediate = None;
                self.start(index, payload)
            }
            Ok(None) => fmt_err!(
                Cancelled,
                "Every event source of {} was closed",
                self.entity.instance_key()
            ),
            Err(_) => fmt_err!(
                Cancelled,
                "Pending race of {} was cancelled",
                self.entity.instance_key()
            ),
        };
        self.release();
        outcome
    }

    fn start(&mut self, index: usize, payload: Object) -> FlowResult<EventStart> {
        let definition = match self.entity.record_start(index) {
            Ok(definition) => definition.clone(),
            Err(e) => {
                if let Some(definition) = self.entity.definitions().get(index) {
                    if definition.kind() == EventKind::Message {
                        self.surplus.insert(
                            0,
                            EventMessage {
                                key: EventKey::from(definition),
                                payload,
                                create_time: Utc::now().timestamp_millis(),
                            },
                        );
                    }
                }
                return Err(e);
            }
        };
        info!(
            "{} started by {}",
            self.entity.instance_key(),
            definition
        );
        Ok(EventStart {
            index,
            definition,
            payload,
        })
    }

    async fn race(
        arms: &mut [CatchArm],
        immediate: Option<(usize, Object)>,
    ) -> Option<(usize, Object)> {
        if immediate.is_some() {
            return immediate;
        }
        // arms are polled in declared order, so simultaneous arrivals resolve to the first one
        let mut open = arms
            .iter_mut()
            .map(|x| x.recv().boxed())
            .collect::<Vec<BoxFuture<'_, (usize, Option<Object>)>>>();
        while !open.is_empty() {
            let ((index, payload), _, rest) = select_all(open).await;
            match payload {
                Some(payload) => return Some((index, payload)),
                None => open = rest,
            }
        }
        None
    }

    /// Unsubscribes every listener, forgets the abort handle and hands unclaimed messages back.
    /// Runs once, from `wait` or from `drop`.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for arm in &self.arms {
            match arm {
                CatchArm::Bus {
                    key,
                    subscription_id,
                    ..
                } => {
                    self.shared.bus.unsubscribe(key, *subscription_id);
                }
                CatchArm::Timer {
                    registration_id, ..
                } => {
                    self.shared.scheduler.cancel(registration_id);
                }
            }
        }

        let execution_id = self.entity.execution_id();
        if let Some(mut handles) = self.shared.pending.get_mut(execution_id) {
            handles.remove(self.entity.instance_key());
        }
        self.shared
            .pending
            .remove_if(execution_id, |_, handles| handles.is_empty());

        self.requeue_unclaimed();
    }

    /// Messages claimed by this registration that did not start the entity: the fetched ones
    /// first, then whatever reached the released listeners.
    fn requeue_unclaimed(&mut self) {
        let mut unclaimed = self
            .immediate
            .take()
            .map(|(_, message)| message)
            .into_iter()
            .chain(std::mem::take(&mut self.surplus))
            .collect::<Vec<_>>();
        for arm in &mut self.arms {
            if let CatchArm::Bus { key, receiver, .. } = arm {
                if key.kind != EventKind::Message {
                    continue;
                }
                if let Ok(payload) = receiver.try_recv() {
                    unclaimed.push(EventMessage {
                        key: key.clone(),
                        payload,
                        create_time: Utc::now().timestamp_millis(),
                    });
                }
            }
        }
        if unclaimed.is_empty() {
            return;
        }
        let count = unclaimed.len();
        match self.shared.messages.requeue(unclaimed) {
            Ok(delivered) => debug!(
                "{} handed back {} unclaimed messages, {} catchers reached",
                self.entity.instance_key(),
                count,
                delivered
            ),
            Err(e) => warn!(
                "{} failed to requeue {} unclaimed messages: {}",
                self.entity.instance_key(),
                count,
                e.display_text()
            ),
        }
    }
}

impl Drop for CatchRegistration {
    fn drop(&mut self) {
        self.release();
    }
}
