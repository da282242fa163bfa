use strum_macros::{AsRefStr, EnumString};

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Message,
    Signal,
    Link,
    Timer,
}

/// One way an event-aware node can be triggered. Each kind carries the key the matching
/// notification channel is addressed by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventDefinition {
    Message { message_ref: InlineStr },
    Signal { signal_ref: InlineStr },
    Link { name: InlineStr },
    /// Six-field cron text, validated when the timer is registered.
    Timer { cron: InlineStr },
}

impl EventDefinition {
    pub fn message(message_ref: impl Into<InlineStr>) -> Self {
        Self::Message {
            message_ref: message_ref.into(),
        }
    }

    pub fn signal(signal_ref: impl Into<InlineStr>) -> Self {
        Self::Signal {
            signal_ref: signal_ref.into(),
        }
    }

    pub fn link(name: impl Into<InlineStr>) -> Self {
        Self::Link { name: name.into() }
    }

    pub fn timer(cron: impl Into<InlineStr>) -> Self {
        Self::Timer { cron: cron.into() }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::Signal { .. } => EventKind::Signal,
            Self::Link { .. } => EventKind::Link,
            Self::Timer { .. } => EventKind::Timer,
        }
    }

    pub fn reference(&self) -> &InlineStr {
        match self {
            Self::Message { message_ref } => message_ref,
            Self::Signal { signal_ref } => signal_ref,
            Self::Link { name } => name,
            Self::Timer { cron } => cron,
        }
    }
}

impl std::fmt::Display for EventDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind().as_ref(), self.reference())
    }
}

/// The ordered definitions of a node that can be triggered (or can emit) through more than one
/// event. Declaration order is the tie-break order when several definitions fire at once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSource {
    pub definitions: Vec<EventDefinition>,
    pub throwing: bool,
}

impl EventSource {
    pub fn catching(definitions: Vec<EventDefinition>) -> Self {
        Self {
            definitions,
            throwing: false,
        }
    }

    pub fn throwing(definitions: Vec<EventDefinition>) -> Self {
        Self {
            definitions,
            throwing: true,
        }
    }

    pub fn timers(&self) -> impl Iterator<Item = &InlineStr> {
        self.definitions.iter().filter_map(|x| match x {
            EventDefinition::Timer { cron } => Some(cron),
            _ => None,
        })
    }
}
