use strum_macros::{AsRefStr, EnumString};

use crate::metadata::EventSource;
use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayKind {
    /// First passing branch in declared order, else the default flow.
    Exclusive,
    /// Every outgoing branch, conditions are ignored.
    Parallel,
    /// Every passing branch, else the default flow.
    Inclusive,
    /// Branch selection and join policy supplied by a pluggable policy.
    Complex,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    StartEvent,
    EndEvent {
        /// A terminate end event ends every other token of the instance.
        terminate: bool,
    },
    ServiceTask {
        delegate: InlineStr,
        /// Node a failed execution is routed to instead of halting the branch.
        error_boundary: Option<InlineStr>,
    },
    Gateway(GatewayKind),
    /// Event-based gateway; the i-th definition routes to the i-th outgoing flow.
    EventGateway(EventSource),
    CatchEvent(EventSource),
    ThrowEvent(EventSource),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlowNode {
    pub id: InlineStr,
    pub name: InlineStr,
    pub kind: NodeKind,
}

impl FlowNode {
    pub fn new(id: impl Into<InlineStr>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<InlineStr>) -> Self {
        self.name = name.into();
        self
    }

    pub fn start(id: impl Into<InlineStr>) -> Self {
        Self::new(id, NodeKind::StartEvent)
    }

    pub fn end(id: impl Into<InlineStr>) -> Self {
        Self::new(id, NodeKind::EndEvent { terminate: false })
    }

    pub fn terminate_end(id: impl Into<InlineStr>) -> Self {
        Self::new(id, NodeKind::EndEvent { terminate: true })
    }

    pub fn service_task(id: impl Into<InlineStr>, delegate: impl Into<InlineStr>) -> Self {
        Self::new(
            id,
            NodeKind::ServiceTask {
                delegate: delegate.into(),
                error_boundary: None,
            },
        )
    }

    pub fn guarded_service_task(
        id: impl Into<InlineStr>,
        delegate: impl Into<InlineStr>,
        error_boundary: impl Into<InlineStr>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::ServiceTask {
                delegate: delegate.into(),
                error_boundary: Some(error_boundary.into()),
            },
        )
    }

    pub fn gateway(id: impl Into<InlineStr>, kind: GatewayKind) -> Self {
        Self::new(id, NodeKind::Gateway(kind))
    }

    pub fn event_gateway(id: impl Into<InlineStr>, source: EventSource) -> Self {
        Self::new(id, NodeKind::EventGateway(source))
    }

    pub fn catch_event(id: impl Into<InlineStr>, source: EventSource) -> Self {
        Self::new(id, NodeKind::CatchEvent(source))
    }

    pub fn throw_event(id: impl Into<InlineStr>, source: EventSource) -> Self {
        Self::new(id, NodeKind::ThrowEvent(source))
    }

    pub fn is_gateway(&self) -> bool {
        matches!(self.kind, NodeKind::Gateway(_))
    }

    /// The event definitions this node races or emits, if any.
    pub fn event_source(&self) -> Option<&EventSource> {
        match &self.kind {
            NodeKind::EventGateway(source)
            | NodeKind::CatchEvent(source)
            | NodeKind::ThrowEvent(source) => Some(source),
            _ => None,
        }
    }
}
