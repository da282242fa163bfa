use crate::prelude::*;

/// A directed edge between two flow nodes, optionally guarded by a condition.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceFlow {
    pub id: InlineStr,
    pub source: InlineStr,
    pub target: InlineStr,
    /// Guard text, may carry a leading `where` clause keyword.
    pub condition: Option<InlineStr>,
    /// Taken by exclusive/inclusive gateways when no guarded flow passes.
    pub is_default: bool,
}

impl SequenceFlow {
    pub fn new(
        id: impl Into<InlineStr>,
        source: impl Into<InlineStr>,
        target: impl Into<InlineStr>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
            is_default: false,
        }
    }

    pub fn conditional(
        id: impl Into<InlineStr>,
        source: impl Into<InlineStr>,
        target: impl Into<InlineStr>,
        condition: impl Into<InlineStr>,
    ) -> Self {
        Self {
            condition: Some(condition.into()),
            ..Self::new(id, source, target)
        }
    }

    pub fn default_flow(
        id: impl Into<InlineStr>,
        source: impl Into<InlineStr>,
        target: impl Into<InlineStr>,
    ) -> Self {
        Self {
            is_default: true,
            ..Self::new(id, source, target)
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}
