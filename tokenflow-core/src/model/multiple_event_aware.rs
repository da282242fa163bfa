use tokenflow_common::prelude::*;
use tokenflow_common::{EventDefinition, EventSource};

/// One visit of an event-aware node by an execution: the competing definitions, whether the
/// node emits or waits, and which definition (if any) started it. `started_by` can be recorded
/// once and never changes afterwards.
#[derive(Debug)]
pub struct MultipleEventAware {
    instance_key: InlineStr,
    execution_id: InlineStr,
    node_id: InlineStr,
    definitions: Vec<EventDefinition>,
    throwing: bool,
    started_by: OnceCell<usize>,
}

impl MultipleEventAware {
    pub fn new(
        execution_id: impl Into<InlineStr>,
        node_id: impl Into<InlineStr>,
        source: &EventSource,
    ) -> Self {
        let execution_id = execution_id.into();
        let node_id = node_id.into();
        let mut instance_key = execution_id.clone();
        instance_key.push('/');
        instance_key.push_str(&node_id);
        Self {
            instance_key,
            execution_id,
            node_id,
            definitions: source.definitions.clone(),
            throwing: source.throwing,
            started_by: OnceCell::new(),
        }
    }

    pub fn instance_key(&self) -> &InlineStr {
        &self.instance_key
    }

    pub fn execution_id(&self) -> &InlineStr {
        &self.execution_id
    }

    pub fn node_id(&self) -> &InlineStr {
        &self.node_id
    }

    pub fn definitions(&self) -> &[EventDefinition] {
        &self.definitions
    }

    pub fn is_throwing(&self) -> bool {
        self.throwing
    }

    pub fn started_by(&self) -> Option<&EventDefinition> {
        self.started_by.get().map(|&x| &self.definitions[x])
    }

    pub fn started_by_index(&self) -> Option<usize> {
        self.started_by.get().copied()
    }

    /// Records the winning definition. Fails when another definition already started the entity.
    pub fn record_start(&self, index: usize) -> FlowResult<&EventDefinition> {
        flow_ensure!(
            index < self.definitions.len(),
            IllegalArgument,
            "{} has no event definition #{}",
            self.instance_key,
            index
        );
        match self.started_by.set(index) {
            Ok(()) => Ok(&self.definitions[index]),
            Err(_) => fmt_err!(
                Conflict,
                "{} was already started by {}",
                self.instance_key,
                self.started_by()
                    .map(|x| x.to_string())
                    .unwrap_or_default()
            ),
        }
    }
}
