use tokenflow_common::prelude::*;

use crate::model::{Execution, RuleData, RuleScope};

/// What a task delegate sees of the execution it runs for: identifiers and a copy of the
/// variables. Writes are committed by the coordinator when the delegate succeeds.
#[derive(Clone, Debug)]
pub struct DelegateContext {
    pub execution_id: InlineStr,
    pub process_id: InlineStr,
    pub process_instance_id: InlineStr,
    pub node_id: InlineStr,
    locals: HashMap<InlineStr, Object>,
    globals: HashMap<InlineStr, Object>,
}

impl DelegateContext {
    pub fn new(execution: &Execution, globals: HashMap<InlineStr, Object>) -> Self {
        Self {
            execution_id: execution.execution_id.clone(),
            process_id: execution.process_id.clone(),
            process_instance_id: execution.process_instance_id.clone(),
            node_id: execution.current_node.clone(),
            locals: execution.locals.clone(),
            globals,
        }
    }

    /// LOCAL value if present, else GLOBAL.
    pub fn get_variable(&self, name: &str) -> Option<&Object> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }

    pub fn set_variable(&mut self, rule_data: RuleData) {
        match rule_data.scope {
            RuleScope::Local => self.locals.insert(rule_data.name, rule_data.value),
            RuleScope::Global => self.globals.insert(rule_data.name, rule_data.value),
        };
    }

    pub fn set_local(&mut self, name: impl Into<InlineStr>, value: impl Into<Object>) {
        self.set_variable(RuleData::local(name, value));
    }

    pub fn set_global(&mut self, name: impl Into<InlineStr>, value: impl Into<Object>) {
        self.set_variable(RuleData::global(name, value));
    }

    pub fn locals(&self) -> &HashMap<InlineStr, Object> {
        &self.locals
    }

    pub fn globals(&self) -> &HashMap<InlineStr, Object> {
        &self.globals
    }

    pub fn into_variables(self) -> (HashMap<InlineStr, Object>, HashMap<InlineStr, Object>) {
        (self.locals, self.globals)
    }
}
