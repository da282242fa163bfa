use tokenflow_common::prelude::*;

use crate::model::{Execution, RuleData, RuleScope};

/// Two level variable lookup for one execution: LOCAL entries first, then GLOBAL entries of the
/// process instance.
#[derive(Clone, Debug, Default)]
pub struct RuleScopeResolver {
    locals: HashMap<InlineStr, Object>,
    globals: HashMap<InlineStr, Object>,
}

impl RuleScopeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope of `execution`, with `globals` taken from the root of its instance.
    pub fn for_execution(execution: &Execution, globals: &HashMap<InlineStr, Object>) -> Self {
        Self {
            locals: execution.locals.clone(),
            globals: globals.clone(),
        }
    }

    pub fn from_rule_data(rule_data: impl IntoIterator<Item = RuleData>) -> Self {
        let mut resolver = Self::default();
        for x in rule_data {
            resolver.insert(x);
        }
        resolver
    }

    pub fn insert(&mut self, rule_data: RuleData) {
        match rule_data.scope {
            RuleScope::Local => self.locals.insert(rule_data.name, rule_data.value),
            RuleScope::Global => self.globals.insert(rule_data.name, rule_data.value),
        };
    }

    pub fn remove(&mut self, name: &str, scope: RuleScope) -> Option<Object> {
        match scope {
            RuleScope::Local => self.locals.remove(name),
            RuleScope::Global => self.globals.remove(name),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Object> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }

    pub fn resolve(&self, name: &str) -> FlowResult<&Object> {
        self.lookup(name).ok_or_else(|| {
            ErrorCode::UnresolvedVariable(format!("Variable {} is not defined in scope", name))
        })
    }

    /// Every visible name with its effective value.
    pub fn bindings(&self) -> HashMap<&InlineStr, &Object> {
        let mut bindings = self.globals.iter().collect::<HashMap<_, _>>();
        bindings.extend(self.locals.iter());
        bindings
    }
}
