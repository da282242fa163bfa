use strum_macros::{AsRefStr, EnumString};
use tokenflow_common::prelude::*;

/// Visibility of a process variable. LOCAL entries belong to one execution branch and shadow
/// GLOBAL entries of the same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    Global,
    Local,
}

/// A named, scope tagged process variable.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleData {
    pub name: InlineStr,
    pub value: Object,
    pub scope: RuleScope,
}

impl RuleData {
    pub fn new(name: impl Into<InlineStr>, value: impl Into<Object>, scope: RuleScope) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            scope,
        }
    }

    pub fn global(name: impl Into<InlineStr>, value: impl Into<Object>) -> Self {
        Self::new(name, value, RuleScope::Global)
    }

    pub fn local(name: impl Into<InlineStr>, value: impl Into<Object>) -> Self {
        Self::new(name, value, RuleScope::Local)
    }
}
