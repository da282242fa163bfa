use tokenflow_common::prelude::*;

use super::RuleScopeResolver;

pub trait Evaluator: Send + Sync {
    /// Evaluate the normalized predicate against the variables visible from `scope`.
    ///
    /// Return the boolean result. A name the predicate references but `scope` cannot resolve is
    /// an `UnresolvedVariable` error, never a `false` result.
    fn evaluate(&self, predicate: &str, scope: &RuleScopeResolver) -> FlowResult<bool>;
}
