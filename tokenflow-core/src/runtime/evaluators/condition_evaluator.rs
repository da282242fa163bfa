use regex::Regex;
use tokenflow_common::prelude::*;

use super::{Evaluator, RhaiEvaluator, RuleScopeResolver};

static WHERE_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwhere\b").unwrap());

/// Evaluates sequence flow guards. Guard text may be a full query clause, only the predicate
/// after the `where` keyword is evaluated.
pub struct ConditionEvaluator {
    evaluator: Arc<dyn Evaluator>,
}

impl ConditionEvaluator {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Strips everything up to and including the first `where` keyword (any casing) and trims
    /// the rest. Text without the keyword is only trimmed.
    pub fn normalize(condition: Option<&str>) -> FlowResult<InlineStr> {
        let condition = condition
            .ok_or_else(|| ErrorCode::IllegalArgument("Condition text must not be null"))?;
        let predicate = match WHERE_KEYWORD.find(condition) {
            Some(keyword) => &condition[keyword.end()..],
            None => condition,
        };
        Ok(predicate.trim().into())
    }

    pub fn evaluate(&self, condition: Option<&str>, scope: &RuleScopeResolver) -> FlowResult<bool> {
        let predicate = Self::normalize(condition)?;
        flow_ensure!(
            !predicate.is_empty(),
            IllegalArgument,
            "Condition {:?} has no predicate",
            condition
        );
        let result = self.evaluator.evaluate(&predicate, scope)?;
        debug!("Condition {} evaluated to {}", predicate, result);
        Ok(result)
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(RhaiEvaluator::new()))
    }
}
