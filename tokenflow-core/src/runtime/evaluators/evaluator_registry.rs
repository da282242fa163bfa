use dashmap::DashMap;
use tokenflow_common::prelude::*;

use super::{ConditionEvaluator, Evaluator, RhaiEvaluator};

/// Named guard languages. `rhai` is always present, others are registered before the engine is
/// built and picked through `Properties::condition_evaluator`.
pub struct EvaluatorRegistry {
    evaluators: DashMap<InlineStr, Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    pub const DEFAULT_EVALUATOR: &'static str = "rhai";

    pub fn new() -> Self {
        let evaluators = DashMap::new();
        evaluators.insert(
            InlineStr::from(Self::DEFAULT_EVALUATOR),
            Arc::new(RhaiEvaluator::new()) as Arc<dyn Evaluator>,
        );
        Self { evaluators }
    }

    pub fn register(&self, name: impl Into<InlineStr>, evaluator: Arc<dyn Evaluator>) {
        let name = name.into();
        debug!("Evaluator registered: {}", name);
        self.evaluators.insert(name, evaluator);
    }

    pub fn get_evaluator(&self, name: &str) -> FlowResult<Arc<dyn Evaluator>> {
        self.evaluators
            .get(name)
            .map(|x| x.value().clone())
            .ok_or_else(|| ErrorCode::NotFound(format!("No evaluator named {}", name)))
    }

    /// A `ConditionEvaluator` over the evaluator registered as `name`.
    pub fn condition_evaluator(&self, name: &str) -> FlowResult<ConditionEvaluator> {
        let evaluator = self.get_evaluator(name)?;
        info!("Sequence flow guards are evaluated by {}", name);
        Ok(ConditionEvaluator::new(evaluator))
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuleData;
    use crate::runtime::RuleScopeResolver;

    struct Flag;

    impl Evaluator for Flag {
        fn evaluate(&self, predicate: &str, scope: &RuleScopeResolver) -> FlowResult<bool> {
            scope.resolve(predicate)?.as_bool()
        }
    }

    #[test]
    fn guards_use_the_named_evaluator() {
        let registry = EvaluatorRegistry::new();
        registry.register("flag", Arc::new(Flag));
        let scope = RuleScopeResolver::from_rule_data(vec![RuleData::local("approved", true)]);

        let flag = registry.condition_evaluator("flag").expect("registered");
        assert!(flag.evaluate(Some("where approved"), &scope).expect("evaluated"));
        let rhai = registry
            .condition_evaluator(EvaluatorRegistry::DEFAULT_EVALUATOR)
            .expect("built in");
        assert!(rhai
            .evaluate(Some("where approved == true"), &scope)
            .expect("evaluated"));

        assert_eq!(
            registry.condition_evaluator("sql").err().map(|x| x.code()),
            Some(ErrorCode::NOT_FOUND_CODE)
        );
    }
}
