mod condition_evaluator;
mod evaluator;
mod evaluator_registry;
mod rhai_evaluator;
mod rule_scope_resolver;

pub use condition_evaluator::ConditionEvaluator;
pub use evaluator::Evaluator;
pub use evaluator_registry::EvaluatorRegistry;
pub use rhai_evaluator::RhaiEvaluator;
pub use rule_scope_resolver::RuleScopeResolver;
