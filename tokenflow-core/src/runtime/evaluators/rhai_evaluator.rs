use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use tokenflow_common::prelude::*;

use super::{Evaluator, RuleScopeResolver};

/// Evaluates predicates as rhai expressions. Every visible variable is pushed into the rhai
/// scope, so a name rhai cannot find is a name the resolver cannot resolve either.
pub struct RhaiEvaluator {
    engine: Engine,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    fn to_dynamic(value: &Object) -> Dynamic {
        match value {
            Object::Int(v) => Dynamic::from(*v as i64),
            Object::Long(v) => Dynamic::from(*v),
            Object::Double(v) => Dynamic::from(*v),
            Object::Boolean(v) => Dynamic::from(*v),
            Object::String(v) => Dynamic::from(v.to_string()),
            Object::Map(v) => {
                let mut map = rhai::Map::new();
                for (k, v) in v {
                    map.insert(k.as_str().into(), Self::to_dynamic(v));
                }
                Dynamic::from_map(map)
            }
            Object::List(v) => Dynamic::from_array(v.iter().map(Self::to_dynamic).collect()),
            Object::Null => Dynamic::UNIT,
        }
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for RhaiEvaluator {
    fn evaluate(&self, predicate: &str, scope: &RuleScopeResolver) -> FlowResult<bool> {
        debug!("Rhai evaluator -- predicate: {}", predicate);

        let mut rhai_scope = Scope::new();
        for (name, value) in scope.bindings() {
            rhai_scope.push_dynamic(name.as_str(), Self::to_dynamic(value));
        }

        match self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut rhai_scope, predicate)
        {
            Ok(result) => {
                trace!("Rhai evaluator -- result: {}", result);
                result.as_bool().or_else(|type_name| {
                    fmt_err!(
                        ScriptEvalFailed,
                        "Predicate {} evaluated to {} instead of a bool",
                        predicate,
                        type_name
                    )
                })
            }
            Err(e) => match *e {
                EvalAltResult::ErrorVariableNotFound(name, _) => fmt_err!(
                    UnresolvedVariable,
                    "Variable {} referenced by {} is not defined in scope",
                    name,
                    predicate
                ),
                other => {
                    warn!(
                        "Error while evaluating predicate: {}, error: {}",
                        predicate, other
                    );
                    fmt_err!(ScriptEvalFailed, "{}", other)
                }
            },
        }
    }
}
