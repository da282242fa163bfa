use std::time::Duration;

use tokenflow_common::prelude::*;
use tokenflow_common::{
    EventDefinition, EventKind, EventSource, FlowNode, GatewayKind, ProcessSpecification,
    SequenceFlow,
};
use tokenflow_core::{
    ConditionEvaluator, Evaluator, EvaluatorRegistry, ExecutionStatus, FnDelegate, ProcessEngine,
    Properties, RuleData, RuleScope, RuleScopeResolver,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn engine() -> ProcessEngine {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
    ProcessEngine::new(Properties::default()).expect("engine")
}

#[test]
fn guards_see_locals_before_globals() {
    let evaluator = ConditionEvaluator::default();
    let mut scope = RuleScopeResolver::from_rule_data(vec![
        RuleData::global("x", 1),
        RuleData::local("x", 5),
        RuleData::global("limit", 3),
    ]);
    assert!(evaluator
        .evaluate(Some("WHERE x > limit"), &scope)
        .expect("evaluated"));

    scope.remove("x", RuleScope::Local);
    assert!(!evaluator
        .evaluate(Some("  where x > limit "), &scope)
        .expect("evaluated"));
    assert!(evaluator.evaluate(Some("x == 1"), &scope).expect("evaluated"));

    assert_eq!(
        evaluator
            .evaluate(Some("where y > 0"), &scope)
            .err()
            .map(|x| x.code()),
        Some(ErrorCode::unresolved_variable_code())
    );
    assert_eq!(
        evaluator.evaluate(None, &scope).err().map(|x| x.code()),
        Some(ErrorCode::ILLEGAL_ARGUMENT_CODE)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn branch_guards_resolve_against_the_instance() {
    let engine = engine();
    engine.register_event_ref(EventKind::Signal, "go");
    engine.register_delegate(Arc::new(FnDelegate::new("prepare", |ctx| {
        ctx.set_local("x", 5);
        Ok(())
    })));
    engine
        .register_process(
            ProcessSpecification::builder("guarded", "Guarded")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::service_task("prepare", "prepare"))
                .node(FlowNode::catch_event(
                    "hold",
                    EventSource::catching(vec![EventDefinition::signal("go")]),
                ))
                .node(FlowNode::catch_event(
                    "idle",
                    EventSource::catching(vec![EventDefinition::signal("go")]),
                ))
                .node(FlowNode::gateway("join", GatewayKind::Parallel))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "prepare"))
                .flow(SequenceFlow::new("f3", "prepare", "hold"))
                .flow(SequenceFlow::new("f4", "fork", "idle"))
                .flow(SequenceFlow::new("f5", "hold", "join"))
                .flow(SequenceFlow::new("f6", "idle", "join"))
                .flow(SequenceFlow::new("f7", "join", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let coordinator = engine.coordinator();
    let root_id = engine
        .start_process("guarded", HashMap::from([(InlineStr::from("x"), Object::Int(1))]))
        .await
        .expect("started");

    let deadline = std::time::Instant::now() + TIMEOUT;
    let (holder, idler) = loop {
        let branches = coordinator.executions_of(&root_id);
        let waiting = |node: &str| {
            branches
                .iter()
                .find(|x| x.current_node.as_str() == node && x.status == ExecutionStatus::Waiting)
                .map(|x| x.execution_id.clone())
        };
        if let (Some(holder), Some(idler)) = (waiting("hold"), waiting("idle")) {
            break (holder, idler);
        }
        assert!(std::time::Instant::now() < deadline, "branches never waited");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    assert!(coordinator
        .evaluate_condition(&holder, Some("where x == 5"))
        .expect("evaluated"));
    assert!(coordinator
        .evaluate_condition(&idler, Some("where x == 1"))
        .expect("evaluated"));
    assert_eq!(
        coordinator
            .evaluate_condition(&idler, Some("missing > 0"))
            .err()
            .map(|x| x.code()),
        Some(ErrorCode::unresolved_variable_code())
    );

    coordinator.cancel(&root_id, "done").expect("cancelled");
}

/// Guards that name a single boolean variable.
struct FlagEvaluator;

impl Evaluator for FlagEvaluator {
    fn evaluate(&self, predicate: &str, scope: &RuleScopeResolver) -> FlowResult<bool> {
        scope.resolve(predicate)?.as_bool()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn guards_use_the_configured_evaluator() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
    let evaluators = EvaluatorRegistry::new();
    evaluators.register("flag", Arc::new(FlagEvaluator));

    let unknown = Properties {
        condition_evaluator: "sql".to_string(),
        ..Properties::default()
    };
    assert_eq!(
        ProcessEngine::with_evaluators(unknown, &evaluators)
            .err()
            .map(|x| x.code()),
        Some(ErrorCode::NOT_FOUND_CODE)
    );

    let properties = Properties {
        condition_evaluator: "flag".to_string(),
        ..Properties::default()
    };
    let engine = ProcessEngine::with_evaluators(properties, &evaluators).expect("engine");
    engine
        .register_process(
            ProcessSpecification::builder("review", "Review")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("check", GatewayKind::Exclusive))
                .node(FlowNode::end("accepted"))
                .node(FlowNode::end("rejected"))
                .flow(SequenceFlow::new("f1", "start", "check"))
                .flow(SequenceFlow::conditional("f2", "check", "accepted", "where approved"))
                .flow(SequenceFlow::default_flow("f3", "check", "rejected"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    for (approved, end) in [(true, "accepted"), (false, "rejected")] {
        let root = engine
            .run_to_completion(
                "review",
                HashMap::from([(InlineStr::from("approved"), Object::Boolean(approved))]),
                TIMEOUT,
            )
            .await
            .expect("finished");
        assert_eq!(root.status, ExecutionStatus::Completed);
        assert_eq!(root.current_node.as_str(), end);
    }
}
