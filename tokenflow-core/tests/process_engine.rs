use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use tokenflow_common::prelude::*;
use tokenflow_common::{
    EventDefinition, EventKind, EventSource, EventSubProcess, FlowNode, GatewayKind,
    ProcessSpecification, SequenceFlow,
};
use tokenflow_core::{
    ExecutionStatus, FnDelegate, ProcessEngine, Properties, QuorumPolicy,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

fn engine() -> ProcessEngine {
    init_logger();
    ProcessEngine::new(Properties::default()).expect("engine")
}

fn globals(entries: &[(&str, Object)]) -> HashMap<InlineStr, Object> {
    entries
        .iter()
        .map(|(k, v)| (InlineStr::from(*k), v.clone()))
        .collect()
}

fn set_local(engine: &ProcessEngine, delegate: &'static str, name: &'static str, value: i32) {
    engine.register_delegate(Arc::new(FnDelegate::new(delegate, move |ctx| {
        ctx.set_local(name, value);
        Ok(())
    })));
}

fn failing(engine: &ProcessEngine, delegate: &'static str) {
    engine.register_delegate(Arc::new(FnDelegate::new(delegate, |_| {
        str_err!(IllegalState, "card declined")
    })));
}

/// Repeats `signal` until a catcher was reached.
async fn signal_when_caught(engine: &ProcessEngine, signal_ref: &str) {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while engine
        .coordinator()
        .signal(signal_ref, Object::Null)
        .await
        .expect("signal")
        == 0
    {
        assert!(std::time::Instant::now() < deadline, "nobody caught {}", signal_ref);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequential_tasks_update_variables_and_route() {
    let engine = engine();
    engine.register_delegate(Arc::new(FnDelegate::new("reserve", |ctx| {
        let stock = ctx
            .get_variable("stock")
            .map(|x| x.as_i64())
            .transpose()?
            .unwrap_or(0);
        ctx.set_global("stock", stock - 1);
        ctx.set_local("reserved", true);
        Ok(())
    })));
    engine
        .register_process(
            ProcessSpecification::builder("order", "Order")
                .node(FlowNode::start("start"))
                .node(FlowNode::service_task("reserve", "reserve"))
                .node(FlowNode::gateway("check", GatewayKind::Exclusive))
                .node(FlowNode::end("ok"))
                .node(FlowNode::end("empty"))
                .flow(SequenceFlow::new("f1", "start", "reserve"))
                .flow(SequenceFlow::new("f2", "reserve", "check"))
                .flow(SequenceFlow::conditional("f3", "check", "ok", "where stock > 0"))
                .flow(SequenceFlow::default_flow("f4", "check", "empty"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("order", globals(&[("stock", Object::Int(5))]), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.current_node.as_str(), "ok");
    assert_eq!(root.globals.get("stock"), Some(&Object::Long(4)));
    assert_eq!(root.locals.get("reserved"), Some(&Object::Boolean(true)));

    let root = engine
        .run_to_completion("order", globals(&[("stock", Object::Int(1))]), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.current_node.as_str(), "empty");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_branches_join_and_merge_locals() {
    let engine = engine();
    set_local(&engine, "bill", "billed", 1);
    set_local(&engine, "ship", "shipped", 2);
    engine.register_delegate(Arc::new(FnDelegate::new("archive", |ctx| {
        let billed = ctx.get_variable("billed").map(|x| x.as_i64()).transpose()?;
        let shipped = ctx.get_variable("shipped").map(|x| x.as_i64()).transpose()?;
        ctx.set_global("total", billed.unwrap_or(0) + shipped.unwrap_or(0));
        Ok(())
    })));
    engine
        .register_process(
            ProcessSpecification::builder("fulfil", "Fulfil")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::service_task("bill", "bill"))
                .node(FlowNode::service_task("ship", "ship"))
                .node(FlowNode::gateway("join", GatewayKind::Parallel))
                .node(FlowNode::service_task("archive", "archive"))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "bill"))
                .flow(SequenceFlow::new("f3", "fork", "ship"))
                .flow(SequenceFlow::new("f4", "bill", "join"))
                .flow(SequenceFlow::new("f5", "ship", "join"))
                .flow(SequenceFlow::new("f6", "join", "archive"))
                .flow(SequenceFlow::new("f7", "archive", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("fulfil", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.forks_performed, 1);
    assert!(root.children.is_empty());
    assert_eq!(root.locals.get("billed"), Some(&Object::Int(1)));
    assert_eq!(root.locals.get("shipped"), Some(&Object::Int(2)));
    assert_eq!(root.globals.get("total"), Some(&Object::Long(3)));

    let branches = engine
        .coordinator()
        .executions_of(&root.execution_id)
        .into_iter()
        .filter(|x| !x.is_root())
        .collect::<Vec<_>>();
    assert_eq!(branches.len(), 2);
    assert!(branches
        .iter()
        .all(|x| x.status == ExecutionStatus::Terminated));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inclusive_join_waits_only_for_activated_branches() {
    let engine = engine();
    set_local(&engine, "a", "a", 1);
    set_local(&engine, "b", "b", 1);
    set_local(&engine, "c", "c", 1);
    engine
        .register_process(
            ProcessSpecification::builder("review", "Review")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Inclusive))
                .node(FlowNode::service_task("a", "a"))
                .node(FlowNode::service_task("b", "b"))
                .node(FlowNode::service_task("c", "c"))
                .node(FlowNode::gateway("join", GatewayKind::Inclusive))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::conditional("fa", "fork", "a", "amount > 100"))
                .flow(SequenceFlow::conditional("fb", "fork", "b", "amount > 1000"))
                .flow(SequenceFlow::default_flow("fc", "fork", "c"))
                .flow(SequenceFlow::new("ja", "a", "join"))
                .flow(SequenceFlow::new("jb", "b", "join"))
                .flow(SequenceFlow::new("jc", "c", "join"))
                .flow(SequenceFlow::new("f9", "join", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("review", globals(&[("amount", Object::Int(500))]), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.current_node.as_str(), "end");
    assert!(root.locals.contains_key("a"));
    assert!(!root.locals.contains_key("b"));
    assert!(!root.locals.contains_key("c"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quorum_join_cancels_the_laggard() {
    let engine = engine();
    engine.register_event_ref(EventKind::Signal, "never");
    set_local(&engine, "a", "a", 1);
    set_local(&engine, "b", "b", 2);
    engine
        .register_process(
            ProcessSpecification::builder("quorum", "Quorum")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::service_task("a", "a"))
                .node(FlowNode::service_task("b", "b"))
                .node(FlowNode::catch_event(
                    "slow",
                    EventSource::catching(vec![EventDefinition::signal("never")]),
                ))
                .node(FlowNode::gateway("join", GatewayKind::Parallel))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "a"))
                .flow(SequenceFlow::new("f3", "fork", "b"))
                .flow(SequenceFlow::new("f4", "fork", "slow"))
                .flow(SequenceFlow::new("f5", "a", "join"))
                .flow(SequenceFlow::new("f6", "b", "join"))
                .flow(SequenceFlow::new("f7", "slow", "join"))
                .flow(SequenceFlow::new("f8", "join", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");
    engine.register_join_policy("quorum", "join", Arc::new(QuorumPolicy(2)));

    let root = engine
        .run_to_completion("quorum", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.locals.get("a"), Some(&Object::Int(1)));
    assert_eq!(root.locals.get("b"), Some(&Object::Int(2)));

    let laggard = engine
        .coordinator()
        .executions_of(&root.execution_id)
        .into_iter()
        .find(|x| x.current_node.as_str() == "slow")
        .expect("laggard branch");
    assert_eq!(laggard.status, ExecutionStatus::Terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_end_ends_every_token() {
    let engine = engine();
    engine.register_event_ref(EventKind::Signal, "never");
    engine
        .register_process(
            ProcessSpecification::builder("abort", "Abort")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::catch_event(
                    "wait",
                    EventSource::catching(vec![EventDefinition::signal("never")]),
                ))
                .node(FlowNode::terminate_end("kill"))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "wait"))
                .flow(SequenceFlow::new("f3", "fork", "kill"))
                .flow(SequenceFlow::new("f4", "wait", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("abort", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);

    let executions = engine.coordinator().executions_of(&root.execution_id);
    assert_eq!(executions.len(), 3);
    let waiting = executions
        .iter()
        .find(|x| x.current_node.as_str() == "wait")
        .expect("waiting branch");
    assert_eq!(waiting.status, ExecutionStatus::Terminated);
    assert!(waiting
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("kill"));
    let killer = executions
        .iter()
        .find(|x| x.current_node.as_str() == "kill")
        .expect("terminating branch");
    assert_eq!(killer.status, ExecutionStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_delegate_routes_to_error_boundary() {
    let engine = engine();
    failing(&engine, "charge");
    set_local(&engine, "refund", "refunded", 1);
    engine
        .register_process(
            ProcessSpecification::builder("payment", "Payment")
                .node(FlowNode::start("start"))
                .node(FlowNode::guarded_service_task("charge", "charge", "refund"))
                .node(FlowNode::service_task("refund", "refund"))
                .node(FlowNode::end("paid"))
                .node(FlowNode::end("refunded"))
                .flow(SequenceFlow::new("f1", "start", "charge"))
                .flow(SequenceFlow::new("f2", "charge", "paid"))
                .flow(SequenceFlow::new("f3", "refund", "refunded"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("payment", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.current_node.as_str(), "refunded");
    assert_eq!(root.locals.get("refunded"), Some(&Object::Int(1)));
    assert_eq!(root.error_code, Some(ErrorCode::delegate_failed_code()));
    assert!(root
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("card declined"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_branch_without_boundary_fails_the_instance() {
    let engine = engine();
    failing(&engine, "charge");
    set_local(&engine, "pack", "packed", 1);
    engine
        .register_process(
            ProcessSpecification::builder("split", "Split")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::service_task("charge", "charge"))
                .node(FlowNode::service_task("pack", "pack"))
                .node(FlowNode::gateway("join", GatewayKind::Parallel))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "charge"))
                .flow(SequenceFlow::new("f3", "fork", "pack"))
                .flow(SequenceFlow::new("f4", "charge", "join"))
                .flow(SequenceFlow::new("f5", "pack", "join"))
                .flow(SequenceFlow::new("f6", "join", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("split", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Error);
    assert_eq!(root.error_code, Some(ErrorCode::delegate_failed_code()));

    let executions = engine.coordinator().executions_of(&root.execution_id);
    let charge = executions
        .iter()
        .find(|x| x.current_node.as_str() == "charge")
        .expect("failed branch");
    assert_eq!(charge.status, ExecutionStatus::Error);
    let pack = executions
        .iter()
        .find(|x| x.locals.contains_key("packed"))
        .expect("sibling branch");
    assert_eq!(pack.status, ExecutionStatus::Terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn boundary_branch_reaches_the_join_with_a_slow_sibling() {
    let engine = engine();
    failing(&engine, "charge");
    set_local(&engine, "refund", "refunded", 1);
    engine.register_delegate(Arc::new(
        FnDelegate::new("pack", |ctx| {
            std::thread::sleep(Duration::from_millis(100));
            ctx.set_local("packed", 1);
            Ok(())
        })
        .spawned(),
    ));
    engine
        .register_process(
            ProcessSpecification::builder("order", "Order")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::guarded_service_task("charge", "charge", "refund"))
                .node(FlowNode::service_task("refund", "refund"))
                .node(FlowNode::service_task("pack", "pack"))
                .node(FlowNode::gateway("join", GatewayKind::Inclusive))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "charge"))
                .flow(SequenceFlow::new("f3", "fork", "pack"))
                .flow(SequenceFlow::new("f4", "charge", "join"))
                .flow(SequenceFlow::new("f5", "refund", "join"))
                .flow(SequenceFlow::new("f6", "pack", "join"))
                .flow(SequenceFlow::new("f7", "join", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("order", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.current_node.as_str(), "end");
    assert_eq!(root.locals.get("refunded"), Some(&Object::Int(1)));
    assert_eq!(root.locals.get("packed"), Some(&Object::Int(1)));

    let branches = engine
        .coordinator()
        .executions_of(&root.execution_id)
        .into_iter()
        .filter(|x| !x.is_root())
        .collect::<Vec<_>>();
    assert_eq!(branches.len(), 2);
    assert!(branches
        .iter()
        .all(|x| x.status == ExecutionStatus::Terminated));
    let charged = branches
        .iter()
        .find(|x| x.locals.contains_key("refunded"))
        .expect("refunded branch");
    assert_eq!(charged.error_code, Some(ErrorCode::delegate_failed_code()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn message_catch_resumes_with_payload() {
    let engine = engine();
    engine.register_event_ref(EventKind::Message, "paid");
    engine
        .register_process(
            ProcessSpecification::builder("invoice", "Invoice")
                .node(FlowNode::start("start"))
                .node(FlowNode::catch_event(
                    "await_payment",
                    EventSource::catching(vec![EventDefinition::message("paid")]),
                ))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "await_payment"))
                .flow(SequenceFlow::new("f2", "await_payment", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let coordinator = engine.coordinator();
    let root_id = engine
        .start_process("invoice", HashMap::default())
        .await
        .expect("started");
    let waiting = coordinator
        .wait_for_status(&root_id, ExecutionStatus::Waiting, TIMEOUT)
        .await
        .expect("waiting");
    assert_eq!(waiting.current_node.as_str(), "await_payment");

    // delivered or queued, the catch picks it up either way
    coordinator
        .send_message("paid", Object::Int(42))
        .await
        .expect("sent");
    let root = coordinator
        .wait_for_outcome(&root_id, TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.locals.get("paid"), Some(&Object::Int(42)));
    assert_eq!(root.started_by, Some(EventDefinition::message("paid")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn event_gateway_follows_the_first_event() {
    let engine = engine();
    engine.register_event_ref(EventKind::Message, "paid");
    engine.register_event_ref(EventKind::Signal, "cancel");
    engine
        .register_process(
            ProcessSpecification::builder("race", "Race")
                .node(FlowNode::start("start"))
                .node(FlowNode::event_gateway(
                    "race",
                    EventSource::catching(vec![
                        EventDefinition::message("paid"),
                        EventDefinition::signal("cancel"),
                        EventDefinition::timer("0 0 0 1 1 *"),
                    ]),
                ))
                .node(FlowNode::end("paid_end"))
                .node(FlowNode::end("cancel_end"))
                .node(FlowNode::end("timeout_end"))
                .flow(SequenceFlow::new("f1", "start", "race"))
                .flow(SequenceFlow::new("f2", "race", "paid_end"))
                .flow(SequenceFlow::new("f3", "race", "cancel_end"))
                .flow(SequenceFlow::new("f4", "race", "timeout_end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let coordinator = engine.coordinator();
    let root_id = engine
        .start_process("race", HashMap::default())
        .await
        .expect("started");
    signal_when_caught(&engine, "cancel").await;
    let root = coordinator
        .wait_for_outcome(&root_id, TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.current_node.as_str(), "cancel_end");
    assert_eq!(root.started_by, Some(EventDefinition::signal("cancel")));

    // the losing registrations are gone: the message finds nobody and the timer never fires
    assert_eq!(
        coordinator
            .send_message("paid", Object::Null)
            .await
            .expect("queued"),
        0
    );
    assert_eq!(coordinator.dispatcher().scheduler().pending(), 0);
    assert_eq!(coordinator.dispatcher().pending_count(&root_id), 0);
    let root = coordinator.outcome(&root_id).expect("stored");
    assert_eq!(root.current_node.as_str(), "cancel_end");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timer_catch_fires_through_the_scheduler() {
    let engine = engine();
    engine
        .register_process(
            ProcessSpecification::builder("reminder", "Reminder")
                .node(FlowNode::start("start"))
                .node(FlowNode::catch_event(
                    "tick",
                    EventSource::catching(vec![EventDefinition::timer("* * * * * *")]),
                ))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "tick"))
                .flow(SequenceFlow::new("f2", "tick", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let coordinator = engine.coordinator();
    let root_id = engine
        .start_process("reminder", HashMap::default())
        .await
        .expect("started");
    let deadline = std::time::Instant::now() + TIMEOUT;
    while coordinator.fire_timers(&(Utc::now() + chrono::Duration::seconds(2))) == 0 {
        assert!(std::time::Instant::now() < deadline, "timer never registered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let root = coordinator
        .wait_for_outcome(&root_id, TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_matches!(root.started_by, Some(EventDefinition::Timer { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn event_sub_process_interrupts_the_instance() {
    let engine = engine();
    engine.register_event_ref(EventKind::Message, "paid");
    engine.register_event_ref(EventKind::Signal, "abort");
    engine.register_delegate(Arc::new(FnDelegate::new("cleanup", |ctx| {
        ctx.set_global("cleaned", true);
        Ok(())
    })));
    engine
        .register_process(
            ProcessSpecification::builder("guarded", "Guarded")
                .node(FlowNode::start("start"))
                .node(FlowNode::catch_event(
                    "await_payment",
                    EventSource::catching(vec![EventDefinition::message("paid")]),
                ))
                .node(FlowNode::end("done"))
                .node(FlowNode::start("abort_start"))
                .node(FlowNode::service_task("cleanup", "cleanup"))
                .node(FlowNode::end("aborted"))
                .flow(SequenceFlow::new("f1", "start", "await_payment"))
                .flow(SequenceFlow::new("f2", "await_payment", "done"))
                .flow(SequenceFlow::new("e1", "abort_start", "cleanup"))
                .flow(SequenceFlow::new("e2", "cleanup", "aborted"))
                .event_sub_process(EventSubProcess::new(
                    "abort_start",
                    EventSource::catching(vec![EventDefinition::signal("abort")]),
                ))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let coordinator = engine.coordinator();
    let root_id = engine
        .start_process("guarded", HashMap::default())
        .await
        .expect("started");
    coordinator
        .wait_for_status(&root_id, ExecutionStatus::Waiting, TIMEOUT)
        .await
        .expect("waiting for payment");
    signal_when_caught(&engine, "abort").await;

    let root = coordinator
        .wait_for_outcome(&root_id, TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Completed);
    assert_eq!(root.current_node.as_str(), "aborted");
    assert_eq!(root.globals.get("cleaned"), Some(&Object::Boolean(true)));
    assert_eq!(root.started_by, Some(EventDefinition::signal("abort")));
    assert_eq!(coordinator.dispatcher().pending_count(&root_id), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_cascades_to_waiting_branches() {
    let engine = engine();
    engine.register_event_ref(EventKind::Signal, "left");
    engine.register_event_ref(EventKind::Signal, "right");
    engine
        .register_process(
            ProcessSpecification::builder("pair", "Pair")
                .node(FlowNode::start("start"))
                .node(FlowNode::gateway("fork", GatewayKind::Parallel))
                .node(FlowNode::catch_event(
                    "left",
                    EventSource::catching(vec![EventDefinition::signal("left")]),
                ))
                .node(FlowNode::catch_event(
                    "right",
                    EventSource::catching(vec![EventDefinition::signal("right")]),
                ))
                .node(FlowNode::gateway("join", GatewayKind::Parallel))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "fork"))
                .flow(SequenceFlow::new("f2", "fork", "left"))
                .flow(SequenceFlow::new("f3", "fork", "right"))
                .flow(SequenceFlow::new("f4", "left", "join"))
                .flow(SequenceFlow::new("f5", "right", "join"))
                .flow(SequenceFlow::new("f6", "join", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let coordinator = engine.coordinator();
    let root_id = engine
        .start_process("pair", HashMap::default())
        .await
        .expect("started");

    let deadline = std::time::Instant::now() + TIMEOUT;
    let branches = loop {
        let branches = coordinator
            .executions_of(&root_id)
            .into_iter()
            .filter(|x| !x.is_root())
            .collect::<Vec<_>>();
        if branches.len() == 2
            && branches
                .iter()
                .all(|x| coordinator.dispatcher().pending_count(&x.execution_id) == 1)
        {
            break branches;
        }
        assert!(std::time::Instant::now() < deadline, "branches never waited");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    coordinator.cancel(&root_id, "operator request").expect("cancelled");
    let root = coordinator.outcome(&root_id).expect("stored");
    assert_eq!(root.status, ExecutionStatus::Terminated);
    assert_eq!(root.error.as_deref(), Some("operator request"));
    for branch in branches {
        let branch = coordinator.outcome(&branch.execution_id).expect("stored");
        assert_eq!(branch.status, ExecutionStatus::Terminated);
        assert_eq!(coordinator.dispatcher().pending_count(&branch.execution_id), 0);
    }
    assert!(coordinator.cancel(&root_id, "again").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn endless_loops_are_cut_off() {
    init_logger();
    let engine = ProcessEngine::new(Properties {
        max_steps_per_advance: 50,
        ..Properties::default()
    })
    .expect("engine");
    set_local(&engine, "spin", "spun", 1);
    engine
        .register_process(
            ProcessSpecification::builder("spin", "Spin")
                .node(FlowNode::start("start"))
                .node(FlowNode::service_task("spin", "spin"))
                .node(FlowNode::gateway("again", GatewayKind::Exclusive))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "spin"))
                .flow(SequenceFlow::new("f2", "spin", "again"))
                .flow(SequenceFlow::conditional("f3", "again", "spin", "spun == 1"))
                .flow(SequenceFlow::default_flow("f4", "again", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");

    let root = engine
        .run_to_completion("spin", HashMap::default(), TIMEOUT)
        .await
        .expect("finished");
    assert_eq!(root.status, ExecutionStatus::Error);
    assert_eq!(root.error_code, Some(ErrorCode::illegal_state_code()));
}

#[tokio::test]
async fn unknown_and_non_executable_processes_do_not_start() {
    let engine = engine();
    assert_eq!(
        engine
            .start_process("missing", HashMap::default())
            .await
            .err()
            .map(|x| x.code()),
        Some(ErrorCode::NOT_FOUND_CODE)
    );

    engine
        .register_process(
            ProcessSpecification::builder("draft", "Draft")
                .executable(false)
                .node(FlowNode::start("start"))
                .node(FlowNode::end("end"))
                .flow(SequenceFlow::new("f1", "start", "end"))
                .build()
                .expect("valid graph"),
        )
        .expect("registered");
    assert_eq!(
        engine
            .start_process("draft", HashMap::default())
            .await
            .err()
            .map(|x| x.code()),
        Some(ErrorCode::ILLEGAL_ARGUMENT_CODE)
    );
}
