use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokenflow_common::prelude::*;
use tokenflow_common::{
    EventKind, EventSource, EventSubProcess, FlowNode, GatewayKind, NodeKind, ProcessSpecification,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::Properties;
use crate::dao::{ExecutionDao, ProcessDao};
use crate::model::{Execution, ExecutionStatus, MultipleEventAware, ProcessMetaDataCache};
use crate::runtime::delegate::{DelegateContext, TaskDelegateInvoker};
use crate::runtime::evaluators::{ConditionEvaluator, RuleScopeResolver};
use crate::runtime::event::{CatchRegistration, EventDispatcher, EventMessage, EventStart};
use crate::runtime::gateway::{GatewayTransitionEvaluator, JoinOutcome};

/// What the advance loop does after one node visit.
enum Step {
    /// The execution moved to another node and stays ACTIVE.
    Continue,
    /// The execution waits, finished, or handed its branches to children.
    Park,
    /// A join was satisfied and the parent resumes at the join node.
    Handoff(InlineStr),
}

/// Drives executions through their process graph. Every state change of an execution is one
/// `update_execution` call; changes made from a stale snapshot fail with `Conflict`, which means
/// another task already moved the execution and the current loop stops.
pub struct ExecutionCoordinator {
    properties: Properties,
    process_dao: Arc<dyn ProcessDao>,
    execution_dao: Arc<dyn ExecutionDao>,
    gateway: Arc<GatewayTransitionEvaluator>,
    dispatcher: Arc<EventDispatcher>,
    condition_evaluator: Arc<ConditionEvaluator>,
    invoker: Arc<TaskDelegateInvoker>,
    metadata_cache: ProcessMetaDataCache,
    finished: Notify,
}

impl ExecutionCoordinator {
    pub fn new(
        properties: Properties,
        process_dao: Arc<dyn ProcessDao>,
        execution_dao: Arc<dyn ExecutionDao>,
        gateway: Arc<GatewayTransitionEvaluator>,
        dispatcher: Arc<EventDispatcher>,
        condition_evaluator: Arc<ConditionEvaluator>,
        invoker: Arc<TaskDelegateInvoker>,
    ) -> Self {
        Self {
            properties,
            process_dao,
            execution_dao,
            gateway,
            dispatcher,
            condition_evaluator,
            invoker,
            metadata_cache: ProcessMetaDataCache::new(),
            finished: Notify::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayTransitionEvaluator> {
        &self.gateway
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn invoker(&self) -> &Arc<TaskDelegateInvoker> {
        &self.invoker
    }

    /// Creates the root execution of a new instance of `process_id` and starts advancing it.
    /// Returns the id of the root, which is also the process instance id.
    pub async fn start_process(
        self: &Arc<Self>,
        process_id: &str,
        globals: HashMap<InlineStr, Object>,
    ) -> FlowResult<InlineStr> {
        let spec = self.process_dao.get_process(process_id)?;
        flow_ensure!(
            spec.executable,
            IllegalArgument,
            "Process {} is not executable",
            process_id
        );
        let metadata = self.metadata_cache.get(&spec);

        let mut root = Execution::new_root(spec.id.clone(), spec.start_node().clone(), globals);
        root.transition(ExecutionStatus::Active)?;
        let root_id = root.execution_id.clone();
        self.execution_dao.create_execution(root)?;

        if metadata.has_event_sub_process {
            for esp in spec.event_sub_processes() {
                if let Err(e) = self.watch_event_sub_process(&root_id, esp).await {
                    error!(
                        "Process instance {} cannot watch event sub-process {}: {}",
                        root_id, esp.start_node, e
                    );
                    self.fail_branch(&root_id, &e);
                    return Err(e);
                }
            }
        }

        info!(
            "Process instance {} of {} (revision {}) started",
            root_id, spec.id, spec.revision
        );
        self.spawn_advance(root_id.clone(), false);
        Ok(root_id)
    }

    /// Advances an ACTIVE execution until it waits, finishes, or hands over to its children.
    pub async fn advance(self: &Arc<Self>, execution_id: &str) -> FlowResult<()> {
        self.advance_from(execution_id.into(), false).await
    }

    /// `resumed` skips the wait or join of the node the execution is positioned at, because it
    /// already happened.
    async fn advance_from(self: &Arc<Self>, execution_id: InlineStr, resumed: bool) -> FlowResult<()> {
        let mut current = execution_id;
        let mut resumed = resumed;

        for _ in 0..self.properties.max_steps_per_advance {
            let execution = self.execution_dao.get_execution(&current)?;
            if execution.status != ExecutionStatus::Active {
                debug!("{} is not active, advance stops", execution.to_short_string());
                return Ok(());
            }
            let spec = self.process_dao.get_process(&execution.process_id)?;

            match self.step(execution, &spec, resumed).await {
                Ok(Step::Continue) => resumed = false,
                Ok(Step::Park) => return Ok(()),
                Ok(Step::Handoff(parent_id)) => {
                    current = parent_id;
                    resumed = true;
                }
                Err(e) if e.code() == ErrorCode::CONFLICT_CODE => {
                    debug!("Advance of {} superseded: {}", current, e.display_text());
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Execution {} waits: {}", current, e.display_text());
                    self.park_on_recoverable(&current);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Execution {} failed: {}", current, e.display_text());
                    self.fail_branch(&current, &e);
                    return Err(e);
                }
            }
        }

        let error = ErrorCode::IllegalState(format!(
            "Execution {} exceeded {} steps without waiting",
            current, self.properties.max_steps_per_advance
        ));
        error!("{}", error.display_text());
        self.fail_branch(&current, &error);
        Err(error)
    }

    fn spawn_advance(self: &Arc<Self>, execution_id: InlineStr, resumed: bool) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.advance_from(execution_id.clone(), resumed).await {
                debug!("Advance of {} ended with {}", execution_id, e.display_text());
            }
        })
    }

    async fn step(
        self: &Arc<Self>,
        execution: Execution,
        spec: &ProcessSpecification,
        resumed: bool,
    ) -> FlowResult<Step> {
        let node = spec.get_node(&execution.current_node)?;
        trace!("Visiting {}", execution.to_short_string());

        match &node.kind {
            NodeKind::StartEvent => self.leave(execution, spec, node),
            NodeKind::EndEvent { terminate: false } => self.complete(&execution),
            NodeKind::EndEvent { terminate: true } => self.terminate_instance(&execution),
            NodeKind::ServiceTask {
                delegate,
                error_boundary,
            } => {
                self.run_service_task(execution, spec, node, delegate, error_boundary.as_ref())
                    .await
            }
            NodeKind::Gateway(kind) => self.visit_gateway(execution, spec, node, *kind, resumed),
            NodeKind::EventGateway(source) | NodeKind::CatchEvent(source) => {
                if resumed {
                    self.leave(execution, spec, node)
                } else {
                    self.wait_for_event(execution, node, source).await
                }
            }
            NodeKind::ThrowEvent(source) => {
                let entity = MultipleEventAware::new(
                    execution.execution_id.clone(),
                    node.id.clone(),
                    source,
                );
                self.dispatcher
                    .throw(&entity, Object::Map(execution.locals.clone()))
                    .await?;
                self.leave(execution, spec, node)
            }
        }
    }

    /// Takes the outgoing flows of `node`. One flow, or an exclusive gateway, moves the
    /// execution in place; anything else forks. No outgoing flow is an implicit end.
    fn leave(
        self: &Arc<Self>,
        execution: Execution,
        spec: &ProcessSpecification,
        node: &FlowNode,
    ) -> FlowResult<Step> {
        let outgoing = spec.outgoing(&node.id);
        if outgoing.is_empty() {
            return self.complete(&execution);
        }
        let globals = self.globals_of(&execution)?;
        let scope = RuleScopeResolver::for_execution(&execution, &globals);

        if outgoing.len() == 1 || node.kind == NodeKind::Gateway(GatewayKind::Exclusive) {
            let flows = self.gateway.select_branches(spec, node, &scope)?;
            let target = flows.first().map(|x| x.target.clone()).ok_or_else(|| {
                ErrorCode::NoViableBranch(format!("No flow selected at {}", node.id))
            })?;
            self.move_to(&execution, target)?;
            Ok(Step::Continue)
        } else {
            let children = self.gateway.fork(&execution, spec, &scope)?;
            for child in children {
                self.spawn_advance(child.execution_id, false);
            }
            Ok(Step::Park)
        }
    }

    fn move_to(&self, execution: &Execution, target: InlineStr) -> FlowResult<Execution> {
        let version = execution.version;
        debug!(
            "Execution {} moves {} -> {}",
            execution.execution_id, execution.current_node, target
        );
        self.execution_dao
            .update_execution(&execution.execution_id, &mut |x| {
                ensure_version(x, version)?;
                x.current_node = target.clone();
                Ok(())
            })
    }

    fn complete(&self, execution: &Execution) -> FlowResult<Step> {
        let version = execution.version;
        let completed = self
            .execution_dao
            .update_execution(&execution.execution_id, &mut |x| {
                ensure_version(x, version)?;
                x.transition(ExecutionStatus::Completed)
            })?;
        info!("{} completed", completed.to_short_string());
        self.finish(&completed);
        Ok(Step::Park)
    }

    fn terminate_instance(&self, execution: &Execution) -> FlowResult<Step> {
        let version = execution.version;
        let node_id = execution.current_node.clone();
        self.execution_dao
            .update_execution(&execution.execution_id, &mut |x| {
                ensure_version(x, version)?;
                x.children.clear();
                x.transition(ExecutionStatus::Completed)
            })?;

        let root_id = execution.process_instance_id.clone();
        let reason = format!("Terminated by end event {}", node_id);
        let mut others = self.execution_dao.get_instance(&root_id);
        // the root ends last, waiters observe a finished instance
        others.sort_by_key(|x| x.is_root());
        for other in others {
            if !other.status.is_terminal() {
                let result = self
                    .execution_dao
                    .update_execution(&other.execution_id, &mut |x| {
                        if x.status.is_terminal() {
                            return Ok(());
                        }
                        x.children.clear();
                        if x.is_root() {
                            x.transition(ExecutionStatus::Completed)
                        } else {
                            x.error = Some(reason.as_str().into());
                            x.transition(ExecutionStatus::Terminated)
                        }
                    });
                if let Err(e) = result {
                    warn!("Failed to end {}: {}", other.execution_id, e.display_text());
                }
            }
            self.dispatcher.cancel_pending(&other.execution_id);
            self.gateway.close_joins_for(&other.execution_id);
        }

        info!(
            "Process instance {} terminated by end event {}",
            root_id, node_id
        );
        self.finished.notify_waiters();
        Ok(Step::Park)
    }

    async fn run_service_task(
        self: &Arc<Self>,
        execution: Execution,
        spec: &ProcessSpecification,
        node: &FlowNode,
        delegate: &InlineStr,
        error_boundary: Option<&InlineStr>,
    ) -> FlowResult<Step> {
        let globals = self.globals_of(&execution)?;
        let context = DelegateContext::new(&execution, globals.clone());

        let context = match self.invoker.invoke(delegate, context).await {
            Ok(context) => context,
            Err(e) if e.code() == ErrorCode::delegate_failed_code() => {
                let Some(boundary) = error_boundary else {
                    return Err(e);
                };
                // a branch with a boundary is never stored in ERROR
                let boundary = boundary.clone();
                let version = execution.version;
                self.execution_dao
                    .update_execution(&execution.execution_id, &mut |x| {
                        ensure_version(x, version)?;
                        x.error_code = Some(e.code());
                        x.error = Some(e.message().into());
                        x.route_to_boundary(&boundary)
                    })?;
                return Ok(Step::Continue);
            }
            Err(e) => return Err(e),
        };

        let (locals, written_globals) = context.into_variables();
        let changed_globals = written_globals
            .into_iter()
            .filter(|(k, v)| globals.get(k) != Some(v))
            .collect::<Vec<_>>();
        let version = execution.version;
        let is_root = execution.is_root();
        let committed = self
            .execution_dao
            .update_execution(&execution.execution_id, &mut |x| {
                ensure_version(x, version)?;
                x.locals = locals.clone();
                if is_root {
                    x.globals.extend(changed_globals.iter().cloned());
                }
                Ok(())
            })?;
        if !is_root && !changed_globals.is_empty() {
            self.execution_dao
                .update_execution(&execution.process_instance_id, &mut |x| {
                    x.globals.extend(changed_globals.iter().cloned());
                    Ok(())
                })?;
        }

        self.leave(committed, spec, node)
    }

    fn visit_gateway(
        self: &Arc<Self>,
        execution: Execution,
        spec: &ProcessSpecification,
        node: &FlowNode,
        kind: GatewayKind,
        resumed: bool,
    ) -> FlowResult<Step> {
        let joins = !resumed
            && kind != GatewayKind::Exclusive
            && execution.parent_id.is_some()
            && spec.incoming(&node.id).len() > 1;
        if !joins {
            return self.leave(execution, spec, node);
        }

        match self.gateway.arrive(&execution, spec) {
            Ok(JoinOutcome::Pending { arrived }) => {
                let version = execution.version;
                self.execution_dao
                    .update_execution(&execution.execution_id, &mut |x| {
                        ensure_version(x, version)?;
                        x.transition(ExecutionStatus::Waiting)
                    })?;
                debug!(
                    "Execution {} parked at join {} ({} arrived)",
                    execution.execution_id, node.id, arrived
                );
                if let Some(parent_id) = &execution.parent_id {
                    self.settle(parent_id);
                }
                Ok(Step::Park)
            }
            Ok(JoinOutcome::Satisfied { arrived }) => self.promote_parent(&execution, &arrived),
            Ok(JoinOutcome::AlreadySatisfied) => {
                self.drop_branch(&execution, "join already satisfied");
                Ok(Step::Park)
            }
            Err(e) if e.code() == ErrorCode::stale_join_code() => {
                warn!("{}", e.display_text());
                self.drop_branch(&execution, e.display_text());
                Ok(Step::Park)
            }
            Err(e) => Err(e),
        }
    }

    /// Resumes the parent at the join node with the LOCAL variables of the arrived branches merged
    /// in arrival order, then retires the branches.
    fn promote_parent(&self, execution: &Execution, arrived: &[InlineStr]) -> FlowResult<Step> {
        let parent_id = execution.parent_id.clone().ok_or_else(|| {
            ErrorCode::IllegalState(format!("{} joined without parent", execution.execution_id))
        })?;

        let mut merged = Vec::with_capacity(arrived.len());
        for id in arrived {
            if id == &execution.execution_id {
                merged.push(execution.locals.clone());
            } else if let Ok(branch) = self.execution_dao.get_execution(id) {
                merged.push(branch.locals);
            }
        }

        let join_node = execution.current_node.clone();
        let generation = execution.fork_generation;
        let mut former_children = BTreeSet::default();
        let promoted = self.execution_dao.update_execution(&parent_id, &mut |x| {
            flow_ensure!(
                x.status == ExecutionStatus::Waiting && x.forks_performed == generation + 1,
                StaleJoin,
                "Parent {} left the fork before join {} was satisfied",
                x.execution_id,
                join_node
            );
            for locals in &merged {
                x.locals.extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            former_children = std::mem::take(&mut x.children);
            x.current_node = join_node.clone();
            x.transition(ExecutionStatus::Active)
        })?;

        for id in arrived {
            let result = self.execution_dao.update_execution(id, &mut |x| {
                if x.status.is_terminal() {
                    return Ok(());
                }
                x.transition(ExecutionStatus::Terminated)
            });
            if let Err(e) = result {
                warn!("Failed to retire joined branch {}: {}", id, e.display_text());
            }
            self.dispatcher.cancel_pending(id);
        }
        for id in former_children.iter().filter(|x| !arrived.contains(x)) {
            if let Err(e) = self.cancel_tree(id, "join satisfied without this branch") {
                warn!("Failed to cancel branch {}: {}", id, e.display_text());
            }
        }

        info!(
            "{} resumed after join of {} branches",
            promoted.to_short_string(),
            arrived.len()
        );
        Ok(Step::Handoff(parent_id))
    }

    /// Parks the execution at a catching node and races its event definitions in the
    /// background. Nothing is registered when a reference does not resolve.
    async fn wait_for_event(
        self: &Arc<Self>,
        execution: Execution,
        node: &FlowNode,
        source: &EventSource,
    ) -> FlowResult<Step> {
        let version = execution.version;
        self.execution_dao
            .update_execution(&execution.execution_id, &mut |x| {
                ensure_version(x, version)?;
                x.transition(ExecutionStatus::Waiting)
            })?;

        let entity = Arc::new(MultipleEventAware::new(
            execution.execution_id.clone(),
            node.id.clone(),
            source,
        ));
        let registration = self.dispatcher.catch(entity).await?;
        // a cancellation that ran before the registration existed could not abort it
        let current = self.execution_dao.get_execution(&execution.execution_id)?;
        if current.status != ExecutionStatus::Waiting || current.current_node != node.id {
            debug!(
                "{} left {} while registering, race dropped",
                current.to_short_string(),
                node.id
            );
            return Ok(Step::Park);
        }
        self.spawn_resume(registration, node.id.clone());
        Ok(Step::Park)
    }

    fn spawn_resume(self: &Arc<Self>, registration: CatchRegistration, node_id: InlineStr) {
        let this = self.clone();
        tokio::spawn(async move {
            let execution_id = registration.entity().execution_id().clone();
            let start = match registration.wait().await {
                Ok(start) => start,
                Err(e) => {
                    debug!(
                        "Event wait of {} at {} ended: {}",
                        execution_id,
                        node_id,
                        e.display_text()
                    );
                    return;
                }
            };
            match this.activate_after_event(&execution_id, &node_id, &start) {
                Ok(resumed) => {
                    this.spawn_advance(execution_id, resumed);
                }
                Err(e) if e.code() == ErrorCode::CONFLICT_CODE => {
                    debug!("{}", e.display_text());
                }
                Err(e) => {
                    warn!("Execution {} cannot resume: {}", execution_id, e.display_text());
                    this.fail_branch(&execution_id, &e);
                }
            }
        });
    }

    /// Reactivates an execution whose event race was won. An event gateway moves to the flow
    /// matching the winning definition. Returns whether the node still has to be left.
    fn activate_after_event(
        &self,
        execution_id: &InlineStr,
        node_id: &InlineStr,
        start: &EventStart,
    ) -> FlowResult<bool> {
        let execution = self.execution_dao.get_execution(execution_id)?;
        let spec = self.process_dao.get_process(&execution.process_id)?;
        let node = spec.get_node(node_id)?;
        let target = match node.kind {
            NodeKind::EventGateway(_) => {
                let flow = spec.outgoing(node_id).get(start.index).copied().ok_or_else(|| {
                    ErrorCode::IllegalState(format!(
                        "Event gateway {} has no outgoing flow for definition {}",
                        node_id, start.index
                    ))
                })?;
                Some(flow.target.clone())
            }
            _ => None,
        };

        let activated = self.execution_dao.update_execution(execution_id, &mut |x| {
            flow_ensure!(
                x.status == ExecutionStatus::Waiting && &x.current_node == node_id,
                Conflict,
                "Execution {} no longer waits at {}",
                x.execution_id,
                node_id
            );
            if start.definition.kind() == EventKind::Message {
                x.locals
                    .insert(start.definition.reference().clone(), start.payload.clone());
            }
            x.started_by = Some(start.definition.clone());
            if let Some(target) = &target {
                x.current_node = target.clone();
            }
            x.transition(ExecutionStatus::Active)
        })?;
        info!(
            "{} resumed by {}",
            activated.to_short_string(),
            start.definition
        );
        Ok(target.is_none())
    }

    async fn watch_event_sub_process(
        self: &Arc<Self>,
        root_id: &InlineStr,
        esp: &EventSubProcess,
    ) -> FlowResult<()> {
        let entity = Arc::new(MultipleEventAware::new(
            root_id.clone(),
            esp.start_node.clone(),
            &esp.trigger,
        ));
        let registration = self.dispatcher.catch(entity).await?;
        let this = self.clone();
        let root_id = root_id.clone();
        let start_node = esp.start_node.clone();
        tokio::spawn(async move {
            match registration.wait().await {
                Ok(start) => {
                    if let Err(e) = this.interrupt(&root_id, &start_node, &start) {
                        warn!(
                            "Event sub-process {} of {} did not start: {}",
                            start_node,
                            root_id,
                            e.display_text()
                        );
                    }
                }
                Err(e) => debug!(
                    "Event sub-process {} of {} stopped watching: {}",
                    start_node,
                    root_id,
                    e.display_text()
                ),
            }
        });
        Ok(())
    }

    /// Cancels every token below the root and restarts the root at an event sub-process start.
    fn interrupt(
        self: &Arc<Self>,
        root_id: &InlineStr,
        start_node: &InlineStr,
        start: &EventStart,
    ) -> FlowResult<()> {
        let root = self.execution_dao.get_execution(root_id)?;
        flow_ensure!(
            !root.status.is_terminal(),
            Conflict,
            "Process instance {} already finished",
            root_id
        );

        for child in self.execution_dao.get_children(root_id) {
            if !child.status.is_terminal() {
                self.cancel_tree(&child.execution_id, "interrupted by event sub-process")?;
            }
        }
        self.dispatcher.cancel_pending(root_id);
        self.gateway.close_joins_for(root_id);

        self.execution_dao.update_execution(root_id, &mut |x| {
            flow_ensure!(
                !x.status.is_terminal(),
                Conflict,
                "Process instance {} already finished",
                x.execution_id
            );
            x.children.clear();
            x.current_node = start_node.clone();
            x.started_by = Some(start.definition.clone());
            if x.status == ExecutionStatus::Waiting {
                x.transition(ExecutionStatus::Active)?;
            }
            Ok(())
        })?;
        info!(
            "Process instance {} interrupted by {}, restarting at {}",
            root_id, start.definition, start_node
        );
        self.spawn_advance(root_id.clone(), false);
        Ok(())
    }

    /// Cancels an execution with its descendants and their event registrations.
    pub fn cancel(&self, execution_id: &str, reason: &str) -> FlowResult<()> {
        let execution = self.execution_dao.get_execution(execution_id)?;
        flow_ensure!(
            !execution.status.is_terminal(),
            IllegalState,
            "Execution {} is already {}",
            execution_id,
            execution.status.as_ref()
        );
        let cancelled = self.cancel_tree(execution_id, reason)?;
        info!("{} cancelled: {}", cancelled.to_short_string(), reason);
        self.finish(&cancelled);
        Ok(())
    }

    fn cancel_tree(&self, execution_id: &str, reason: &str) -> FlowResult<Execution> {
        for child in self.execution_dao.get_children(execution_id) {
            if !child.status.is_terminal() {
                self.cancel_tree(&child.execution_id, reason)?;
            }
        }
        let cancelled = self.execution_dao.update_execution(execution_id, &mut |x| {
            if x.status.is_terminal() {
                return Ok(());
            }
            x.children.clear();
            x.error = Some(reason.into());
            x.transition(ExecutionStatus::Terminated)
        })?;
        self.dispatcher.cancel_pending(execution_id);
        self.gateway.close_joins_for(execution_id);
        Ok(cancelled)
    }

    /// Ends a branch that must not continue, without failing it.
    fn drop_branch(&self, execution: &Execution, reason: &str) {
        let result = self
            .execution_dao
            .update_execution(&execution.execution_id, &mut |x| {
                if x.status.is_terminal() {
                    return Ok(());
                }
                x.error = Some(reason.into());
                x.transition(ExecutionStatus::Terminated)
            });
        self.dispatcher.cancel_pending(&execution.execution_id);
        match result {
            Ok(dropped) => debug!("{} dropped: {}", dropped.to_short_string(), reason),
            Err(e) => warn!(
                "Failed to drop {}: {}",
                execution.execution_id,
                e.display_text()
            ),
        }
    }

    /// Moves the execution to ERROR unless it already ended, then settles what depends on it.
    fn fail_branch(&self, execution_id: &str, error: &ErrorCode) {
        let mut failed_now = false;
        let result = self.execution_dao.update_execution(execution_id, &mut |x| {
            if x.status.is_terminal() {
                return Ok(());
            }
            failed_now = true;
            x.fail(error)
        });
        match result {
            Ok(failed) if failed_now => self.finish(&failed),
            Ok(_) => {}
            Err(e) => warn!(
                "Failed to record failure of {}: {}",
                execution_id,
                e.display_text()
            ),
        }
    }

    fn park_on_recoverable(&self, execution_id: &str) {
        let result = self.execution_dao.update_execution(execution_id, &mut |x| {
            if x.status == ExecutionStatus::Active {
                x.transition(ExecutionStatus::Waiting)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Failed to park {}: {}", execution_id, e.display_text());
        }
    }

    /// Releases what a terminal execution held and settles its parent, or closes the instance
    /// when it is the root.
    fn finish(&self, execution: &Execution) {
        self.dispatcher.cancel_pending(&execution.execution_id);
        self.gateway.close_joins_for(&execution.execution_id);
        match &execution.parent_id {
            Some(parent_id) => self.settle(parent_id),
            None => self.close_instance(execution),
        }
    }

    fn close_instance(&self, root: &Execution) {
        for other in self.execution_dao.get_instance(&root.process_instance_id) {
            if other.status.is_terminal() {
                continue;
            }
            let result = self
                .execution_dao
                .update_execution(&other.execution_id, &mut |x| {
                    if x.status.is_terminal() {
                        return Ok(());
                    }
                    x.error = Some("process instance finished".into());
                    x.transition(ExecutionStatus::Terminated)
                });
            if let Err(e) = result {
                warn!("Failed to close {}: {}", other.execution_id, e.display_text());
            }
            self.dispatcher.cancel_pending(&other.execution_id);
        }
        info!(
            "Process instance {} finished as {}",
            root.process_instance_id,
            root.status.as_ref()
        );
        self.finished.notify_waiters();
    }

    /// Finishes a WAITING parent once none of its children can make progress: every child
    /// ended or is parked at a join nobody else will reach. The parked ones are terminated and
    /// the parent completes, or moves to ERROR when a child failed.
    fn settle(&self, parent_id: &str) {
        match self.try_settle(parent_id) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::CONFLICT_CODE => {
                debug!("Settlement of {} superseded", parent_id)
            }
            Err(e) => warn!("Failed to settle {}: {}", parent_id, e.display_text()),
        }
    }

    fn try_settle(&self, parent_id: &str) -> FlowResult<()> {
        let parent = self.execution_dao.get_execution(parent_id)?;
        if parent.status != ExecutionStatus::Waiting || parent.children.is_empty() {
            return Ok(());
        }
        let spec = self.process_dao.get_process(&parent.process_id)?;

        let mut parked = Vec::default();
        let mut failure = None;
        for child_id in &parent.children {
            let Ok(child) = self.execution_dao.get_execution(child_id) else {
                continue;
            };
            if child.status.is_terminal() {
                if child.status == ExecutionStatus::Error && failure.is_none() {
                    failure = Some(ErrorCode::create(
                        child.error_code.unwrap_or_else(ErrorCode::unknown_exception_code),
                        child.error.as_deref().unwrap_or_default().to_string(),
                        None,
                    ));
                }
                continue;
            }
            let at_join = child.status == ExecutionStatus::Waiting
                && child.children.is_empty()
                && spec
                    .get_node(&child.current_node)
                    .map(|x| x.is_gateway())
                    .unwrap_or(false);
            if !at_join {
                return Ok(());
            }
            parked.push(child.execution_id);
        }

        let version = parent.version;
        let settled = self.execution_dao.update_execution(parent_id, &mut |x| {
            ensure_version(x, version)?;
            x.children.clear();
            match &failure {
                Some(error) => x.fail(error),
                None => x.transition(ExecutionStatus::Completed),
            }
        })?;
        for id in &parked {
            let result = self.execution_dao.update_execution(id, &mut |x| {
                if x.status.is_terminal() {
                    return Ok(());
                }
                x.error = Some("join can no longer be satisfied".into());
                x.transition(ExecutionStatus::Terminated)
            });
            if let Err(e) = result {
                warn!("Failed to retire parked branch {}: {}", id, e.display_text());
            }
        }
        info!(
            "{} settled, {} parked branches retired",
            settled.to_short_string(),
            parked.len()
        );
        self.finish(&settled);
        Ok(())
    }

    fn globals_of(&self, execution: &Execution) -> FlowResult<HashMap<InlineStr, Object>> {
        if execution.is_root() {
            Ok(execution.globals.clone())
        } else {
            self.execution_dao
                .get_execution(&execution.process_instance_id)
                .map(|x| x.globals)
        }
    }

    /// Evaluates a guard against the variables of a running execution.
    pub fn evaluate_condition(&self, execution_id: &str, condition: Option<&str>) -> FlowResult<bool> {
        let execution = self.execution_dao.get_execution(execution_id)?;
        let globals = self.globals_of(&execution)?;
        let scope = RuleScopeResolver::for_execution(&execution, &globals);
        self.condition_evaluator.evaluate(condition, &scope)
    }

    pub fn outcome(&self, execution_id: &str) -> FlowResult<Execution> {
        self.execution_dao.get_execution(execution_id)
    }

    pub fn executions_of(&self, process_instance_id: &str) -> Vec<Execution> {
        self.execution_dao.get_instance(process_instance_id)
    }

    /// Waits until the execution reaches a terminal status.
    pub async fn wait_for_outcome(&self, execution_id: &str, timeout: Duration) -> FlowResult<Execution> {
        self.wait_until(execution_id, timeout, |x| x.status.is_terminal())
            .await
    }

    pub async fn wait_for_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        timeout: Duration,
    ) -> FlowResult<Execution> {
        self.wait_until(execution_id, timeout, |x| x.status == status)
            .await
    }

    async fn wait_until(
        &self,
        execution_id: &str,
        timeout: Duration,
        reached: impl Fn(&Execution) -> bool,
    ) -> FlowResult<Execution> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.finished.notified();
            let execution = self.execution_dao.get_execution(execution_id)?;
            if reached(&execution) {
                return Ok(execution);
            }
            let now = Instant::now();
            if now >= deadline {
                return fmt_err!(
                    IllegalState,
                    "{} still {} after {:?}",
                    execution.to_short_string(),
                    execution.status.as_ref(),
                    timeout
                );
            }
            let _ = tokio::time::timeout((deadline - now).min(POLL_INTERVAL), notified).await;
        }
    }

    /// Broadcasts a signal to every catcher waiting for `signal_ref`.
    pub async fn signal(&self, signal_ref: &str, payload: Object) -> FlowResult<usize> {
        self.dispatcher
            .messages()
            .publish(EventMessage::new(EventKind::Signal, signal_ref, payload))
            .await
    }

    /// Delivers a message to one catcher waiting for `message_ref`, or queues it.
    pub async fn send_message(&self, message_ref: &str, payload: Object) -> FlowResult<usize> {
        self.dispatcher
            .messages()
            .publish(EventMessage::new(EventKind::Message, message_ref, payload))
            .await
    }

    pub fn fire_timers(&self, now: &DateTime<Utc>) -> usize {
        self.dispatcher.scheduler().fire_due(now)
    }

    pub fn spawn_timer_ticker(&self) -> JoinHandle<()> {
        self.dispatcher
            .scheduler()
            .clone()
            .spawn_ticker(Duration::from_millis(self.properties.timer_tick_interval_ms.max(1)))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn ensure_version(execution: &Execution, version: u64) -> FlowResult<()> {
    flow_ensure!(
        execution.version == version,
        Conflict,
        "{} changed since version {}",
        execution.to_short_string(),
        version
    );
    Ok(())
}
