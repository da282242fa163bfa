use tokenflow_common::prelude::*;
use tokenflow_common::{EventKind, ProcessSpecification};

use super::ProcessService;
use crate::config::Properties;
use crate::dao::{ExecutionDao, InMemoryExecutionDao, InMemoryProcessDao, ProcessDao};
use crate::model::Execution;
use crate::runtime::{
    BranchSelector, EventBus, EventDispatcher, EvaluatorRegistry,
    ExecutionCoordinator, GatewayTransitionEvaluator, InMemoryEventMessageService, JoinPolicy,
    TaskDelegate, TaskDelegateInvoker, TriggerScheduler,
};

/// An engine wired with the in-memory stores and messaging.
pub struct ProcessEngine {
    process_service: ProcessService,
    messages: Arc<InMemoryEventMessageService>,
    coordinator: Arc<ExecutionCoordinator>,
}

impl ProcessEngine {
    pub fn new(properties: Properties) -> FlowResult<Self> {
        Self::with_evaluators(properties, &EvaluatorRegistry::new())
    }

    /// Builds an engine whose guards are evaluated by the evaluator `properties` names. Fails
    /// with `NotFound` when `evaluators` has no such evaluator.
    pub fn with_evaluators(
        properties: Properties,
        evaluators: &EvaluatorRegistry,
    ) -> FlowResult<Self> {
        let process_dao: Arc<dyn ProcessDao> = Arc::new(InMemoryProcessDao::new());
        let execution_dao: Arc<dyn ExecutionDao> = Arc::new(InMemoryExecutionDao::new());

        let condition_evaluator =
            Arc::new(evaluators.condition_evaluator(&properties.condition_evaluator)?);
        let bus = Arc::new(EventBus::new());
        let messages = Arc::new(InMemoryEventMessageService::new(bus.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(
            bus,
            messages.clone(),
            Arc::new(TriggerScheduler::new()),
            properties.message_fetch_batch,
        ));
        let gateway = Arc::new(GatewayTransitionEvaluator::new(
            execution_dao.clone(),
            condition_evaluator.clone(),
        ));
        let invoker = Arc::new(TaskDelegateInvoker::new(properties.delegate_timeout()));

        let coordinator = Arc::new(ExecutionCoordinator::new(
            properties,
            process_dao.clone(),
            execution_dao,
            gateway,
            dispatcher,
            condition_evaluator,
            invoker,
        ));
        Ok(Self {
            process_service: ProcessService::new(process_dao),
            messages,
            coordinator,
        })
    }

    pub fn from_env() -> FlowResult<Self> {
        Self::new(Properties::from_env())
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    pub fn process_service(&self) -> &ProcessService {
        &self.process_service
    }

    pub fn register_process(
        &self,
        spec: ProcessSpecification,
    ) -> FlowResult<Arc<ProcessSpecification>> {
        self.process_service.register_process(spec)
    }

    pub fn register_delegate(&self, delegate: Arc<dyn TaskDelegate>) {
        self.coordinator.invoker().register(delegate);
    }

    /// Makes a message or signal reference known to the messaging collaborator.
    pub fn register_event_ref(&self, kind: EventKind, reference: &str) {
        self.messages.register_ref(kind, reference);
    }

    pub fn register_join_policy(&self, process_id: &str, node_id: &str, policy: Arc<dyn JoinPolicy>) {
        self.coordinator
            .gateway()
            .register_join_policy(process_id, node_id, policy);
    }

    pub fn register_branch_selector(
        &self,
        process_id: &str,
        node_id: &str,
        selector: Arc<dyn BranchSelector>,
    ) {
        self.coordinator
            .gateway()
            .register_branch_selector(process_id, node_id, selector);
    }

    pub async fn start_process(
        &self,
        process_id: &str,
        globals: HashMap<InlineStr, Object>,
    ) -> FlowResult<InlineStr> {
        self.coordinator.start_process(process_id, globals).await
    }

    pub async fn run_to_completion(
        &self,
        process_id: &str,
        globals: HashMap<InlineStr, Object>,
        timeout: std::time::Duration,
    ) -> FlowResult<Execution> {
        let root_id = self.start_process(process_id, globals).await?;
        self.coordinator.wait_for_outcome(&root_id, timeout).await
    }
}
