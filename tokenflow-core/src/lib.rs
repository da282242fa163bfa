mod config;
mod dao;
mod model;
mod runtime;
mod service;
mod utils;

pub use config::Properties;
pub use dao::{ExecutionDao, InMemoryExecutionDao, InMemoryProcessDao, ProcessDao};
pub use model::{
    Execution, ExecutionStatus, MultipleEventAware, ProcessMetaData, ProcessMetaDataCache,
    RuleData, RuleScope,
};
pub use runtime::{
    ActivatedBranchesPolicy, AllIncomingPolicy, BranchSelector, CatchRegistration,
    ConditionEvaluator, CronExpression, DelegateContext, DispatchOutcome, EventBus,
    EventDispatcher, EventKey, EventMessage, EventMessageService, EventStart, Evaluator,
    EvaluatorRegistry, ExecutionCoordinator, FnDelegate, GatewayTransitionEvaluator,
    InMemoryEventMessageService, JoinContext, JoinKey, JoinOutcome, JoinPolicy,
    MessageFetchRequest, QuorumPolicy, RhaiEvaluator, RuleScopeResolver, TaskDelegate,
    TaskDelegateInvoker, TimerRegistration, TriggerScheduler,
};
pub use service::{ProcessEngine, ProcessService};
pub use utils::IdGenerator;
