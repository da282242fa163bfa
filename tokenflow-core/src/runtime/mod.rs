mod delegate;
mod evaluators;
mod event;
mod execution;
mod gateway;
mod scheduler;

pub use delegate::{DelegateContext, FnDelegate, TaskDelegate, TaskDelegateInvoker};
pub use evaluators::{
    ConditionEvaluator, Evaluator, EvaluatorRegistry, RhaiEvaluator, RuleScopeResolver,
};
pub use event::{
    CatchRegistration, DispatchOutcome, EventBus, EventDispatcher, EventKey, EventMessage,
    EventMessageService, EventStart, InMemoryEventMessageService, MessageFetchRequest,
};
pub use execution::ExecutionCoordinator;
pub use gateway::{
    ActivatedBranchesPolicy, AllIncomingPolicy, BranchSelector, GatewayTransitionEvaluator,
    JoinContext, JoinKey, JoinOutcome, JoinPolicy, QuorumPolicy,
};
pub use scheduler::{CronExpression, TimerRegistration, TriggerScheduler};
