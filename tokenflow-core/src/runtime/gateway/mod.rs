mod gateway_transition_evaluator;
mod join_policy;

pub use gateway_transition_evaluator::{GatewayTransitionEvaluator, JoinKey, JoinOutcome};
pub use join_policy::{
    ActivatedBranchesPolicy, AllIncomingPolicy, BranchSelector, JoinContext, JoinPolicy,
    QuorumPolicy,
};
