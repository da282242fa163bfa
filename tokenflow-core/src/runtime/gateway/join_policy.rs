use tokenflow_common::prelude::*;
use tokenflow_common::{FlowNode, SequenceFlow};

use crate::runtime::evaluators::RuleScopeResolver;

/// What a join policy gets to see about one join instance.
#[derive(Clone, Copy, Debug)]
pub struct JoinContext<'a> {
    pub join_node: &'a str,
    /// Incoming sequence flows of the join node.
    pub incoming: usize,
    /// Branches the matching fork activated.
    pub activated: usize,
    /// Distinct branches arrived so far, the current one included.
    pub arrived: usize,
}

/// Decides when a join instance is synchronized.
pub trait JoinPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn is_satisfied(&self, context: &JoinContext) -> bool;
}

/// Every incoming branch of the join node has to arrive.
pub struct AllIncomingPolicy;

impl JoinPolicy for AllIncomingPolicy {
    fn name(&self) -> &str {
        "ALL_INCOMING"
    }

    fn is_satisfied(&self, context: &JoinContext) -> bool {
        context.arrived >= context.incoming
    }
}

/// Every branch the matching fork activated has to arrive. Suits inclusive gateways, where
/// some incoming flows may never carry a token.
pub struct ActivatedBranchesPolicy;

impl JoinPolicy for ActivatedBranchesPolicy {
    fn name(&self) -> &str {
        "ACTIVATED_BRANCHES"
    }

    fn is_satisfied(&self, context: &JoinContext) -> bool {
        context.arrived >= context.activated
    }
}

/// N out of M: the first `n` arrivals satisfy the join, capped at the activated branches.
pub struct QuorumPolicy(pub usize);

impl JoinPolicy for QuorumPolicy {
    fn name(&self) -> &str {
        "QUORUM"
    }

    fn is_satisfied(&self, context: &JoinContext) -> bool {
        context.arrived >= self.0.min(context.activated).max(1)
    }
}

/// Branch selection of a complex gateway fork. Returns the ids of the outgoing flows to
/// activate.
pub trait BranchSelector: Send + Sync {
    fn select(
        &self,
        node: &FlowNode,
        outgoing: &[&SequenceFlow],
        scope: &RuleScopeResolver,
    ) -> FlowResult<Vec<InlineStr>>;
}
