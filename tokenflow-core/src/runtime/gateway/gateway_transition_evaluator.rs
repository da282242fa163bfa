use dashmap::DashMap;
use tokenflow_common::prelude::*;
use tokenflow_common::{FlowNode, GatewayKind, NodeKind, ProcessSpecification, SequenceFlow};

use super::{ActivatedBranchesPolicy, AllIncomingPolicy, BranchSelector, JoinContext, JoinPolicy};
use crate::dao::ExecutionDao;
use crate::model::{Execution, ExecutionStatus};
use crate::runtime::evaluators::{ConditionEvaluator, RuleScopeResolver};

/// One synchronization point: the branches of one fork of `parent_id` meeting at `join_node`.
/// A loop that re-enters the join after a new fork gets a new generation, so a new instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinKey {
    pub parent_id: InlineStr,
    pub join_node: InlineStr,
    pub generation: u32,
}

impl std::fmt::Display for JoinKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.parent_id, self.join_node, self.generation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The policy is not satisfied yet, the branch has to wait.
    Pending { arrived: usize },
    /// This arrival satisfied the join. Carries the arrived branches in arrival order.
    Satisfied { arrived: Vec<InlineStr> },
    /// The join was satisfied by an earlier arrival, nothing changed.
    AlreadySatisfied,
}

impl JoinOutcome {
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, JoinOutcome::Pending { .. })
    }
}

#[derive(Default)]
struct JoinState {
    arrived: Vec<InlineStr>,
    satisfied: bool,
}

/// Fork and join decisions of gateway nodes.
pub struct GatewayTransitionEvaluator {
    execution_dao: Arc<dyn ExecutionDao>,
    condition_evaluator: Arc<ConditionEvaluator>,
    joins: DashMap<JoinKey, Arc<Mutex<JoinState>>>,
    /// (parent, generation) -> branches the fork activated
    fork_sizes: DashMap<(InlineStr, u32), usize>,
    join_policies: DashMap<(InlineStr, InlineStr), Arc<dyn JoinPolicy>>,
    branch_selectors: DashMap<(InlineStr, InlineStr), Arc<dyn BranchSelector>>,
}

impl GatewayTransitionEvaluator {
    pub fn new(
        execution_dao: Arc<dyn ExecutionDao>,
        condition_evaluator: Arc<ConditionEvaluator>,
    ) -> Self {
        Self {
            execution_dao,
            condition_evaluator,
            joins: DashMap::new(),
            fork_sizes: DashMap::new(),
            join_policies: DashMap::new(),
            branch_selectors: DashMap::new(),
        }
    }

    /// Overrides the join policy of one gateway node.
    pub fn register_join_policy(
        &self,
        process_id: impl Into<InlineStr>,
        node_id: impl Into<InlineStr>,
        policy: Arc<dyn JoinPolicy>,
    ) {
        let key = (process_id.into(), node_id.into());
        debug!("Join policy {} registered for {}/{}", policy.name(), key.0, key.1);
        self.join_policies.insert(key, policy);
    }

    /// Overrides the branch selection of one complex gateway node.
    pub fn register_branch_selector(
        &self,
        process_id: impl Into<InlineStr>,
        node_id: impl Into<InlineStr>,
        selector: Arc<dyn BranchSelector>,
    ) {
        self.branch_selectors
            .insert((process_id.into(), node_id.into()), selector);
    }

    /// Registered policy of the node, else activated branches for inclusive gateways and all
    /// incoming branches for everything else.
    pub fn join_policy(&self, spec: &ProcessSpecification, node: &FlowNode) -> Arc<dyn JoinPolicy> {
        if let Some(policy) = self.join_policies.get(&(spec.id.clone(), node.id.clone())) {
            return policy.value().clone();
        }
        match node.kind {
            NodeKind::Gateway(GatewayKind::Inclusive) => Arc::new(ActivatedBranchesPolicy),
            _ => Arc::new(AllIncomingPolicy),
        }
    }

    /// Outgoing flows of `node` to activate, in declared order. Non-gateway nodes select like an
    /// inclusive gateway.
    pub fn select_branches<'a>(
        &self,
        spec: &'a ProcessSpecification,
        node: &FlowNode,
        scope: &RuleScopeResolver,
    ) -> FlowResult<Vec<&'a SequenceFlow>> {
        let outgoing = spec.outgoing(&node.id);
        let default_flow = outgoing.iter().find(|x| x.is_default).copied();
        let kind = match &node.kind {
            NodeKind::Gateway(kind) => *kind,
            _ => GatewayKind::Inclusive,
        };

        let selected = match kind {
            GatewayKind::Parallel => outgoing.clone(),
            GatewayKind::Exclusive => {
                let mut chosen = None;
                for flow in outgoing.iter().filter(|x| !x.is_default) {
                    if self.passes(flow, scope)? {
                        chosen = Some(*flow);
                        break;
                    }
                }
                chosen.or(default_flow).into_iter().collect()
            }
            GatewayKind::Complex
                if self
                    .branch_selectors
                    .contains_key(&(spec.id.clone(), node.id.clone())) =>
            {
                let selector = self
                    .branch_selectors
                    .get(&(spec.id.clone(), node.id.clone()))
                    .map(|x| x.value().clone())
                    .ok_or_else(|| {
                        ErrorCode::IllegalState(format!("Branch selector of {} vanished", node.id))
                    })?;
                let ids = selector.select(node, &outgoing, scope)?;
                outgoing
                    .iter()
                    .filter(|x| ids.contains(&x.id))
                    .copied()
                    .collect()
            }
            GatewayKind::Inclusive | GatewayKind::Complex => {
                let mut passing = Vec::with_capacity(outgoing.len());
                for flow in outgoing.iter().filter(|x| !x.is_default) {
                    if self.passes(flow, scope)? {
                        passing.push(*flow);
                    }
                }
                if passing.is_empty() {
                    passing.extend(default_flow);
                }
                passing
            }
        };

        if selected.is_empty() {
            return fmt_err!(
                NoViableBranch,
                "No outgoing flow of {} in process {} can be taken",
                node.id,
                spec.id
            );
        }
        debug!(
            "{} selected branches {:?}",
            node.id,
            selected.iter().map(|x| x.id.as_str()).collect::<Vec<_>>()
        );
        Ok(selected)
    }

    fn passes(&self, flow: &SequenceFlow, scope: &RuleScopeResolver) -> FlowResult<bool> {
        match &flow.condition {
            Some(condition) => self
                .condition_evaluator
                .evaluate(Some(condition.as_str()), scope),
            None => Ok(true),
        }
    }

    /// Forks `execution`, which has to be ACTIVE at a node with outgoing flows, into one child
    /// per selected branch. The parent moves to WAITING in the same update that records the
    /// children, and fails with `Conflict` when the stored record is no longer `execution`.
    pub fn fork(
        &self,
        execution: &Execution,
        spec: &ProcessSpecification,
        scope: &RuleScopeResolver,
    ) -> FlowResult<Vec<Execution>> {
        let node = spec.get_node(&execution.current_node)?;
        let branches = self.select_branches(spec, node, scope)?;

        let expected_version = execution.version;
        let mut children = Vec::with_capacity(branches.len());
        self.execution_dao
            .update_execution(&execution.execution_id, &mut |parent| {
                flow_ensure!(
                    parent.version == expected_version,
                    Conflict,
                    "Execution {} changed while forking at {}",
                    parent.execution_id,
                    parent.current_node
                );
                flow_ensure!(
                    parent.status == ExecutionStatus::Active,
                    IllegalState,
                    "Execution {} cannot fork while {}",
                    parent.execution_id,
                    parent.status.as_ref()
                );
                children = branches
                    .iter()
                    .map(|x| Execution::new_child(parent, x.target.clone()))
                    .collect();
                parent
                    .children
                    .extend(children.iter().map(|x| x.execution_id.clone()));
                parent.forks_performed += 1;
                parent.transition(ExecutionStatus::Waiting)
            })?;

        // arrivals of older generations are stale, so only the newest one is kept per parent
        let generation = execution.forks_performed;
        let parent_id = &execution.execution_id;
        self.joins
            .retain(|k, _| &k.parent_id != parent_id || k.generation >= generation);
        self.fork_sizes
            .retain(|k, _| &k.0 != parent_id || k.1 >= generation);
        self.fork_sizes
            .insert((parent_id.clone(), generation), children.len());
        for child in &children {
            self.execution_dao.create_execution(child.clone())?;
        }
        info!(
            "Execution {} forked {} branches at {}",
            execution.execution_id,
            children.len(),
            execution.current_node
        );
        Ok(children)
    }

    pub fn join_key(execution: &Execution) -> FlowResult<JoinKey> {
        let parent_id = execution.parent_id.clone().ok_or_else(|| {
            ErrorCode::IllegalArgument(format!(
                "Execution {} has no parent to join",
                execution.execution_id
            ))
        })?;
        Ok(JoinKey {
            parent_id,
            join_node: execution.current_node.clone(),
            generation: execution.fork_generation,
        })
    }

    /// Records the arrival of the branch `execution` at the join node it is positioned at.
    /// Arrivals at one join instance are serialized, so exactly one arrival observes
    /// `Satisfied`. Repeated arrivals after that observe `AlreadySatisfied` and change nothing.
    /// A branch arriving for a parent that has finished or forked again is a `StaleJoin`.
    pub fn arrive(
        &self,
        execution: &Execution,
        spec: &ProcessSpecification,
    ) -> FlowResult<JoinOutcome> {
        let key = Self::join_key(execution)?;
        let node = spec.get_node(&key.join_node)?;

        let parent = self
            .execution_dao
            .get_execution(&key.parent_id)
            .map_err(|_| ErrorCode::StaleJoin(format!("Join {} has no parent anymore", key)))?;
        flow_ensure!(
            !parent.status.is_terminal(),
            StaleJoin,
            "Join {} belongs to a {} execution",
            key,
            parent.status.as_ref()
        );
        flow_ensure!(
            parent.forks_performed == key.generation + 1,
            StaleJoin,
            "Join {} arrived after its parent forked again",
            key
        );

        let incoming = spec.incoming(&key.join_node).len();
        let activated = self
            .fork_sizes
            .get(&(key.parent_id.clone(), key.generation))
            .map(|x| *x.value())
            .unwrap_or(incoming);
        let policy = self.join_policy(spec, node);

        let state = self.joins.entry(key.clone()).or_default().value().clone();
        let mut state = state.lock();
        if state.satisfied {
            debug!(
                "Join {} already satisfied, arrival of {} ignored",
                key, execution.execution_id
            );
            return Ok(JoinOutcome::AlreadySatisfied);
        }
        if !state.arrived.contains(&execution.execution_id) {
            state.arrived.push(execution.execution_id.clone());
        }

        let context = JoinContext {
            join_node: &key.join_node,
            incoming,
            activated,
            arrived: state.arrived.len(),
        };
        if policy.is_satisfied(&context) {
            state.satisfied = true;
            info!(
                "Join {} satisfied by {} ({} of {} incoming, policy {})",
                key,
                execution.execution_id,
                context.arrived,
                incoming,
                policy.name()
            );
            Ok(JoinOutcome::Satisfied {
                arrived: state.arrived.clone(),
            })
        } else {
            debug!(
                "Join {} waits, {} of {} arrived",
                key, context.arrived, incoming
            );
            Ok(JoinOutcome::Pending {
                arrived: context.arrived,
            })
        }
    }

    /// Whether the join is satisfied after the arrival of `execution`.
    pub fn join(&self, execution: &Execution, spec: &ProcessSpecification) -> FlowResult<bool> {
        self.arrive(execution, spec).map(|x| x.is_satisfied())
    }

    /// Number of branches the fork of `parent_id` at `generation` activated.
    pub fn fork_size(&self, parent_id: &str, generation: u32) -> Option<usize> {
        self.fork_sizes
            .get(&(InlineStr::from(parent_id), generation))
            .map(|x| *x.value())
    }

    /// Number of join instances of `parent_id` with recorded arrivals.
    pub fn open_joins(&self, parent_id: &str) -> usize {
        self.joins
            .iter()
            .filter(|x| x.key().parent_id.as_str() == parent_id)
            .count()
    }

    /// Drops the join bookkeeping of a parent that finished or was reset.
    pub fn close_joins_for(&self, parent_id: &str) {
        self.joins.retain(|k, _| k.parent_id.as_str() != parent_id);
        self.fork_sizes.retain(|k, _| k.0.as_str() != parent_id);
    }
}
