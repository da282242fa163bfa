use chrono::Utc;
use strum_macros::AsRefStr;
use tokenflow_common::prelude::*;
use tokenflow_common::EventDefinition;

use super::{RuleData, RuleScope};
use crate::utils::IdGenerator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum ExecutionStatus {
    Created,
    Active,
    /// Parked at a catching event, a timer, or a join waiting for its siblings.
    Waiting,
    Completed,
    Terminated,
    Error,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Terminated | ExecutionStatus::Error
        )
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, ExecutionStatus::Completed)
    }
}

/// One token of a process instance. The root execution owns the GLOBAL variables of the
/// instance, every execution owns its LOCAL variables.
#[derive(Clone, Debug)]
pub struct Execution {
    pub execution_id: InlineStr,
    pub process_id: InlineStr,
    /// Id of the root execution; equals `execution_id` for the root itself.
    pub process_instance_id: InlineStr,
    pub current_node: InlineStr,
    pub parent_id: Option<InlineStr>,
    /// Children that have not yet finished or been absorbed by a join.
    pub children: BTreeSet<InlineStr>,
    pub status: ExecutionStatus,
    pub locals: HashMap<InlineStr, Object>,
    pub globals: HashMap<InlineStr, Object>,
    /// The fork of the parent this execution was created by; joins are keyed on it.
    pub fork_generation: u32,
    /// Forks this execution has performed so far.
    pub forks_performed: u32,
    pub started_by: Option<EventDefinition>,
    pub error_code: Option<u16>,
    pub error: Option<InlineStr>,
    /// Incremented by the store on every committed update.
    pub version: u64,
    pub create_time: i64,
    pub update_time: i64,
    pub end_time: i64,
}

impl Execution {
    pub fn new_root(
        process_id: impl Into<InlineStr>,
        start_node: impl Into<InlineStr>,
        globals: HashMap<InlineStr, Object>,
    ) -> Self {
        let execution_id = IdGenerator::generate();
        Self {
            process_instance_id: execution_id.clone(),
            execution_id,
            process_id: process_id.into(),
            current_node: start_node.into(),
            parent_id: None,
            children: BTreeSet::default(),
            status: ExecutionStatus::Created,
            locals: HashMap::default(),
            globals,
            fork_generation: 0,
            forks_performed: 0,
            started_by: None,
            error_code: None,
            error: None,
            version: 0,
            create_time: Utc::now().timestamp_millis(),
            update_time: 0,
            end_time: 0,
        }
    }

    /// A branch of `parent` positioned at `target`. Branches start ACTIVE with a copy of the
    /// parent's LOCAL variables.
    pub fn new_child(parent: &Execution, target: impl Into<InlineStr>) -> Self {
        Self {
            execution_id: IdGenerator::generate(),
            process_id: parent.process_id.clone(),
            process_instance_id: parent.process_instance_id.clone(),
            current_node: target.into(),
            parent_id: Some(parent.execution_id.clone()),
            children: BTreeSet::default(),
            status: ExecutionStatus::Active,
            locals: parent.locals.clone(),
            globals: HashMap::default(),
            fork_generation: parent.forks_performed,
            forks_performed: 0,
            started_by: None,
            error_code: None,
            error: None,
            version: 0,
            create_time: Utc::now().timestamp_millis(),
            update_time: 0,
            end_time: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Moves to `next`, refusing to leave a terminal status.
    pub fn transition(&mut self, next: ExecutionStatus) -> FlowResult<()> {
        if self.status.is_terminal() {
            return fmt_err!(
                IllegalState,
                "Execution {} is already {} and cannot become {}",
                self.execution_id,
                self.status.as_ref(),
                next.as_ref()
            );
        }
        if next == ExecutionStatus::Created {
            return fmt_err!(
                IllegalState,
                "Execution {} cannot return to Created",
                self.execution_id
            );
        }
        debug!(
            "Execution {} at {}: {} -> {}",
            self.execution_id,
            self.current_node,
            self.status.as_ref(),
            next.as_ref()
        );
        self.status = next;
        if next.is_terminal() {
            self.end_time = Utc::now().timestamp_millis();
        }
        Ok(())
    }

    /// Records a failure and moves the execution to ERROR.
    pub fn fail(&mut self, error: &ErrorCode) -> FlowResult<()> {
        self.error_code = Some(error.code());
        self.error = Some(error.message().into());
        self.transition(ExecutionStatus::Error)
    }

    /// Reactivates a failed execution at its error boundary. The failure detail stays recorded.
    pub fn route_to_boundary(&mut self, boundary: &InlineStr) -> FlowResult<()> {
        if self.status != ExecutionStatus::Error && self.status != ExecutionStatus::Active {
            return fmt_err!(
                IllegalState,
                "Execution {} in {} cannot be routed to boundary {}",
                self.execution_id,
                self.status.as_ref(),
                boundary
            );
        }
        info!(
            "Execution {} routed from {} to error boundary {}",
            self.execution_id, self.current_node, boundary
        );
        self.status = ExecutionStatus::Active;
        self.end_time = 0;
        self.current_node = boundary.clone();
        Ok(())
    }

    /// Stores a variable in the map matching its scope.
    pub fn set_variable(&mut self, rule_data: RuleData) {
        match rule_data.scope {
            RuleScope::Local => self.locals.insert(rule_data.name, rule_data.value),
            RuleScope::Global => self.globals.insert(rule_data.name, rule_data.value),
        };
    }

    pub fn remove_variable(&mut self, name: &str, scope: RuleScope) -> Option<Object> {
        match scope {
            RuleScope::Local => self.locals.remove(name),
            RuleScope::Global => self.globals.remove(name),
        }
    }

    pub fn rule_data(&self) -> Vec<RuleData> {
        let locals = self
            .locals
            .iter()
            .map(|(k, v)| RuleData::local(k.clone(), v.clone()));
        let globals = self
            .globals
            .iter()
            .map(|(k, v)| RuleData::global(k.clone(), v.clone()));
        locals.chain(globals).collect()
    }

    pub fn to_short_string(&self) -> String {
        format!(
            "{}/{}@{}[{}]",
            self.process_id,
            self.execution_id,
            self.current_node,
            self.status.as_ref()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_final() {
        let mut execution = Execution::new_root("p", "start", HashMap::default());
        assert_eq!(execution.status, ExecutionStatus::Created);
        execution.transition(ExecutionStatus::Active).expect("activate");
        execution.transition(ExecutionStatus::Completed).expect("complete");
        assert!(execution.end_time > 0);
        assert!(execution.transition(ExecutionStatus::Active).is_err());
    }

    #[test]
    fn children_inherit_locals_and_fork_generation() {
        let mut parent = Execution::new_root("p", "fork", HashMap::default());
        parent.set_variable(RuleData::local("region", "eu"));
        parent.set_variable(RuleData::global("amount", 120));
        parent.forks_performed = 2;

        let child = Execution::new_child(&parent, "bill");
        assert_eq!(child.parent_id.as_ref(), Some(&parent.execution_id));
        assert_eq!(child.process_instance_id, parent.execution_id);
        assert_eq!(child.fork_generation, 2);
        assert_eq!(child.locals.get("region"), Some(&Object::from("eu")));
        assert!(child.globals.is_empty());
        assert_eq!(child.status, ExecutionStatus::Active);
    }

    #[test]
    fn failure_is_recorded_and_routable() {
        let mut execution = Execution::new_root("p", "task", HashMap::default());
        execution.transition(ExecutionStatus::Active).expect("activate");
        execution
            .fail(&ErrorCode::DelegateFailed("boom"))
            .expect("fail");
        assert_eq!(execution.status, ExecutionStatus::Error);
        assert_eq!(execution.error_code, Some(ErrorCode::delegate_failed_code()));

        execution
            .route_to_boundary(&InlineStr::from("compensate"))
            .expect("route");
        assert_eq!(execution.status, ExecutionStatus::Active);
        assert_eq!(execution.current_node.as_str(), "compensate");
        assert_eq!(execution.error.as_deref(), Some("boom"));
    }
}
