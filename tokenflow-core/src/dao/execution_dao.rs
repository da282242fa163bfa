use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokenflow_common::prelude::*;

use crate::model::Execution;

/// Data access layer for execution records. Every mutation of a stored execution goes through
/// `update_execution`, which commits the whole change or nothing.
pub trait ExecutionDao: Send + Sync {
    fn create_execution(&self, execution: Execution) -> FlowResult<()>;

    fn get_execution(&self, execution_id: &str) -> FlowResult<Execution>;

    /// Applies `update` to a copy of the record under the record's lock and stores the copy only
    /// when `update` succeeds. The stored version is bumped on commit.
    fn update_execution(
        &self,
        execution_id: &str,
        update: &mut dyn FnMut(&mut Execution) -> FlowResult<()>,
    ) -> FlowResult<Execution>;

    fn get_children(&self, parent_id: &str) -> Vec<Execution>;

    /// Every execution of a process instance, the root included.
    fn get_instance(&self, process_instance_id: &str) -> Vec<Execution>;

    fn remove_execution(&self, execution_id: &str) -> FlowResult<Execution>;
}

#[derive(Default)]
pub struct InMemoryExecutionDao {
    executions: DashMap<InlineStr, Execution>,
}

impl InMemoryExecutionDao {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionDao for InMemoryExecutionDao {
    fn create_execution(&self, mut execution: Execution) -> FlowResult<()> {
        let execution_id = execution.execution_id.clone();
        match self.executions.entry(execution_id) {
            Entry::Occupied(entry) => fmt_err!(
                Conflict,
                "Execution {} already exists",
                entry.key()
            ),
            Entry::Vacant(entry) => {
                execution.update_time = Utc::now().timestamp_millis();
                debug!("Execution created {}", execution.to_short_string());
                entry.insert(execution);
                Ok(())
            }
        }
    }

    fn get_execution(&self, execution_id: &str) -> FlowResult<Execution> {
        self.executions
            .get(execution_id)
            .map(|x| x.value().clone())
            .ok_or_else(|| ErrorCode::NotFound(format!("No such execution {}", execution_id)))
    }

    fn update_execution(
        &self,
        execution_id: &str,
        update: &mut dyn FnMut(&mut Execution) -> FlowResult<()>,
    ) -> FlowResult<Execution> {
        let mut stored = self
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| ErrorCode::NotFound(format!("No such execution {}", execution_id)))?;

        let mut updated = stored.value().clone();
        update(&mut updated)?;
        updated.version = stored.version + 1;
        updated.update_time = Utc::now().timestamp_millis();
        *stored.value_mut() = updated.clone();
        trace!(
            "Execution updated {} version {}",
            updated.to_short_string(),
            updated.version
        );
        Ok(updated)
    }

    fn get_children(&self, parent_id: &str) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|x| x.parent_id.as_deref() == Some(parent_id))
            .map(|x| x.value().clone())
            .collect()
    }

    fn get_instance(&self, process_instance_id: &str) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|x| x.process_instance_id.as_str() == process_instance_id)
            .map(|x| x.value().clone())
            .collect()
    }

    fn remove_execution(&self, execution_id: &str) -> FlowResult<Execution> {
        self.executions
            .remove(execution_id)
            .map(|(_, x)| x)
            .ok_or_else(|| ErrorCode::NotFound(format!("No such execution {}", execution_id)))
    }
}
