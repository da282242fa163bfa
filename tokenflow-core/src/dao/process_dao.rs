use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokenflow_common::prelude::*;
use tokenflow_common::ProcessSpecification;

/// Data access layer for process definitions.
pub trait ProcessDao: Send + Sync {
    /// Stores `spec`, replacing any definition with the same id. The stored revision is one
    /// past the replaced one.
    fn save_process(&self, spec: ProcessSpecification) -> FlowResult<Arc<ProcessSpecification>>;

    fn get_process(&self, process_id: &str) -> FlowResult<Arc<ProcessSpecification>>;

    fn remove_process(&self, process_id: &str) -> FlowResult<()>;

    fn get_all_processes(&self) -> Vec<Arc<ProcessSpecification>>;
}

#[derive(Default)]
pub struct InMemoryProcessDao {
    processes: DashMap<InlineStr, Arc<ProcessSpecification>>,
}

impl InMemoryProcessDao {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessDao for InMemoryProcessDao {
    fn save_process(&self, mut spec: ProcessSpecification) -> FlowResult<Arc<ProcessSpecification>> {
        let stored = match self.processes.entry(spec.id.clone()) {
            Entry::Occupied(mut entry) => {
                spec.revision = entry.get().revision + 1;
                let stored = Arc::new(spec);
                entry.insert(stored.clone());
                stored
            }
            Entry::Vacant(entry) => {
                spec.revision = 0;
                let stored = Arc::new(spec);
                entry.insert(stored.clone());
                stored
            }
        };
        info!(
            "Process definition {} stored at revision {}",
            stored.id, stored.revision
        );
        Ok(stored)
    }

    fn get_process(&self, process_id: &str) -> FlowResult<Arc<ProcessSpecification>> {
        self.processes
            .get(process_id)
            .map(|x| x.value().clone())
            .ok_or_else(|| ErrorCode::NotFound(format!("No such process definition {}", process_id)))
    }

    fn remove_process(&self, process_id: &str) -> FlowResult<()> {
        if self.processes.remove(process_id).is_none() {
            fmt_err!(
                NotFound,
                "Cannot remove the process: {} - no such process definition",
                process_id
            )
        } else {
            Ok(())
        }
    }

    fn get_all_processes(&self) -> Vec<Arc<ProcessSpecification>> {
        self.processes.iter().map(|x| x.value().clone()).collect()
    }
}
