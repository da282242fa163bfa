use dashmap::DashMap;
use tokenflow_common::prelude::*;
use tokenflow_common::ProcessSpecification;

/// Summary of a `ProcessSpecification` the coordinator consults on every start, so the graph is
/// not walked again for each instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessMetaData {
    pub process_id: InlineStr,
    /// Revision of the specification the summary was computed from.
    pub revision: u64,
    pub has_event_sub_process: bool,
    pub event_sub_process_starts: Vec<InlineStr>,
    pub timer_count: usize,
}

impl ProcessMetaData {
    pub fn compute(spec: &ProcessSpecification) -> Self {
        Self {
            process_id: spec.id.clone(),
            revision: spec.revision,
            has_event_sub_process: spec.has_event_sub_process,
            event_sub_process_starts: spec
                .event_sub_processes()
                .iter()
                .map(|x| x.start_node.clone())
                .collect(),
            timer_count: spec.timer_expressions().len(),
        }
    }
}

#[derive(Default)]
pub struct ProcessMetaDataCache {
    entries: DashMap<InlineStr, ProcessMetaData>,
}

impl ProcessMetaDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached summary for `spec`, recomputed when the cached one was built from another revision.
    pub fn get(&self, spec: &ProcessSpecification) -> ProcessMetaData {
        if let Some(cached) = self.entries.get(&spec.id) {
            if cached.revision == spec.revision {
                return cached.clone();
            }
        }

        let metadata = ProcessMetaData::compute(spec);
        debug!(
            "Computed metadata for process {} revision {}",
            spec.id, spec.revision
        );
        self.entries.insert(spec.id.clone(), metadata.clone());
        metadata
    }

    pub fn invalidate(&self, process_id: &str) {
        self.entries.remove(process_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
