use tokenflow_common::prelude::*;
use tokenflow_common::{NodeKind, ProcessSpecification};

use crate::dao::ProcessDao;
use crate::runtime::CronExpression;

/// Registration of process definitions.
pub struct ProcessService {
    process_dao: Arc<dyn ProcessDao>,
}

impl ProcessService {
    pub fn new(process_dao: Arc<dyn ProcessDao>) -> Self {
        Self { process_dao }
    }

    /// Validates what the graph builder cannot see and stores the definition. Timer expressions
    /// are rejected here, never when the timer would fire. Registering an id again replaces the
    /// definition under the next revision.
    pub fn register_process(
        &self,
        spec: ProcessSpecification,
    ) -> FlowResult<Arc<ProcessSpecification>> {
        for (node_id, expression) in spec.timer_expressions() {
            if let Err(e) = CronExpression::parse(expression) {
                return fmt_err!(
                    InvalidCronExpression,
                    "Timer of {} in process {} is invalid: {}",
                    node_id,
                    spec.id,
                    e.display_text()
                );
            }
        }

        for node in spec.nodes() {
            if let NodeKind::EventGateway(source) = &node.kind {
                let outgoing = spec.outgoing(&node.id).len();
                flow_ensure!(
                    !source.throwing && outgoing == source.definitions.len(),
                    InvalidProcessDefinition,
                    "Event gateway {} needs one outgoing flow per catching definition, found {} for {}",
                    node.id,
                    outgoing,
                    source.definitions.len()
                );
            }
        }
        for esp in spec.event_sub_processes() {
            flow_ensure!(
                !esp.trigger.throwing && !esp.trigger.definitions.is_empty(),
                InvalidProcessDefinition,
                "Event sub-process {} needs a catching trigger",
                esp.start_node
            );
        }

        self.process_dao.save_process(spec)
    }

    pub fn get_process(&self, process_id: &str) -> FlowResult<Arc<ProcessSpecification>> {
        self.process_dao.get_process(process_id)
    }

    pub fn unregister_process(&self, process_id: &str) -> FlowResult<()> {
        self.process_dao.remove_process(process_id)
    }

    pub fn get_all_processes(&self) -> Vec<Arc<ProcessSpecification>> {
        self.process_dao.get_all_processes()
    }
}
