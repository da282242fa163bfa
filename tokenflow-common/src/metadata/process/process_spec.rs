use crate::metadata::{EventDefinition, EventSource, FlowNode, NodeKind, SequenceFlow};
use crate::prelude::*;

/// An interrupting event sub-process: when `trigger` fires for a running instance, every token of
/// the instance is cancelled and the root restarts at `start_node`.
#[derive(Clone, Debug, PartialEq)]
pub struct EventSubProcess {
    pub start_node: InlineStr,
    pub trigger: EventSource,
}

impl EventSubProcess {
    pub fn new(start_node: impl Into<InlineStr>, trigger: EventSource) -> Self {
        Self {
            start_node: start_node.into(),
            trigger,
        }
    }
}

/// The immutable definition graph a process instance runs over.
#[derive(Clone, Debug)]
pub struct ProcessSpecification {
    /// Identifier of the process
    pub id: InlineStr,
    /// Name of the process
    pub name: InlineStr,
    /// Non executable processes are documentation only and cannot be started.
    pub executable: bool,
    /// Bumped by the store each time the definition is replaced.
    pub revision: u64,
    pub has_event_sub_process: bool,
    nodes: Vec<FlowNode>,
    flows: Vec<SequenceFlow>,
    event_sub_processes: Vec<EventSubProcess>,
    start_node: InlineStr,
    node_index: HashMap<InlineStr, usize>,
}

impl ProcessSpecification {
    pub fn builder(id: impl Into<InlineStr>, name: impl Into<InlineStr>) -> ProcessSpecificationBuilder {
        ProcessSpecificationBuilder {
            id: id.into(),
            name: name.into(),
            executable: true,
            nodes: Vec::default(),
            flows: Vec::default(),
            event_sub_processes: Vec::default(),
        }
    }

    pub fn start_node(&self) -> &InlineStr {
        &self.start_node
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn flows(&self) -> &[SequenceFlow] {
        &self.flows
    }

    pub fn event_sub_processes(&self) -> &[EventSubProcess] {
        &self.event_sub_processes
    }

    pub fn get_node(&self, node_id: &str) -> FlowResult<&FlowNode> {
        self.node_index
            .get(node_id)
            .map(|&x| &self.nodes[x])
            .ok_or_else(|| {
                ErrorCode::NotFound(format!("No node {} in process {}", node_id, self.id))
            })
    }

    /// Outgoing flows of a node, in declared order.
    pub fn outgoing(&self, node_id: &str) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|x| x.source.as_str() == node_id).collect()
    }

    pub fn incoming(&self, node_id: &str) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|x| x.target.as_str() == node_id).collect()
    }

    /// Every timer definition of the process, including event sub-process triggers.
    pub fn timer_expressions(&self) -> Vec<(&InlineStr, &InlineStr)> {
        let mut timers = Vec::default();
        for node in &self.nodes {
            if let Some(source) = node.event_source() {
                timers.extend(source.timers().map(|x| (&node.id, x)));
            }
        }
        for esp in &self.event_sub_processes {
            timers.extend(esp.trigger.timers().map(|x| (&esp.start_node, x)));
        }
        timers
    }
}

pub struct ProcessSpecificationBuilder {
    id: InlineStr,
    name: InlineStr,
    executable: bool,
    nodes: Vec<FlowNode>,
    flows: Vec<SequenceFlow>,
    event_sub_processes: Vec<EventSubProcess>,
}

impl ProcessSpecificationBuilder {
    pub fn executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    pub fn node(mut self, node: FlowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn flow(mut self, flow: SequenceFlow) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn event_sub_process(mut self, event_sub_process: EventSubProcess) -> Self {
        self.event_sub_processes.push(event_sub_process);
        self
    }

    pub fn build(self) -> FlowResult<ProcessSpecification> {
        let mut node_index = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), i).is_some() {
                return fmt_err!(
                    InvalidProcessDefinition,
                    "Duplicate node id {} in process {}",
                    node.id,
                    self.id
                );
            }
        }

        for flow in &self.flows {
            for end in [&flow.source, &flow.target] {
                flow_ensure!(
                    node_index.contains_key(end),
                    InvalidProcessDefinition,
                    "Sequence flow {} references unknown node {}",
                    flow.id,
                    end
                );
            }
        }

        let esp_starts = self
            .event_sub_processes
            .iter()
            .map(|x| x.start_node.clone())
            .collect::<HashSet<_>>();
        for start in &esp_starts {
            match node_index.get(start).map(|&x| &self.nodes[x].kind) {
                Some(NodeKind::StartEvent) => {}
                _ => {
                    return fmt_err!(
                        InvalidProcessDefinition,
                        "Event sub-process start {} is not a start event",
                        start
                    )
                }
            }
        }

        let starts = self
            .nodes
            .iter()
            .filter(|x| x.kind == NodeKind::StartEvent && !esp_starts.contains(&x.id))
            .collect::<Vec<_>>();
        flow_ensure!(
            starts.len() == 1,
            InvalidProcessDefinition,
            "Process {} must have exactly one start event, found {}",
            self.id,
            starts.len()
        );
        let start_node = starts[0].id.clone();

        for node in &self.nodes {
            if let NodeKind::ThrowEvent(source) = &node.kind {
                flow_ensure!(
                    !source
                        .definitions
                        .iter()
                        .any(|x| matches!(x, EventDefinition::Timer { .. })),
                    InvalidProcessDefinition,
                    "Throw event {} cannot carry a timer definition",
                    node.id
                );
            }
            if let NodeKind::ServiceTask {
                error_boundary: Some(boundary),
                ..
            } = &node.kind
            {
                flow_ensure!(
                    node_index.contains_key(boundary),
                    InvalidProcessDefinition,
                    "Error boundary {} of {} is not a node",
                    boundary,
                    node.id
                );
            }
        }

        Ok(ProcessSpecification {
            has_event_sub_process: !self.event_sub_processes.is_empty(),
            id: self.id,
            name: self.name,
            executable: self.executable,
            revision: 0,
            nodes: self.nodes,
            flows: self.flows,
            event_sub_processes: self.event_sub_processes,
            start_node,
            node_index,
        })
    }
}
