mod flow_node;
mod process_spec;
mod sequence_flow;

pub use flow_node::{FlowNode, GatewayKind, NodeKind};
pub use process_spec::{EventSubProcess, ProcessSpecification, ProcessSpecificationBuilder};
pub use sequence_flow::SequenceFlow;
