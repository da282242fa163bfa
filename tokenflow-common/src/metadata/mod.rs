mod event;
mod process;

pub use event::{EventDefinition, EventKind, EventSource};
pub use process::{
    EventSubProcess, FlowNode, GatewayKind, NodeKind, ProcessSpecification,
    ProcessSpecificationBuilder, SequenceFlow,
};
