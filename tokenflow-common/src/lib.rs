mod common;
mod exception;
mod metadata;
mod utils;

pub use metadata::{
    EventDefinition, EventKind, EventSource, EventSubProcess, FlowNode, GatewayKind, NodeKind,
    ProcessSpecification, ProcessSpecificationBuilder, SequenceFlow,
};
pub use utils::EnvUtils;

pub mod prelude;

#[macro_use]
pub(crate) mod macros;
