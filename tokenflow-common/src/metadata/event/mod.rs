mod event_definition;

pub use event_definition::{EventDefinition, EventKind, EventSource};
