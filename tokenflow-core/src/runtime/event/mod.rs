mod event_bus;
mod event_dispatcher;
mod event_message_service;

pub use event_bus::{EventBus, EventKey};
pub use event_dispatcher::{CatchRegistration, DispatchOutcome, EventDispatcher, EventStart};
pub use event_message_service::{
    EventMessage, EventMessageService, InMemoryEventMessageService, MessageFetchRequest,
};
