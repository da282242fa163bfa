mod execution_coordinator;

pub use execution_coordinator::ExecutionCoordinator;
