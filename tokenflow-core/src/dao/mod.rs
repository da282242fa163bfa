mod execution_dao;
mod process_dao;

pub use execution_dao::{ExecutionDao, InMemoryExecutionDao};
pub use process_dao::{InMemoryProcessDao, ProcessDao};
