mod process_engine;
mod process_service;

pub use process_engine::ProcessEngine;
pub use process_service::ProcessService;
