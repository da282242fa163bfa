#[allow(clippy::module_inception)]
mod exception;
mod exception_code;

pub use exception::{ErrorCategory, ErrorCode, ErrorCodeBacktrace, FlowResult};
