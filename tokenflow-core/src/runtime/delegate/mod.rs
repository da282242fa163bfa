mod delegate_context;
mod task_delegate;
mod task_delegate_invoker;

pub use delegate_context::DelegateContext;
pub use task_delegate::{FnDelegate, TaskDelegate};
pub use task_delegate_invoker::TaskDelegateInvoker;
