use async_trait::async_trait;
use tokenflow_common::prelude::*;

use super::DelegateContext;

/// Externally supplied logic of a service task.
#[async_trait]
pub trait TaskDelegate: Send + Sync {
    /// Run the task against `context`. Variables written to the context are kept only when this
    /// returns `Ok`.
    async fn execute(&self, context: &mut DelegateContext) -> FlowResult<()>;

    /// return True if the delegate has to run on its own tokio task instead of inline on the
    /// advancing execution.
    fn is_async(&self) -> bool {
        false
    }

    /// return name the delegate is registered under
    fn name(&self) -> &str;
}

/// A delegate backed by a plain closure.
pub struct FnDelegate<F> {
    name: InlineStr,
    is_async: bool,
    f: F,
}

impl<F> FnDelegate<F>
where
    F: Fn(&mut DelegateContext) -> FlowResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<InlineStr>, f: F) -> Self {
        Self {
            name: name.into(),
            is_async: false,
            f,
        }
    }

    pub fn spawned(mut self) -> Self {
        self.is_async = true;
        self
    }
}

#[async_trait]
impl<F> TaskDelegate for FnDelegate<F>
where
    F: Fn(&mut DelegateContext) -> FlowResult<()> + Send + Sync,
{
    async fn execute(&self, context: &mut DelegateContext) -> FlowResult<()> {
        (self.f)(context)
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn name(&self) -> &str {
        &self.name
    }
}
