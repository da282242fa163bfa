use std::panic::AssertUnwindSafe;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokenflow_common::prelude::*;

use super::{DelegateContext, TaskDelegate};

/// Holds the registered task delegates and runs them for service task nodes. A failing
/// delegate never fails the engine: errors, timeouts and panics all come back as
/// `DelegateFailed` and the caller decides where the execution goes next.
pub struct TaskDelegateInvoker {
    delegates: DashMap<InlineStr, Arc<dyn TaskDelegate>>,
    timeout: Option<Duration>,
}

impl TaskDelegateInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            delegates: DashMap::new(),
            timeout,
        }
    }

    pub fn register(&self, delegate: Arc<dyn TaskDelegate>) {
        let name = InlineStr::from(delegate.name());
        if self.delegates.insert(name.clone(), delegate).is_some() {
            warn!("Task delegate {} replaced", name);
        } else {
            debug!("Task delegate {} registered", name);
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.delegates.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> FlowResult<Arc<dyn TaskDelegate>> {
        self.delegates
            .get(name)
            .map(|x| x.value().clone())
            .ok_or_else(|| ErrorCode::NotFound(format!("No task delegate named {}", name)))
    }

    /// Runs delegate `name` against `context` and returns the context it left behind. Nothing is
    /// written to the store here.
    pub async fn invoke(&self, name: &str, context: DelegateContext) -> FlowResult<DelegateContext> {
        let execution_id = context.execution_id.clone();
        let node_id = context.node_id.clone();
        match self.run(name, context).await {
            Ok(context) => {
                debug!("Delegate {} completed for {} at {}", name, execution_id, node_id);
                Ok(context)
            }
            Err(e) => {
                let error = ErrorCode::DelegateFailed(format!(
                    "Delegate {} failed for {} at {}: {}",
                    name,
                    execution_id,
                    node_id,
                    e.message()
                ));
                warn!("{}", error.message());
                Err(error)
            }
        }
    }

    async fn run(&self, name: &str, mut context: DelegateContext) -> FlowResult<DelegateContext> {
        let delegate = self.get(name)?;

        if delegate.is_async() {
            let mut handle = tokio::spawn(async move {
                let result = delegate.execute(&mut context).await;
                result.map(|_| context)
            });
            let joined = match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        return fmt_err!(DelegateFailed, "timed out after {:?}", timeout);
                    }
                },
                None => handle.await,
            };
            joined.map_err(|e| ErrorCode::DelegateFailed(format!("delegate task failed: {}", e)))?
        } else {
            let execution = AssertUnwindSafe(delegate.execute(&mut context)).catch_unwind();
            let result = match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                    Ok(result) => result,
                    Err(_) => return fmt_err!(DelegateFailed, "timed out after {:?}", timeout),
                },
                None => execution.await,
            };
            match result {
                Ok(result) => result.map(|_| context),
                Err(_) => str_err!(DelegateFailed, "delegate panicked"),
            }
        }
    }
}
