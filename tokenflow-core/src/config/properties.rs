use tokenflow_common::prelude::*;
use tokenflow_common::EnvUtils;

use crate::runtime::EvaluatorRegistry;

#[derive(Clone, Debug)]
pub struct Properties {
    /// Upper bound on the node visits a single `advance` call performs. Reaching it means the
    /// graph loops without ever waiting, the execution is failed with an IllegalState error.
    pub max_steps_per_advance: u32,
    /// Time a task delegate may run before it is failed. 0 disables the timeout.
    /// MILLISECONDS
    pub delegate_timeout_ms: u64,
    /// Period of the ticker that fires due timer registrations.
    /// MILLISECONDS
    pub timer_tick_interval_ms: u64,
    /// Messages requested from the event message service per fetch.
    pub message_fetch_batch: usize,
    /// Name of the registered evaluator sequence flow guards are written for.
    pub condition_evaluator: String,
}

impl Properties {
    /// Defaults overridden by `TOKENFLOW_*` environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();
        let properties = Self {
            max_steps_per_advance: EnvUtils::get_parsed("MAX_STEPS_PER_ADVANCE")
                .unwrap_or(default.max_steps_per_advance),
            delegate_timeout_ms: EnvUtils::get_parsed("DELEGATE_TIMEOUT_MS")
                .unwrap_or(default.delegate_timeout_ms),
            timer_tick_interval_ms: EnvUtils::get_parsed("TIMER_TICK_INTERVAL_MS")
                .unwrap_or(default.timer_tick_interval_ms),
            message_fetch_batch: EnvUtils::get_parsed("MESSAGE_FETCH_BATCH")
                .unwrap_or(default.message_fetch_batch),
            condition_evaluator: EnvUtils::get_parsed("CONDITION_EVALUATOR")
                .unwrap_or(default.condition_evaluator),
        };
        debug!("Loaded engine properties {:?}", properties);
        properties
    }

    pub fn delegate_timeout(&self) -> Option<std::time::Duration> {
        (self.delegate_timeout_ms > 0)
            .then(|| std::time::Duration::from_millis(self.delegate_timeout_ms))
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            max_steps_per_advance: 10_000,
            delegate_timeout_ms: 0,
            timer_tick_interval_ms: 1000,
            message_fetch_batch: 1,
            condition_evaluator: EvaluatorRegistry::DEFAULT_EVALUATOR.to_string(),
        }
    }
}
