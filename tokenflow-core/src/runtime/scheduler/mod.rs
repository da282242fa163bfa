mod cron_expression;
mod trigger_scheduler;

pub use cron_expression::CronExpression;
pub use trigger_scheduler::{TimerRegistration, TriggerScheduler};
