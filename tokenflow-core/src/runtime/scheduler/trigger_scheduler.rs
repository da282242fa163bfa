use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokenflow_common::prelude::*;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::CronExpression;
use crate::utils::IdGenerator;

/// A pending timer: fires once at `fire_at` and is then dropped.
pub struct TimerRegistration {
    pub registration_id: InlineStr,
    pub expression: CronExpression,
    pub fire_at: DateTime<Utc>,
    sender: oneshot::Sender<DateTime<Utc>>,
}

/// Owns the timer registrations of the engine. Expressions are validated when a timer is
/// registered, firing itself never fails.
#[derive(Default)]
pub struct TriggerScheduler {
    registrations: DashMap<InlineStr, TimerRegistration>,
}

impl TriggerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a timer firing at the first match of `text` after `now`. The receiver yields the
    /// scheduled fire time, or an error when the registration is cancelled.
    pub fn register(
        &self,
        text: &str,
        now: &DateTime<Utc>,
    ) -> FlowResult<(InlineStr, oneshot::Receiver<DateTime<Utc>>)> {
        let expression = CronExpression::parse(text)?;
        let fire_at = expression.next_after(now).ok_or_else(|| {
            ErrorCode::InvalidCronExpression(format!(
                "Cron expression '{}' never fires after {}",
                text, now
            ))
        })?;

        let (sender, receiver) = oneshot::channel();
        let registration_id = IdGenerator::generate();
        debug!(
            "Timer {} registered for '{}', fires at {}",
            registration_id, expression, fire_at
        );
        self.registrations.insert(
            registration_id.clone(),
            TimerRegistration {
                registration_id: registration_id.clone(),
                expression,
                fire_at,
                sender,
            },
        );
        Ok((registration_id, receiver))
    }

    /// Drops a registration, its receiver observes the cancellation.
    pub fn cancel(&self, registration_id: &str) -> bool {
        let cancelled = self.registrations.remove(registration_id).is_some();
        if cancelled {
            debug!("Timer {} cancelled", registration_id);
        }
        cancelled
    }

    pub fn next_fire_time(&self, registration_id: &str) -> Option<DateTime<Utc>> {
        self.registrations.get(registration_id).map(|x| x.fire_at)
    }

    pub fn pending(&self) -> usize {
        self.registrations.len()
    }

    /// Fires every registration due at `now`, earliest first. Each registration is removed
    /// before it fires, so it fires once even when tickers overlap.
    pub fn fire_due(&self, now: &DateTime<Utc>) -> usize {
        let mut due = self
            .registrations
            .iter()
            .filter(|x| x.fire_at <= *now)
            .map(|x| (x.fire_at, x.key().clone()))
            .collect::<Vec<_>>();
        due.sort();

        let mut fired = 0;
        for (_, registration_id) in due {
            let Some((_, registration)) = self.registrations.remove(&registration_id) else {
                continue;
            };
            if registration.sender.send(registration.fire_at).is_ok() {
                info!(
                    "Timer {} fired for '{}' at {}",
                    registration_id, registration.expression, registration.fire_at
                );
                fired += 1;
            } else {
                debug!("Timer {} fired without a listener", registration_id);
            }
        }
        fired
    }

    /// Drives `fire_due` with the wall clock every `period`.
    pub fn spawn_ticker(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let fired = self.fire_due(&Utc::now());
                if fired > 0 {
                    trace!("Timer tick fired {} timers", fired);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn invalid_expressions_are_rejected_at_registration() {
        let scheduler = TriggerScheduler::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            scheduler.register("A 1 * * 1-5 *", &now).err().map(|x| x.code()),
            Some(ErrorCode::invalid_cron_expression_code())
        );
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn due_timers_fire_once() {
        let scheduler = TriggerScheduler::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let (id, mut receiver) = scheduler.register("30 * * * * *", &now).expect("valid");
        let (cancelled, mut cancelled_receiver) =
            scheduler.register("40 * * * * *", &now).expect("valid");

        assert_eq!(scheduler.fire_due(&now), 0);
        assert!(scheduler.cancel(&cancelled));
        assert!(cancelled_receiver.try_recv().is_err());

        let due = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 30).unwrap();
        assert_eq!(scheduler.next_fire_time(&id), Some(due));
        assert_eq!(scheduler.fire_due(&due), 1);
        assert_eq!(receiver.try_recv().ok(), Some(due));
        assert_eq!(scheduler.fire_due(&due), 0);
        assert_eq!(scheduler.pending(), 0);
    }
}
