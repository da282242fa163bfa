use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use cron::Schedule;
use tokenflow_common::prelude::*;

/// Name and inclusive bounds of the six fields, in order.
const FIELDS: [(&str, u32, u32); 6] = [
    ("second", 0, 59),
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day-of-month", 1, 31),
    ("month", 1, 12),
    ("day-of-week", 1, 7),
];

/// A validated six field cron expression: second, minute, hour, day-of-month, month,
/// day-of-week. Each field is `*`, `*/n`, `a`, `a-b` or a comma separated list of those.
#[derive(Clone, Debug)]
pub struct CronExpression {
    text: InlineStr,
    schedule: Schedule,
}

impl CronExpression {
    /// Whether `text` is an acceptable expression. Absent or malformed text is `false`.
    pub fn is_cron(text: Option<&str>) -> bool {
        text.map(|x| Self::parse(x).is_ok()).unwrap_or(false)
    }

    pub fn parse(text: &str) -> FlowResult<Self> {
        let fields = text.split_whitespace().collect::<Vec<_>>();
        flow_ensure!(
            fields.len() == FIELDS.len(),
            InvalidCronExpression,
            "Cron expression '{}' has {} fields, expected {}",
            text,
            fields.len(),
            FIELDS.len()
        );
        for (field, (name, min, max)) in fields.iter().zip(FIELDS) {
            Self::check_field(text, field, name, min, max)?;
        }

        let schedule = Schedule::from_str(text).map_err(|e| {
            ErrorCode::InvalidCronExpression(format!("Cron expression '{}': {}", text, e))
        })?;
        Ok(Self {
            text: text.trim().into(),
            schedule,
        })
    }

    fn check_field(text: &str, field: &str, name: &str, min: u32, max: u32) -> FlowResult<()> {
        let number = |x: &str| -> FlowResult<u32> {
            flow_ensure!(
                !x.is_empty() && x.bytes().all(|b| b.is_ascii_digit()),
                InvalidCronExpression,
                "Cron expression '{}': '{}' is not a number in the {} field",
                text,
                x,
                name
            );
            x.parse::<u32>().map_err(|e| {
                ErrorCode::InvalidCronExpression(format!("Cron expression '{}': {}", text, e))
            })
        };
        let in_bounds = |x: u32| -> FlowResult<u32> {
            flow_ensure!(
                (min..=max).contains(&x),
                InvalidCronExpression,
                "Cron expression '{}': {} is outside {}-{} in the {} field",
                text,
                x,
                min,
                max,
                name
            );
            Ok(x)
        };

        for item in field.split(',') {
            if item == "*" {
                continue;
            }
            if let Some(step) = item.strip_prefix("*/") {
                let step = number(step)?;
                flow_ensure!(
                    step > 0,
                    InvalidCronExpression,
                    "Cron expression '{}': step must be positive in the {} field",
                    text,
                    name
                );
                continue;
            }
            match item.split_once('-') {
                Some((from, to)) => {
                    let from = in_bounds(number(from)?)?;
                    let to = in_bounds(number(to)?)?;
                    flow_ensure!(
                        from <= to,
                        InvalidCronExpression,
                        "Cron expression '{}': range {} is reversed in the {} field",
                        text,
                        item,
                        name
                    );
                }
                None => {
                    in_bounds(number(item)?)?;
                }
            }
        }
        Ok(())
    }

    pub fn text(&self) -> &InlineStr {
        &self.text
    }

    /// Whether the expression fires at `instant`, ignoring sub-second precision.
    pub fn matches(&self, instant: &DateTime<Utc>) -> bool {
        self.schedule.includes(instant.trunc_subsecs(0))
    }

    /// First fire time strictly after `instant`.
    pub fn next_after(&self, instant: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(instant).next()
    }
}

impl FromStr for CronExpression {
    type Err = ErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn accepts_six_field_grammar() {
        for text in [
            "* * * * * *",
            "0 0 * * * *",
            "5 * * * * *",
            "*/5 * * * * *",
            "59 23 * * 1 *",
            "20,30 1 * * 1-5 *",
        ] {
            assert!(CronExpression::is_cron(Some(text)), "{}", text);
        }
    }

    #[test]
    fn rejects_malformed_text() {
        for text in [
            "A 1 * * 1-5 *",
            "* * * * *",
            "* * * * * * *",
            "",
            "60 * * * * *",
            "* * 24 * * *",
            "* * * 0 * *",
            "*/0 * * * * *",
            "5-1 * * * * *",
            "1,,2 * * * * *",
        ] {
            assert!(!CronExpression::is_cron(Some(text)), "{}", text);
        }
        assert!(!CronExpression::is_cron(None));
        assert_eq!(
            CronExpression::parse("A 1 * * 1-5 *").err().map(|x| x.code()),
            Some(ErrorCode::invalid_cron_expression_code())
        );
    }

    #[test]
    fn computes_fire_times() {
        let expression = CronExpression::parse("*/5 * * * * *").expect("valid");
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 2).unwrap();
        let next = expression.next_after(&instant).expect("fires again");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).unwrap());
        assert!(expression.matches(&next));
        assert!(!expression.matches(&instant));
    }
}
