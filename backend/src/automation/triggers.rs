// Workflow Triggers - time-based schedules and domain-event subscriptions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::conditions::Condition;
use super::AutomationError;

/// Domain events a workflow can subscribe to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LeadCreated,
    LeadStatusChanged,
    LeadAssigned,
    MessageReceived,
    MessageSent,
    TaskCompleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    fn cron_token(&self) -> &'static str {
        match self {
            Self::Mon => "MON",
            Self::Tue => "TUE",
            Self::Wed => "WED",
            Self::Thu => "THU",
            Self::Fri => "FRI",
            Self::Sat => "SAT",
            Self::Sun => "SUN",
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// What causes a workflow to fire. Exactly one variant by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    TimeBased {
        frequency: Frequency,
        /// "HH:MM", 24-hour clock in the trigger timezone. Ignored for Custom.
        #[serde(default)]
        time: Option<String>,
        #[serde(default)]
        days_of_week: Option<Vec<DayOfWeek>>,
        #[serde(default)]
        day_of_month: Option<u8>,
        #[serde(default)]
        cron_expression: Option<String>,
        #[serde(default = "default_timezone")]
        timezone: String,
    },
    EventBased {
        event_type: EventType,
        #[serde(default)]
        filters: Vec<Condition>,
    },
}

impl Trigger {
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::TimeBased { .. })
    }

    /// Derive the 6-field cron expression (seconds first) for a time-based
    /// trigger. `Err(InvalidSchedule)` on malformed input; `Ok(None)` for
    /// event-based triggers.
    pub fn cron_expression(&self) -> Result<Option<String>, AutomationError> {
        let Self::TimeBased {
            frequency,
            time,
            days_of_week,
            day_of_month,
            cron_expression,
            ..
        } = self
        else {
            return Ok(None);
        };

        let expr = match frequency {
            Frequency::Daily => {
                let (hour, minute) = parse_time(time.as_deref())?;
                format!("0 {minute} {hour} * * *")
            }
            Frequency::Weekly => {
                let (hour, minute) = parse_time(time.as_deref())?;
                let days = days_of_week
                    .as_deref()
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| {
                        AutomationError::InvalidSchedule(
                            "weekly trigger requires at least one day of week".to_string(),
                        )
                    })?;
                let tokens: Vec<&str> = days.iter().map(DayOfWeek::cron_token).collect();
                format!("0 {minute} {hour} * * {}", tokens.join(","))
            }
            Frequency::Monthly => {
                let (hour, minute) = parse_time(time.as_deref())?;
                let dom = day_of_month.unwrap_or(1);
                if !(1..=31).contains(&dom) {
                    return Err(AutomationError::InvalidSchedule(format!(
                        "day of month {dom} out of range"
                    )));
                }
                format!("0 {minute} {hour} {dom} * *")
            }
            Frequency::Custom => {
                let raw = cron_expression.as_deref().map(str::trim).ok_or_else(|| {
                    AutomationError::InvalidSchedule(
                        "custom trigger requires a cron expression".to_string(),
                    )
                })?;
                // Accept the common 5-field form by prefixing seconds.
                match raw.split_whitespace().count() {
                    5 => format!("0 {raw}"),
                    6 | 7 => raw.to_string(),
                    n => {
                        return Err(AutomationError::InvalidSchedule(format!(
                            "cron expression has {n} fields, expected 5-7"
                        )));
                    }
                }
            }
        };

        Ok(Some(expr))
    }

    /// Parse and validate the derived schedule. `Ok(None)` for event-based
    /// triggers.
    pub fn schedule(&self) -> Result<Option<(Schedule, Tz)>, AutomationError> {
        let Some(expr) = self.cron_expression()? else {
            return Ok(None);
        };

        let schedule = Schedule::from_str(&expr)
            .map_err(|e| AutomationError::InvalidSchedule(format!("{expr}: {e}")))?;
        let timezone = match self {
            Self::TimeBased { timezone, .. } => Tz::from_str(timezone)
                .map_err(|_| AutomationError::InvalidSchedule(format!("unknown timezone {timezone}")))?,
            Self::EventBased { .. } => unreachable!("cron_expression returned Some for event trigger"),
        };

        Ok(Some((schedule, timezone)))
    }

    /// Fail fast on malformed schedules; a no-op for event-based triggers.
    pub fn validate(&self) -> Result<(), AutomationError> {
        self.schedule().map(|_| ())
    }

    /// Next firing instant in UTC, or None for event-based triggers.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        let (schedule, tz) = self.schedule().ok().flatten()?;
        schedule.upcoming(tz).next().map(|dt| dt.with_timezone(&Utc))
    }
}

fn parse_time(time: Option<&str>) -> Result<(u32, u32), AutomationError> {
    let raw = time.unwrap_or("09:00");
    let (h, m) = raw.split_once(':').ok_or_else(|| {
        AutomationError::InvalidSchedule(format!("time of day '{raw}' is not HH:MM"))
    })?;
    let hour: u32 = h
        .parse()
        .map_err(|_| AutomationError::InvalidSchedule(format!("invalid hour in '{raw}'")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| AutomationError::InvalidSchedule(format!("invalid minute in '{raw}'")))?;
    if hour > 23 || minute > 59 {
        return Err(AutomationError::InvalidSchedule(format!(
            "time of day '{raw}' out of range"
        )));
    }
    Ok((hour, minute))
}

/// A domain occurrence routed through the Trigger Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Time,
    Event,
}

/// The fire notification sent from the Trigger Manager to the Execution
/// Engine - the sole coupling point between the two.
#[derive(Debug, Clone)]
pub struct TriggerFire {
    pub workflow_id: Uuid,
    pub kind: TriggerKind,
    pub payload: Value,
    pub fired_at: DateTime<Utc>,
}
